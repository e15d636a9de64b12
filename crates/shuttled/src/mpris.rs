use std::collections::HashMap;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedValue;
use zbus::{MatchRule, MessageStream};

use crate::playback::{PlaybackStatus, SessionInfo, SessionNotification};

const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_IFACE: &str = "org.mpris.MediaPlayer2.Player";
const DBUS_SERVICE: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";
const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";

/// Watch MPRIS players on the session bus and report them as media sessions.
///
/// Player appearance and disappearance produce a full session list; a
/// `PlaybackStatus` change produces a status notification for that player's
/// unique bus name. If the bus cannot be watched, logs a warning and awaits
/// cancellation.
pub async fn run(
    conn: zbus::Connection,
    tx: mpsc::Sender<SessionNotification>,
    cancel: CancellationToken,
) {
    let (mut owners, mut properties) = match subscribe(&conn).await {
        Ok(streams) => streams,
        Err(e) => {
            warn!("failed to watch MPRIS players (playback tracking disabled): {e}");
            cancel.cancelled().await;
            return;
        }
    };

    info!("watching MPRIS players");
    if send_session_list(&conn, &tx).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(msg) = owners.next() => {
                let Ok(msg) = msg else { continue };
                let Ok((name, _old, _new)) = msg.body().deserialize::<(String, String, String)>()
                else {
                    continue;
                };
                if name.starts_with(MPRIS_PREFIX) {
                    debug!("MPRIS player {name} changed owner");
                    if send_session_list(&conn, &tx).await.is_err() {
                        break;
                    }
                }
            }

            Some(msg) = properties.next() => {
                let Ok(msg) = msg else { continue };
                let header = msg.header();
                let Some(sender) = header.sender() else { continue };
                let Ok((iface, changed, _invalidated)) = msg
                    .body()
                    .deserialize::<(String, HashMap<String, OwnedValue>, Vec<String>)>()
                else {
                    continue;
                };
                if let Some(status) = status_change(&iface, changed) {
                    let notification = SessionNotification::StatusChanged {
                        id: sender.to_string(),
                        status,
                    };
                    if tx.send(notification).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    debug!("MPRIS watcher stopped");
}

async fn subscribe(conn: &zbus::Connection) -> Result<(MessageStream, MessageStream), zbus::Error> {
    let owner_rule = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .sender(DBUS_SERVICE)?
        .interface(DBUS_SERVICE)?
        .member("NameOwnerChanged")?
        .build();
    let properties_rule = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .interface(PROPERTIES_IFACE)?
        .member("PropertiesChanged")?
        .path(MPRIS_PATH)?
        .build();

    let owners = MessageStream::for_match_rule(owner_rule, conn, Some(64)).await?;
    let properties = MessageStream::for_match_rule(properties_rule, conn, Some(64)).await?;
    Ok((owners, properties))
}

/// Send the current player list. Fails only when the receiver is gone.
async fn send_session_list(
    conn: &zbus::Connection,
    tx: &mpsc::Sender<SessionNotification>,
) -> Result<(), SendError<SessionNotification>> {
    forward_sessions(tx, list_sessions(conn).await).await
}

async fn forward_sessions(
    tx: &mpsc::Sender<SessionNotification>,
    listed: Result<Vec<SessionInfo>, zbus::Error>,
) -> Result<(), SendError<SessionNotification>> {
    match listed {
        Ok(sessions) => tx.send(SessionNotification::SessionsChanged(sessions)).await,
        Err(e) => {
            warn!("failed to list MPRIS players: {e}");
            Ok(())
        }
    }
}

/// Current players in bus-name order.
async fn list_sessions(conn: &zbus::Connection) -> Result<Vec<SessionInfo>, zbus::Error> {
    let reply = conn
        .call_method(
            Some(DBUS_SERVICE),
            DBUS_PATH,
            Some(DBUS_SERVICE),
            "ListNames",
            &(),
        )
        .await?;

    let mut names: Vec<String> = reply.body().deserialize()?;
    names.retain(|n| n.starts_with(MPRIS_PREFIX));
    names.sort();

    let mut sessions = Vec::with_capacity(names.len());
    for name in names {
        // Players can vanish between ListNames and these calls.
        let Some(id) = name_owner(conn, &name).await else {
            continue;
        };
        sessions.push(SessionInfo {
            owner: player_owner(&name).to_owned(),
            pid: unix_pid(conn, &name).await,
            status: playback_status(conn, &name).await,
            id,
        });
    }
    Ok(sessions)
}

async fn name_owner(conn: &zbus::Connection, name: &str) -> Option<String> {
    let reply = conn
        .call_method(
            Some(DBUS_SERVICE),
            DBUS_PATH,
            Some(DBUS_SERVICE),
            "GetNameOwner",
            &(name,),
        )
        .await
        .ok()?;
    reply.body().deserialize().ok()
}

async fn unix_pid(conn: &zbus::Connection, name: &str) -> Option<u32> {
    let reply = conn
        .call_method(
            Some(DBUS_SERVICE),
            DBUS_PATH,
            Some(DBUS_SERVICE),
            "GetConnectionUnixProcessID",
            &(name,),
        )
        .await
        .ok()?;
    reply.body().deserialize().ok()
}

async fn playback_status(conn: &zbus::Connection, name: &str) -> PlaybackStatus {
    try_playback_status(conn, name)
        .await
        .unwrap_or(PlaybackStatus::Stopped)
}

async fn try_playback_status(conn: &zbus::Connection, name: &str) -> Option<PlaybackStatus> {
    let reply = conn
        .call_method(
            Some(name),
            MPRIS_PATH,
            Some(PROPERTIES_IFACE),
            "Get",
            &(PLAYER_IFACE, "PlaybackStatus"),
        )
        .await
        .ok()?;
    // The return type is Variant<String>
    let val: OwnedValue = reply.body().deserialize().ok()?;
    let s: String = val.try_into().ok()?;
    Some(PlaybackStatus::from_mpris(&s))
}

/// Player name without the MPRIS prefix or an `.instance…` suffix.
fn player_owner(bus_name: &str) -> &str {
    let name = bus_name.strip_prefix(MPRIS_PREFIX).unwrap_or(bus_name);
    match name.split_once(".instance") {
        Some((owner, _)) if !owner.is_empty() => owner,
        _ => name,
    }
}

fn status_change(iface: &str, mut changed: HashMap<String, OwnedValue>) -> Option<PlaybackStatus> {
    if iface != PLAYER_IFACE {
        return None;
    }
    let value = changed.remove("PlaybackStatus")?;
    let s: String = value.try_into().ok()?;
    Some(PlaybackStatus::from_mpris(&s))
}
