use anyhow::Result;
use shuttled_core::ipc::{DaemonEvent, IpcRequest, IpcResponse};

use super::{check_response, connect, read_response, write_request};

/// Stream daemon events to stdout until the daemon goes away or Ctrl-C.
pub async fn run() -> Result<()> {
    let mut stream = connect().await?;
    write_request(&mut stream, &IpcRequest::Subscribe).await?;
    match read_response(&mut stream).await? {
        Some(resp) => {
            check_response(resp)?;
        }
        None => anyhow::bail!("daemon closed the connection"),
    }
    eprintln!("Monitoring daemon events (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            resp = read_response(&mut stream) => match resp? {
                Some(IpcResponse::Event { event }) => println!("{}", describe(&event)),
                Some(_) => anyhow::bail!("unexpected response"),
                None => {
                    eprintln!("daemon disconnected");
                    return Ok(());
                }
            },
        }
    }
}

fn describe(event: &DaemonEvent) -> String {
    match event {
        DaemonEvent::Resolved { key, press, entry } => format!("{key} {press}: {entry}"),
        DaemonEvent::KeySent { code } => format!("key sent: {code}"),
        DaemonEvent::PlaybackOwner { owner } => {
            format!("playback owner: {}", owner.as_deref().unwrap_or("none"))
        }
    }
}
