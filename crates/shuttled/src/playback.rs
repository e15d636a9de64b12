use std::collections::HashMap;
use std::path::{Path, PathBuf};

use shuttled_core::config::PlaybackConfig;
use shuttled_core::state::DaemonState;
use tracing::{debug, info, warn};

/// Playback state of one media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackStatus {
    /// Parse an MPRIS `PlaybackStatus` value. Unknown values count as stopped.
    #[must_use]
    pub fn from_mpris(value: &str) -> Self {
        match value {
            "Playing" => PlaybackStatus::Playing,
            "Paused" => PlaybackStatus::Paused,
            _ => PlaybackStatus::Stopped,
        }
    }
}

/// One entry of the active session list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Stable identity for the session's lifetime (the player's unique bus name).
    pub id: String,
    /// Who plays: the value persisted as the last playback owner.
    pub owner: String,
    pub pid: Option<u32>,
    pub status: PlaybackStatus,
}

/// What the session source reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotification {
    /// The full current session list.
    SessionsChanged(Vec<SessionInfo>),
    StatusChanged { id: String, status: PlaybackStatus },
}

/// Where the last playback owner is persisted.
pub trait PlaybackStore {
    fn last_playback_owner(&self) -> Option<String>;
    /// Best-effort write; failures are logged by the store.
    fn set_last_playback_owner(&mut self, owner: Option<&str>);
}

/// Whether the host is on external power.
pub trait PowerGate {
    fn is_host_powered(&self) -> bool;
    fn reconfigure(&mut self, _config: &PlaybackConfig) {}
}

/// Remembers which external session was most recently playing.
///
/// Each registered session gets a one-shot status watch. When the watch fires
/// it is disarmed first; `Playing` registers the session again, anything else
/// clears the persisted owner only if that session is still the tracked one.
/// Status changes for sessions without an armed watch are ignored.
pub struct PlaybackTracker<S, P> {
    store: S,
    power: P,
    self_pid: u32,
    tracked: Option<String>,
    /// Armed watches: session id to owner.
    watches: HashMap<String, String>,
}

impl<S: PlaybackStore, P: PowerGate> PlaybackTracker<S, P> {
    pub fn new(store: S, power: P) -> Self {
        Self::with_self_pid(store, power, std::process::id())
    }

    pub fn with_self_pid(store: S, power: P, self_pid: u32) -> Self {
        Self {
            store,
            power,
            self_pid,
            tracked: None,
            watches: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn tracked(&self) -> Option<&str> {
        self.tracked.as_deref()
    }

    #[must_use]
    pub fn last_playback_owner(&self) -> Option<String> {
        self.store.last_playback_owner()
    }

    pub fn power_mut(&mut self) -> &mut P {
        &mut self.power
    }

    /// Handle one notification. Returns the persisted owner if it was written.
    pub fn handle(&mut self, notification: SessionNotification) -> Option<Option<String>> {
        match notification {
            SessionNotification::SessionsChanged(sessions) => {
                self.on_active_sessions_changed(&sessions)
            }
            SessionNotification::StatusChanged { id, status } => {
                self.on_status_changed(&id, status)
            }
        }
    }

    pub fn on_active_sessions_changed(
        &mut self,
        sessions: &[SessionInfo],
    ) -> Option<Option<String>> {
        debug!("{} active media sessions", sessions.len());
        // Players that exit while playing never report a status change.
        self.watches
            .retain(|id, _| sessions.iter().any(|session| session.id == *id));

        if !self.power.is_host_powered() {
            debug!("host not powered, skipping playback tracking");
            return None;
        }

        let mut written = None;
        for session in sessions {
            if session.pid == Some(self.self_pid) {
                continue;
            }
            if session.status == PlaybackStatus::Playing {
                written = self.register(&session.id, &session.owner).or(written);
            }
        }
        written
    }

    pub fn on_status_changed(
        &mut self,
        id: &str,
        status: PlaybackStatus,
    ) -> Option<Option<String>> {
        let owner = self.watches.remove(id)?;

        if status == PlaybackStatus::Playing {
            return self.register(id, &owner);
        }
        if self.tracked.as_deref() == Some(id) {
            return self.clear();
        }
        debug!("{owner} stopped but is no longer tracked, ignoring");
        None
    }

    fn register(&mut self, id: &str, owner: &str) -> Option<Option<String>> {
        if !self.power.is_host_powered() {
            return None;
        }
        self.tracked = Some(id.to_owned());
        self.watches.insert(id.to_owned(), owner.to_owned());
        info!("last playback owner: {owner}");
        self.store.set_last_playback_owner(Some(owner));
        Some(Some(owner.to_owned()))
    }

    fn clear(&mut self) -> Option<Option<String>> {
        if !self.power.is_host_powered() {
            return None;
        }
        self.tracked = None;
        info!("tracked playback stopped, clearing last playback owner");
        self.store.set_last_playback_owner(None);
        Some(None)
    }
}

/// Persists the owner in the daemon state file.
pub struct FileStore {
    path: PathBuf,
    state: DaemonState,
}

impl FileStore {
    /// Open the state file, starting empty when it is missing or unreadable.
    pub fn open(path: PathBuf) -> Self {
        let state = DaemonState::load(&path).unwrap_or_else(|e| {
            warn!("{e}; starting with empty state");
            DaemonState::default()
        });
        Self { path, state }
    }
}

impl PlaybackStore for FileStore {
    fn last_playback_owner(&self) -> Option<String> {
        self.state.last_playback_owner.clone()
    }

    fn set_last_playback_owner(&mut self, owner: Option<&str>) {
        self.state.last_playback_owner = owner.map(str::to_owned);
        if let Err(e) = self.state.save(&self.path) {
            warn!("failed to persist last playback owner: {e}");
        }
    }
}

/// Reads `/sys/class/power_supply`.
///
/// Powered when any `Mains` supply is online, or when the machine has no
/// `Mains` supply at all. With `required` off the gate always holds.
pub struct PowerSupplyGate {
    root: PathBuf,
    required: bool,
}

impl PowerSupplyGate {
    pub fn new(required: bool) -> Self {
        Self::with_root(PathBuf::from("/sys/class/power_supply"), required)
    }

    pub fn with_root(root: PathBuf, required: bool) -> Self {
        Self { root, required }
    }
}

impl PowerGate for PowerSupplyGate {
    fn is_host_powered(&self) -> bool {
        !self.required || mains_online(&self.root)
    }

    fn reconfigure(&mut self, config: &PlaybackConfig) {
        self.required = config.require_host_power;
    }
}

fn mains_online(root: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(root) else {
        return true;
    };

    let mut has_mains = false;
    for entry in entries.flatten() {
        let supply = entry.path();
        let Ok(kind) = std::fs::read_to_string(supply.join("type")) else {
            continue;
        };
        if kind.trim() != "Mains" {
            continue;
        }
        has_mains = true;
        match std::fs::read_to_string(supply.join("online")) {
            Ok(online) if online.trim() == "1" => return true,
            _ => {}
        }
    }
    !has_mains
}
