use shuttled_core::action::{ActionEntry, ActionKind};
use shuttled_core::config::HostConfig;
use tracing::{debug, warn};

use crate::host::{Host, NavigationIntent};

/// Intent URI that opens turn-by-turn navigation in free-drive mode.
pub const DRIVING_MODE_URI: &str = "google.navigation:/?free=1&mode=d&entry=fnls";

/// Turns an action entry into exactly one host side effect.
///
/// Dispatch never fails: bad extras and missing apps are logged and dropped.
pub struct ActionDispatcher<H> {
    host: H,
    navigation_app: String,
}

impl<H: Host> ActionDispatcher<H> {
    pub fn new(host: H, config: &HostConfig) -> Self {
        Self {
            host,
            navigation_app: config.navigation_app.clone(),
        }
    }

    pub fn reconfigure(&mut self, config: &HostConfig) {
        self.navigation_app = config.navigation_app.clone();
        self.host.reconfigure(config);
    }

    pub fn dispatch(&self, entry: &ActionEntry) {
        match entry.kind {
            ActionKind::None => {}
            ActionKind::LaunchApp => {
                let Some(app_id) = entry.extra.as_deref().map(str::trim).filter(|s| !s.is_empty())
                else {
                    warn!("launch_app without an application id, ignoring");
                    return;
                };
                if !self.host.launch(app_id) {
                    debug!("no launchable desktop entry for {app_id}");
                }
            }
            ActionKind::SendKeyEvent => match entry.key_code() {
                Ok(code) => {
                    debug!("sending key {code}");
                    self.host.send_synthetic_key(code);
                    self.host.notify_key_sent(code);
                }
                Err(e) => warn!("ignoring send_key_event: {e}"),
            },
            ActionKind::StartDrivingMode => {
                let intent = NavigationIntent {
                    app: self.navigation_app.clone(),
                    uri: DRIVING_MODE_URI.to_owned(),
                };
                if !self.host.start_navigation(&intent) {
                    warn!("navigation app {} is not installed", intent.app);
                }
            }
            ActionKind::GoHome => self.host.go_home(),
            ActionKind::LaunchVoiceAssist => self.host.launch_voice_assistant(),
        }
    }

    #[cfg(test)]
    pub fn host(&self) -> &H {
        &self.host
    }
}
