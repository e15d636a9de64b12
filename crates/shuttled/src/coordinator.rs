use shuttled_core::action::ActionMap;
use shuttled_core::config::DeviceConfig;
use shuttled_core::ipc::DeviceEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::device::{DeviceHub, DeviceLink};
use crate::disambiguator::{KeyDisambiguator, ResolvedAction};
use crate::dispatch::ActionDispatcher;
use crate::host::Host;

/// Owns the device subscription and feeds key events through the
/// disambiguator into the dispatcher.
///
/// The subscription lives as long as the coordinator so connectivity is seen
/// in arrival order. While stopped, key events are dropped and a `Connected`
/// event restarts input when `restart_on_connect` is set. A second `start`
/// while running does nothing; `stop` may be called any number of times.
pub struct DeviceInputCoordinator<L> {
    link: L,
    events: broadcast::Receiver<DeviceEvent>,
    running: bool,
    restart_on_connect: bool,
    disambiguator: KeyDisambiguator,
}

impl<L: DeviceLink> DeviceInputCoordinator<L> {
    pub fn new(link: L, hub: &DeviceHub) -> Self {
        Self {
            link,
            events: hub.subscribe(),
            running: false,
            restart_on_connect: true,
            disambiguator: KeyDisambiguator::new(),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start listening. Events queued while stopped are discarded.
    pub fn start(&mut self) {
        if self.running {
            debug!("coordinator already running");
            return;
        }
        self.events = self.events.resubscribe();
        self.resume();
    }

    /// Start listening from the current position in the event stream.
    fn resume(&mut self) {
        if !self.link.is_connected() {
            self.link.connect();
        }
        self.running = true;
        info!("device input started");
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.link.disconnect();
        self.disambiguator.reset();
        info!("device input stopped");
    }

    pub fn reconfigure(&mut self, config: &DeviceConfig) {
        self.restart_on_connect = config.restart_on_connect;
        self.link.reconfigure(config);
    }

    /// Wait for the next device event. Pending forever once the hub is gone.
    pub async fn next_event(&mut self) -> DeviceEvent {
        loop {
            match self.events.recv().await {
                Ok(event) => return event,
                Err(RecvError::Lagged(n)) => {
                    warn!("device input lagged, {n} events dropped");
                }
                Err(RecvError::Closed) => {
                    warn!("device event source closed");
                    return std::future::pending().await;
                }
            }
        }
    }

    /// Route one device event. Returns the actions it resolved and dispatched.
    pub fn handle_event<H: Host>(
        &mut self,
        event: DeviceEvent,
        map: &impl ActionMap,
        dispatcher: &ActionDispatcher<H>,
        now: Instant,
    ) -> Vec<ResolvedAction> {
        if !self.running {
            if event == DeviceEvent::Connected && self.restart_on_connect {
                info!("device reconnected, restarting input");
                self.resume();
            }
            return Vec::new();
        }
        match event {
            DeviceEvent::KeyDown { key } => {
                self.disambiguator.key_down(key, map, now);
                Vec::new()
            }
            DeviceEvent::KeyUp { key } => self
                .disambiguator
                .key_up(key, map)
                .into_iter()
                .inspect(|resolved| dispatcher.dispatch(&resolved.entry))
                .collect(),
            DeviceEvent::Connected => {
                debug!("device connected");
                Vec::new()
            }
            DeviceEvent::Disconnected => {
                info!("device disconnected");
                self.stop();
                Vec::new()
            }
        }
    }

    /// Resolve and dispatch every hold whose deadline has passed.
    pub fn fire_due<H: Host>(
        &mut self,
        map: &impl ActionMap,
        dispatcher: &ActionDispatcher<H>,
        now: Instant,
    ) -> Vec<ResolvedAction> {
        let fired = self.disambiguator.fire_due(map, now);
        for resolved in &fired {
            dispatcher.dispatch(&resolved.entry);
        }
        fired
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.disambiguator.next_deadline()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::mock::{LinkCall, RecordingLink};
    use crate::host::mock::{HostCall, RecordingHost};
    use shuttled_core::action::{ActionEntry, ActionKind, PressKind};
    use shuttled_core::config::{Config, HostConfig, KeyConfig};
    use shuttled_core::key::KeyId;

    struct Fixture {
        coordinator: DeviceInputCoordinator<RecordingLink>,
        link: RecordingLink,
        hub: DeviceHub,
        dispatcher: ActionDispatcher<RecordingHost>,
        host: RecordingHost,
        config: Config,
    }

    fn fixture(link_connected: bool) -> Fixture {
        let hub = DeviceHub::new();
        let link = RecordingLink {
            connected: link_connected,
            ..Default::default()
        };
        let host = RecordingHost::default();
        let mut config = Config::default();
        config.set_key(
            KeyId::button(0).unwrap(),
            KeyConfig {
                hold_delay_ms: 500,
                press: ActionEntry::new(ActionKind::GoHome),
                hold: ActionEntry::new(ActionKind::LaunchVoiceAssist),
            },
        );
        Fixture {
            coordinator: DeviceInputCoordinator::new(link.clone(), &hub),
            link,
            hub,
            dispatcher: ActionDispatcher::new(host.clone(), &HostConfig::default()),
            host,
            config,
        }
    }

    async fn pump(f: &mut Fixture, now: Instant) -> Vec<ResolvedAction> {
        let event = f.coordinator.next_event().await;
        f.coordinator
            .handle_event(event, &f.config, &f.dispatcher, now)
    }

    #[test]
    fn start_connects_only_when_disconnected() {
        let mut f = fixture(false);
        f.coordinator.start();
        f.coordinator.start();
        assert!(f.coordinator.is_running());
        assert_eq!(f.link.calls(), [LinkCall::Connect]);

        let mut g = fixture(true);
        g.coordinator.start();
        assert!(g.link.calls().is_empty());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut f = fixture(true);
        f.coordinator.stop();
        assert!(f.link.calls().is_empty());

        f.coordinator.start();
        f.coordinator.stop();
        f.coordinator.stop();
        assert!(!f.coordinator.is_running());
        assert_eq!(f.link.calls(), [LinkCall::Disconnect]);
    }

    #[tokio::test]
    async fn press_flows_to_dispatcher() {
        let mut f = fixture(true);
        let key = KeyId::button(0).unwrap();
        f.coordinator.start();
        let t0 = Instant::now();

        f.hub.publish(DeviceEvent::KeyDown { key });
        f.hub.publish(DeviceEvent::KeyUp { key });

        assert!(pump(&mut f, t0).await.is_empty());
        let resolved = pump(&mut f, t0 + Duration::from_millis(100)).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].press, PressKind::Press);
        assert_eq!(f.host.calls(), [HostCall::GoHome]);
    }

    #[tokio::test]
    async fn hold_fires_from_deadline() {
        let mut f = fixture(true);
        let key = KeyId::button(0).unwrap();
        f.coordinator.start();
        let t0 = Instant::now();

        f.hub.publish(DeviceEvent::KeyDown { key });
        pump(&mut f, t0).await;

        let deadline = f.coordinator.next_deadline().unwrap();
        assert_eq!(deadline, t0 + Duration::from_millis(500));
        let fired = f.coordinator.fire_due(&f.config, &f.dispatcher, deadline);
        assert_eq!(fired.len(), 1);
        assert_eq!(f.host.calls(), [HostCall::VoiceAssistant]);

        f.hub.publish(DeviceEvent::KeyUp { key });
        assert!(pump(&mut f, deadline).await.is_empty());
        assert_eq!(f.host.calls().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_stops_and_drops_pending_holds() {
        let mut f = fixture(true);
        let key = KeyId::button(0).unwrap();
        f.coordinator.start();
        let t0 = Instant::now();

        f.hub.publish(DeviceEvent::KeyDown { key });
        f.hub.publish(DeviceEvent::Disconnected);
        pump(&mut f, t0).await;
        pump(&mut f, t0).await;

        assert!(!f.coordinator.is_running());
        assert_eq!(f.coordinator.next_deadline(), None);
        assert_eq!(f.link.calls(), [LinkCall::Disconnect]);

        let stopped = f
            .coordinator
            .handle_event(DeviceEvent::KeyUp { key }, &f.config, &f.dispatcher, t0);
        assert!(stopped.is_empty());
        assert!(f.host.calls().is_empty());
    }

    #[tokio::test]
    async fn stopped_coordinator_drops_key_events() {
        let mut f = fixture(true);
        let key = KeyId::button(0).unwrap();
        let t0 = Instant::now();

        f.hub.publish(DeviceEvent::KeyDown { key });
        f.hub.publish(DeviceEvent::KeyUp { key });
        pump(&mut f, t0).await;
        pump(&mut f, t0).await;

        assert!(!f.coordinator.is_running());
        assert_eq!(f.coordinator.next_deadline(), None);
        assert!(f.host.calls().is_empty());
    }

    #[tokio::test]
    async fn reconnect_queued_behind_disconnect_restarts_input() {
        let mut f = fixture(true);
        let key = KeyId::button(0).unwrap();
        f.coordinator.start();
        let t0 = Instant::now();

        f.hub.publish(DeviceEvent::KeyDown { key });
        f.hub.publish(DeviceEvent::Disconnected);
        f.hub.publish(DeviceEvent::Connected);
        f.hub.publish(DeviceEvent::KeyDown { key });
        f.hub.publish(DeviceEvent::KeyUp { key });
        for _ in 0..5 {
            pump(&mut f, t0).await;
        }

        assert!(f.coordinator.is_running());
        assert_eq!(f.link.calls(), [LinkCall::Disconnect]);
        assert_eq!(f.host.calls(), [HostCall::GoHome]);
    }

    #[tokio::test]
    async fn connected_is_ignored_without_restart_on_connect() {
        let mut f = fixture(true);
        f.coordinator.reconfigure(&DeviceConfig {
            restart_on_connect: false,
            ..Default::default()
        });
        f.hub.publish(DeviceEvent::Connected);
        pump(&mut f, Instant::now()).await;
        assert!(!f.coordinator.is_running());
    }

    #[tokio::test]
    async fn start_discards_events_queued_while_stopped() {
        let mut f = fixture(true);
        let key = KeyId::button(0).unwrap();
        f.hub.publish(DeviceEvent::KeyDown { key });
        f.coordinator.start();
        f.hub.publish(DeviceEvent::KeyUp { key });

        // The stale key-down is gone, so the key-up finds nothing pending.
        assert!(pump(&mut f, Instant::now()).await.is_empty());
        assert_eq!(f.coordinator.next_deadline(), None);
        assert!(f.host.calls().is_empty());
    }

    #[tokio::test]
    async fn restart_resubscribes_once() {
        let mut f = fixture(true);
        let key = KeyId::button(0).unwrap();
        f.coordinator.start();
        f.coordinator.stop();
        f.coordinator.start();
        f.coordinator.start();

        f.hub.publish(DeviceEvent::KeyDown { key });
        f.hub.publish(DeviceEvent::KeyUp { key });
        let t0 = Instant::now();
        pump(&mut f, t0).await;
        pump(&mut f, t0).await;

        assert_eq!(f.host.calls(), [HostCall::GoHome]);
    }
}
