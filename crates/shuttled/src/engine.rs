use std::path::{Path, PathBuf};

use shuttled_core::action::{ActionEntry, ActionMap, PressKind};
use shuttled_core::config::Config;
use shuttled_core::ipc::{DaemonEvent, IpcRequest, IpcResponse, MappingInfo};
use shuttled_core::key::KeyId;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::DeviceInputCoordinator;
use crate::device::{DeviceHub, DeviceLink};
use crate::disambiguator::ResolvedAction;
use crate::dispatch::ActionDispatcher;
use crate::host::Host;
use crate::playback::{PlaybackStore, PlaybackTracker, PowerGate, SessionNotification};
use crate::timer;

/// An IPC request bundled with its reply channel.
pub struct IpcMessage {
    pub request: IpcRequest,
    pub reply_tx: oneshot::Sender<IpcResponse>,
}

/// All channel endpoints consumed by the engine.
pub struct EngineChannels {
    pub ipc_request_rx: mpsc::Receiver<IpcMessage>,
    pub config_reload_rx: mpsc::Receiver<()>,
    pub config_self_write_tx: mpsc::Sender<()>,
    pub session_rx: mpsc::Receiver<SessionNotification>,
    pub events_tx: broadcast::Sender<DaemonEvent>,
}

/// The components the engine drives.
pub struct Components<L, H, S, P> {
    pub hub: DeviceHub,
    pub coordinator: DeviceInputCoordinator<L>,
    pub dispatcher: ActionDispatcher<H>,
    pub tracker: PlaybackTracker<S, P>,
}

/// Mutable state owned by the engine loop.
struct EngineState<L, H, S, P> {
    config: Config,
    config_path: PathBuf,
    hub: DeviceHub,
    coordinator: DeviceInputCoordinator<L>,
    dispatcher: ActionDispatcher<H>,
    tracker: PlaybackTracker<S, P>,
    events_tx: broadcast::Sender<DaemonEvent>,
}

impl<L, H, S, P> EngineState<L, H, S, P>
where
    L: DeviceLink,
    H: Host,
    S: PlaybackStore,
    P: PowerGate,
{
    fn publish(&self, event: DaemonEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn report(&self, resolved: Vec<ResolvedAction>) {
        for ResolvedAction { key, press, entry } in resolved {
            debug!(%key, %press, "resolved {entry}");
            self.publish(DaemonEvent::Resolved { key, press, entry });
        }
    }

    /// Push config sections into the components that cache them.
    fn apply_config(&mut self) {
        for warning in self.config.validate() {
            warn!("config [{}]: {}", warning.section, warning.message);
        }
        self.dispatcher.reconfigure(&self.config.host);
        self.coordinator.reconfigure(&self.config.device);
        self.tracker.power_mut().reconfigure(&self.config.playback);
    }
}

/// Central engine loop.
pub async fn run<L, H, S, P>(
    config: Config,
    config_path: PathBuf,
    components: Components<L, H, S, P>,
    channels: EngineChannels,
    cancel: CancellationToken,
) where
    L: DeviceLink,
    H: Host,
    S: PlaybackStore,
    P: PowerGate,
{
    let EngineChannels {
        mut ipc_request_rx,
        mut config_reload_rx,
        config_self_write_tx,
        mut session_rx,
        events_tx,
    } = channels;
    let Components {
        hub,
        coordinator,
        dispatcher,
        tracker,
    } = components;

    let mut state = EngineState {
        config,
        config_path,
        hub,
        coordinator,
        dispatcher,
        tracker,
        events_tx,
    };
    state.apply_config();
    state.coordinator.start();

    info!("engine started");

    loop {
        let deadline = state.coordinator.next_deadline();

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("engine received shutdown signal");
                break;
            }

            // Device events, in arrival order
            event = state.coordinator.next_event() => {
                let resolved = state.coordinator.handle_event(
                    event,
                    &state.config,
                    &state.dispatcher,
                    Instant::now(),
                );
                state.report(resolved);
            }

            // Hold deadlines
            () = timer::sleep_until(deadline) => {
                let resolved = state.coordinator.fire_due(
                    &state.config,
                    &state.dispatcher,
                    Instant::now(),
                );
                state.report(resolved);
            }

            // Media session notifications
            Some(notification) = session_rx.recv() => {
                if !state.config.playback.enabled {
                    continue;
                }
                if let Some(owner) = state.tracker.handle(notification) {
                    state.publish(DaemonEvent::PlaybackOwner { owner });
                }
            }

            // IPC requests
            Some(msg) = ipc_request_rx.recv() => {
                let response = handle_ipc_request(
                    msg.request,
                    &mut state,
                    &config_self_write_tx,
                    &cancel,
                ).await;
                // Client may have disconnected; reply is best-effort.
                let _ = msg.reply_tx.send(response);
            }

            // Config reload notification
            Some(()) = config_reload_rx.recv() => {
                info!("config reload triggered");
                match Config::load(&state.config_path) {
                    Ok(new_config) => {
                        state.config = new_config;
                        state.apply_config();
                        info!("config reloaded successfully");
                        match state.config.to_toml() {
                            Ok(toml) => debug!("active config:\n{toml}"),
                            Err(e) => warn!("failed to serialize config for logging: {e}"),
                        }
                    }
                    Err(e) => {
                        warn!("config reload failed (keeping previous config): {e}");
                    }
                }
            }
        }
    }

    state.coordinator.stop();
    info!("engine stopped");
}

/// Save config and notify the watcher to suppress redundant reload.
async fn save_and_notify(
    config: &Config,
    path: &Path,
    self_write_tx: &mpsc::Sender<()>,
) -> IpcResponse {
    if let Err(e) = config.save(path) {
        return IpcResponse::Error {
            message: format!("failed to save config: {e}"),
        };
    }
    // Config watcher will detect the write independently; this signal just avoids
    // a redundant reload. Non-critical if dropped.
    let _ = self_write_tx.send(()).await;
    IpcResponse::Ok
}

async fn handle_ipc_request<L, H, S, P>(
    request: IpcRequest,
    state: &mut EngineState<L, H, S, P>,
    config_self_write_tx: &mpsc::Sender<()>,
    cancel: &CancellationToken,
) -> IpcResponse
where
    L: DeviceLink,
    H: Host,
    S: PlaybackStore,
    P: PowerGate,
{
    match request {
        IpcRequest::GetStatus => IpcResponse::Status {
            running: state.coordinator.is_running(),
            device_connected: state.hub.is_connected(),
            last_playback_owner: state.tracker.last_playback_owner(),
            mappings: build_mapping_info(&state.config),
        },
        IpcRequest::Device { event } => {
            debug!("driver event: {event:?}");
            state.hub.publish(event);
            IpcResponse::Ok
        }
        IpcRequest::Start => {
            state.coordinator.start();
            IpcResponse::Ok
        }
        IpcRequest::Stop => {
            state.coordinator.stop();
            IpcResponse::Ok
        }
        IpcRequest::Dispatch { entry } => {
            if let Err(e) = entry.validate() {
                return IpcResponse::Error {
                    message: e.to_string(),
                };
            }
            info!("dispatching {entry} on request");
            state.dispatcher.dispatch(&entry);
            IpcResponse::Ok
        }
        IpcRequest::Assign { key, slot, entry } => {
            if let Err(e) = entry.validate() {
                return IpcResponse::Error {
                    message: e.to_string(),
                };
            }
            let key_config = state.config.key_mut(key);
            match slot {
                PressKind::Press => key_config.press = entry,
                PressKind::Hold => key_config.hold = entry,
            }
            save_and_notify(&state.config, &state.config_path, config_self_write_tx).await
        }
        IpcRequest::SetHoldDelay { key, hold_delay_ms } => {
            if hold_delay_ms == 0 {
                return IpcResponse::Error {
                    message: "hold delay must be at least 1 ms".into(),
                };
            }
            state.config.key_mut(key).hold_delay_ms = hold_delay_ms;
            save_and_notify(&state.config, &state.config_path, config_self_write_tx).await
        }
        IpcRequest::Unassign { key } => {
            state.config.remove_key(key);
            save_and_notify(&state.config, &state.config_path, config_self_write_tx).await
        }
        IpcRequest::GetConfig => match state.config.to_toml() {
            Ok(toml) => IpcResponse::Config { toml },
            Err(e) => IpcResponse::Error {
                message: format!("failed to serialize config: {e}"),
            },
        },
        IpcRequest::ReloadConfig => match Config::load(&state.config_path) {
            Ok(new_config) => {
                state.config = new_config;
                state.apply_config();
                IpcResponse::Ok
            }
            Err(e) => IpcResponse::Error {
                message: format!("failed to reload config: {e}"),
            },
        },
        IpcRequest::Subscribe => IpcResponse::Error {
            message: "subscribe is served by the IPC connection, not the engine".into(),
        },
        IpcRequest::Shutdown => {
            cancel.cancel();
            IpcResponse::Ok
        }
    }
}

fn build_mapping_info(config: &Config) -> Vec<MappingInfo> {
    let describe = |entry: ActionEntry| {
        (!entry.is_none()).then(|| entry.to_string())
    };

    KeyId::all()
        .filter_map(|key| {
            let press = describe(config.press_action(key));
            let hold = describe(config.hold_action(key));
            (press.is_some() || hold.is_some()).then(|| MappingInfo {
                key: key.config_key(),
                press,
                hold,
                hold_delay_ms: config.hold_delay_ms(key),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::mock::{LinkCall, RecordingLink};
    use crate::host::mock::{HostCall, RecordingHost};
    use crate::playback::{FileStore, PlaybackStatus, PowerSupplyGate, SessionInfo};
    use shuttled_core::action::ActionKind;
    use shuttled_core::config::KeyConfig;
    use shuttled_core::ipc::DeviceEvent;

    struct Harness {
        ipc_tx: mpsc::Sender<IpcMessage>,
        session_tx: mpsc::Sender<SessionNotification>,
        _reload_tx: mpsc::Sender<()>,
        _self_write_rx: mpsc::Receiver<()>,
        events_rx: broadcast::Receiver<DaemonEvent>,
        host: RecordingHost,
        link: RecordingLink,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
        _dir: tempfile::TempDir,
        config_path: PathBuf,
    }

    impl Harness {
        async fn request(&self, request: IpcRequest) -> IpcResponse {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.ipc_tx
                .send(IpcMessage { request, reply_tx })
                .await
                .unwrap();
            reply_rx.await.unwrap()
        }

        async fn device(&self, event: DeviceEvent) {
            assert!(matches!(
                self.request(IpcRequest::Device { event }).await,
                IpcResponse::Ok
            ));
        }

        async fn shutdown(self) {
            self.cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(1), self.handle).await;
        }
    }

    fn button(n: u8) -> KeyId {
        KeyId::button(n).unwrap()
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.set_key(
            button(0),
            KeyConfig {
                hold_delay_ms: 1000,
                press: ActionEntry::new(ActionKind::GoHome),
                hold: ActionEntry::new(ActionKind::LaunchVoiceAssist),
            },
        );
        config.set_key(
            button(3),
            KeyConfig {
                hold_delay_ms: 800,
                press: ActionEntry::new(ActionKind::GoHome),
                hold: ActionEntry::NONE,
            },
        );
        config.set_key(
            KeyId::WHEEL_RIGHT,
            KeyConfig {
                press: ActionEntry::with_extra(ActionKind::SendKeyEvent, "163"),
                ..Default::default()
            },
        );
        config
    }

    fn spawn_engine(config: Config) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        let (ipc_tx, ipc_request_rx) = mpsc::channel(8);
        let (session_tx, session_rx) = mpsc::channel(8);
        let (reload_tx, config_reload_rx) = mpsc::channel(4);
        let (config_self_write_tx, self_write_rx) = mpsc::channel(4);
        let (events_tx, events_rx) = broadcast::channel(32);

        let hub = DeviceHub::new();
        let link = RecordingLink {
            connected: true,
            ..Default::default()
        };
        let host = RecordingHost::default();
        let components = Components {
            coordinator: DeviceInputCoordinator::new(link.clone(), &hub),
            hub,
            dispatcher: ActionDispatcher::new(host.clone(), &config.host),
            tracker: PlaybackTracker::with_self_pid(
                FileStore::open(dir.path().join("state.json")),
                PowerSupplyGate::new(false),
                1,
            ),
        };
        let channels = EngineChannels {
            ipc_request_rx,
            config_reload_rx,
            config_self_write_tx,
            session_rx,
            events_tx,
        };

        let cancel = CancellationToken::new();
        let engine_cancel = cancel.clone();
        let engine_path = config_path.clone();
        let handle = tokio::spawn(async move {
            run(config, engine_path, components, channels, engine_cancel).await;
        });

        Harness {
            ipc_tx,
            session_tx,
            _reload_tx: reload_tx,
            _self_write_rx: self_write_rx,
            events_rx,
            host,
            link,
            cancel,
            handle,
            _dir: dir,
            config_path,
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<DaemonEvent>) -> DaemonEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for daemon event")
            .expect("event channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn short_press_dispatches_press_action() {
        let mut h = spawn_engine(test_config());

        h.device(DeviceEvent::KeyDown { key: button(0) }).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.device(DeviceEvent::KeyUp { key: button(0) }).await;

        let event = next_event(&mut h.events_rx).await;
        assert_eq!(
            event,
            DaemonEvent::Resolved {
                key: button(0),
                press: PressKind::Press,
                entry: ActionEntry::new(ActionKind::GoHome),
            }
        );
        assert_eq!(h.host.calls(), [HostCall::GoHome]);
        h.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn held_key_fires_once_without_release() {
        let mut h = spawn_engine(test_config());

        h.device(DeviceEvent::KeyDown { key: button(0) }).await;
        let event = next_event(&mut h.events_rx).await;
        assert!(matches!(
            event,
            DaemonEvent::Resolved {
                press: PressKind::Hold,
                ..
            }
        ));

        h.device(DeviceEvent::KeyUp { key: button(0) }).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.host.calls(), [HostCall::VoiceAssistant]);
        h.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hold_with_empty_slot_falls_back_to_press() {
        let mut h = spawn_engine(test_config());

        h.device(DeviceEvent::KeyDown { key: button(3) }).await;
        tokio::time::sleep(Duration::from_millis(900)).await;
        h.device(DeviceEvent::KeyUp { key: button(3) }).await;

        match next_event(&mut h.events_rx).await {
            DaemonEvent::Resolved { key, press, entry } => {
                assert_eq!(key, button(3));
                assert_eq!(press, PressKind::Hold);
                assert_eq!(entry.kind, ActionKind::GoHome);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.host.calls(), [HostCall::GoHome]);
        h.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_key_reports_key_sent() {
        let h = spawn_engine(test_config());

        h.device(DeviceEvent::KeyDown {
            key: KeyId::WHEEL_RIGHT,
        })
        .await;
        h.device(DeviceEvent::KeyUp {
            key: KeyId::WHEEL_RIGHT,
        })
        .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            h.host.calls(),
            [HostCall::SyntheticKey(163), HostCall::KeySentNotice(163)]
        );
        h.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_and_reconnect_restarts() {
        let h = spawn_engine(test_config());

        h.device(DeviceEvent::Connected).await;
        h.device(DeviceEvent::KeyDown { key: button(0) }).await;
        h.device(DeviceEvent::Disconnected).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.host.calls().is_empty(), "pending hold must be dropped");

        match h.request(IpcRequest::GetStatus).await {
            IpcResponse::Status {
                running,
                device_connected,
                ..
            } => {
                assert!(!running);
                assert!(!device_connected);
            }
            other => panic!("unexpected {other:?}"),
        }

        h.device(DeviceEvent::Connected).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        match h.request(IpcRequest::GetStatus).await {
            IpcResponse::Status { running, .. } => assert!(running),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.link.calls(), [LinkCall::Disconnect]);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn back_to_back_disconnect_and_connect_leave_input_running() {
        let h = spawn_engine(test_config());

        for round in 0..20 {
            let mut replies = Vec::new();
            for event in [DeviceEvent::Disconnected, DeviceEvent::Connected] {
                let (reply_tx, reply_rx) = oneshot::channel();
                h.ipc_tx
                    .send(IpcMessage {
                        request: IpcRequest::Device { event },
                        reply_tx,
                    })
                    .await
                    .unwrap();
                replies.push(reply_rx);
            }
            for reply in replies {
                assert!(matches!(reply.await.unwrap(), IpcResponse::Ok));
            }
            let settled = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let disconnects = h.link.calls().len();
                    if let IpcResponse::Status {
                        running,
                        device_connected,
                        ..
                    } = h.request(IpcRequest::GetStatus).await
                    {
                        if disconnects == round + 1 && running && device_connected {
                            return;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await;
            assert!(settled.is_ok(), "input stayed stopped after a queued reconnect");
        }
        h.shutdown().await;
    }

    #[tokio::test]
    async fn assign_persists_and_updates_status() {
        let h = spawn_engine(Config::default());

        let resp = h
            .request(IpcRequest::Assign {
                key: KeyId::RING_LEFT,
                slot: PressKind::Hold,
                entry: ActionEntry::new(ActionKind::StartDrivingMode),
            })
            .await;
        assert!(matches!(resp, IpcResponse::Ok));

        let resp = h
            .request(IpcRequest::SetHoldDelay {
                key: KeyId::RING_LEFT,
                hold_delay_ms: 600,
            })
            .await;
        assert!(matches!(resp, IpcResponse::Ok));

        let saved = Config::load(&h.config_path).unwrap();
        assert_eq!(saved.hold_delay_ms(KeyId::RING_LEFT), 600);
        assert_eq!(
            saved.hold_action(KeyId::RING_LEFT).kind,
            ActionKind::StartDrivingMode
        );

        match h.request(IpcRequest::GetStatus).await {
            IpcResponse::Status { mappings, .. } => {
                assert_eq!(mappings.len(), 1);
                assert_eq!(mappings[0].key, "ring_left");
                assert_eq!(mappings[0].hold.as_deref(), Some("start_driving_mode"));
                assert_eq!(mappings[0].hold_delay_ms, 600);
            }
            other => panic!("unexpected {other:?}"),
        }
        h.shutdown().await;
    }

    #[tokio::test]
    async fn assign_rejects_invalid_entry() {
        let h = spawn_engine(Config::default());
        let resp = h
            .request(IpcRequest::Assign {
                key: button(1),
                slot: PressKind::Press,
                entry: ActionEntry::with_extra(ActionKind::SendKeyEvent, "ABC"),
            })
            .await;
        assert!(matches!(resp, IpcResponse::Error { .. }));
        assert!(!h.config_path.exists());
        h.shutdown().await;
    }

    #[tokio::test]
    async fn dispatch_request_runs_action() {
        let h = spawn_engine(Config::default());
        let resp = h
            .request(IpcRequest::Dispatch {
                entry: ActionEntry::new(ActionKind::LaunchVoiceAssist),
            })
            .await;
        assert!(matches!(resp, IpcResponse::Ok));
        assert_eq!(h.host.calls(), [HostCall::VoiceAssistant]);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn playback_owner_is_tracked_and_reported() {
        let mut h = spawn_engine(Config::default());

        h.session_tx
            .send(SessionNotification::SessionsChanged(vec![SessionInfo {
                id: ":1.42".into(),
                owner: "spotify".into(),
                pid: Some(999),
                status: PlaybackStatus::Playing,
            }]))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut h.events_rx).await,
            DaemonEvent::PlaybackOwner {
                owner: Some("spotify".into())
            }
        );
        match h.request(IpcRequest::GetStatus).await {
            IpcResponse::Status {
                last_playback_owner,
                ..
            } => assert_eq!(last_playback_owner.as_deref(), Some("spotify")),
            other => panic!("unexpected {other:?}"),
        }
        h.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_playback_ignores_sessions() {
        let mut config = Config::default();
        config.playback.enabled = false;
        let h = spawn_engine(config);

        h.session_tx
            .send(SessionNotification::SessionsChanged(vec![SessionInfo {
                id: ":1.42".into(),
                owner: "spotify".into(),
                pid: Some(999),
                status: PlaybackStatus::Playing,
            }]))
            .await
            .unwrap();

        match h.request(IpcRequest::GetStatus).await {
            IpcResponse::Status {
                last_playback_owner,
                ..
            } => assert_eq!(last_playback_owner, None),
            other => panic!("unexpected {other:?}"),
        }
        h.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_request_stops_engine() {
        let h = spawn_engine(Config::default());
        assert!(matches!(
            h.request(IpcRequest::Shutdown).await,
            IpcResponse::Ok
        ));
        let finished = tokio::time::timeout(Duration::from_secs(1), h.handle).await;
        assert!(finished.is_ok());
    }

    #[test]
    fn mapping_info_skips_unassigned_keys() {
        let mappings = build_mapping_info(&test_config());
        let keys: Vec<&str> = mappings.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, ["button1", "button4", "wheel_right"]);
        assert_eq!(mappings[1].hold, None);
        assert_eq!(mappings[2].press.as_deref(), Some("send_key_event 163"));
    }
}
