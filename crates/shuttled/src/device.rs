use std::process::Stdio;
use std::sync::Arc;

use shuttled_core::config::DeviceConfig;
use shuttled_core::ipc::DeviceEvent;
use tokio::process::Child;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Fan-out point for driver events, plus the last known connectivity.
#[derive(Clone)]
pub struct DeviceHub {
    events: broadcast::Sender<DeviceEvent>,
    connected: Arc<watch::Sender<bool>>,
}

impl Default for DeviceHub {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceHub {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (connected, _) = watch::channel(false);
        Self {
            events,
            connected: Arc::new(connected),
        }
    }

    pub fn publish(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected => {
                self.connected.send_replace(true);
            }
            DeviceEvent::Disconnected => {
                self.connected.send_replace(false);
            }
            _ => {}
        }
        if self.events.send(event).is_err() {
            debug!("device event {event:?} dropped: no subscribers");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

/// Control over the device connection itself.
pub trait DeviceLink {
    fn is_connected(&self) -> bool;
    fn connect(&mut self);
    fn disconnect(&mut self);
    fn reconfigure(&mut self, _config: &DeviceConfig) {}
}

/// Runs the optional driver command while the device is wanted.
///
/// Without a driver command the link only reports what the externally
/// managed driver published to the hub.
pub struct DriverLink {
    hub: DeviceHub,
    command: Option<String>,
    child: Option<Child>,
}

impl DriverLink {
    pub fn new(hub: DeviceHub, config: &DeviceConfig) -> Self {
        Self {
            hub,
            command: config.driver_command.clone(),
            child: None,
        }
    }

    fn driver_running(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!("driver exited earlier with {status}");
                self.child = None;
                false
            }
            Some(Err(e)) => {
                warn!("failed to poll driver process: {e}");
                self.child = None;
                false
            }
            None => false,
        }
    }
}

impl DeviceLink for DriverLink {
    fn is_connected(&self) -> bool {
        self.hub.is_connected()
    }

    fn connect(&mut self) {
        if self.driver_running() {
            return;
        }
        let Some(command) = &self.command else {
            debug!("no driver_command configured, waiting for an external driver");
            return;
        };

        info!("starting device driver: {command}");
        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => self.child = Some(child),
            Err(e) => warn!("failed to start device driver: {e}"),
        }
    }

    fn disconnect(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        info!("stopping device driver");
        if let Err(e) = child.start_kill() {
            debug!("driver already gone: {e}");
        }
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
    }

    fn reconfigure(&mut self, config: &DeviceConfig) {
        if self.command != config.driver_command {
            info!("driver_command changed, takes effect on next connect");
            self.command = config.driver_command.clone();
        }
    }
}

#[cfg(test)]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use super::DeviceLink;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LinkCall {
        Connect,
        Disconnect,
    }

    #[derive(Clone, Default)]
    pub struct RecordingLink {
        pub connected: bool,
        pub calls: Arc<Mutex<Vec<LinkCall>>>,
    }

    impl RecordingLink {
        pub fn calls(&self) -> Vec<LinkCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DeviceLink for RecordingLink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn connect(&mut self) {
            self.calls.lock().unwrap().push(LinkCall::Connect);
        }

        fn disconnect(&mut self) {
            self.calls.lock().unwrap().push(LinkCall::Disconnect);
        }
    }
}
