use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::{ActionEntry, PressKind};
use crate::key::KeyId;

/// Maximum IPC message size (1 MB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("IPC message too large: {size} bytes (max {MAX_MESSAGE_SIZE})")]
    MessageTooLarge { size: u32 },
    #[error("failed to serialize IPC message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("connection refused: is the daemon running?")]
    ConnectionRefused,
}

/// A decoded transition reported by the device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceEvent {
    KeyDown { key: KeyId },
    KeyUp { key: KeyId },
    Connected,
    Disconnected,
}

/// Something the daemon did, streamed to `subscribe` clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DaemonEvent {
    /// A key cycle was resolved and its action dispatched.
    Resolved {
        key: KeyId,
        press: PressKind,
        entry: ActionEntry,
    },
    /// A synthetic key event was handed to the host.
    KeySent { code: u16 },
    /// The remembered playback owner changed.
    PlaybackOwner { owner: Option<String> },
}

/// Requests from the shuttled CLI (or the device driver) to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    GetStatus,
    /// Driver-reported device event.
    Device {
        event: DeviceEvent,
    },
    Start,
    Stop,
    /// Dispatch an action immediately, bypassing the keys.
    Dispatch {
        entry: ActionEntry,
    },
    Assign {
        key: KeyId,
        slot: PressKind,
        entry: ActionEntry,
    },
    SetHoldDelay {
        key: KeyId,
        hold_delay_ms: u64,
    },
    Unassign {
        key: KeyId,
    },
    GetConfig,
    ReloadConfig,
    /// Keep the connection open and stream `Event` responses.
    Subscribe,
    Shutdown,
}

/// A single key mapping for status display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingInfo {
    pub key: String,
    pub press: Option<String>,
    pub hold: Option<String>,
    pub hold_delay_ms: u64,
}

/// Responses from the daemon to shuttled CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Ok,
    Error {
        message: String,
    },
    Status {
        running: bool,
        device_connected: bool,
        last_playback_owner: Option<String>,
        mappings: Vec<MappingInfo>,
    },
    Config {
        toml: String,
    },
    Event {
        event: DaemonEvent,
    },
}

/// Encode a message with a 4-byte little-endian length prefix.
pub fn encode_message(msg: &[u8]) -> Result<Vec<u8>, IpcError> {
    let len = u32::try_from(msg.len()).map_err(|_| IpcError::MessageTooLarge { size: u32::MAX })?;
    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge { size: len });
    }
    let mut buf = Vec::with_capacity(4 + msg.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(msg);
    Ok(buf)
}

/// Encode a request as length-prefixed JSON.
pub fn encode_request(req: &IpcRequest) -> Result<Vec<u8>, IpcError> {
    let json = serde_json::to_vec(req)?;
    encode_message(&json)
}

/// Encode a response as length-prefixed JSON.
pub fn encode_response(resp: &IpcResponse) -> Result<Vec<u8>, IpcError> {
    let json = serde_json::to_vec(resp)?;
    encode_message(&json)
}

/// Read a length prefix from a 4-byte buffer, rejecting oversized messages.
pub fn read_length_prefix(buf: &[u8; 4]) -> Result<u32, IpcError> {
    let len = u32::from_le_bytes(*buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge { size: len });
    }
    Ok(len)
}

/// Returns the XDG runtime directory, falling back to `/run/user/{uid}`.
#[must_use]
pub fn xdg_runtime_dir() -> std::path::PathBuf {
    let dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| {
        let uid = unsafe { libc::getuid() };
        format!("/run/user/{uid}")
    });
    std::path::PathBuf::from(dir)
}

/// Returns the default IPC socket path.
#[must_use]
pub fn default_socket_path() -> std::path::PathBuf {
    xdg_runtime_dir().join("shuttled.sock")
}
