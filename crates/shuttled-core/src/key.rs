use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyIdError {
    #[error("key id {0} out of range (expected 0-{max})", max = KeyId::NUM_KEYS - 1)]
    OutOfRange(u8),
    #[error("unknown key name: {0}")]
    UnknownName(String),
}

/// Identifies one physical control on the jog/shuttle controller.
///
/// Buttons 0-4, then the shuttle ring reduced to left/middle/right, then the
/// jog wheel reduced to left/right turns. Always `< NUM_KEYS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct KeyId(u8);

impl KeyId {
    /// Number of push buttons.
    pub const NUM_BUTTONS: u8 = 5;
    /// Total number of keys the driver reports.
    pub const NUM_KEYS: u8 = 10;

    pub const RING_LEFT: KeyId = KeyId(5);
    pub const RING_MIDDLE: KeyId = KeyId(6);
    pub const RING_RIGHT: KeyId = KeyId(7);
    pub const WHEEL_LEFT: KeyId = KeyId(8);
    pub const WHEEL_RIGHT: KeyId = KeyId(9);

    /// Key id for a 0-based push button index.
    #[must_use]
    pub fn button(index: u8) -> Option<Self> {
        (index < Self::NUM_BUTTONS).then_some(KeyId(index))
    }

    /// All keys in id order.
    pub fn all() -> impl Iterator<Item = KeyId> {
        (0..Self::NUM_KEYS).map(KeyId)
    }

    /// Array index for per-key tables.
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    #[must_use]
    pub fn is_button(self) -> bool {
        self.0 < Self::NUM_BUTTONS
    }

    /// Returns the config key name for this key (e.g. "button1", "ring_left").
    /// Buttons use 1-based numbering to match the printed labels.
    #[must_use]
    pub fn config_key(&self) -> String {
        match *self {
            KeyId(n) if n < Self::NUM_BUTTONS => format!("button{}", n + 1),
            Self::RING_LEFT => "ring_left".into(),
            Self::RING_MIDDLE => "ring_middle".into(),
            Self::RING_RIGHT => "ring_right".into(),
            Self::WHEEL_LEFT => "wheel_left".into(),
            _ => "wheel_right".into(),
        }
    }

    /// Parse a config key name back to a `KeyId`.
    #[must_use]
    pub fn from_config_key(key: &str) -> Option<Self> {
        if let Some(n) = key.strip_prefix("button") {
            let n: u8 = n.parse().ok()?;
            if (1..=Self::NUM_BUTTONS).contains(&n) {
                return Some(KeyId(n - 1));
            }
            return None;
        }
        match key {
            "ring_left" => Some(Self::RING_LEFT),
            "ring_middle" => Some(Self::RING_MIDDLE),
            "ring_right" => Some(Self::RING_RIGHT),
            "wheel_left" => Some(Self::WHEEL_LEFT),
            "wheel_right" => Some(Self::WHEEL_RIGHT),
            _ => None,
        }
    }
}

impl TryFrom<u8> for KeyId {
    type Error = KeyIdError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        if id < Self::NUM_KEYS {
            Ok(KeyId(id))
        } else {
            Err(KeyIdError::OutOfRange(id))
        }
    }
}

impl From<KeyId> for u8 {
    fn from(key: KeyId) -> u8 {
        key.0
    }
}

impl std::str::FromStr for KeyId {
    type Err = KeyIdError;

    /// Accepts a config name ("button2", "wheel_left") or a raw numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(key) = Self::from_config_key(s) {
            return Ok(key);
        }
        match s.parse::<u8>() {
            Ok(id) => KeyId::try_from(id),
            Err(_) => Err(KeyIdError::UnknownName(s.to_owned())),
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.config_key())
    }
}
