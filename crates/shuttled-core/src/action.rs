use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::KeyId;

/// Default time a key must stay down before it resolves as a hold.
pub const DEFAULT_HOLD_DELAY_MS: u64 = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("{kind} requires an extra value ({expected})")]
    MissingExtra {
        kind: ActionKind,
        expected: &'static str,
    },
    #[error("send_key_event extra must be an integer key code, got {0:?}")]
    InvalidKeyCode(String),
    #[error("unknown action: {0}")]
    UnknownKind(String),
}

/// Category of host-visible effect an action produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[default]
    None,
    LaunchApp,
    SendKeyEvent,
    StartDrivingMode,
    GoHome,
    LaunchVoiceAssist,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::None,
        ActionKind::GoHome,
        ActionKind::SendKeyEvent,
        ActionKind::LaunchApp,
        ActionKind::LaunchVoiceAssist,
        ActionKind::StartDrivingMode,
    ];

    /// Config/CLI name of this action.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::None => "none",
            ActionKind::LaunchApp => "launch_app",
            ActionKind::SendKeyEvent => "send_key_event",
            ActionKind::StartDrivingMode => "start_driving_mode",
            ActionKind::GoHome => "go_home",
            ActionKind::LaunchVoiceAssist => "launch_voice_assist",
        }
    }

    /// What `extra` must hold for this kind, if it is used at all.
    #[must_use]
    pub fn extra_hint(self) -> Option<&'static str> {
        match self {
            ActionKind::LaunchApp => Some("desktop entry id"),
            ActionKind::SendKeyEvent => Some("integer key code"),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        ActionKind::ALL
            .into_iter()
            .find(|k| k.name() == normalized)
            .ok_or_else(|| ActionError::UnknownKind(s.to_owned()))
    }
}

/// One configured action: what to do and its optional argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEntry {
    #[serde(rename = "type", default)]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl ActionEntry {
    pub const NONE: ActionEntry = ActionEntry {
        kind: ActionKind::None,
        extra: None,
    };

    #[must_use]
    pub fn new(kind: ActionKind) -> Self {
        ActionEntry { kind, extra: None }
    }

    #[must_use]
    pub fn with_extra(kind: ActionKind, extra: impl Into<String>) -> Self {
        ActionEntry {
            kind,
            extra: Some(extra.into()),
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.kind == ActionKind::None
    }

    /// Parse `extra` as the key code of a `send_key_event` action.
    pub fn key_code(&self) -> Result<u16, ActionError> {
        let extra = self.extra.as_deref().ok_or(ActionError::MissingExtra {
            kind: self.kind,
            expected: "integer key code",
        })?;
        extra
            .trim()
            .parse()
            .map_err(|_| ActionError::InvalidKeyCode(extra.to_owned()))
    }

    /// Check that `extra` is present and well-formed for kinds that use it.
    pub fn validate(&self) -> Result<(), ActionError> {
        match self.kind {
            ActionKind::SendKeyEvent => self.key_code().map(|_| ()),
            ActionKind::LaunchApp => match self.extra.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => Ok(()),
                _ => Err(ActionError::MissingExtra {
                    kind: self.kind,
                    expected: "desktop entry id",
                }),
            },
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.extra, self.kind.extra_hint()) {
            (Some(extra), Some(_)) => write!(f, "{} {extra}", self.kind),
            _ => write!(f, "{}", self.kind),
        }
    }
}

/// How a single down/up cycle of a key was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressKind {
    Press,
    Hold,
}

impl fmt::Display for PressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PressKind::Press => "press",
            PressKind::Hold => "hold",
        })
    }
}

/// Read-only mapping from keys to their configured actions.
///
/// Every valid key has a defined answer: absence is `ActionKind::None`, never
/// a missing-entry error.
pub trait ActionMap {
    fn press_action(&self, key: KeyId) -> ActionEntry;
    fn hold_action(&self, key: KeyId) -> ActionEntry;
    fn hold_delay_ms(&self, key: KeyId) -> u64;
}
