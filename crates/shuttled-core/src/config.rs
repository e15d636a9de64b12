use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::{ActionEntry, ActionKind, ActionMap, DEFAULT_HOLD_DELAY_MS};
use crate::key::KeyId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write config to {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml_edit::de::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize { source: toml_edit::ser::Error },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
}

fn default_true() -> bool {
    true
}

fn default_hold_delay_ms() -> u64 {
    DEFAULT_HOLD_DELAY_MS
}

fn default_key_command() -> Option<String> {
    Some("ydotool key {code}:1 {code}:0".into())
}

fn default_navigation_app() -> String {
    "waydroid.com.google.android.apps.maps".into()
}

/// External driver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Command that runs the device driver. It is started when the daemon
    /// connects to the device and killed when it disconnects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_command: Option<String>,
    /// Restart input handling when the driver reports the device connected again.
    #[serde(default = "default_true")]
    pub restart_on_connect: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            driver_command: None,
            restart_on_connect: true,
        }
    }
}

/// How host actions are carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Shell template for synthetic key events; `{code}` is replaced by the key code.
    #[serde(
        default = "default_key_command",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_command: Option<String>,
    /// Desktop entry id of the mapping application used for driving mode.
    #[serde(default = "default_navigation_app")]
    pub navigation_app: String,
    /// Shell command for "go home". Falls back to KWin's Show Desktop shortcut.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_assist_command: Option<String>,
    /// Directories searched for `<id>.desktop`. Empty means the XDG defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub application_dirs: Vec<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            key_command: default_key_command(),
            navigation_app: default_navigation_app(),
            home_command: None,
            voice_assist_command: None,
            application_dirs: Vec::new(),
        }
    }
}

/// Last-playing media tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Only record playback while the host runs on external power.
    #[serde(default = "default_true")]
    pub require_host_power: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            enabled: true,
            require_host_power: true,
        }
    }
}

/// Press and hold actions for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(default = "default_hold_delay_ms")]
    pub hold_delay_ms: u64,
    #[serde(default, skip_serializing_if = "ActionEntry::is_none")]
    pub press: ActionEntry,
    #[serde(default, skip_serializing_if = "ActionEntry::is_none")]
    pub hold: ActionEntry,
}

impl Default for KeyConfig {
    fn default() -> Self {
        KeyConfig {
            hold_delay_ms: DEFAULT_HOLD_DELAY_MS,
            press: ActionEntry::NONE,
            hold: ActionEntry::NONE,
        }
    }
}

impl KeyConfig {
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.press.is_none() && self.hold.is_none()
    }
}

/// A problem in an otherwise loadable config. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub section: String,
    pub message: String,
}

/// Top-level configuration.
///
/// Forward-compatible: unknown fields are silently ignored (no `deny_unknown_fields`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub keys: HashMap<String, KeyConfig>,
}

impl Config {
    /// Get the configuration for a specific key, if any.
    #[must_use]
    pub fn get_key(&self, key: KeyId) -> Option<&KeyConfig> {
        self.keys.get(&key.config_key())
    }

    /// Mutable access to a key's configuration, creating a default entry.
    pub fn key_mut(&mut self, key: KeyId) -> &mut KeyConfig {
        self.keys.entry(key.config_key()).or_default()
    }

    pub fn set_key(&mut self, key: KeyId, config: KeyConfig) {
        self.keys.insert(key.config_key(), config);
    }

    pub fn remove_key(&mut self, key: KeyId) -> Option<KeyConfig> {
        self.keys.remove(&key.config_key())
    }

    /// Collect problems that would make some actions do nothing.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut names: Vec<&String> = self.keys.keys().collect();
        names.sort();

        for name in names {
            let section = format!("keys.{name}");
            if KeyId::from_config_key(name).is_none() {
                warnings.push(ConfigWarning {
                    section,
                    message: "unknown key name, section ignored".into(),
                });
                continue;
            }
            let key_config = &self.keys[name];
            for (slot, entry) in [("press", &key_config.press), ("hold", &key_config.hold)] {
                if let Err(e) = entry.validate() {
                    warnings.push(ConfigWarning {
                        section: format!("{section}.{slot}"),
                        message: e.to_string(),
                    });
                }
            }
        }

        warnings
    }

    /// Load config from a TOML file. Returns default config if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml_edit::de::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_owned(),
                    source,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_owned(),
                source,
            }),
        }
    }

    /// Serialize this config to a TOML string.
    ///
    /// Key sections render with dotted action keys (`press.type = "go_home"`)
    /// and are sorted by name.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut doc = toml_edit::ser::to_document(self)
            .map_err(|source| ConfigError::Serialize { source })?;

        expand_top_level_tables(&mut doc);

        if self.keys.is_empty() {
            doc.remove("keys");
        }

        flatten_key_tables(&mut doc);

        Ok(doc.to_string())
    }

    /// Save config to a file, creating parent directories if needed.
    ///
    /// Uses atomic write: writes to `path.tmp` then renames over `path`.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_owned(),
                source,
            })?;
        }

        let contents = self.to_toml()?;

        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents).map_err(|source| ConfigError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| ConfigError::Write {
            path: path.to_owned(),
            source,
        })?;

        Ok(())
    }

    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("shuttled"))
    }

    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        Some(Self::default_dir()?.join("config.toml"))
    }
}

impl ActionMap for Config {
    fn press_action(&self, key: KeyId) -> ActionEntry {
        self.get_key(key)
            .map(|k| k.press.clone())
            .unwrap_or_default()
    }

    fn hold_action(&self, key: KeyId) -> ActionEntry {
        self.get_key(key)
            .map(|k| k.hold.clone())
            .unwrap_or_default()
    }

    fn hold_delay_ms(&self, key: KeyId) -> u64 {
        self.get_key(key)
            .map_or(DEFAULT_HOLD_DELAY_MS, |k| k.hold_delay_ms)
    }
}

/// Convert top-level `InlineTable` values into proper `[section]` tables.
fn expand_top_level_tables(doc: &mut toml_edit::DocumentMut) {
    use toml_edit::{Item, Value};

    let names: Vec<String> = doc.iter().map(|(k, _)| k.to_owned()).collect();
    for name in names {
        let Some(item) = doc.get_mut(&name) else {
            continue;
        };
        if let Item::Value(Value::InlineTable(inline)) = item {
            *item = Item::Table(inline.clone().into_table());
        }
    }
}

/// Render each `[keys.<name>]` with dotted `press.*`/`hold.*` entries instead
/// of nested `[keys.<name>.press]` headers.
fn flatten_key_tables(doc: &mut toml_edit::DocumentMut) {
    use toml_edit::{Item, Value};

    let Some(Item::Table(keys)) = doc.get_mut("keys") else {
        return;
    };

    let names: Vec<String> = keys.iter().map(|(k, _)| k.to_owned()).collect();
    for name in &names {
        let Some(item) = keys.get_mut(name) else {
            continue;
        };
        if let Item::Value(Value::InlineTable(inline)) = item {
            *item = Item::Table(inline.clone().into_table());
        }
    }

    keys.sort_values_by(|a, _, b, _| key_order(a.get()).cmp(&key_order(b.get())));

    for (_, key_item) in keys.iter_mut() {
        if let Item::Table(key_table) = key_item {
            mark_subtables_dotted(key_table);
        }
    }
}

/// Sort key sections in physical order (buttons, ring, wheel); unknown names last.
fn key_order(name: &str) -> (u8, String) {
    match KeyId::from_config_key(name) {
        Some(key) => (u8::from(key), String::new()),
        None => (u8::MAX, name.to_owned()),
    }
}

fn mark_subtables_dotted(table: &mut toml_edit::Table) {
    use toml_edit::{Item, Value};

    let names: Vec<String> = table.iter().map(|(k, _)| k.to_owned()).collect();

    for name in names {
        let Some(item) = table.get_mut(&name) else {
            continue;
        };
        match item {
            Item::Table(sub) => {
                sub.set_dotted(true);
                mark_subtables_dotted(sub);
            }
            Item::Value(Value::InlineTable(inline)) => {
                let mut sub = inline.clone().into_table();
                sub.set_dotted(true);
                mark_subtables_dotted(&mut sub);
                *item = Item::Table(sub);
            }
            _ => {}
        }
    }
}

const HEADER: &str = "\
# shuttled configuration
# Changes are picked up automatically.
#
# Keys: button1-button5, ring_left, ring_middle, ring_right, wheel_left, wheel_right
# Actions: none, launch_app, send_key_event, start_driving_mode, go_home, launch_voice_assist
# launch_app takes a desktop entry id as extra, send_key_event a Linux key code.
# A hold with no action falls back to the press action.

";

const EXAMPLE: &str = "\n\
# Example: launch an application by desktop entry id
# [keys.button3]
# press.type = \"launch_app\"
# press.extra = \"org.mozilla.firefox\"

# Example: run the external driver when the daemon connects
# [device]
# driver_command = \"shuttle-bridge --socket $XDG_RUNTIME_DIR/shuttled.sock\"
";

/// Linux input key codes used by the starter mapping.
const KEY_NEXTSONG: u16 = 163;
const KEY_PLAYPAUSE: u16 = 164;
const KEY_PREVIOUSSONG: u16 = 165;
const KEY_VOLUMEDOWN: u16 = 114;
const KEY_VOLUMEUP: u16 = 115;

/// Generate the default config file content for new users.
///
/// Built from `Config::default()` plus a starter key mapping, through the same
/// serialization path as `Config::save()`.
pub fn default_config_content() -> Result<String, ConfigError> {
    let send_key = |code: u16| ActionEntry::with_extra(ActionKind::SendKeyEvent, code.to_string());

    let mut config = Config::default();
    let starter = [
        (
            KeyId::button(0),
            ActionEntry::new(ActionKind::GoHome),
            ActionEntry::new(ActionKind::LaunchVoiceAssist),
        ),
        (
            KeyId::button(2),
            send_key(KEY_PLAYPAUSE),
            ActionEntry::NONE,
        ),
        (
            KeyId::button(4),
            ActionEntry::NONE,
            ActionEntry::new(ActionKind::StartDrivingMode),
        ),
        (Some(KeyId::RING_LEFT), send_key(KEY_VOLUMEDOWN), ActionEntry::NONE),
        (Some(KeyId::RING_RIGHT), send_key(KEY_VOLUMEUP), ActionEntry::NONE),
        (Some(KeyId::WHEEL_LEFT), send_key(KEY_PREVIOUSSONG), ActionEntry::NONE),
        (Some(KeyId::WHEEL_RIGHT), send_key(KEY_NEXTSONG), ActionEntry::NONE),
    ];
    for (key, press, hold) in starter {
        let Some(key) = key else { continue };
        config.set_key(
            key,
            KeyConfig {
                press,
                hold,
                ..Default::default()
            },
        );
    }

    let body = config.to_toml()?;

    Ok(format!("{HEADER}{body}{EXAMPLE}"))
}

/// Write the default config with comments to the given path if it doesn't exist.
/// Returns true if the file was created.
pub fn bootstrap_config(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_owned(),
            source,
        })?;
    }

    std::fs::write(path, default_config_content()?).map_err(|source| ConfigError::Write {
        path: path.to_owned(),
        source,
    })?;

    Ok(true)
}
