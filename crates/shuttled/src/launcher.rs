//! Desktop entry lookup for `launch_app` and driving mode.
//!
//! An application is named by its desktop entry id (`org.gnome.Maps`), found as
//! `<id>.desktop` under the `applications/` data directories. Only the
//! `[Desktop Entry]` group's `Exec` key matters here.

use std::path::{Path, PathBuf};

use tracing::debug;

/// A launchable desktop entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopEntry {
    pub path: PathBuf,
    pub name: Option<String>,
    pub exec: String,
}

impl DesktopEntry {
    /// Build the argument vector, substituting `uri` for `%u %U %f %F`.
    #[must_use]
    pub fn argv(&self, uri: Option<&str>) -> Vec<String> {
        exec_argv(&self.exec, uri)
    }
}

/// Directories searched for desktop entries, most specific first.
///
/// `configured` wins when non-empty; otherwise `$XDG_DATA_HOME/applications`
/// followed by each `$XDG_DATA_DIRS` entry.
#[must_use]
pub fn application_dirs(configured: &[PathBuf]) -> Vec<PathBuf> {
    if !configured.is_empty() {
        return configured.to_vec();
    }

    let mut out = Vec::new();
    if let Some(data) = dirs::data_dir() {
        out.push(data.join("applications"));
    }
    let system = std::env::var("XDG_DATA_DIRS")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "/usr/local/share:/usr/share".into());
    out.extend(
        system
            .split(':')
            .filter(|d| !d.is_empty())
            .map(|d| Path::new(d).join("applications")),
    );
    out
}

/// Find `<id>.desktop` in `dirs`. Entries without `Exec` are not launchable.
#[must_use]
pub fn find_entry(id: &str, dirs: &[PathBuf]) -> Option<DesktopEntry> {
    if id.is_empty() || id.contains('/') {
        return None;
    }
    let file_name = format!("{id}.desktop");

    for dir in dirs {
        let path = dir.join(&file_name);
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        match parse_desktop_entry(&contents) {
            Some((name, exec)) => {
                return Some(DesktopEntry { path, name, exec });
            }
            None => debug!("{} has no Exec line, skipping", path.display()),
        }
    }
    None
}

/// Extract `Name` and `Exec` from the `[Desktop Entry]` group.
fn parse_desktop_entry(contents: &str) -> Option<(Option<String>, String)> {
    let mut in_main_group = false;
    let mut name = None;
    let mut exec = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            in_main_group = line == "[Desktop Entry]";
            continue;
        }
        if !in_main_group {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "Name" => name = Some(value.trim().to_owned()),
            "Exec" => exec = Some(value.trim().to_owned()),
            _ => {}
        }
    }

    let exec = exec.filter(|e| !e.is_empty())?;
    Some((name, exec))
}

/// Split an `Exec` value into arguments and expand its field codes.
///
/// Double quotes group words and allow backslash escapes. `%%` becomes `%`,
/// the file/URL codes become `uri` (or vanish), all other codes are dropped.
fn exec_argv(exec: &str, uri: Option<&str>) -> Vec<String> {
    let mut args = Vec::new();
    for token in split_exec(exec) {
        let is_bare_code = token.len() == 2 && token.starts_with('%');
        let expanded = expand_field_codes(&token, uri);
        if expanded.is_empty() && is_bare_code {
            continue;
        }
        args.push(expanded);
    }
    args
}

fn split_exec(exec: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = exec.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn expand_field_codes(token: &str, uri: Option<&str>) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('u' | 'U' | 'f' | 'F') => {
                if let Some(uri) = uri {
                    out.push_str(uri);
                }
            }
            _ => {}
        }
    }
    out
}
