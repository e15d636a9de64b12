use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use shuttled_core::config::HostConfig;
use shuttled_core::ipc::DaemonEvent;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, warn};

use crate::launcher;

/// Navigation request for driving mode: which app opens which URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationIntent {
    pub app: String,
    pub uri: String,
}

/// Side effects the dispatcher can ask of the host system.
///
/// Every method returns immediately; slow work runs on spawned tasks.
pub trait Host {
    /// Launch the application with desktop entry id `app_id`.
    /// Returns false when no launchable entry exists.
    fn launch(&self, app_id: &str) -> bool;

    fn send_synthetic_key(&self, code: u16);

    /// Returns false when the navigation app is not installed.
    fn start_navigation(&self, intent: &NavigationIntent) -> bool;

    fn go_home(&self);

    fn launch_voice_assistant(&self);

    /// Tell local listeners that a synthetic key was sent.
    fn notify_key_sent(&self, code: u16);

    /// Pick up a reloaded `[host]` section.
    fn reconfigure(&mut self, _config: &HostConfig) {}
}

const KGLOBALACCEL_SERVICE: &str = "org.kde.kglobalaccel";
const KWIN_COMPONENT_PATH: &str = "/component/kwin";
const COMPONENT_IFACE: &str = "org.kde.kglobalaccel.Component";
const SHOW_DESKTOP_SHORTCUT: &str = "Show Desktop";

/// Host backed by desktop entries, shell commands and the session bus.
pub struct SystemHost {
    config: HostConfig,
    app_dirs: Vec<PathBuf>,
    session: Option<zbus::Connection>,
    events: broadcast::Sender<DaemonEvent>,
}

impl SystemHost {
    pub fn new(
        config: HostConfig,
        session: Option<zbus::Connection>,
        events: broadcast::Sender<DaemonEvent>,
    ) -> Self {
        let app_dirs = launcher::application_dirs(&config.application_dirs);
        Self {
            config,
            app_dirs,
            session,
            events,
        }
    }

    fn launch_with_uri(&self, app_id: &str, uri: Option<&str>) -> bool {
        let Some(entry) = launcher::find_entry(app_id, &self.app_dirs) else {
            return false;
        };
        let argv = entry.argv(uri);
        info!(
            "launching {} ({})",
            entry.name.as_deref().unwrap_or(app_id),
            entry.path.display()
        );
        spawn_detached(argv);
        true
    }
}

impl Host for SystemHost {
    fn launch(&self, app_id: &str) -> bool {
        self.launch_with_uri(app_id, None)
    }

    fn send_synthetic_key(&self, code: u16) {
        match &self.config.key_command {
            Some(template) => execute_command(&key_command(template, code)),
            None => warn!("no host.key_command configured, dropping key {code}"),
        }
    }

    fn start_navigation(&self, intent: &NavigationIntent) -> bool {
        self.launch_with_uri(&intent.app, Some(&intent.uri))
    }

    fn go_home(&self) {
        if let Some(command) = &self.config.home_command {
            execute_command(command);
            return;
        }
        let Some(conn) = self.session.clone() else {
            warn!("go_home: no home_command configured and no session bus");
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = invoke_kwin_shortcut(&conn, SHOW_DESKTOP_SHORTCUT).await {
                warn!("failed to invoke KWin '{SHOW_DESKTOP_SHORTCUT}': {e}");
            }
        });
    }

    fn launch_voice_assistant(&self) {
        match &self.config.voice_assist_command {
            Some(command) => execute_command(command),
            None => info!("no host.voice_assist_command configured, ignoring"),
        }
    }

    fn notify_key_sent(&self, code: u16) {
        // No subscribers is fine.
        let _ = self.events.send(DaemonEvent::KeySent { code });
    }

    fn reconfigure(&mut self, config: &HostConfig) {
        self.app_dirs = launcher::application_dirs(&config.application_dirs);
        self.config = config.clone();
    }
}

/// Substitute `{code}` in a key command template.
fn key_command(template: &str, code: u16) -> String {
    template.replace("{code}", &code.to_string())
}

async fn invoke_kwin_shortcut(conn: &zbus::Connection, name: &str) -> Result<(), zbus::Error> {
    debug!("invoking KWin shortcut {name:?}");
    conn.call_method(
        Some(KGLOBALACCEL_SERVICE),
        KWIN_COMPONENT_PATH,
        Some(COMPONENT_IFACE),
        "invokeShortcut",
        &(name,),
    )
    .await?;
    Ok(())
}

/// Start an application and reap it in the background without a time limit.
fn spawn_detached(argv: Vec<String>) {
    let Some((program, args)) = argv.split_first() else {
        warn!("refusing to launch an empty command line");
        return;
    };

    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);

    match command.spawn() {
        Ok(mut child) => {
            tokio::spawn(async move {
                if let Err(e) = child.wait().await {
                    debug!("failed to wait on launched app: {e}");
                }
            });
        }
        Err(e) => warn!("failed to launch {program}: {e}"),
    }
}

/// Spawn a shell command as a fire-and-forget subprocess.
///
/// The IPC socket is user-only (umask 0o077) and the config file is user-owned,
/// so `sh -c <user_string>` runs with the daemon's own user permissions.
///
/// Limits: at most 8 concurrent commands. Each command is killed after 30 seconds.
pub fn execute_command(command: &str) {
    static EXEC_SEMAPHORE: Semaphore = Semaphore::const_new(8);

    let Ok(permit) = EXEC_SEMAPHORE.try_acquire() else {
        warn!("command dropped (concurrency limit): {command}");
        return;
    };

    let command = command.to_owned();
    tokio::spawn(async move {
        let _permit = permit;
        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
        {
            Ok(mut child) => match tokio::time::timeout(Duration::from_secs(30), child.wait()).await
            {
                Ok(Ok(status)) if !status.success() => {
                    warn!(
                        "command exited with {}: {command}",
                        status
                            .code()
                            .map_or("signal".to_string(), |c| c.to_string())
                    );
                }
                Ok(Err(e)) => warn!("failed to wait on command: {e}"),
                Err(_) => {
                    warn!("command timed out (30s), killing: {command}");
                    let _ = child.kill().await;
                }
                _ => {}
            },
            Err(e) => warn!("failed to spawn command: {e}"),
        }
    });
}
