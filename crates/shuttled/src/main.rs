mod cli;
mod config_watcher;
mod coordinator;
mod daemon;
mod device;
mod disambiguator;
mod dispatch;
mod engine;
mod host;
mod ipc_server;
mod launcher;
mod mpris;
mod playback;
mod timer;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "shuttled", about = "Jog/shuttle controller daemon and control tool")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon (for systemd or manual start)
    Daemon {
        /// Log level (trace, debug, info, warn, error)
        #[arg(long, env = "SHUTTLED_LOG_LEVEL", default_value = "info")]
        log_level: String,
    },
    /// Show device state, playback owner and key mappings
    Info,
    /// Assign an action to a key's press or hold slot
    Assign {
        /// Key name (button1-button5, ring_left, ring_middle, ring_right, wheel_left, wheel_right)
        key: String,
        /// Slot to assign (press or hold)
        slot: String,
        /// Action (none, launch_app, send_key_event, start_driving_mode, go_home, launch_voice_assist)
        action: String,
        /// Desktop entry id for launch_app, key code for send_key_event
        extra: Option<String>,
    },
    /// Remove all assignments from a key
    Unassign {
        /// Key name
        key: String,
    },
    /// Set how long a key must be held before its hold action fires
    HoldDelay {
        /// Key name
        key: String,
        /// Delay in milliseconds
        ms: u64,
    },
    /// Report a device event to the daemon (used by driver scripts)
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    /// Start listening to device input
    Start,
    /// Stop listening to device input
    Stop,
    /// Dispatch an action immediately
    Run {
        /// Action name
        action: String,
        /// Desktop entry id for launch_app, key code for send_key_event
        extra: Option<String>,
    },
    /// Print daemon events as they happen
    Monitor,
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum DeviceCommands {
    /// A key went down
    Down { key: String },
    /// A key came up
    Up { key: String },
    /// The device is attached
    Connected,
    /// The device went away
    Disconnected,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print current config as TOML
    Show,
    /// Reload config from disk
    Reload,
    /// Print config directory path
    Dir,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        None => {
            use clap::CommandFactory;
            let _ = Cli::command().print_help();
            println!();
            std::process::exit(0);
        }
        // The daemon builds its own multi-thread runtime. CLI commands only
        // need a single-threaded one for an IPC round-trip.
        Some(Commands::Daemon { log_level }) => daemon::run(&log_level),
        Some(cmd) => match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt.block_on(cli::run(cmd)),
            Err(e) => Err(anyhow::anyhow!("failed to create tokio runtime: {e}")),
        },
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
