mod assign;
mod config;
mod device;
mod info;
mod monitor;

use anyhow::{Context, Result};
use shuttled_core::ipc::{self, IpcRequest, IpcResponse};
use shuttled_core::key::KeyId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::Commands;

/// Run a CLI command by sending an IPC request to the daemon.
pub async fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Info => info::run().await,
        Commands::Assign {
            key,
            slot,
            action,
            extra,
        } => assign::run_assign(key, slot, action, extra).await,
        Commands::Unassign { key } => assign::run_unassign(key).await,
        Commands::HoldDelay { key, ms } => assign::run_hold_delay(key, ms).await,
        Commands::Run { action, extra } => assign::run_dispatch(action, extra).await,
        Commands::Device { command } => device::run(command).await,
        Commands::Start => device::run_start().await,
        Commands::Stop => device::run_stop().await,
        Commands::Monitor => monitor::run().await,
        Commands::Config { command } => config::run(command).await,
        Commands::Daemon { .. } => unreachable!("daemon command handled in main"),
    }
}

fn check_response(resp: IpcResponse) -> Result<IpcResponse> {
    match resp {
        IpcResponse::Error { message } => anyhow::bail!("{message}"),
        other => Ok(other),
    }
}

fn parse_key(name: &str) -> Result<KeyId> {
    name.parse::<KeyId>()
        .with_context(|| format!("invalid key: {name}"))
}

async fn connect() -> Result<UnixStream> {
    let socket_path = ipc::default_socket_path();

    UnixStream::connect(&socket_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::ConnectionRefused
            || e.kind() == std::io::ErrorKind::NotFound
        {
            anyhow::anyhow!(
                "Could not connect to shuttled daemon.\n\
                 Is the service running? Try: systemctl --user start shuttled.service"
            )
        } else {
            anyhow::anyhow!("failed to connect to daemon: {e}")
        }
    })
}

async fn write_request(stream: &mut UnixStream, request: &IpcRequest) -> Result<()> {
    let encoded = ipc::encode_request(request)?;
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one response. `None` when the daemon closed the connection.
async fn read_response(stream: &mut UnixStream) -> Result<Option<IpcResponse>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = ipc::read_length_prefix(&len_buf)?;

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;

    let response: IpcResponse =
        serde_json::from_slice(&payload).context("failed to parse daemon response")?;
    Ok(Some(response))
}

async fn send_request(request: IpcRequest) -> Result<IpcResponse> {
    let mut stream = connect().await?;
    write_request(&mut stream, &request).await?;
    read_response(&mut stream)
        .await?
        .context("daemon closed the connection without replying")
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..s.floor_char_boundary(max_len)]
    }
}
