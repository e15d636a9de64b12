use anyhow::Result;
use shuttled_core::ipc::{DeviceEvent, IpcRequest};

use super::{check_response, parse_key, send_request};
use crate::DeviceCommands;

pub async fn run(command: DeviceCommands) -> Result<()> {
    let event = match command {
        DeviceCommands::Down { key } => DeviceEvent::KeyDown {
            key: parse_key(&key)?,
        },
        DeviceCommands::Up { key } => DeviceEvent::KeyUp {
            key: parse_key(&key)?,
        },
        DeviceCommands::Connected => DeviceEvent::Connected,
        DeviceCommands::Disconnected => DeviceEvent::Disconnected,
    };
    check_response(send_request(IpcRequest::Device { event }).await?)?;
    Ok(())
}

pub async fn run_start() -> Result<()> {
    check_response(send_request(IpcRequest::Start).await?)?;
    println!("Device input started.");
    Ok(())
}

pub async fn run_stop() -> Result<()> {
    check_response(send_request(IpcRequest::Stop).await?)?;
    println!("Device input stopped.");
    Ok(())
}
