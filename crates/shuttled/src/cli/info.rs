use anyhow::Result;
use shuttled_core::ipc::{IpcRequest, IpcResponse, MappingInfo};

use super::{check_response, send_request, truncate};

const ACTION_WIDTH: usize = 36;

pub async fn run() -> Result<()> {
    let resp = check_response(send_request(IpcRequest::GetStatus).await?)?;
    match resp {
        IpcResponse::Status {
            running,
            device_connected,
            last_playback_owner,
            mappings,
        } => {
            print_status(
                running,
                device_connected,
                last_playback_owner.as_deref(),
                &mappings,
            );
        }
        _ => anyhow::bail!("unexpected response"),
    }
    Ok(())
}

fn print_status(
    running: bool,
    device_connected: bool,
    last_playback_owner: Option<&str>,
    mappings: &[MappingInfo],
) {
    println!(
        "Input: {}",
        if running { "listening" } else { "stopped" }
    );
    println!(
        "Device: {}",
        if device_connected {
            "connected"
        } else {
            "disconnected"
        }
    );
    println!("Last playback: {}", last_playback_owner.unwrap_or("none"));

    println!("Mappings:");
    for m in mappings {
        println!("  {}", mapping_line(m));
    }
}

fn mapping_line(m: &MappingInfo) -> String {
    let press = truncate(m.press.as_deref().unwrap_or("-"), ACTION_WIDTH);
    let hold = truncate(m.hold.as_deref().unwrap_or("-"), ACTION_WIDTH);
    format!(
        "{:<12} press: {press:<width$} hold: {hold} ({} ms)",
        m.key,
        m.hold_delay_ms,
        width = ACTION_WIDTH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_slots_show_a_dash() {
        let line = mapping_line(&MappingInfo {
            key: "button3".into(),
            press: Some("send_key_event 164".into()),
            hold: None,
            hold_delay_ms: 1000,
        });
        assert!(line.starts_with("button3      press: send_key_event 164"));
        assert!(line.ends_with("hold: - (1000 ms)"));
    }
}
