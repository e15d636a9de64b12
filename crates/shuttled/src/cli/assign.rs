use anyhow::{Context, Result};
use shuttled_core::action::{ActionEntry, ActionKind, PressKind};
use shuttled_core::ipc::IpcRequest;

use super::{check_response, parse_key, send_request};

pub async fn run_assign(
    key: String,
    slot: String,
    action: String,
    extra: Option<String>,
) -> Result<()> {
    let key_id = parse_key(&key)?;
    let slot = parse_slot(&slot)?;
    let entry = parse_entry(&action, extra)?;

    let request = IpcRequest::Assign {
        key: key_id,
        slot,
        entry: entry.clone(),
    };
    check_response(send_request(request).await?)?;
    println!("Assigned {key} {slot} -> {entry}");
    Ok(())
}

pub async fn run_unassign(key: String) -> Result<()> {
    let key_id = parse_key(&key)?;
    check_response(send_request(IpcRequest::Unassign { key: key_id }).await?)?;
    println!("Unassigned {key}");
    Ok(())
}

pub async fn run_hold_delay(key: String, ms: u64) -> Result<()> {
    let key_id = parse_key(&key)?;
    check_response(
        send_request(IpcRequest::SetHoldDelay {
            key: key_id,
            hold_delay_ms: ms,
        })
        .await?,
    )?;
    println!("Hold delay for {key} set to {ms} ms");
    Ok(())
}

pub async fn run_dispatch(action: String, extra: Option<String>) -> Result<()> {
    let entry = parse_entry(&action, extra)?;
    check_response(send_request(IpcRequest::Dispatch { entry: entry.clone() }).await?)?;
    println!("Dispatched {entry}");
    Ok(())
}

fn parse_slot(slot: &str) -> Result<PressKind> {
    match slot {
        "press" => Ok(PressKind::Press),
        "hold" => Ok(PressKind::Hold),
        _ => anyhow::bail!("unknown slot: {slot} (expected 'press' or 'hold')"),
    }
}

/// Build and validate an entry so bad input fails before reaching the daemon.
fn parse_entry(action: &str, extra: Option<String>) -> Result<ActionEntry> {
    let kind: ActionKind = action.parse()?;
    if extra.is_some() && kind.extra_hint().is_none() {
        anyhow::bail!("{kind} takes no extra value");
    }
    let entry = ActionEntry { kind, extra };
    entry
        .validate()
        .with_context(|| format!("invalid {kind} action"))?;
    Ok(entry)
}
