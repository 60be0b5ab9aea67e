//! "Turn off five lights": each window goes dark exactly once, when both
//! members have clicked it.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tandem_store::TxOutcome;

use crate::error::EngineError;
use crate::identity::ClientId;
use crate::model::{self, Episode, WINDOW_COUNT, WindowRecord};
use crate::protocol::{ClientInput, SessionEvent, WindowView};
use crate::session::{SessionContext, schedule_transition};

pub(crate) async fn run(
    ctx: Arc<SessionContext>,
    mut inputs: mpsc::Receiver<ClientInput>,
    cancel: CancellationToken,
) {
    if let Err(e) = drive(&ctx, &mut inputs, &cancel).await {
        warn!(error = %e, "lights handler stopped on error");
    }
}

async fn drive(
    ctx: &Arc<SessionContext>,
    inputs: &mut mpsc::Receiver<ClientInput>,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let mut windows_sub = ctx.store.subscribe(&model::windows_path(&ctx.room)?).await?;
    let mut transition_requested = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            input = inputs.recv() => {
                match input {
                    Some(ClientInput::WindowClick { index }) => handle_click(ctx, index).await?,
                    Some(_) => {}
                    None => return Ok(()),
                }
            }
            value = windows_sub.recv() => {
                let Some(value) = value else { return Ok(()) };
                let windows = parse_windows(&value);
                let windows_off = windows.iter().filter(|w| w.is_off).count();
                ctx.emit(SessionEvent::WindowsChanged {
                    windows: windows.iter().map(|w| WindowView { is_off: w.is_off }).collect(),
                    windows_off,
                });
                if windows_off == WINDOW_COUNT && !transition_requested {
                    transition_requested = true;
                    debug!("all windows are off");
                    schedule_transition(ctx, Episode::Lights, Episode::Tissue, cancel);
                }
            }
        }
    }
}

async fn handle_click(ctx: &SessionContext, index: usize) -> Result<(), EngineError> {
    if index >= WINDOW_COUNT {
        debug!(index, "ignoring click outside the window range");
        return Ok(());
    }
    let path = model::window_path(&ctx.room, index)?;
    let me = ctx.me.clone();
    let partner = ctx.partner.clone();
    let outcome = ctx
        .store
        .transaction(&path, move |current| click_outcome(current, &me, &partner))
        .await?;
    if outcome == TxOutcome::Aborted {
        debug!(index, "window already off; click ignored");
    }
    Ok(())
}

/// The atomic click decision: no-op when the window is already off; record
/// the clicker; go dark when both members are present in the click set.
fn click_outcome(current: Value, me: &ClientId, partner: &ClientId) -> Option<Value> {
    let mut record: WindowRecord = serde_json::from_value(current).unwrap_or_default();
    if record.is_off {
        return None;
    }
    record.clicks.insert(me.clone(), true);
    if record.clicked_by(partner) {
        record.is_off = true;
    }
    serde_json::to_value(&record).ok()
}

fn parse_windows(value: &Value) -> Vec<WindowRecord> {
    (0..WINDOW_COUNT)
        .map(|index| {
            value
                .get(index.to_string())
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default()
        })
        .collect()
}
