//! "Pull the tissue": progress advances only while both members hold the
//! pointer down, and completion latches exactly once.
//!
//! Progress is paced by input event frequency, not wall-clock time: each
//! qualifying pointer-move adds a fixed step. The advance and the completion
//! flag live in one transaction, so progress is monotonic and nothing can
//! push it after completion.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::model::{self, Episode, TissueRecord};
use crate::protocol::{ClientInput, SessionEvent};
use crate::session::{SessionContext, schedule_transition};

pub(crate) async fn run(
    ctx: Arc<SessionContext>,
    mut inputs: mpsc::Receiver<ClientInput>,
    cancel: CancellationToken,
) {
    if let Err(e) = drive(&ctx, &mut inputs, &cancel).await {
        warn!(error = %e, "tissue handler stopped on error");
    }
}

async fn drive(
    ctx: &Arc<SessionContext>,
    inputs: &mut mpsc::Receiver<ClientInput>,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let store = &ctx.store;
    let mut progress_sub = store.subscribe(&model::tissue_progress_path(&ctx.room)?).await?;
    let mut completed_sub = store.subscribe(&model::tissue_completed_path(&ctx.room)?).await?;
    let mut partner_holding_sub = store
        .subscribe(&model::tissue_holding_path(&ctx.room, &ctx.partner)?)
        .await?;

    // Local mode flags. `dragging` means this client pressed while the
    // partner was already holding; only then do its moves pull the tissue.
    let mut dragging = false;
    let mut partner_holding = false;
    let mut completed = false;
    let mut transition_requested = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            input = inputs.recv() => {
                let Some(input) = input else { return Ok(()) };
                match input {
                    ClientInput::PointerDown => {
                        if completed {
                            continue;
                        }
                        store
                            .write(&model::tissue_holding_path(&ctx.room, &ctx.me)?, json!(true))
                            .await?;
                        let partner_now = store
                            .read_once(&model::tissue_holding_path(&ctx.room, &ctx.partner)?)
                            .await?;
                        if partner_now == json!(true) {
                            dragging = true;
                        }
                    }
                    ClientInput::PointerUp => {
                        dragging = false;
                        if !completed {
                            store
                                .write(&model::tissue_holding_path(&ctx.room, &ctx.me)?, json!(false))
                                .await?;
                        }
                    }
                    ClientInput::PointerMove { .. } => {
                        if dragging && partner_holding && !completed {
                            let step = ctx.config.tissue_step;
                            store
                                .transaction(&model::tissue_path(&ctx.room)?, move |current| {
                                    advance_outcome(current, step)
                                })
                                .await?;
                        }
                    }
                    _ => {}
                }
            }
            value = progress_sub.recv() => {
                let Some(value) = value else { return Ok(()) };
                if let Some(progress) = value.as_f64() {
                    ctx.emit(SessionEvent::ProgressChanged { progress });
                }
            }
            value = completed_sub.recv() => {
                let Some(value) = value else { return Ok(()) };
                if value == json!(true) && !completed {
                    completed = true;
                    dragging = false;
                    debug!("tissue fully pulled");
                    ctx.emit(SessionEvent::TissueCompleted);
                    if !transition_requested {
                        transition_requested = true;
                        schedule_transition(ctx, Episode::Tissue, Episode::Ending, cancel);
                    }
                }
            }
            value = partner_holding_sub.recv() => {
                let Some(value) = value else { return Ok(()) };
                let holding = value == json!(true);
                if holding != partner_holding {
                    partner_holding = holding;
                    ctx.emit(SessionEvent::PartnerHoldingChanged { holding });
                }
            }
        }
    }
}

/// The atomic advance: monotonic, clamped at 100, with the completion flag
/// set in the same commit that reaches it. No-op once completed.
fn advance_outcome(current: Value, step: f64) -> Option<Value> {
    let mut record: TissueRecord = serde_json::from_value(current).unwrap_or_default();
    if record.is_completed {
        return None;
    }
    let next = (record.progress + step).max(record.progress).min(100.0);
    record.progress = next;
    if record.progress >= 100.0 {
        record.is_completed = true;
    }
    serde_json::to_value(&record).ok()
}
