//! Session controller: the stage state machine for one paired client.
//!
//! The store's `current_episode` value is the authoritative state. Stage
//! completion detectors *request* a transition with a guarded update, so
//! exactly one of the two members' requests commits, and both members follow
//! the committed value through their subscription. Each stage's interaction
//! handler runs as a task scoped to a cancellation token and is torn down,
//! subscriptions and all, when the stage exits.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tandem_store::{StoreClient, StoreError};

use crate::config::SessionConfig;
use crate::cursor::CursorRelay;
use crate::episodes;
use crate::error::EngineError;
use crate::identity::ClientId;
use crate::matchmaker::MatchRole;
use crate::model::{self, CursorPos, Episode, RoomId};
use crate::protocol::{ClientInput, SessionEvent};

/// Everything the stage handlers need, one instance per active session.
/// Torn down (with the handlers) when the session ends.
pub(crate) struct SessionContext {
    pub store: StoreClient,
    pub config: SessionConfig,
    pub me: ClientId,
    pub partner: ClientId,
    pub room: RoomId,
    pub role: MatchRole,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionContext {
    pub fn new(
        store: StoreClient,
        config: SessionConfig,
        me: ClientId,
        partner: ClientId,
        room: RoomId,
        role: MatchRole,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            store,
            config,
            me,
            partner,
            room,
            role,
            events,
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped; discarding session event");
        }
    }
}

/// How the controller loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControllerExit {
    /// Restart requested from the terminal stage.
    Restart,
    /// The partner's client record disappeared mid-session.
    Abandoned,
    /// The input channel closed (embedding application shut down).
    Closed,
}

struct ActiveEpisode {
    inputs: mpsc::Sender<ClientInput>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl ActiveEpisode {
    fn teardown(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

pub(crate) struct SessionController {
    ctx: Arc<SessionContext>,
    episode: Episode,
    active: Option<ActiveEpisode>,
    is_ready: bool,
    partner_ready: bool,
}

impl SessionController {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            episode: Episode::Opening,
            active: None,
            is_ready: false,
            partner_ready: false,
        }
    }

    pub async fn run(
        mut self,
        inputs: &mut mpsc::Receiver<ClientInput>,
    ) -> Result<ControllerExit, EngineError> {
        let result = self.drive(inputs).await;
        if let Some(active) = self.active.take() {
            active.teardown();
        }
        result
    }

    async fn drive(
        &mut self,
        inputs: &mut mpsc::Receiver<ClientInput>,
    ) -> Result<ControllerExit, EngineError> {
        let store = &self.ctx.store;
        let mut episode_sub = store.subscribe(&model::episode_path(&self.ctx.room)?).await?;
        let mut partner_sub = store.subscribe(&model::client_path(&self.ctx.partner)?).await?;
        let mut partner_ready_sub = store
            .subscribe(&model::member_ready_path(&self.ctx.room, &self.ctx.partner)?)
            .await?;
        let mut partner_cursor_sub = store
            .subscribe(&model::client_cursor_path(&self.ctx.partner)?)
            .await?;
        let mut cursor = CursorRelay::new(self.ctx.config.cursor.clone());

        self.ctx.emit(SessionEvent::EpisodeEntered {
            episode: Episode::Opening,
        });
        info!(
            room = %self.ctx.room,
            role = ?self.ctx.role,
            "session opened; waiting for both members to enter"
        );

        loop {
            tokio::select! {
                input = inputs.recv() => {
                    let Some(input) = input else {
                        return Ok(ControllerExit::Closed);
                    };
                    if let Some(exit) = self.handle_input(input, &mut cursor).await? {
                        return Ok(exit);
                    }
                }
                value = episode_sub.recv() => {
                    let Some(value) = value else {
                        return Err(StoreError::SubscriptionClosed.into());
                    };
                    if let Some(next) = Episode::from_value(&value) {
                        self.enter(next);
                    }
                }
                value = partner_sub.recv() => {
                    let Some(value) = value else {
                        return Err(StoreError::SubscriptionClosed.into());
                    };
                    // A removed record means the partner is gone for good.
                    // Once the session is in its terminal stage there is
                    // nothing left to abandon (the partner may simply have
                    // restarted first).
                    if value.is_null() && self.episode != Episode::Ending {
                        info!(partner = %self.ctx.partner, "partner record removed");
                        self.ctx.emit(SessionEvent::PartnerLeft);
                        return Ok(ControllerExit::Abandoned);
                    }
                }
                value = partner_ready_sub.recv() => {
                    let Some(value) = value else {
                        return Err(StoreError::SubscriptionClosed.into());
                    };
                    self.partner_ready = value == json!(true);
                    if self.episode == Episode::Opening && self.is_ready && self.partner_ready {
                        request_transition(&self.ctx, Episode::Opening, Episode::Lights).await;
                    }
                }
                value = partner_cursor_sub.recv() => {
                    let Some(value) = value else {
                        return Err(StoreError::SubscriptionClosed.into());
                    };
                    if let Ok(pos) = serde_json::from_value::<CursorPos>(value) {
                        self.ctx.emit(SessionEvent::PartnerCursorMoved { x: pos.x, y: pos.y });
                    }
                }
            }
        }
    }

    async fn handle_input(
        &mut self,
        input: ClientInput,
        cursor: &mut CursorRelay,
    ) -> Result<Option<ControllerExit>, EngineError> {
        match input {
            ClientInput::Enter => {
                if self.episode == Episode::Opening && !self.is_ready {
                    self.is_ready = true;
                    self.ctx
                        .store
                        .write(
                            &model::member_ready_path(&self.ctx.room, &self.ctx.me)?,
                            json!(true),
                        )
                        .await?;
                    if self.partner_ready {
                        request_transition(&self.ctx, Episode::Opening, Episode::Lights).await;
                    }
                }
            }
            ClientInput::Restart => {
                if self.episode == Episode::Ending {
                    return Ok(Some(ControllerExit::Restart));
                }
                debug!("restart ignored outside the terminal stage");
            }
            ClientInput::SurfaceResized { width, height } => {
                cursor.surface_resized(width, height);
            }
            ClientInput::PointerMove { x, y } => {
                if let Some(pos) = cursor.on_pointer_move(x, y, Instant::now()) {
                    self.ctx
                        .store
                        .write(
                            &model::client_cursor_path(&self.ctx.me)?,
                            serde_json::to_value(pos)?,
                        )
                        .await?;
                }
                self.forward(ClientInput::PointerMove { x, y });
            }
            input @ (ClientInput::WindowClick { .. }
            | ClientInput::PointerDown
            | ClientInput::PointerUp) => {
                self.forward(input);
            }
        }
        Ok(None)
    }

    fn forward(&mut self, input: ClientInput) {
        if let Some(active) = &self.active
            && active.inputs.try_send(input).is_err()
        {
            debug!("active stage handler is saturated or gone; dropping input");
        }
    }

    /// Follow a committed episode change: tear down the old stage handler and
    /// spawn the new one.
    fn enter(&mut self, next: Episode) {
        if next == self.episode {
            return;
        }
        if let Some(active) = self.active.take() {
            active.teardown();
        }
        info!(room = %self.ctx.room, from = %self.episode, to = %next, "entering stage");
        self.episode = next;
        self.ctx.emit(SessionEvent::EpisodeEntered { episode: next });
        self.active = match next {
            Episode::Lights => Some(self.spawn(episodes::lights::run)),
            Episode::Tissue => Some(self.spawn(episodes::tissue::run)),
            Episode::Opening | Episode::Ending => None,
        };
    }

    fn spawn<F, Fut>(&self, run: F) -> ActiveEpisode
    where
        F: FnOnce(Arc<SessionContext>, mpsc::Receiver<ClientInput>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(self.ctx.clone(), rx, cancel.clone()));
        ActiveEpisode {
            inputs: tx,
            cancel,
            task,
        }
    }
}

/// Ask the store to advance the episode. Guarded on the current value, so two
/// racing members commit exactly once; losing the race is not an error.
pub(crate) async fn request_transition(ctx: &SessionContext, from: Episode, to: Episode) {
    let result: Result<(), EngineError> = async {
        let path = model::episode_path(&ctx.room)?;
        ctx.store
            .update_guarded(
                &[(path.clone(), json!(from.as_str()))],
                vec![(path, json!(to.as_str()))],
            )
            .await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => debug!(%from, %to, "stage transition committed"),
        Err(EngineError::Store(StoreError::PreconditionFailed { .. })) => {
            debug!(%from, %to, "stage transition already committed by partner");
        }
        Err(e) => warn!(error = %e, %from, %to, "stage transition failed"),
    }
}

/// Apply the fixed display delay, then request the transition. Cancelled if
/// the stage handler is torn down first (the partner's request won).
pub(crate) fn schedule_transition(
    ctx: &Arc<SessionContext>,
    from: Episode,
    to: Episode,
    cancel: &CancellationToken,
) {
    let ctx = Arc::clone(ctx);
    let cancel = cancel.child_token();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(ctx.config.advance_delay) => {
                request_transition(&ctx, from, to).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tandem_store::Store;

    fn test_ctx(store: &Store, room: &RoomId) -> Arc<SessionContext> {
        // emit() tolerates the dropped event receiver
        let (events, _) = mpsc::unbounded_channel();
        Arc::new(SessionContext::new(
            store.connect(),
            Config::default().session,
            ClientId::parse("a").unwrap(),
            ClientId::parse("b").unwrap(),
            room.clone(),
            MatchRole::Initiator,
            events,
        ))
    }

    #[tokio::test]
    async fn racing_transitions_commit_exactly_once() {
        let store = Store::new();
        let room = RoomId::parse("r1").unwrap();
        let episode_path = model::episode_path(&room).unwrap();
        let client = store.connect();
        client.write(&episode_path, json!("lights")).await.unwrap();

        let mut sub = client.subscribe(&episode_path).await.unwrap();
        assert_eq!(sub.recv().await.unwrap(), json!("lights"));

        let ctx = test_ctx(&store, &room);
        // both members detect completion and request the same transition
        request_transition(&ctx, Episode::Lights, Episode::Tissue).await;
        request_transition(&ctx, Episode::Lights, Episode::Tissue).await;

        assert_eq!(sub.recv().await.unwrap(), json!("tissue"));
        // a later write proves no duplicate "tissue" notification was queued
        client.write(&episode_path, json!("ending")).await.unwrap();
        assert_eq!(sub.recv().await.unwrap(), json!("ending"));
    }

    #[tokio::test]
    async fn stale_transition_requests_are_ignored() {
        let store = Store::new();
        let room = RoomId::parse("r1").unwrap();
        let episode_path = model::episode_path(&room).unwrap();
        let client = store.connect();
        client.write(&episode_path, json!("tissue")).await.unwrap();

        let ctx = test_ctx(&store, &room);
        // a handler that was torn down late asks for a transition the
        // session has already moved past
        request_transition(&ctx, Episode::Lights, Episode::Tissue).await;
        assert_eq!(client.read_once(&episode_path).await.unwrap(), json!("tissue"));
    }

    #[tokio::test]
    async fn scheduled_transition_fires_after_the_delay() {
        let store = Store::new();
        let room = RoomId::parse("r1").unwrap();
        let episode_path = model::episode_path(&room).unwrap();
        let client = store.connect();
        client.write(&episode_path, json!("lights")).await.unwrap();

        let (events, _rx) = mpsc::unbounded_channel();
        let mut config = Config::default().session;
        config.advance_delay = std::time::Duration::from_millis(10);
        let ctx = Arc::new(SessionContext::new(
            store.connect(),
            config,
            ClientId::parse("a").unwrap(),
            ClientId::parse("b").unwrap(),
            room.clone(),
            MatchRole::Initiator,
            events,
        ));

        let mut sub = client.subscribe(&episode_path).await.unwrap();
        sub.recv().await.unwrap();

        let cancel = CancellationToken::new();
        schedule_transition(&ctx, Episode::Lights, Episode::Tissue, &cancel);
        assert_eq!(sub.recv().await.unwrap(), json!("tissue"));
    }

    #[tokio::test]
    async fn cancelled_schedule_never_fires() {
        let store = Store::new();
        let room = RoomId::parse("r1").unwrap();
        let episode_path = model::episode_path(&room).unwrap();
        let client = store.connect();
        client.write(&episode_path, json!("lights")).await.unwrap();

        let (events, _rx) = mpsc::unbounded_channel();
        let mut config = Config::default().session;
        config.advance_delay = std::time::Duration::from_millis(20);
        let ctx = Arc::new(SessionContext::new(
            store.connect(),
            config,
            ClientId::parse("a").unwrap(),
            ClientId::parse("b").unwrap(),
            room.clone(),
            MatchRole::Initiator,
            events,
        ));

        let cancel = CancellationToken::new();
        schedule_transition(&ctx, Episode::Lights, Episode::Tissue, &cancel);
        cancel.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(client.read_once(&episode_path).await.unwrap(), json!("lights"));
    }
}
