//! Top-level client lifecycle: allocate an identity, pair, run the session,
//! and cycle again with a fresh identity on restart.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use tandem_store::Store;

use crate::config::Config;
use crate::error::EngineError;
use crate::identity::ClientId;
use crate::matchmaker;
use crate::protocol::{ClientInput, SessionEvent, SessionOutcome};
use crate::session::{ControllerExit, SessionContext, SessionController};

/// One participant. Drive it with [`ClientInput`] values and observe it
/// through [`SessionEvent`] values; the store does the rest.
pub struct Client {
    store: Store,
    config: Config,
}

impl Client {
    pub fn new(store: Store, config: Config) -> Self {
        Self { store, config }
    }

    /// Run sessions until the input channel closes, the partner leaves, or
    /// pairing times out. A restart from the terminal stage loops with a
    /// fresh identity and a new matchmaking round.
    pub async fn run(
        &self,
        mut inputs: mpsc::Receiver<ClientInput>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<SessionOutcome, EngineError> {
        loop {
            match self.run_once(&mut inputs, &events).await? {
                ControllerExit::Restart => {
                    info!("restarting with a fresh identity");
                    continue;
                }
                ControllerExit::Abandoned => {
                    let _ = events.send(SessionEvent::SessionEnded {
                        outcome: SessionOutcome::Abandoned,
                    });
                    return Ok(SessionOutcome::Abandoned);
                }
                ControllerExit::Closed => {
                    let _ = events.send(SessionEvent::SessionEnded {
                        outcome: SessionOutcome::Closed,
                    });
                    return Ok(SessionOutcome::Closed);
                }
            }
        }
    }

    async fn run_once(
        &self,
        inputs: &mut mpsc::Receiver<ClientInput>,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<ControllerExit, EngineError> {
        let me = ClientId::allocate();
        let store = self.store.connect();
        let _ = events.send(SessionEvent::PairingStarted { client: me.clone() });

        let result = self.pair_and_run(&store, me, inputs, events).await;
        // Severing the connection fires the on-disconnect removal of our
        // client record, whether the session ended cleanly or not.
        store.disconnect().await;
        result
    }

    async fn pair_and_run(
        &self,
        store: &tandem_store::StoreClient,
        me: ClientId,
        inputs: &mut mpsc::Receiver<ClientInput>,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<ControllerExit, EngineError> {
        let matched = matchmaker::register_and_match(store, &me, &self.config.matchmaking).await?;
        let _ = events.send(SessionEvent::Paired {
            room: matched.room.clone(),
            partner: matched.partner.clone(),
            role: matched.role,
        });

        let ctx = Arc::new(SessionContext::new(
            store.clone(),
            self.config.session.clone(),
            me,
            matched.partner,
            matched.room,
            matched.role,
            events.clone(),
        ));
        SessionController::new(ctx).run(inputs).await
    }
}
