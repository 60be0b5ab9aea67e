//! Pairing two waiting clients through the shared store.
//!
//! The initiator path claims a partner with a guarded multi-path update
//! preconditioned on *both* clients still being `waiting`, so a pair is
//! claimed atomically: a third client racing for the same partner loses the
//! precondition check and simply moves on. At most one room ever exists for a
//! matched pair.

use chrono::Utc;
use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::{debug, info};

use tandem_store::{StoreClient, StoreError, Subscription};

use crate::config::MatchmakingConfig;
use crate::error::EngineError;
use crate::identity::ClientId;
use crate::model::{
    self, ClientRecord, ClientStatus, Episode, MemberRecord, RoomId, TissueRecord, WINDOW_COUNT,
    WindowRecord,
};

/// Which side of the pairing this client performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRole {
    /// Found a waiting partner and created the room.
    Initiator,
    /// Was claimed by another client's pairing update.
    Responder,
}

/// A successful pairing.
#[derive(Debug, Clone)]
pub struct Match {
    pub room: RoomId,
    pub partner: ClientId,
    pub role: MatchRole,
}

/// Register this client as waiting and pair it with another waiting client,
/// either by claiming one (initiator) or by being claimed (responder).
pub async fn register_and_match(
    store: &StoreClient,
    me: &ClientId,
    config: &MatchmakingConfig,
) -> Result<Match, EngineError> {
    let my_path = model::client_path(me)?;
    let record = ClientRecord::waiting(Utc::now().timestamp_millis());
    store.write(&my_path, serde_json::to_value(&record)?).await?;
    store.on_disconnect_remove(&my_path).await?;

    // Subscribe to our own record before scanning, so a pairing that lands
    // between the snapshot and the responder wait is never missed.
    let own_sub = store.subscribe(&my_path).await?;

    let snapshot = store.read_once(&model::clients_root()?).await?;
    let mut waiting: Vec<(i64, ClientId)> = Vec::new();
    if let Value::Object(clients) = snapshot {
        for (raw_id, value) in clients {
            if raw_id == me.as_str() {
                continue;
            }
            let Some(id) = ClientId::parse(&raw_id) else {
                continue;
            };
            let Ok(peer) = serde_json::from_value::<ClientRecord>(value) else {
                continue;
            };
            if peer.status == ClientStatus::Waiting {
                waiting.push((peer.created_at, id));
            }
        }
    }
    // Oldest first; the id is a deterministic tie-break.
    waiting.sort();
    debug!(count = waiting.len(), "waiting clients in snapshot");

    for (_, candidate) in &waiting {
        match try_claim(store, me, candidate).await {
            Ok(matched) => {
                info!(room = %matched.room, partner = %matched.partner, "paired as initiator");
                return Ok(matched);
            }
            Err(EngineError::Store(StoreError::PreconditionFailed { .. })) => {
                debug!(%candidate, "candidate claimed concurrently; trying next");
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    wait_for_pairing(store, me, own_sub, config).await
}

/// Atomically claim `partner`: flip both clients to `paired` and create the
/// fully-seeded room in a single guarded commit.
async fn try_claim(
    store: &StoreClient,
    me: &ClientId,
    partner: &ClientId,
) -> Result<Match, EngineError> {
    let room_path = store.append_child(&model::rooms_root()?)?;
    let Some(room) = room_path.last_segment().and_then(RoomId::parse) else {
        return Err(StoreError::InvalidPath(room_path.to_string()).into());
    };

    let mut writes = vec![
        (model::client_status_path(me)?, json!(ClientStatus::Paired.as_str())),
        (model::client_room_path(me)?, json!(room.as_str())),
        (
            model::client_status_path(partner)?,
            json!(ClientStatus::Paired.as_str()),
        ),
        (model::client_room_path(partner)?, json!(room.as_str())),
        (
            model::member_path(&room, me)?,
            serde_json::to_value(MemberRecord::default())?,
        ),
        (
            model::member_path(&room, partner)?,
            serde_json::to_value(MemberRecord::default())?,
        ),
        (
            model::room_created_path(&room)?,
            json!(Utc::now().timestamp_millis()),
        ),
        (model::episode_path(&room)?, json!(Episode::Opening.as_str())),
        (
            model::tissue_path(&room)?,
            serde_json::to_value(TissueRecord::default())?,
        ),
    ];
    for index in 0..WINDOW_COUNT {
        writes.push((
            model::window_path(&room, index)?,
            serde_json::to_value(WindowRecord::default())?,
        ));
    }

    let preconditions = [
        (
            model::client_status_path(me)?,
            json!(ClientStatus::Waiting.as_str()),
        ),
        (
            model::client_status_path(partner)?,
            json!(ClientStatus::Waiting.as_str()),
        ),
    ];
    store.update_guarded(&preconditions, writes).await?;

    Ok(Match {
        room,
        partner: partner.clone(),
        role: MatchRole::Initiator,
    })
}

/// Wait (bounded) for an initiator to claim us, then look up the partner in
/// the room's member set.
async fn wait_for_pairing(
    store: &StoreClient,
    me: &ClientId,
    mut own_sub: Subscription,
    config: &MatchmakingConfig,
) -> Result<Match, EngineError> {
    debug!(%me, "no claimable partner; waiting to be claimed");

    let wait = async {
        loop {
            let Some(value) = own_sub.recv().await else {
                return Err(EngineError::Store(StoreError::SubscriptionClosed));
            };
            if value.is_null() {
                continue;
            }
            let Ok(record) = serde_json::from_value::<ClientRecord>(value) else {
                continue;
            };
            if record.status != ClientStatus::Paired {
                continue;
            }
            let Some(room) = record.room_id else {
                continue;
            };

            let members = store.read_once(&model::members_path(&room)?).await?;
            if let Value::Object(map) = members
                && let Some(partner) = map
                    .keys()
                    .filter(|key| key.as_str() != me.as_str())
                    .find_map(|key| ClientId::parse(key))
            {
                info!(room = %room, partner = %partner, "paired as responder");
                return Ok(Match {
                    room,
                    partner,
                    role: MatchRole::Responder,
                });
            }
        }
    };

    match timeout(config.pairing_timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::PairingTimeout),
    }
}
