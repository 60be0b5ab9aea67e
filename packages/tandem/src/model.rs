//! Store records and the path layout shared by both session members.
//!
//! Ownership convention: each client single-writes its own `status` and
//! `cursor`; room-scoped values are multi-writer last-write-wins, except
//! where the engine uses guarded updates or transactions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_store::{Path, StoreError};

use crate::identity::ClientId;

/// Number of windows in the lights stage.
pub const WINDOW_COUNT: usize = 5;

/// Opaque room identifier, allocated by the store's child-key generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Accept an id read back from the store. Rejects strings that cannot be
    /// a path segment.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.contains('/') {
            None
        } else {
            Some(RoomId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Waiting,
    Paired,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Waiting => "waiting",
            ClientStatus::Paired => "paired",
        }
    }
}

/// Pointer position as percentages of the shared surface, in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPos {
    pub x: f64,
    pub y: f64,
}

/// One client's registration record, removed by the store's disconnect hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub status: ClientStatus,
    /// UTC millis; the FIFO fairness key for matchmaking.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPos>,
}

impl ClientRecord {
    pub fn waiting(created_at: i64) -> Self {
        Self {
            status: ClientStatus::Waiting,
            created_at,
            room_id: None,
            cursor: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MemberRecord {
    #[serde(default)]
    pub ready: bool,
}

/// The stages of a session, in order. `Ending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Episode {
    Opening,
    Lights,
    Tissue,
    Ending,
}

impl Episode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Episode::Opening => "opening",
            Episode::Lights => "lights",
            Episode::Tissue => "tissue",
            Episode::Ending => "ending",
        }
    }

    /// Decode a store value; `None` for anything that is not a known stage.
    pub fn from_value(value: &Value) -> Option<Episode> {
        value.as_str().and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for Episode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Episode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opening" => Ok(Episode::Opening),
            "lights" => Ok(Episode::Lights),
            "tissue" => Ok(Episode::Tissue),
            "ending" => Ok(Episode::Ending),
            _ => Err(()),
        }
    }
}

/// One window in the lights stage. `is_off` flips to true exactly once, when
/// both members are present in `clicks`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowRecord {
    #[serde(default)]
    pub is_off: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clicks: BTreeMap<ClientId, bool>,
}

impl WindowRecord {
    pub fn clicked_by(&self, id: &ClientId) -> bool {
        self.clicks.get(id).copied().unwrap_or(false)
    }
}

/// Shared state of the tissue stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TissueRecord {
    #[serde(default)]
    pub holding: BTreeMap<ClientId, bool>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub is_completed: bool,
}

impl Default for TissueRecord {
    fn default() -> Self {
        Self {
            holding: BTreeMap::new(),
            progress: 0.0,
            is_completed: false,
        }
    }
}

impl TissueRecord {
    pub fn held_by(&self, id: &ClientId) -> bool {
        self.holding.get(id).copied().unwrap_or(false)
    }
}

// =============================================================================
// Path layout
// =============================================================================

pub fn clients_root() -> Result<Path, StoreError> {
    Path::parse("clients")
}

pub fn client_path(id: &ClientId) -> Result<Path, StoreError> {
    clients_root()?.join(id.as_str())
}

pub fn client_status_path(id: &ClientId) -> Result<Path, StoreError> {
    client_path(id)?.join("status")
}

pub fn client_room_path(id: &ClientId) -> Result<Path, StoreError> {
    client_path(id)?.join("room_id")
}

pub fn client_cursor_path(id: &ClientId) -> Result<Path, StoreError> {
    client_path(id)?.join("cursor")
}

pub fn rooms_root() -> Result<Path, StoreError> {
    Path::parse("rooms")
}

pub fn room_path(room: &RoomId) -> Result<Path, StoreError> {
    rooms_root()?.join(room.as_str())
}

pub fn room_created_path(room: &RoomId) -> Result<Path, StoreError> {
    room_path(room)?.join("created_at")
}

pub fn episode_path(room: &RoomId) -> Result<Path, StoreError> {
    room_path(room)?.join("current_episode")
}

pub fn members_path(room: &RoomId) -> Result<Path, StoreError> {
    room_path(room)?.join("members")
}

pub fn member_path(room: &RoomId, id: &ClientId) -> Result<Path, StoreError> {
    members_path(room)?.join(id.as_str())
}

pub fn member_ready_path(room: &RoomId, id: &ClientId) -> Result<Path, StoreError> {
    member_path(room, id)?.join("ready")
}

pub fn windows_path(room: &RoomId) -> Result<Path, StoreError> {
    room_path(room)?.join("episodes")?.join("lights")?.join("windows")
}

pub fn window_path(room: &RoomId, index: usize) -> Result<Path, StoreError> {
    windows_path(room)?.join(&index.to_string())
}

pub fn tissue_path(room: &RoomId) -> Result<Path, StoreError> {
    room_path(room)?.join("episodes")?.join("tissue")
}

pub fn tissue_progress_path(room: &RoomId) -> Result<Path, StoreError> {
    tissue_path(room)?.join("progress")
}

pub fn tissue_completed_path(room: &RoomId) -> Result<Path, StoreError> {
    tissue_path(room)?.join("is_completed")
}

pub fn tissue_holding_path(room: &RoomId, id: &ClientId) -> Result<Path, StoreError> {
    tissue_path(room)?.join("holding")?.join(id.as_str())
}
