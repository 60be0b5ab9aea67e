//! Input and event types exchanged with the rendering layer.
//!
//! The engine owns no visual surface. A client is driven with
//! [`ClientInput`] values (pointer and action events translated by whatever
//! renders the session) and observed through [`SessionEvent`] values.

use serde::{Deserialize, Serialize};

use crate::identity::ClientId;
use crate::matchmaker::MatchRole;
use crate::model::{Episode, RoomId};

/// Events flowing from the rendering layer into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientInput {
    /// The local "enter" action that marks this client ready to leave the
    /// opening stage.
    Enter,
    /// Click on window `index` during the lights stage.
    WindowClick { index: usize },
    /// Pointer pressed on the shared surface.
    PointerDown,
    /// Pointer released.
    PointerUp,
    /// Pointer moved; coordinates are in local surface pixels.
    PointerMove { x: f64, y: f64 },
    /// The local surface changed size; future cursor positions are mapped
    /// against the new bounding box.
    SurfaceResized { width: f64, height: f64 },
    /// Start over with a fresh identity. Only honored in the terminal stage.
    Restart,
}

/// Visible state of one window, for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowView {
    pub is_off: bool,
}

/// How a session run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The partner's client record disappeared mid-session.
    Abandoned,
    /// The embedding application closed the input channel.
    Closed,
}

/// Events flowing from the engine to the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A fresh identity was allocated and matchmaking began.
    PairingStarted { client: ClientId },
    /// Matched into a room.
    Paired {
        room: RoomId,
        partner: ClientId,
        role: MatchRole,
    },
    /// The session moved to a new stage; rebuild the interaction surface.
    EpisodeEntered { episode: Episode },
    /// The lights-stage windows changed; re-render all of them.
    WindowsChanged {
        windows: Vec<WindowView>,
        windows_off: usize,
    },
    /// Tissue progress moved (either member may have advanced it).
    ProgressChanged { progress: f64 },
    /// The tissue was pulled all the way out.
    TissueCompleted,
    /// The partner pressed or released on the shared surface.
    PartnerHoldingChanged { holding: bool },
    /// The partner's cursor moved; coordinates are surface percentages.
    PartnerCursorMoved { x: f64, y: f64 },
    /// The partner's client record disappeared.
    PartnerLeft,
    /// The session run is over; no further events follow.
    SessionEnded { outcome: SessionOutcome },
}
