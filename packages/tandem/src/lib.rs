//! tandem - Two-party matchmaking and synchronized session engine.
//!
//! Pairs two anonymous clients through a shared realtime store, then drives a
//! fixed sequence of cooperative stages (opening, lights, tissue, ending)
//! while mirroring shared state - window toggles, drag progress, cursor
//! positions - between the two clients via store subscriptions.
//!
//! The rendering layer is out of scope: a client is driven with
//! [`protocol::ClientInput`] values and observed through
//! [`protocol::SessionEvent`] values.

pub mod config;
pub mod error;
pub mod identity;
pub mod matchmaker;
pub mod model;
pub mod protocol;

mod client;
mod cursor;
mod episodes;
mod session;

pub use client::Client;
pub use config::Config;
pub use error::EngineError;
pub use identity::ClientId;
pub use matchmaker::{Match, MatchRole};
pub use model::Episode;
pub use protocol::{ClientInput, SessionEvent, SessionOutcome};
pub use tandem_store::{Store, StoreClient};
