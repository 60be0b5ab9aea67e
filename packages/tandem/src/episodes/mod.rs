//! Per-stage interaction handlers.
//!
//! Each handler is spawned by the session controller when its stage is
//! entered, receives the forwarded client inputs, and is cancelled (with its
//! subscriptions) when the stage exits.

pub(crate) mod lights;
pub(crate) mod tissue;
