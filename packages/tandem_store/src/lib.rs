//! tandem_store - In-process realtime key-value store.
//!
//! A hierarchical JSON tree shared by any number of connected clients, with
//! the contract a realtime session engine needs: snapshot reads, continuous
//! subscriptions that deliver the current value immediately and then every
//! change in commit order, atomic multi-path updates (optionally guarded by
//! preconditions), single-path transactions, and per-connection disconnect
//! cleanup hooks.
//!
//! # Example
//!
//! ```
//! use tandem_store::{Path, Store};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tandem_store::StoreError> {
//! let store = Store::new();
//! let client = store.connect();
//!
//! let path = Path::parse("lobby/seats")?;
//! let mut seats = client.subscribe(&path).await?;
//! assert!(seats.recv().await.unwrap().is_null()); // current value first
//!
//! client.write(&path, serde_json::json!(2)).await?;
//! assert_eq!(seats.recv().await.unwrap(), serde_json::json!(2));
//! # Ok(())
//! # }
//! ```

mod error;
mod path;
mod store;

pub use error::StoreError;
pub use path::Path;
pub use store::{Store, StoreClient, Subscription, TxOutcome};
