//! Storage layer: the inventory system of record.
//!
//! Owns the canonical item and location records and the append-only
//! movement ledger. Every quantity-changing write commits the item update
//! and its ledger entry atomically, then publishes the change event to the
//! realtime feed.

pub mod error;
pub mod in_memory;
pub mod ledger;
pub mod postgres;
pub mod record_store;


pub use error::StoreError;
pub use in_memory::InMemoryRecordStore;
pub use ledger::{InMemoryMovementLedger, MovementLedger};
pub use postgres::PostgresRecordStore;
pub use record_store::RecordStore;
