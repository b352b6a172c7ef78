//! Inventory domain module.
//!
//! This crate contains the business rules for warehouse stock, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).
//! Quantity and status are always derived from the picking-bin/overstock
//! split; they are never stored or mutated independently.

pub mod change;
pub mod item;
pub mod movement;

pub use change::{ChangeKind, ItemChange};
pub use item::{InventoryItem, ItemUpdate, NewItem, StockStatus};
pub use movement::{Bucket, MovementDelta, MovementKind, StockMovement};
