//! `stockroom-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{ActorId, DraftId, ItemId, LocationId, MovementId, OrgId, VendorId};
pub use version::ExpectedVersion;
