//! Storage-location addressing.
//!
//! A physical storage slot is addressed by five short tokens
//! (area / row / bay / level / position) with a single canonical string
//! encoding. The codec is pure and reversible; validation happens at
//! construction so a [`LocationParts`] value is always encodable.

pub mod codec;
pub mod record;

pub use codec::{LocationParts, DELIMITER};
pub use record::Location;
