//! Storage location record.

use serde::{Deserialize, Serialize};

use stockroom_core::{LocationId, OrgId};

use crate::codec::LocationParts;

/// A named physical storage slot within an organization.
///
/// Identity for deduplication purposes is the canonical string of `parts`
/// within an organization: two records with the same five parts must resolve
/// to the same row, which the store enforces by upserting on
/// `(org_id, canonical)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    id: LocationId,
    org_id: OrgId,
    parts: LocationParts,
    /// Optional human-readable label ("Returns cage", "Aisle 3 endcap").
    name: Option<String>,
    /// Color tag consumed only by label rendering.
    color: Option<String>,
}

impl Location {
    pub fn new(
        id: LocationId,
        org_id: OrgId,
        parts: LocationParts,
        name: Option<String>,
        color: Option<String>,
    ) -> Self {
        Self {
            id,
            org_id,
            parts,
            name,
            color,
        }
    }

    pub fn id(&self) -> LocationId {
        self.id
    }

    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    pub fn parts(&self) -> &LocationParts {
        &self.parts
    }

    /// Canonical string form (the upsert key within an organization).
    pub fn canonical(&self) -> String {
        self.parts.build()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_matches_parts_encoding() {
        let parts = LocationParts::new("B", "02", "07", "3", "C").unwrap();
        let loc = Location::new(
            LocationId::new(),
            OrgId::new(),
            parts.clone(),
            Some("Bulk rack".to_string()),
            None,
        );
        assert_eq!(loc.canonical(), parts.build());
    }
}
