//! Canonical location codec.
//!
//! Canonical form: the five parts joined by [`DELIMITER`] in fixed order
//! (area, row, bay, level, position), e.g. `"A-01-01-1-A"`.
//!
//! Round-trip laws:
//! - `LocationParts::parse(&p.build()) == Ok(p)` for every valid `p`
//! - `parsed.build() == s` for every well-formed `s`

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult};

/// Separator between the five address tokens in the canonical string.
pub const DELIMITER: char = '-';

const PART_COUNT: usize = 5;

/// Five-part physical storage address.
///
/// Fields are private: a constructed value has already passed token
/// validation, so [`LocationParts::build`] cannot fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationParts {
    area: String,
    row: String,
    bay: String,
    level: String,
    position: String,
}

impl LocationParts {
    /// Validate the five tokens and assemble an address.
    ///
    /// Every token must be non-empty ASCII alphanumeric. The delimiter can
    /// therefore never appear inside a token, which keeps `parse` unambiguous.
    pub fn new(
        area: impl Into<String>,
        row: impl Into<String>,
        bay: impl Into<String>,
        level: impl Into<String>,
        position: impl Into<String>,
    ) -> DomainResult<Self> {
        let parts = Self {
            area: area.into(),
            row: row.into(),
            bay: bay.into(),
            level: level.into(),
            position: position.into(),
        };

        for (label, token) in parts.labeled() {
            validate_token(label, token)?;
        }

        Ok(parts)
    }

    /// Canonical string encoding.
    pub fn build(&self) -> String {
        let mut out = String::with_capacity(
            self.area.len()
                + self.row.len()
                + self.bay.len()
                + self.level.len()
                + self.position.len()
                + PART_COUNT
                - 1,
        );
        out.push_str(&self.area);
        for token in [&self.row, &self.bay, &self.level, &self.position] {
            out.push(DELIMITER);
            out.push_str(token);
        }
        out
    }

    /// Decode a canonical string back into its five parts.
    ///
    /// Fails unless the input splits into exactly five non-empty tokens.
    pub fn parse(s: &str) -> DomainResult<Self> {
        let tokens: Vec<&str> = s.split(DELIMITER).collect();
        if tokens.len() != PART_COUNT {
            return Err(DomainError::validation(format!(
                "location '{s}' must have exactly {PART_COUNT} parts, found {}",
                tokens.len()
            )));
        }
        Self::new(tokens[0], tokens[1], tokens[2], tokens[3], tokens[4])
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    pub fn row(&self) -> &str {
        &self.row
    }

    pub fn bay(&self) -> &str {
        &self.bay
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    fn labeled(&self) -> [(&'static str, &str); PART_COUNT] {
        [
            ("area", &self.area),
            ("row", &self.row),
            ("bay", &self.bay),
            ("level", &self.level),
            ("position", &self.position),
        ]
    }
}

fn validate_token(label: &str, token: &str) -> DomainResult<()> {
    if token.is_empty() {
        return Err(DomainError::validation(format!(
            "location {label} cannot be empty"
        )));
    }
    if !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DomainError::validation(format!(
            "location {label} '{token}' must be alphanumeric"
        )));
    }
    Ok(())
}

impl core::fmt::Display for LocationParts {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.build())
    }
}

impl FromStr for LocationParts {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
