//! Device catalog entities.
//!
//! A *catalog entry* is a provisioned device slot: an operator creates it with
//! a name and an owner, and it stays unclaimed (`identifier == None`) until a
//! physical device connects and is bound to it.
//!
//! # Binding lifecycle
//!
//! ```text
//! created (identifier = None)  ──first unknown device connects──►  bound (identifier = Some)
//! ```
//!
//! A row is bound at most once; later connections presenting the same
//! identifier reuse the row.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum accepted length of a device identifier, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Primary key of a catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogId(pub u64);

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of the account that owns a catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons a raw identifier string is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier is {len} bytes long; the limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("identifier contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Stable token a physical device presents to claim a catalog slot.
///
/// Usually a hardware MAC address such as `"AA:BB:CC:DD:EE:FF"`, but any
/// printable ASCII string without whitespace is accepted.  Surrounding
/// whitespace (a trailing newline from simple firmware, for example) is
/// trimmed before validation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validates and wraps a raw identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] if the trimmed value is empty, longer than
    /// [`MAX_IDENTIFIER_LEN`] bytes, or contains a non-printable or
    /// whitespace character.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if trimmed.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong {
                len: trimmed.len(),
                max: MAX_IDENTIFIER_LEN,
            });
        }
        if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_graphic()) {
            return Err(IdentifierError::InvalidCharacter(bad));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

/// A provisioned device record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub catalog_id: CatalogId,
    /// Operator-chosen label, e.g. `"Garage panel"`.
    pub declared_name: String,
    /// `None` until a device first connects and is bound to this row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    pub owner_id: OwnerId,
}

impl CatalogEntry {
    /// Creates an unclaimed row.
    pub fn unclaimed(catalog_id: CatalogId, declared_name: impl Into<String>, owner_id: OwnerId) -> Self {
        Self {
            catalog_id,
            declared_name: declared_name.into(),
            identifier: None,
            owner_id,
        }
    }

    /// Returns `true` while no device has been bound to this row.
    pub fn is_unclaimed(&self) -> bool {
        self.identifier.is_none()
    }

    /// The `(catalog_id, owner_id)` pair associated with a bound connection.
    pub fn binding(&self) -> Binding {
        Binding {
            catalog_id: self.catalog_id,
            owner_id: self.owner_id,
        }
    }
}

/// Result of a successful identity binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub catalog_id: CatalogId,
    pub owner_id: OwnerId,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
