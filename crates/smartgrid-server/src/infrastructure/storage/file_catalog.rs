//! TOML-file-backed [`DeviceCatalog`].
//!
//! The file is read once at startup and rewritten after every successful
//! claim, so a device bound before a restart is still bound after it.
//!
//! ```toml
//! [[devices]]
//! catalog_id = 7
//! declared_name = "Garage panel"
//! owner_id = 1
//!
//! [[devices]]
//! catalog_id = 8
//! declared_name = "Shed panel"
//! owner_id = 1
//! identifier = "AA:BB:CC:DD:EE:02"
//! ```
//!
//! # Atomicity
//!
//! Claim and rewrite happen under the same `tokio::sync::Mutex`.  The new
//! contents go to a sibling temp file which is then renamed over the original.
//! If the write fails the claim is rolled back in memory and the caller sees
//! [`CatalogError::Storage`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use smartgrid_core::{CatalogEntry, CatalogId, Identifier};

use crate::application::ports::{CatalogError, DeviceCatalog};
use crate::infrastructure::storage::memory_catalog::{claim_in, find_in, rows_from, Rows};

/// Errors raised while loading or saving the catalog file.
#[derive(Debug, Error)]
pub enum CatalogFileError {
    #[error("I/O error accessing catalog at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize catalog: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("catalog id {0} appears more than once")]
    DuplicateId(CatalogId),

    #[error("identifier {0} is bound to more than one catalog entry")]
    DuplicateIdentifier(Identifier),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    devices: Vec<CatalogEntry>,
}

/// Catalog persisted as a TOML file.
pub struct FileCatalog {
    path: PathBuf,
    rows: Mutex<Rows>,
}

impl FileCatalog {
    /// Loads the catalog at `path`.  A missing file is an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogFileError`] if the file cannot be read or parsed, or
    /// if it repeats a catalog id or a bound identifier.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogFileError> {
        let path = path.into();
        let file = match tokio::fs::read_to_string(&path).await {
            Ok(content) => toml::from_str::<CatalogFile>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("catalog file {} not found; starting with an empty catalog", path.display());
                CatalogFile::default()
            }
            Err(source) => return Err(CatalogFileError::Io { path, source }),
        };
        validate(&file.devices)?;

        info!("loaded {} catalog entries from {}", file.devices.len(), path.display());
        Ok(Self {
            path,
            rows: Mutex::new(rows_from(file.devices)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All rows in catalog-id order.
    pub async fn snapshot(&self) -> Vec<CatalogEntry> {
        self.rows.lock().await.values().cloned().collect()
    }

    async fn persist(&self, rows: &Rows) -> Result<(), CatalogFileError> {
        let file = CatalogFile {
            devices: rows.values().cloned().collect(),
        };
        let content = toml::to_string_pretty(&file)?;

        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|source| CatalogFileError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| CatalogFileError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

fn validate(devices: &[CatalogEntry]) -> Result<(), CatalogFileError> {
    let mut ids = HashSet::new();
    let mut identifiers = HashSet::new();
    for row in devices {
        if !ids.insert(row.catalog_id) {
            return Err(CatalogFileError::DuplicateId(row.catalog_id));
        }
        if let Some(identifier) = &row.identifier {
            if !identifiers.insert(identifier) {
                return Err(CatalogFileError::DuplicateIdentifier(identifier.clone()));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DeviceCatalog for FileCatalog {
    async fn find_by_identifier(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<CatalogEntry>, CatalogError> {
        Ok(find_in(&*self.rows.lock().await, identifier))
    }

    async fn claim_unassigned(&self, identifier: &Identifier) -> Result<CatalogEntry, CatalogError> {
        let mut rows = self.rows.lock().await;
        let claimed = claim_in(&mut rows, identifier)?;

        if let Err(e) = self.persist(&rows).await {
            if let Some(row) = rows.get_mut(&claimed.catalog_id) {
                row.identifier = None;
            }
            return Err(CatalogError::Storage(e.to_string()));
        }
        Ok(claimed)
    }

    async fn get(&self, catalog_id: CatalogId) -> Result<Option<CatalogEntry>, CatalogError> {
        Ok(self.rows.lock().await.get(&catalog_id).cloned())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
