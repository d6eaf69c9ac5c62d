//! IdentityBinder: resolves a connecting device's identifier to a catalog row.
//!
//! # Binding algorithm
//!
//! ```text
//! find_by_identifier(id) ── Some(row) ──► reconnecting device, reuse row
//!        │
//!       None
//!        ▼
//! claim_unassigned(id) ── Ok(row) ──────► zero-touch provisioning: first
//!        │                                unclaimed row (lowest id) absorbs
//!        │                                the unknown device
//!        ├── NoAvailableSlot ───────────► refuse the connection
//!        └── AlreadyBound ──────────────► lost a race with a concurrent
//!                                         first connect of the same device;
//!                                         re-read and reuse the winner's row
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use smartgrid_core::{Binding, Identifier};

use crate::application::ports::{CatalogError, DeviceCatalog};

/// Reasons a connection cannot be bound.
#[derive(Debug, Error)]
pub enum BindError {
    /// The identifier is unknown and every catalog row is already claimed.
    #[error("no unclaimed catalog entry is available for {0}")]
    NoAvailableSlot(Identifier),

    #[error("catalog lookup failed while binding {identifier}: {source}")]
    Catalog {
        identifier: Identifier,
        #[source]
        source: CatalogError,
    },
}

/// Binds identifiers to catalog rows.  Cheap to clone.
#[derive(Clone)]
pub struct IdentityBinder {
    catalog: Arc<dyn DeviceCatalog>,
}

impl IdentityBinder {
    pub fn new(catalog: Arc<dyn DeviceCatalog>) -> Self {
        Self { catalog }
    }

    /// Returns the `(catalog_id, owner_id)` pair for `identifier`, claiming an
    /// unclaimed row if the identifier has never been seen.
    ///
    /// # Errors
    ///
    /// - [`BindError::NoAvailableSlot`] when the identifier is unknown and no
    ///   unclaimed row remains.
    /// - [`BindError::Catalog`] when the catalog itself fails.
    pub async fn bind(&self, identifier: &Identifier) -> Result<Binding, BindError> {
        if let Some(entry) = self.lookup(identifier).await? {
            debug!(
                "identifier {identifier} already bound to catalog entry {}",
                entry.catalog_id
            );
            return Ok(entry.binding());
        }

        match self.catalog.claim_unassigned(identifier).await {
            Ok(entry) => {
                info!(
                    "linked identifier {identifier} to catalog entry {} ({:?})",
                    entry.catalog_id, entry.declared_name
                );
                Ok(entry.binding())
            }
            Err(CatalogError::NoAvailableSlot) => Err(BindError::NoAvailableSlot(identifier.clone())),
            Err(CatalogError::AlreadyBound { catalog_id, .. }) => {
                debug!("identifier {identifier} was claimed concurrently as entry {catalog_id}");
                match self.lookup(identifier).await? {
                    Some(entry) => Ok(entry.binding()),
                    None => Err(self.catalog_error(
                        identifier,
                        CatalogError::Storage(format!(
                            "entry {catalog_id} reported as bound to {identifier} but not found"
                        )),
                    )),
                }
            }
            Err(source) => Err(self.catalog_error(identifier, source)),
        }
    }

    async fn lookup(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<smartgrid_core::CatalogEntry>, BindError> {
        self.catalog
            .find_by_identifier(identifier)
            .await
            .map_err(|source| self.catalog_error(identifier, source))
    }

    fn catalog_error(&self, identifier: &Identifier, source: CatalogError) -> BindError {
        BindError::Catalog {
            identifier: identifier.clone(),
            source,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockDeviceCatalog;
    use crate::infrastructure::storage::InMemoryCatalog;
    use smartgrid_core::{CatalogEntry, CatalogId, OwnerId};

    fn id(raw: &str) -> Identifier {
        Identifier::parse(raw).unwrap()
    }

    fn catalog_with(entries: Vec<CatalogEntry>) -> Arc<InMemoryCatalog> {
        Arc::new(InMemoryCatalog::new(entries))
    }

    #[tokio::test]
    async fn test_bind_reuses_row_for_known_identifier() {
        // Arrange
        let mut bound = CatalogEntry::unclaimed(CatalogId(3), "Shed", OwnerId(9));
        bound.identifier = Some(id("AA:BB"));
        let catalog = catalog_with(vec![
            CatalogEntry::unclaimed(CatalogId(1), "Spare", OwnerId(1)),
            bound,
        ]);
        let binder = IdentityBinder::new(catalog.clone());

        // Act
        let binding = binder.bind(&id("AA:BB")).await.unwrap();

        // Assert: the known row is reused and the spare row stays unclaimed
        assert_eq!(binding.catalog_id, CatalogId(3));
        assert_eq!(binding.owner_id, OwnerId(9));
        assert!(catalog.get_entry(CatalogId(1)).await.unwrap().is_unclaimed());
    }

    #[tokio::test]
    async fn test_bind_claims_lowest_unclaimed_row_for_new_identifier() {
        let catalog = catalog_with(vec![
            CatalogEntry::unclaimed(CatalogId(12), "Later", OwnerId(2)),
            CatalogEntry::unclaimed(CatalogId(7), "First", OwnerId(1)),
        ]);
        let binder = IdentityBinder::new(catalog.clone());

        let binding = binder.bind(&id("AA:BB")).await.unwrap();

        assert_eq!(binding.catalog_id, CatalogId(7));
        let row = catalog.get_entry(CatalogId(7)).await.unwrap();
        assert_eq!(row.identifier, Some(id("AA:BB")));
    }

    #[tokio::test]
    async fn test_bind_twice_with_same_new_identifier_claims_one_row() {
        let catalog = catalog_with(vec![
            CatalogEntry::unclaimed(CatalogId(1), "A", OwnerId(1)),
            CatalogEntry::unclaimed(CatalogId(2), "B", OwnerId(1)),
        ]);
        let binder = IdentityBinder::new(catalog.clone());

        let first = binder.bind(&id("AA:BB")).await.unwrap();
        let second = binder.bind(&id("AA:BB")).await.unwrap();

        assert_eq!(first, second);
        assert!(catalog.get_entry(CatalogId(2)).await.unwrap().is_unclaimed());
    }

    #[tokio::test]
    async fn test_bind_fails_with_no_available_slot_when_catalog_full() {
        let mut taken = CatalogEntry::unclaimed(CatalogId(1), "A", OwnerId(1));
        taken.identifier = Some(id("CC:DD"));
        let binder = IdentityBinder::new(catalog_with(vec![taken]));

        let result = binder.bind(&id("AA:BB")).await;

        assert!(matches!(result, Err(BindError::NoAvailableSlot(ref i)) if i.as_str() == "AA:BB"));
    }

    #[tokio::test]
    async fn test_concurrent_first_connects_share_one_row() {
        // Arrange: many tasks bind the same unseen identifier at once
        let catalog = catalog_with(vec![
            CatalogEntry::unclaimed(CatalogId(1), "A", OwnerId(1)),
            CatalogEntry::unclaimed(CatalogId(2), "B", OwnerId(1)),
            CatalogEntry::unclaimed(CatalogId(3), "C", OwnerId(1)),
        ]);
        let binder = IdentityBinder::new(catalog.clone());

        // Act
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let binder = binder.clone();
            tasks.push(tokio::spawn(async move { binder.bind(&id("AA:BB")).await }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().catalog_id);
        }

        // Assert: every task got row 1; rows 2 and 3 are untouched
        assert!(ids.iter().all(|c| *c == CatalogId(1)), "got {ids:?}");
        assert!(catalog.get_entry(CatalogId(2)).await.unwrap().is_unclaimed());
        assert!(catalog.get_entry(CatalogId(3)).await.unwrap().is_unclaimed());
    }

    #[tokio::test]
    async fn test_bind_recovers_from_lost_claim_race() {
        // Arrange: the first lookup misses, the claim loses the race, the
        // re-read finds the row the winner bound.
        let mut catalog = MockDeviceCatalog::new();
        let mut seq = mockall::Sequence::new();
        catalog
            .expect_find_by_identifier()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        catalog
            .expect_claim_unassigned()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|identifier| {
                Err(CatalogError::AlreadyBound {
                    identifier: identifier.clone(),
                    catalog_id: CatalogId(4),
                })
            });
        catalog
            .expect_find_by_identifier()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|identifier| {
                let mut row = CatalogEntry::unclaimed(CatalogId(4), "Won", OwnerId(5));
                row.identifier = Some(identifier.clone());
                Ok(Some(row))
            });
        let binder = IdentityBinder::new(Arc::new(catalog));

        // Act
        let binding = binder.bind(&id("AA:BB")).await.unwrap();

        // Assert
        assert_eq!(binding.catalog_id, CatalogId(4));
        assert_eq!(binding.owner_id, OwnerId(5));
    }

    #[tokio::test]
    async fn test_bind_surfaces_storage_failure() {
        let mut catalog = MockDeviceCatalog::new();
        catalog
            .expect_find_by_identifier()
            .returning(|_| Err(CatalogError::Storage("disk unplugged".to_string())));
        let binder = IdentityBinder::new(Arc::new(catalog));

        let result = binder.bind(&id("AA:BB")).await;

        assert!(matches!(
            result,
            Err(BindError::Catalog {
                source: CatalogError::Storage(_),
                ..
            })
        ));
    }
}
