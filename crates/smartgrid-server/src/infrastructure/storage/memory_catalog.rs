//! In-memory [`DeviceCatalog`].
//!
//! Rows live in a `BTreeMap` keyed by catalog id, so "first unclaimed row in
//! key order" is the lowest-id unclaimed row.  The claim runs entirely under
//! one `tokio::sync::Mutex`, which makes the check-then-set a single atomic
//! conditional update.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use smartgrid_core::{CatalogEntry, CatalogId, Identifier};

use crate::application::ports::{CatalogError, DeviceCatalog};

pub(crate) type Rows = BTreeMap<CatalogId, CatalogEntry>;

pub(crate) fn rows_from(entries: impl IntoIterator<Item = CatalogEntry>) -> Rows {
    entries.into_iter().map(|e| (e.catalog_id, e)).collect()
}

pub(crate) fn find_in(rows: &Rows, identifier: &Identifier) -> Option<CatalogEntry> {
    rows.values()
        .find(|row| row.identifier.as_ref() == Some(identifier))
        .cloned()
}

/// Binds `identifier` to the lowest-id unclaimed row of `rows`.
pub(crate) fn claim_in(rows: &mut Rows, identifier: &Identifier) -> Result<CatalogEntry, CatalogError> {
    if let Some(existing) = find_in(rows, identifier) {
        return Err(CatalogError::AlreadyBound {
            identifier: identifier.clone(),
            catalog_id: existing.catalog_id,
        });
    }
    let row = rows
        .values_mut()
        .find(|row| row.is_unclaimed())
        .ok_or(CatalogError::NoAvailableSlot)?;
    row.identifier = Some(identifier.clone());
    Ok(row.clone())
}

/// Catalog held entirely in memory.  Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryCatalog {
    rows: Mutex<Rows>,
}

impl InMemoryCatalog {
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            rows: Mutex::new(rows_from(entries)),
        }
    }

    /// Adds or replaces a row, as the operator-side CRUD layer would.
    pub async fn upsert(&self, entry: CatalogEntry) {
        self.rows.lock().await.insert(entry.catalog_id, entry);
    }

    pub async fn get_entry(&self, catalog_id: CatalogId) -> Option<CatalogEntry> {
        self.rows.lock().await.get(&catalog_id).cloned()
    }

    /// All rows in catalog-id order.
    pub async fn snapshot(&self) -> Vec<CatalogEntry> {
        self.rows.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl DeviceCatalog for InMemoryCatalog {
    async fn find_by_identifier(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<CatalogEntry>, CatalogError> {
        Ok(find_in(&*self.rows.lock().await, identifier))
    }

    async fn claim_unassigned(&self, identifier: &Identifier) -> Result<CatalogEntry, CatalogError> {
        claim_in(&mut *self.rows.lock().await, identifier)
    }

    async fn get(&self, catalog_id: CatalogId) -> Result<Option<CatalogEntry>, CatalogError> {
        Ok(self.get_entry(catalog_id).await)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use smartgrid_core::OwnerId;
    use std::sync::Arc;

    fn id(raw: &str) -> Identifier {
        Identifier::parse(raw).unwrap()
    }

    fn unclaimed(catalog_id: u64) -> CatalogEntry {
        CatalogEntry::unclaimed(CatalogId(catalog_id), format!("Panel {catalog_id}"), OwnerId(1))
    }

    #[tokio::test]
    async fn test_claim_picks_lowest_unclaimed_id() {
        // Arrange
        let catalog = InMemoryCatalog::new(vec![unclaimed(9), unclaimed(4), unclaimed(6)]);

        // Act
        let row = catalog.claim_unassigned(&id("AA:BB")).await.unwrap();

        // Assert
        assert_eq!(row.catalog_id, CatalogId(4));
        assert_eq!(row.identifier, Some(id("AA:BB")));
    }

    #[tokio::test]
    async fn test_claim_skips_bound_rows() {
        let mut bound = unclaimed(1);
        bound.identifier = Some(id("CC:DD"));
        let catalog = InMemoryCatalog::new(vec![bound, unclaimed(2)]);

        let row = catalog.claim_unassigned(&id("AA:BB")).await.unwrap();

        assert_eq!(row.catalog_id, CatalogId(2));
    }

    #[tokio::test]
    async fn test_claim_with_no_unclaimed_rows_fails() {
        let catalog = InMemoryCatalog::new(Vec::new());
        let result = catalog.claim_unassigned(&id("AA:BB")).await;
        assert!(matches!(result, Err(CatalogError::NoAvailableSlot)));
    }

    #[tokio::test]
    async fn test_claim_of_already_bound_identifier_reports_row() {
        let catalog = InMemoryCatalog::new(vec![unclaimed(1), unclaimed(2)]);
        catalog.claim_unassigned(&id("AA:BB")).await.unwrap();

        let result = catalog.claim_unassigned(&id("AA:BB")).await;

        assert!(matches!(
            result,
            Err(CatalogError::AlreadyBound { catalog_id: CatalogId(1), .. })
        ));
        assert!(catalog.get_entry(CatalogId(2)).await.unwrap().is_unclaimed());
    }

    #[tokio::test]
    async fn test_concurrent_claims_of_distinct_identifiers_get_distinct_rows() {
        // Arrange
        let catalog = Arc::new(InMemoryCatalog::new((1..=10).map(unclaimed)));

        // Act
        let mut tasks = Vec::new();
        for n in 0..10 {
            let catalog = catalog.clone();
            tasks.push(tokio::spawn(async move {
                catalog.claim_unassigned(&id(&format!("DEV-{n}"))).await
            }));
        }
        let mut claimed = Vec::new();
        for task in tasks {
            claimed.push(task.await.unwrap().unwrap().catalog_id);
        }

        // Assert: no row was handed out twice
        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 10);
    }

    #[tokio::test]
    async fn test_find_get_and_exists() {
        let catalog = InMemoryCatalog::new(vec![unclaimed(3)]);
        catalog.claim_unassigned(&id("AA:BB")).await.unwrap();

        let found = catalog.find_by_identifier(&id("AA:BB")).await.unwrap();
        let missing = catalog.find_by_identifier(&id("EE:FF")).await.unwrap();

        assert_eq!(found.map(|r| r.catalog_id), Some(CatalogId(3)));
        assert!(missing.is_none());
        assert!(catalog.exists(CatalogId(3)).await.unwrap());
        assert!(!catalog.exists(CatalogId(4)).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_adds_capacity() {
        let catalog = InMemoryCatalog::default();
        assert!(catalog.claim_unassigned(&id("AA:BB")).await.is_err());

        catalog.upsert(unclaimed(11)).await;

        assert_eq!(
            catalog.claim_unassigned(&id("AA:BB")).await.unwrap().catalog_id,
            CatalogId(11)
        );
        assert_eq!(catalog.snapshot().await.len(), 1);
    }
}
