//! ConnectionRegistry: the in-memory table of currently reachable devices.
//!
//! # Lock discipline
//!
//! One `std::sync::Mutex` guards the map.  It is taken for exactly one map
//! operation and released before the caller does anything else, so it is
//! never held across an `.await`.  Closing a displaced or evicted link is the
//! caller's job, after the lock is gone.
//!
//! # Handle identity
//!
//! Every [`ConnectionHandle`] carries a fresh [`ConnectionId`].  Removal goes
//! through [`ConnectionRegistry::remove_if_current`], which compares that id
//! and not just the key.  This guards the interleaving where an old
//! connection notices its read error *after* a reconnect of the same device
//! has already been inserted: the old task must not delete the new entry.
//!
//! ```text
//! old conn active ─┐
//!                  │  new conn binds, insert() displaces old
//!                  │  old read fails → remove_if_current(id, old) → no-op
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use uuid::Uuid;

use smartgrid_core::{Binding, CatalogId, Identifier, OwnerId};

use crate::application::ports::DeviceLink;

/// Identity of one accepted connection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live link plus the identity it was bound under.
///
/// Cloning is cheap: the link is reference counted.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identifier: Identifier,
    binding: Binding,
    connected_at: SystemTime,
    link: Arc<dyn DeviceLink>,
}

impl ConnectionHandle {
    pub fn new(identifier: Identifier, binding: Binding, link: Arc<dyn DeviceLink>) -> Self {
        Self {
            id: ConnectionId::new(),
            identifier,
            binding,
            connected_at: SystemTime::now(),
            link,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn link(&self) -> &Arc<dyn DeviceLink> {
        &self.link
    }

    fn describe(&self) -> ConnectedDevice {
        ConnectedDevice {
            identifier: self.identifier.clone(),
            catalog_id: self.binding.catalog_id,
            owner_id: self.binding.owner_id,
            connection_id: self.id,
            transport: self.link.transport(),
            connected_at_unix_secs: self
                .connected_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("identifier", &self.identifier)
            .field("binding", &self.binding)
            .field("transport", &self.link.transport())
            .finish()
    }
}

/// Snapshot of one registry entry, as reported to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedDevice {
    pub identifier: Identifier,
    pub catalog_id: CatalogId,
    pub owner_id: OwnerId,
    pub connection_id: ConnectionId,
    pub transport: &'static str,
    pub connected_at_unix_secs: u64,
}

/// In-memory registry of live device connections.
///
/// Shared as `Arc<ConnectionRegistry>` between every lifecycle task and the
/// dispatcher.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<Identifier, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Identifier, ConnectionHandle>> {
        // A panic while holding the lock cannot leave the map half-updated:
        // every critical section is a single HashMap call.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `handle`, returning the handle it displaced (last writer wins).
    ///
    /// The caller must close the returned handle's link.
    pub fn insert(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let key = handle.identifier.clone();
        self.lock().insert(key, handle)
    }

    /// Inserts `handle` only if its identifier has no entry yet.
    ///
    /// Returns `false`, dropping `handle`, when an entry already exists.  Push
    /// links register through this so they never displace a live socket.
    pub fn insert_if_absent(&self, handle: ConnectionHandle) -> bool {
        match self.lock().entry(handle.identifier.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Returns a clone of the current handle for `identifier`.
    pub fn get(&self, identifier: &Identifier) -> Option<ConnectionHandle> {
        self.lock().get(identifier).cloned()
    }

    /// Returns `true` if `identifier` has an entry.
    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.lock().contains_key(identifier)
    }

    /// Removes the entry for `identifier` only if it is still connection `id`.
    ///
    /// Returns the removed handle, or `None` when the entry is absent or has
    /// been replaced by a newer connection.
    pub fn remove_if_current(&self, identifier: &Identifier, id: ConnectionId) -> Option<ConnectionHandle> {
        let mut entries = self.lock();
        match entries.get(identifier) {
            Some(current) if current.id == id => entries.remove(identifier),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Lists every live entry, sorted by identifier.
    pub fn snapshot(&self) -> Vec<ConnectedDevice> {
        let mut devices: Vec<ConnectedDevice> =
            self.lock().values().map(ConnectionHandle::describe).collect();
        devices.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        devices
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
