//! An in-process [`Adapter`] backed by a mutex-guarded vector.
//!
//! `MemoryBackend` exists so the engine's own test suite (and local experimentation)
//! does not need a live Postgres instance. A whole-state snapshot is taken at the
//! start of every transaction and restored verbatim on rollback, which gives the
//! same "all or nothing" guarantee [`crate::implementations::postgres::PostgresBackend`]
//! gets from a real database transaction.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    adapter::{Adapter, EntryFilter, StoreTransaction},
    config::ViewConfig,
    error::StoreError,
    row::StoreEntry,
    view,
};

#[derive(Debug, Clone, Default)]
struct ViewRow {
    uri: String,
    values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    next_id: i64,
    rows: Vec<StoreEntry>,
    views: BTreeMap<String, Vec<ViewRow>>,
}

impl Inner {
    fn matches_remote_user(row: &StoreEntry, filter: &EntryFilter) -> bool {
        match &filter.remote_user {
            Some(expected) => row.remote_user.as_deref() == Some(expected.as_str()),
            None => true,
        }
    }

    fn resource(&self, uri: &str, filter: &EntryFilter) -> Option<StoreEntry> {
        self.rows.iter().find(|r| r.uri == uri && Self::matches_remote_user(r, filter)).cloned()
    }
}

/// In-memory [`Adapter`] implementation. Cheap to construct, safe to share via
/// `clone()` — every clone refers to the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for MemoryBackend {
    type Transaction = MemoryTransaction;

    async fn resource_collection(
        &self,
        collection_reference: &str,
        filter: &EntryFilter,
    ) -> Result<Vec<StoreEntry>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<StoreEntry> = inner
            .rows
            .iter()
            .filter(|r| {
                r.collection_reference == collection_reference
                    && !r.deleted
                    && r.is_current()
                    && Inner::matches_remote_user(r, filter)
                    && r.matches_extra(&filter.extra)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.id));
        Ok(rows)
    }

    async fn version_collection(
        &self,
        resource_uri: &str,
    ) -> Result<Option<Vec<StoreEntry>>, StoreError> {
        let inner = self.inner.lock().await;
        let exists = inner.rows.iter().any(|r| r.resource_reference == resource_uri);
        if !exists {
            return Ok(None);
        }
        let mut rows: Vec<StoreEntry> = inner
            .rows
            .iter()
            .filter(|r| r.resource_reference == resource_uri && !r.deleted)
            .cloned()
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.id));
        Ok(Some(rows))
    }

    async fn resource(
        &self,
        uri: &str,
        filter: &EntryFilter,
    ) -> Result<Option<StoreEntry>, StoreError> {
        Ok(self.inner.lock().await.resource(uri, filter))
    }

    async fn resource_version(
        &self,
        uri: &str,
        filter: &EntryFilter,
    ) -> Result<Option<StoreEntry>, StoreError> {
        Ok(self.inner.lock().await.resource(uri, filter))
    }

    async fn view_lookup(
        &self,
        view: &ViewConfig,
        filter: &EntryFilter,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(rows) = inner.views.get(&view.name) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|row| filter.extra.iter().all(|(k, v)| row.values.get(k) == Some(v)))
            .map(|row| row.uri.clone())
            .collect())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        *inner = Inner::default();
        Ok(())
    }

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        let guard = self.inner.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(MemoryTransaction { guard, snapshot })
    }
}

/// A [`StoreTransaction`] that holds the backend's mutex for its entire lifetime.
/// Every mutation is applied in place; `rollback` restores the pre-transaction
/// snapshot wholesale.
#[derive(Debug)]
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Inner>,
    snapshot: Inner,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn fetch_current(
        &mut self,
        uri: &str,
        filter: &EntryFilter,
    ) -> Result<Option<StoreEntry>, StoreError> {
        Ok(self.guard.resource(uri, filter))
    }

    async fn insert(&mut self, entry: &StoreEntry) -> Result<(), StoreError> {
        if self.guard.rows.iter().any(|r| r.uri == entry.uri) {
            return Err(StoreError::backend(
                "uri already exists",
                std::io::Error::other(format!("duplicate uri: {}", entry.uri)),
            ));
        }
        let id = self.guard.next_id;
        self.guard.next_id += 1;
        let mut stored = entry.clone();
        stored.id = id;
        self.guard.rows.push(stored);
        Ok(())
    }

    async fn rewrite_uri(&mut self, old_uri: &str, new_uri: &str) -> Result<(), StoreError> {
        let row = self
            .guard
            .rows
            .iter_mut()
            .find(|r| r.uri == old_uri)
            .ok_or_else(|| StoreError::backend("row not found for rewrite", std::io::Error::other(old_uri.to_string())))?;
        row.uri = new_uri.to_string();
        Ok(())
    }

    async fn view_map(
        &mut self,
        view: &ViewConfig,
        uri: &str,
        _collection_reference: &str,
        data: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let Some(values) = view::extract(view, data) else {
            return Ok(());
        };
        let rows = self.guard.views.entry(view.name.clone()).or_default();
        rows.retain(|r| r.uri != uri);
        rows.push(ViewRow { uri: uri.to_string(), values });
        Ok(())
    }

    async fn view_unmap(&mut self, view: &ViewConfig, uri: &str) -> Result<(), StoreError> {
        if let Some(rows) = self.guard.views.get_mut(&view.name) {
            rows.retain(|r| r.uri != uri);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        *self.guard = self.snapshot.clone();
        Ok(())
    }
}
