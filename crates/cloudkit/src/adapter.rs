use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{config::ViewConfig, error::StoreError, row::StoreEntry};

/// Equality filters applied to a row-store or view read: ownership scoping plus any
/// caller-supplied extra key/value pairs (e.g. a view's extracted columns).
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub remote_user: Option<String>,
    pub extra: BTreeMap<String, String>,
}

/// Pagination window for a collection read.
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    /// Splits `total` into the rows actually returned after slicing and the subset
    /// itself: compute total before slicing, then `[offset, offset+limit)`.
    #[must_use]
    pub fn slice<'a, T>(&self, rows: &'a [T]) -> &'a [T] {
        let total = rows.len();
        let offset = self.offset.min(total);
        let end = self.limit.map_or(total, |limit| (offset + limit).min(total));
        &rows[offset..end]
    }
}

/// Read-side and transactional contract every storage backend implements.
///
/// This is the *complete* interface: there is no pass-through to an underlying
/// query builder. A SQL-backed implementation must express every operation here in
/// terms of the named methods only — see [`crate::error::StoreError::Backend`] for how
/// adapter-specific failures are surfaced.
#[async_trait]
pub trait Adapter: Clone + std::fmt::Debug + Send + Sync + 'static {
    type Transaction: StoreTransaction;

    /// Current (non-deleted, `uri == resource_reference`) rows in a collection,
    /// newest first, matching `filter`. Callers slice with `page` themselves so they
    /// can compute `total` before slicing per the bundling rule.
    async fn resource_collection(
        &self,
        collection_reference: &str,
        filter: &EntryFilter,
    ) -> Result<Vec<StoreEntry>, StoreError>;

    /// All non-deleted rows whose `resource_reference` equals `resource_uri`, newest
    /// first. `None` means no row at all (current or historical) has this
    /// `resource_reference` — the logical resource has never existed.
    async fn version_collection(
        &self,
        resource_uri: &str,
    ) -> Result<Option<Vec<StoreEntry>>, StoreError>;

    /// The row at `uri` (current or tombstoned) matching `filter`, if any.
    async fn resource(
        &self,
        uri: &str,
        filter: &EntryFilter,
    ) -> Result<Option<StoreEntry>, StoreError>;

    /// The historical row at `uri` matching `filter`, if any.
    async fn resource_version(
        &self,
        uri: &str,
        filter: &EntryFilter,
    ) -> Result<Option<StoreEntry>, StoreError>;

    /// URIs indexed by `view`, filtered by `filter.extra` against the view's own
    /// table (not the row store).
    async fn view_lookup(
        &self,
        view: &ViewConfig,
        filter: &EntryFilter,
    ) -> Result<Vec<String>, StoreError>;

    /// Truncates the row store and every view table.
    async fn reset(&self) -> Result<(), StoreError>;

    /// Opens a transaction bracketing a single write (create, update, or delete)
    /// together with the view `map`/`unmap` calls it triggers.
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;
}

/// A transactional handle over the row store and view tables.
///
/// Every write-path method on [`crate::engine::StoreEngine`] opens exactly one
/// transaction, performs the URI rewrite plus new-row insert plus view updates on
/// it, and either commits or rolls back — never both observable partially.
#[async_trait]
pub trait StoreTransaction: Send {
    /// The current row at `uri` matching `filter`, read within the transaction so
    /// the precondition check and the subsequent write observe the same snapshot.
    async fn fetch_current(
        &mut self,
        uri: &str,
        filter: &EntryFilter,
    ) -> Result<Option<StoreEntry>, StoreError>;

    /// Inserts a new row. Fails (and the transaction must roll back) if `uri` is
    /// not unique.
    async fn insert(&mut self, entry: &StoreEntry) -> Result<(), StoreError>;

    /// Rewrites a row's `uri` in place, used to demote a current row to its
    /// historical version URI.
    async fn rewrite_uri(&mut self, old_uri: &str, new_uri: &str) -> Result<(), StoreError>;

    /// Applies `view.extracted_keys` to `data` and indexes `uri`, first deleting any
    /// existing row for `uri` in this view's table. Silently does nothing if a
    /// required key is missing from `data`.
    async fn view_map(
        &mut self,
        view: &ViewConfig,
        uri: &str,
        collection_reference: &str,
        data: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Removes `uri` from this view's table, if present.
    async fn view_unmap(&mut self, view: &ViewConfig, uri: &str) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_slices_respecting_offset_and_limit() {
        let rows = [1, 2, 3, 4, 5];
        let page = Page { offset: 1, limit: Some(2) };
        assert_eq!(page.slice(&rows), &[2, 3]);
    }

    #[test]
    fn page_with_no_limit_returns_rest() {
        let rows = [1, 2, 3];
        let page = Page { offset: 1, limit: None };
        assert_eq!(page.slice(&rows), &[2, 3]);
    }

    #[test]
    fn zero_limit_returns_empty_slice() {
        let rows = [1, 2, 3];
        let page = Page { offset: 0, limit: Some(0) };
        assert_eq!(page.slice(&rows), &[] as &[i32]);
    }

    #[test]
    fn offset_past_end_returns_empty_slice() {
        let rows = [1, 2, 3];
        let page = Page { offset: 10, limit: Some(2) };
        assert_eq!(page.slice(&rows), &[] as &[i32]);
    }
}
