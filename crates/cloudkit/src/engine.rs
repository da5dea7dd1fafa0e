use std::{
    collections::{BTreeMap, BTreeSet},
    hash::{Hash, Hasher},
};

use http::Method;
use itertools::Itertools;
use uuid::Uuid;

use crate::{
    adapter::{Adapter, EntryFilter, Page, StoreTransaction},
    config::{StoreConfig, ViewConfig},
    error::StoreError,
    response::Response,
    row::StoreEntry,
    uri::{self, UriKind},
    view,
};

/// Recognized request options: `remote_user`, `limit`, `offset`, `json`, `etag`,
/// plus an auxiliary equality-filter map for any other key (view columns).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub remote_user: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub json: Option<String>,
    pub etag: Option<String>,
    pub filters: BTreeMap<String, String>,
}

impl RequestOptions {
    fn entry_filter(&self) -> EntryFilter {
        EntryFilter { remote_user: self.remote_user.clone(), extra: self.filters.clone() }
    }

    fn page(&self) -> Page {
        Page { offset: self.offset.unwrap_or(0), limit: self.limit }
    }
}

/// Orchestrates GET/HEAD/PUT/POST/DELETE/OPTIONS against the row store, enforcing
/// preconditions, producing versions, and driving views.
#[derive(Debug, Clone)]
pub struct StoreEngine<A: Adapter> {
    adapter: A,
    collections: BTreeSet<String>,
    views: BTreeMap<String, ViewConfig>,
}

impl<A: Adapter> StoreEngine<A> {
    pub fn new(adapter: A, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let collections = config.collection_set();
        let views = config.views.iter().map(|v| (v.name.clone(), v.clone())).collect();
        Ok(Self { adapter, collections, views })
    }

    /// Current API version, a fixed constant.
    #[must_use]
    pub fn version() -> i32 {
        1
    }

    fn view_names(&self) -> BTreeSet<String> {
        self.views.keys().cloned().collect()
    }

    fn classify(&self, uri: &str) -> UriKind {
        uri::classify(uri, &self.collections, &self.view_names())
    }

    fn known_collection_type(&self, uri: &str) -> bool {
        match uri::collection_uri_fragment(uri) {
            Some(fragment) => {
                let name = fragment.trim_start_matches('/');
                name == uri::META_URI || self.collections.contains(name) || self.views.contains_key(name)
            }
            None => false,
        }
    }

    /// `GET /cloudkit-meta` → `{"uris": ["/{c1}", "/{c2}", ...]}`.
    fn meta_response(&self) -> Response {
        let uris: Vec<String> = self.collections.iter().map(|c| format!("/{c}")).collect();
        Response::new(200, serde_json::json!({ "uris": uris }).to_string())
    }

    /// Status 200 with an `Allow` header listing the methods permitted against `uri`.
    pub fn options(&self, uri: &str) -> Response {
        let allow = self.classify(uri).allowed_methods();
        let names = allow.iter().map(Method::as_str).join(", ");
        Response::new(200, String::new()).with_header("Allow", names)
    }

    pub async fn get(&self, uri: &str, options: &RequestOptions) -> Result<Response, StoreError> {
        if !self.known_collection_type(uri) {
            return Err(StoreError::invalid_entity_type(format!("unknown entity type for {uri}")));
        }

        let kind = self.classify(uri);
        match kind {
            UriKind::Meta => Ok(self.meta_response()),
            UriKind::Resource => self.get_resource(uri, options).await,
            UriKind::ResourceVersion => self.get_resource_version(uri, options).await,
            UriKind::ResourceCollection => self.get_resource_collection(uri, options, false).await,
            UriKind::ResolvedResourceCollection => {
                self.get_resource_collection(uri, options, true).await
            }
            UriKind::VersionCollection => self.get_version_collection(uri, options, false).await,
            UriKind::ResolvedVersionCollection => {
                self.get_version_collection(uri, options, true).await
            }
            UriKind::View => self.get_view(uri, options).await,
            UriKind::Unknown => Err(StoreError::not_found(format!("no such resource: {uri}"))),
        }
    }

    pub async fn head(&self, uri: &str, options: &RequestOptions) -> Result<Response, StoreError> {
        if !self.known_collection_type(uri) {
            return Err(StoreError::invalid_entity_type(format!("unknown entity type for {uri}")));
        }
        match self.classify(uri) {
            UriKind::Resource | UriKind::ResourceVersion => {
                let filter = options.entry_filter();
                let row = if self.classify(uri) == UriKind::Resource {
                    self.adapter.resource(uri, &filter).await?
                } else {
                    self.adapter.resource_version(uri, &filter).await?
                };
                match row {
                    None => Err(StoreError::not_found(format!("no such resource: {uri}"))),
                    Some(row) if row.deleted => Err(self.gone_error(&row).await?),
                    Some(row) => Ok(success_response(200, String::new(), &row)),
                }
            }
            _ => self.get(uri, options).await.map(|response| response.head()),
        }
    }

    async fn get_resource(&self, uri: &str, options: &RequestOptions) -> Result<Response, StoreError> {
        let filter = options.entry_filter();
        let row = self
            .adapter
            .resource(uri, &filter)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("no such resource: {uri}")))?;
        if row.deleted {
            return Err(self.gone_error(&row).await?);
        }
        Ok(success_response(200, row.content.clone(), &row))
    }

    async fn get_resource_version(
        &self,
        uri: &str,
        options: &RequestOptions,
    ) -> Result<Response, StoreError> {
        let filter = options.entry_filter();
        let row = self
            .adapter
            .resource_version(uri, &filter)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("no such version: {uri}")))?;
        Ok(success_response(200, row.content.clone(), &row))
    }

    /// For a tombstoned `row`, finds the last live (non-deleted) historical version
    /// and renders the 410 body pointing at its version URI, ETag, and Last-Modified.
    async fn gone_error(&self, row: &StoreEntry) -> Result<StoreError, StoreError> {
        let history = self
            .adapter
            .version_collection(&row.resource_reference)
            .await?
            .unwrap_or_default();
        match history.first() {
            Some(last_live) => {
                Ok(StoreError::gone(last_live.version_uri(), &last_live.etag, &last_live.last_modified))
            }
            None => Ok(StoreError::gone(row.version_uri(), &row.etag, &row.last_modified)),
        }
    }

    async fn get_resource_collection(
        &self,
        uri: &str,
        options: &RequestOptions,
        resolved: bool,
    ) -> Result<Response, StoreError> {
        let collection_reference =
            uri::collection_uri_fragment(uri).ok_or_else(|| StoreError::not_found(uri.to_string()))?;
        let filter = options.entry_filter();
        let rows = self.adapter.resource_collection(&collection_reference, &filter).await?;
        bundle(&rows, options.page(), resolved)
    }

    async fn get_version_collection(
        &self,
        uri: &str,
        options: &RequestOptions,
        resolved: bool,
    ) -> Result<Response, StoreError> {
        let resource_uri =
            uri::current_resource_uri(uri).ok_or_else(|| StoreError::not_found(uri.to_string()))?;
        let rows = self
            .adapter
            .version_collection(&resource_uri)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("no such resource: {resource_uri}")))?;
        bundle(&rows, options.page(), resolved)
    }

    async fn get_view(&self, uri: &str, options: &RequestOptions) -> Result<Response, StoreError> {
        let name = uri.trim_start_matches('/');
        let view = self
            .views
            .get(name)
            .ok_or_else(|| StoreError::not_found(format!("no such view: {uri}")))?;
        let filter = options.entry_filter();
        let uris = self.adapter.view_lookup(view, &filter).await?;
        let page = options.page();
        let total = uris.len();
        let slice = page.slice(&uris);
        let body = serde_json::json!({ "total": total, "offset": page.offset, "uris": slice });
        Ok(Response::new(200, body.to_string()).with_etag(&content_hash(&body.to_string())))
    }

    pub async fn put(&self, uri: &str, options: &RequestOptions) -> Result<Response, StoreError> {
        let kind = self.classify(uri);
        if !kind.allows(&Method::PUT) {
            return Err(StoreError::method_not_allowed(kind.allowed_methods().to_vec()));
        }
        if !self.known_collection_type(uri) {
            return Err(StoreError::invalid_entity_type(format!("unknown entity type for {uri}")));
        }
        if options.json.is_none() {
            return Err(StoreError::data_required());
        }

        // Existence is checked unfiltered: the uri is either occupied (by anyone)
        // or free, and that alone decides create vs. update. Ownership, the
        // tombstone check, and the etag precondition are all re-checked inside
        // the transaction that performs the write, so a non-owner never routes
        // into create_resource against an already-occupied uri.
        match self.adapter.resource(uri, &EntryFilter::default()).await? {
            Some(_) => self.update_resource(uri, options).await,
            None => self.create_resource(uri, options).await,
        }
    }

    pub async fn post(&self, uri: &str, options: &RequestOptions) -> Result<Response, StoreError> {
        let kind = self.classify(uri);
        if !kind.allows(&Method::POST) {
            return Err(StoreError::method_not_allowed(kind.allowed_methods().to_vec()));
        }
        if !self.known_collection_type(uri) {
            return Err(StoreError::invalid_entity_type(format!("unknown entity type for {uri}")));
        }
        if options.json.is_none() {
            return Err(StoreError::data_required());
        }

        let resource_uri = format!("{uri}/{}", Uuid::new_v4());
        self.create_resource(&resource_uri, options).await
    }

    async fn create_resource(
        &self,
        uri: &str,
        options: &RequestOptions,
    ) -> Result<Response, StoreError> {
        let raw = options.json.as_deref().expect("caller already checked json is present");
        let data: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| StoreError::malformed_json(e.to_string()))?;

        let collection_reference = uri::collection_uri_fragment(uri)
            .ok_or_else(|| StoreError::invalid_entity_type(uri.to_string()))?;
        let entry = StoreEntry {
            id: 0,
            uri: uri.to_string(),
            etag: Uuid::new_v4().to_string(),
            collection_reference,
            resource_reference: uri.to_string(),
            last_modified: http_date_now(),
            remote_user: options.remote_user.clone(),
            content: raw.to_string(),
            deleted: false,
        };

        let mut tx = self.adapter.begin().await?;
        let result = self.write_new_current(&mut tx, &entry, &data).await;
        finish_transaction(tx, result).await?;

        let body = serde_json::json!({
            "uri": entry.uri,
            "etag": entry.etag,
            "last_modified": entry.last_modified,
        });
        Ok(success_response(201, body.to_string(), &entry))
    }

    async fn update_resource(
        &self,
        uri: &str,
        options: &RequestOptions,
    ) -> Result<Response, StoreError> {
        let raw = options.json.as_deref().expect("caller already checked json is present");
        let data: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| StoreError::malformed_json(e.to_string()))?;
        let Some(ref provided_etag) = options.etag else {
            return Err(StoreError::etag_required());
        };

        let filter = options.entry_filter();
        let mut tx = self.adapter.begin().await?;
        let result = self.apply_update(&mut tx, uri, provided_etag, raw, &data, &filter).await;
        let new_entry = finish_transaction(tx, result).await?;

        let body = serde_json::json!({
            "uri": new_entry.uri,
            "etag": new_entry.etag,
            "last_modified": new_entry.last_modified,
        });
        Ok(success_response(200, body.to_string(), &new_entry))
    }

    /// Re-fetches the current row inside `tx` and validates ownership/etag against
    /// that same snapshot before writing, so the precondition check and the write
    /// it guards can never observe different rows.
    async fn apply_update(
        &self,
        tx: &mut A::Transaction,
        uri: &str,
        provided_etag: &str,
        raw: &str,
        data: &serde_json::Value,
        filter: &EntryFilter,
    ) -> Result<StoreEntry, StoreError> {
        let current = tx
            .fetch_current(uri, filter)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("no such resource: {uri}")))?;
        if current.deleted {
            return Err(self.gone_error(&current).await?);
        }
        if provided_etag != current.etag {
            return Err(StoreError::precondition_failed("etag does not match current version"));
        }

        let new_entry = StoreEntry {
            id: 0,
            uri: uri.to_string(),
            etag: Uuid::new_v4().to_string(),
            collection_reference: current.collection_reference.clone(),
            resource_reference: current.resource_reference.clone(),
            last_modified: http_date_now(),
            remote_user: current.remote_user.clone(),
            content: raw.to_string(),
            deleted: false,
        };

        self.rewrite_and_insert(tx, &current, &new_entry, data).await?;
        Ok(new_entry)
    }

    pub async fn delete(&self, uri: &str, options: &RequestOptions) -> Result<Response, StoreError> {
        let kind = self.classify(uri);
        if !kind.allows(&Method::DELETE) {
            return Err(StoreError::method_not_allowed(kind.allowed_methods().to_vec()));
        }
        if !self.known_collection_type(uri) {
            return Err(StoreError::invalid_entity_type(format!("unknown entity type for {uri}")));
        }
        let Some(ref provided_etag) = options.etag else {
            return Err(StoreError::etag_required());
        };

        let filter = options.entry_filter();
        let mut tx = self.adapter.begin().await?;
        let result = self.apply_delete(&mut tx, uri, provided_etag, &filter).await;
        let current = finish_transaction(tx, result).await?;

        let body = serde_json::json!({
            "uri": current.version_uri(),
            "etag": current.etag,
            "last_modified": current.last_modified,
        });
        Ok(Response::new(200, body.to_string())
            .with_etag(&current.etag)
            .with_last_modified(current.last_modified.clone()))
    }

    /// Re-fetches the current row inside `tx` and validates the etag against that
    /// same snapshot before tombstoning it, for the same reason [`Self::apply_update`]
    /// does: the precondition check and the write must observe one snapshot.
    async fn apply_delete(
        &self,
        tx: &mut A::Transaction,
        uri: &str,
        provided_etag: &str,
        filter: &EntryFilter,
    ) -> Result<StoreEntry, StoreError> {
        let current = tx
            .fetch_current(uri, filter)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("no such resource: {uri}")))?;
        if current.deleted {
            return Err(self.gone_error(&current).await?);
        }
        if provided_etag != current.etag {
            return Err(StoreError::precondition_failed("etag does not match current version"));
        }

        let tombstone = StoreEntry {
            id: 0,
            uri: uri.to_string(),
            etag: Uuid::new_v4().to_string(),
            collection_reference: current.collection_reference.clone(),
            resource_reference: current.resource_reference.clone(),
            last_modified: http_date_now(),
            remote_user: current.remote_user.clone(),
            content: current.content.clone(),
            deleted: true,
        };

        self.rewrite_and_tombstone(tx, &current, &tombstone).await?;
        Ok(current)
    }

    /// Runs every URI in `uris` through [`Self::get`] and collects the responses,
    /// preserving order and never short-circuiting on an individual failure.
    pub async fn resolve_uris(
        &self,
        uris: &[String],
        options: &RequestOptions,
    ) -> Vec<Result<Response, StoreError>> {
        let mut results = Vec::with_capacity(uris.len());
        for uri in uris {
            results.push(self.get(uri, options).await);
        }
        results
    }

    pub async fn reset(&self) -> Result<(), StoreError> {
        self.adapter.reset().await
    }

    async fn write_new_current(
        &self,
        tx: &mut A::Transaction,
        entry: &StoreEntry,
        data: &serde_json::Value,
    ) -> Result<(), StoreError> {
        tx.insert(entry).await?;
        self.apply_views_map(tx, entry, data).await
    }

    async fn rewrite_and_insert(
        &self,
        tx: &mut A::Transaction,
        current: &StoreEntry,
        new_entry: &StoreEntry,
        data: &serde_json::Value,
    ) -> Result<(), StoreError> {
        tx.rewrite_uri(&current.uri, &current.version_uri()).await?;
        tx.insert(new_entry).await?;
        self.apply_views_map(tx, new_entry, data).await
    }

    async fn rewrite_and_tombstone(
        &self,
        tx: &mut A::Transaction,
        current: &StoreEntry,
        tombstone: &StoreEntry,
    ) -> Result<(), StoreError> {
        tx.rewrite_uri(&current.uri, &current.version_uri()).await?;
        tx.insert(tombstone).await?;
        for view in self.views.values() {
            if view.observed_collection == tombstone.collection_reference.trim_start_matches('/') {
                tx.view_unmap(view, &tombstone.uri).await?;
            }
        }
        Ok(())
    }

    async fn apply_views_map(
        &self,
        tx: &mut A::Transaction,
        entry: &StoreEntry,
        data: &serde_json::Value,
    ) -> Result<(), StoreError> {
        for view in self.views.values() {
            if view.observed_collection == entry.collection_reference.trim_start_matches('/') {
                tx.view_map(view, &entry.uri, &entry.collection_reference, data).await?;
            }
        }
        Ok(())
    }
}

async fn finish_transaction<T: StoreTransaction, R>(
    tx: T,
    result: Result<R, StoreError>,
) -> Result<R, StoreError> {
    match result {
        Ok(value) => {
            Box::new(tx).commit().await?;
            Ok(value)
        }
        Err(e) => {
            tracing::warn!(error = %e, "rolling back transaction after write failure");
            Box::new(tx).rollback().await?;
            Err(e)
        }
    }
}

fn success_response(status: u16, content: String, row: &StoreEntry) -> Response {
    Response::new(status, content).with_etag(&row.etag).with_last_modified(row.last_modified.clone())
}

/// Current time rendered in HTTP-date (IMF-fixdate) form, e.g.
/// `Sun, 06 Nov 1994 08:49:37 GMT`.
#[must_use]
pub fn http_date_now() -> String {
    chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn content_hash(body: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    body.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Builds the bundled collection result: `total` computed before slicing, then
/// `uris` or `documents` depending on `resolved`.
fn bundle(rows: &[StoreEntry], page: Page, resolved: bool) -> Result<Response, StoreError> {
    let total = rows.len();
    let slice = page.slice(rows);
    let body = if resolved {
        let mut documents = Vec::with_capacity(slice.len());
        for row in slice {
            let document: serde_json::Value = serde_json::from_str(&row.content)
                .map_err(|e| StoreError::backend("stored content is not valid json", e))?;
            documents.push(serde_json::json!({
                "uri": row.uri,
                "etag": row.etag,
                "last_modified": row.last_modified,
                "document": document,
            }));
        }
        serde_json::json!({ "total": total, "offset": page.offset, "documents": documents })
    } else {
        let uris: Vec<&str> = slice.iter().map(|r| r.uri.as_str()).collect();
        serde_json::json!({ "total": total, "offset": page.offset, "uris": uris })
    };
    let content = body.to_string();
    let last_modified = rows.first().map(|r| r.last_modified.clone()).unwrap_or_default();
    Ok(Response::new(200, content.clone())
        .with_etag(&content_hash(&content))
        .with_last_modified(last_modified))
}
