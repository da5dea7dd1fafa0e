//! The production [`Adapter`]: a single `cloudkit_store` table plus one
//! `cloudkit_view_entry` table shared by every configured view.
//!
//! Queries are built at runtime rather than with `sqlx::query!`'s compile-time
//! checking: the set of collections and views — and therefore the shape of the
//! view lookups — comes from [`crate::config::StoreConfig`], not from fixed SQL
//! known ahead of time.

mod dbutils;

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction as SqlxTransaction};

use self::dbutils::DBErrorHandler;
use crate::{
    adapter::{Adapter, EntryFilter, StoreTransaction},
    config::ViewConfig,
    error::StoreError,
    row::StoreEntry,
    view,
};

const STORE_TABLE: &str = "cloudkit_store";
const VIEW_TABLE: &str = "cloudkit_view_entry";

const ROW_COLUMNS: &str = "id, uri, etag, collection_reference, resource_reference, \
    last_modified, remote_user, content, deleted";

fn remote_user_clause(filter: &EntryFilter, next_param: &mut i32) -> (String, Option<String>) {
    match &filter.remote_user {
        Some(user) => {
            let clause = format!(" AND remote_user = ${next_param}");
            *next_param += 1;
            (clause, Some(user.clone()))
        }
        None => (String::new(), None),
    }
}

/// A Postgres-backed [`Adapter`]. Cheap to clone — every clone shares the same
/// connection pool.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connects to `database_url` and ensures the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| e.into_store_error("failed to connect to database"))?;
        let backend = Self { pool };
        backend.ensure_schema().await?;
        Ok(backend)
    }

    /// Builds a backend around an already-connected pool, skipping schema setup.
    /// Used by callers that manage migrations themselves.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {STORE_TABLE} (
                id BIGSERIAL PRIMARY KEY,
                uri TEXT NOT NULL UNIQUE,
                etag TEXT NOT NULL,
                collection_reference TEXT NOT NULL,
                resource_reference TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                remote_user TEXT,
                content TEXT NOT NULL,
                deleted BOOLEAN NOT NULL DEFAULT FALSE
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| e.into_store_error("failed to create store table"))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{STORE_TABLE}_collection_reference \
             ON {STORE_TABLE} (collection_reference)"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| e.into_store_error("failed to create collection_reference index"))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{STORE_TABLE}_resource_reference \
             ON {STORE_TABLE} (resource_reference)"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| e.into_store_error("failed to create resource_reference index"))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {VIEW_TABLE} (
                view_name TEXT NOT NULL,
                uri TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (view_name, uri, key)
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| e.into_store_error("failed to create view entry table"))?;

        Ok(())
    }
}

#[async_trait]
impl Adapter for PostgresBackend {
    type Transaction = PostgresTransaction;

    async fn resource_collection(
        &self,
        collection_reference: &str,
        filter: &EntryFilter,
    ) -> Result<Vec<StoreEntry>, StoreError> {
        let mut next_param = 2;
        let (user_clause, user_value) = remote_user_clause(filter, &mut next_param);
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM {STORE_TABLE} \
             WHERE collection_reference = $1 AND uri = resource_reference AND NOT deleted{user_clause} \
             ORDER BY id DESC"
        );
        let mut query = sqlx::query_as::<_, StoreEntry>(&sql).bind(collection_reference);
        if let Some(user) = user_value {
            query = query.bind(user);
        }
        let mut rows =
            query.fetch_all(&self.pool).await.map_err(|e| e.into_store_error("failed to list collection"))?;
        rows.retain(|r| r.matches_extra(&filter.extra));
        Ok(rows)
    }

    async fn version_collection(
        &self,
        resource_uri: &str,
    ) -> Result<Option<Vec<StoreEntry>>, StoreError> {
        let exists = sqlx::query(&format!(
            "SELECT 1 FROM {STORE_TABLE} WHERE resource_reference = $1 LIMIT 1"
        ))
        .bind(resource_uri)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.into_store_error("failed to check resource existence"))?
        .is_some();
        if !exists {
            return Ok(None);
        }
        let rows = sqlx::query_as::<_, StoreEntry>(&format!(
            "SELECT {ROW_COLUMNS} FROM {STORE_TABLE} \
             WHERE resource_reference = $1 AND NOT deleted ORDER BY id DESC"
        ))
        .bind(resource_uri)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.into_store_error("failed to list versions"))?;
        Ok(Some(rows))
    }

    async fn resource(
        &self,
        uri: &str,
        filter: &EntryFilter,
    ) -> Result<Option<StoreEntry>, StoreError> {
        fetch_by_uri(&self.pool, uri, filter).await
    }

    async fn resource_version(
        &self,
        uri: &str,
        filter: &EntryFilter,
    ) -> Result<Option<StoreEntry>, StoreError> {
        fetch_by_uri(&self.pool, uri, filter).await
    }

    async fn view_lookup(
        &self,
        view: &ViewConfig,
        filter: &EntryFilter,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(&format!("SELECT uri, key, value FROM {VIEW_TABLE} WHERE view_name = $1"))
            .bind(&view.name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.into_store_error("failed to read view entries"))?;

        let mut by_uri: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for row in rows {
            let uri: String = row.try_get("uri").map_err(|e| e.into_store_error("malformed view row"))?;
            let key: String = row.try_get("key").map_err(|e| e.into_store_error("malformed view row"))?;
            let value: String = row.try_get("value").map_err(|e| e.into_store_error("malformed view row"))?;
            by_uri.entry(uri).or_default().insert(key, value);
        }

        Ok(by_uri
            .into_iter()
            .filter(|(_, values)| filter.extra.iter().all(|(k, v)| values.get(k) == Some(v)))
            .map(|(uri, _)| uri)
            .collect())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        sqlx::query(&format!("TRUNCATE {STORE_TABLE}"))
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_store_error("failed to truncate store table"))?;
        sqlx::query(&format!("TRUNCATE {VIEW_TABLE}"))
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_store_error("failed to truncate view table"))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        let tx = self.pool.begin().await.map_err(|e| e.into_store_error("failed to open transaction"))?;
        Ok(PostgresTransaction { tx })
    }
}

async fn fetch_by_uri(
    pool: &PgPool,
    uri: &str,
    filter: &EntryFilter,
) -> Result<Option<StoreEntry>, StoreError> {
    let mut next_param = 2;
    let (user_clause, user_value) = remote_user_clause(filter, &mut next_param);
    let sql = format!("SELECT {ROW_COLUMNS} FROM {STORE_TABLE} WHERE uri = $1{user_clause}");
    let mut query = sqlx::query_as::<_, StoreEntry>(&sql).bind(uri);
    if let Some(user) = user_value {
        query = query.bind(user);
    }
    query.fetch_optional(pool).await.map_err(|e| e.into_store_error("failed to fetch resource"))
}

/// A single `BEGIN`/`COMMIT`/`ROLLBACK` bracket shared by the row-store write and
/// every view `map`/`unmap` call it triggers.
#[derive(Debug)]
pub struct PostgresTransaction {
    tx: SqlxTransaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn fetch_current(
        &mut self,
        uri: &str,
        filter: &EntryFilter,
    ) -> Result<Option<StoreEntry>, StoreError> {
        let mut next_param = 2;
        let (user_clause, user_value) = remote_user_clause(filter, &mut next_param);
        let sql = format!("SELECT {ROW_COLUMNS} FROM {STORE_TABLE} WHERE uri = $1{user_clause} FOR UPDATE");
        let mut query = sqlx::query_as::<_, StoreEntry>(&sql).bind(uri);
        if let Some(user) = user_value {
            query = query.bind(user);
        }
        query
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| e.into_store_error("failed to fetch resource"))
    }

    async fn insert(&mut self, entry: &StoreEntry) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO {STORE_TABLE} \
             (uri, etag, collection_reference, resource_reference, last_modified, remote_user, content, deleted) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(&entry.uri)
        .bind(&entry.etag)
        .bind(&entry.collection_reference)
        .bind(&entry.resource_reference)
        .bind(&entry.last_modified)
        .bind(&entry.remote_user)
        .bind(&entry.content)
        .bind(entry.deleted)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| e.into_store_error("failed to insert row"))?;
        Ok(())
    }

    async fn rewrite_uri(&mut self, old_uri: &str, new_uri: &str) -> Result<(), StoreError> {
        let result = sqlx::query(&format!("UPDATE {STORE_TABLE} SET uri = $1 WHERE uri = $2"))
            .bind(new_uri)
            .bind(old_uri)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| e.into_store_error("failed to rewrite uri"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::backend(
                "row not found for rewrite",
                sqlx::Error::RowNotFound,
            ));
        }
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
        sqlx::query(&format!("DELETE FROM {VIEW_TABLE} WHERE view_name = $1 AND uri = $2"))
            .bind(&view.name)
            .bind(uri)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| e.into_store_error("failed to clear stale view entry"))?;
        for (key, value) in values {
            sqlx::query(&format!(
                "INSERT INTO {VIEW_TABLE} (view_name, uri, key, value) VALUES ($1, $2, $3, $4)"
            ))
            .bind(&view.name)
            .bind(uri)
            .bind(key)
            .bind(value)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| e.into_store_error("failed to write view entry"))?;
        }
        Ok(())
    }

    async fn view_unmap(&mut self, view: &ViewConfig, uri: &str) -> Result<(), StoreError> {
        sqlx::query(&format!("DELETE FROM {VIEW_TABLE} WHERE view_name = $1 AND uri = $2"))
            .bind(&view.name)
            .bind(uri)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| e.into_store_error("failed to remove view entry"))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| e.into_store_error("failed to commit transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| e.into_store_error("failed to roll back transaction"))
    }
}
