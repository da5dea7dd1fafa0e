use serde::{Deserialize, Serialize};

/// A single row of the logical `CLOUDKIT_STORE` table.
///
/// One row represents either the current version of a resource
/// (`uri == resource_reference`), a historical version (`uri` rewritten to
/// `/{collection}/{uuid}/versions/{etag}`), or a tombstone (`deleted == true`,
/// also addressed at `uri == resource_reference`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx-postgres", derive(sqlx::FromRow))]
pub struct StoreEntry {
    pub id: i64,
    pub uri: String,
    pub etag: String,
    pub collection_reference: String,
    pub resource_reference: String,
    pub last_modified: String,
    pub remote_user: Option<String>,
    pub content: String,
    pub deleted: bool,
}

impl StoreEntry {
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.uri == self.resource_reference
    }

    #[must_use]
    pub fn version_uri(&self) -> String {
        format!("{}/versions/{}", self.resource_reference, self.etag)
    }

    /// True if every `(key, value)` pair in `extra` matches a same-named field
    /// in this row's parsed JSON content. Unparsable content or a missing field
    /// fails the match.
    #[must_use]
    pub fn matches_extra(&self, extra: &std::collections::BTreeMap<String, String>) -> bool {
        if extra.is_empty() {
            return true;
        }
        let Ok(content) = serde_json::from_str::<serde_json::Value>(&self.content) else {
            return false;
        };
        extra.iter().all(|(key, value)| content.get(key).is_some_and(|field| field_eq(field, value)))
    }
}

fn field_eq(field: &serde_json::Value, expected: &str) -> bool {
    match field {
        serde_json::Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}
