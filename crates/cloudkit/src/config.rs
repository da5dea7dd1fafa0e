use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{error::StoreError, uri::META_URI};

/// A secondary index over one observed collection.
#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
pub struct ViewConfig {
    pub name: String,
    pub observed_collection: String,
    pub extracted_keys: Vec<String>,
}

/// Registered collections, views, and adapter connection settings.
///
/// Built via [`StoreConfig::load`], which layers defaults, an optional config file,
/// and `CLOUDKIT__`-prefixed environment variables the same way the rest of this
/// codebase's configuration is assembled, then validates every collection and view
/// identifier so a mis-typed name fails at startup rather than silently classifying
/// as `Unknown` at request time.
#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct StoreConfig {
    pub collections: Vec<String>,
    pub views: Vec<ViewConfig>,
    pub database_url: Option<String>,
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && name != "_resolved"
        && name != "versions"
        && name != META_URI
}

impl StoreConfig {
    /// Loads configuration from defaults, an optional file, and `CLOUDKIT__`-prefixed
    /// environment variables (double-underscore separated, e.g.
    /// `CLOUDKIT__DATABASE_URL`), then validates it.
    pub fn load() -> Result<Self, StoreError> {
        let defaults = figment::providers::Serialized::defaults(Self::default());

        #[cfg(not(test))]
        let prefix = "CLOUDKIT__";
        #[cfg(test)]
        let prefix = "CLOUDKIT_TEST__";

        let config = figment::Figment::from(defaults)
            .merge(figment::providers::Env::prefixed(prefix).split("__"))
            .extract::<Self>()
            .map_err(|e| StoreError::config(format!("failed to load configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let mut seen = BTreeSet::new();
        for collection in &self.collections {
            if !valid_identifier(collection) {
                return Err(StoreError::config(format!(
                    "invalid collection name: {collection}"
                )));
            }
            if !seen.insert(collection.clone()) {
                return Err(StoreError::config(format!(
                    "duplicate collection name: {collection}"
                )));
            }
        }
        for view in &self.views {
            if !valid_identifier(&view.name) {
                return Err(StoreError::config(format!("invalid view name: {}", view.name)));
            }
            if !seen.insert(view.name.clone()) {
                return Err(StoreError::config(format!(
                    "view name collides with a collection or another view: {}",
                    view.name
                )));
            }
            if !self.collections.contains(&view.observed_collection) {
                return Err(StoreError::config(format!(
                    "view {} observes unknown collection {}",
                    view.name, view.observed_collection
                )));
            }
            if view.extracted_keys.is_empty() {
                return Err(StoreError::config(format!(
                    "view {} extracts no keys",
                    view.name
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn collection_set(&self) -> BTreeSet<String> {
        self.collections.iter().cloned().collect()
    }

    #[must_use]
    pub fn view_set(&self) -> BTreeSet<String> {
        self.views.iter().map(|v| v.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_slash_in_collection_name() {
        let config = StoreConfig { collections: vec!["a/b".into()], ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_reserved_collection_name() {
        let config = StoreConfig { collections: vec!["versions".into()], ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_view_over_unknown_collection() {
        let config = StoreConfig {
            collections: vec!["foos".into()],
            views: vec![ViewConfig {
                name: "v".into(),
                observed_collection: "bars".into(),
                extracted_keys: vec!["k".into()],
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_view_name_colliding_with_collection() {
        let config = StoreConfig {
            collections: vec!["foos".into()],
            views: vec![ViewConfig {
                name: "foos".into(),
                observed_collection: "foos".into(),
                extracted_keys: vec!["k".into()],
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let config = StoreConfig {
            collections: vec!["foos".into(), "fruits".into()],
            views: vec![ViewConfig {
                name: "fruits_by_color".into(),
                observed_collection: "fruits".into(),
                extracted_keys: vec!["color".into()],
            }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_vars_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CLOUDKIT_TEST__DATABASE_URL", "postgres://example/db");
            let config = StoreConfig::load().expect("config loads");
            assert_eq!(config.database_url.as_deref(), Some("postgres://example/db"));
            Ok(())
        });
    }
}
