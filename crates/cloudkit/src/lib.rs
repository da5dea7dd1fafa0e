#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![forbid(unsafe_code)]

//! CloudKit is a RESTful, versioned JSON document store.
//!
//! Clients address JSON resources by URI and mutate them through HTTP-style verbs
//! and ETag/Last-Modified preconditions. Every mutation produces a new immutable
//! version; prior versions remain addressable under `.../versions/{etag}`. See
//! [`engine::StoreEngine`] for the request-handling surface and [`adapter::Adapter`]
//! for the storage contract a backend implements.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod implementations;
pub mod response;
pub mod row;
pub mod uri;
pub mod view;

pub use adapter::{Adapter, EntryFilter, Page, StoreTransaction};
pub use config::{StoreConfig, ViewConfig};
pub use engine::{RequestOptions, StoreEngine};
pub use error::StoreError;
pub use response::Response;
pub use row::StoreEntry;
pub use uri::UriKind;

pub use async_trait;
pub use tokio;
pub use tracing;
