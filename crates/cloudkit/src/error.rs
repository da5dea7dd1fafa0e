use http::StatusCode;
use itertools::Itertools;

use crate::response::Response;

/// The store's single error type.
///
/// Every fallible engine and adapter method returns `Result<_, StoreError>`. Each
/// variant already knows its HTTP status and a stable, machine-readable `code`, so
/// callers never have to re-derive a status from a generic error string.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("invalid entity type: {message}")]
    InvalidEntityType { message: String },

    #[error("data required: {message}")]
    DataRequired { message: String },

    #[error("etag required: {message}")]
    EtagRequired { message: String },

    #[error("method not allowed: {message}")]
    MethodNotAllowed { message: String, allow: Vec<http::Method> },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("gone: {message}")]
    Gone {
        message: String,
        version_uri: String,
        etag: String,
        last_modified: String,
    },

    #[error("precondition failed: {message}")]
    PreconditionFailed { message: String },

    #[error("malformed json: {message}")]
    MalformedJson { message: String },

    #[error("backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl StoreError {
    pub fn invalid_entity_type(message: impl Into<String>) -> Self {
        Self::InvalidEntityType { message: message.into() }
    }

    pub fn data_required() -> Self {
        Self::DataRequired { message: "data required".to_string() }
    }

    pub fn etag_required() -> Self {
        Self::EtagRequired { message: "etag required".to_string() }
    }

    pub fn method_not_allowed(allow: Vec<http::Method>) -> Self {
        let names = allow.iter().map(http::Method::as_str).join(", ");
        Self::MethodNotAllowed { message: format!("method not allowed, allow: {names}"), allow }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn gone(version_uri: impl Into<String>, etag: impl Into<String>, last_modified: impl Into<String>) -> Self {
        Self::Gone {
            message: "resource has been deleted".to_string(),
            version_uri: version_uri.into(),
            etag: etag.into(),
            last_modified: last_modified.into(),
        }
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed { message: message.into() }
    }

    pub fn malformed_json(message: impl Into<String>) -> Self {
        Self::MalformedJson { message: message.into() }
    }

    pub fn backend(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend { message: message.into(), source: Box::new(source) }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Stable, machine-readable identifier for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEntityType { .. } => "invalid_entity_type",
            Self::DataRequired { .. } => "data_required",
            Self::EtagRequired { .. } => "etag_required",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::NotFound { .. } => "not_found",
            Self::Gone { .. } => "gone",
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::MalformedJson { .. } => "malformed_json",
            Self::Backend { .. } => "backend_error",
            Self::Config { .. } => "invalid_configuration",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidEntityType { .. }
            | Self::DataRequired { .. }
            | Self::EtagRequired { .. } => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Gone { .. } => StatusCode::GONE,
            Self::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Self::MalformedJson { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Backend { .. } | Self::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render this error as the `Response` the Store Engine would have returned
    /// had the caller not short-circuited on `Err`.
    #[must_use]
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(
            self.status().as_u16(),
            serde_json::json!({ "error": { "code": self.code(), "message": self.to_string() } })
                .to_string(),
        );
        match self {
            Self::MethodNotAllowed { allow, .. } => {
                let names = allow.iter().map(http::Method::as_str).join(", ");
                response = response.with_header("Allow", names);
            }
            Self::Gone { version_uri, etag, last_modified, .. } => {
                response = Response::new(
                    self.status().as_u16(),
                    serde_json::json!({
                        "error": { "code": self.code(), "message": self.to_string() },
                        "version_uri": version_uri,
                    })
                    .to_string(),
                )
                .with_header("ETag", format!("\"{etag}\""))
                .with_header("Last-Modified", last_modified.clone());
            }
            _ => {}
        }
        response
    }
}
