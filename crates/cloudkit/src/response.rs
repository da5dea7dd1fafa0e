use std::collections::BTreeMap;

/// Value type carrying the status, headers and body the Store Engine hands back to
/// a transport wrapper. Deliberately ignorant of any particular host protocol: a
/// wrapper translates this into, say, an axum `Response` or a Rack triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    headers: BTreeMap<String, String>,
    pub content: String,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, content: impl Into<String>) -> Self {
        Self { status, headers: BTreeMap::new(), content: content.into() }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Sets the `ETag` header in its quoted wire form from an unquoted value.
    #[must_use]
    pub fn with_etag(self, etag: &str) -> Self {
        self.with_header("ETag", format!("\"{etag}\""))
    }

    /// Returns the `ETag` header value with surrounding quotes stripped.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.header("ETag").map(|v| v.trim_matches('"'))
    }

    #[must_use]
    pub fn with_last_modified(self, last_modified: impl Into<String>) -> Self {
        self.with_header("Last-Modified", last_modified)
    }

    #[must_use]
    pub fn last_modified(&self) -> Option<&str> {
        self.header("Last-Modified")
    }

    /// Projects this response onto a HEAD response: same status and headers, empty body.
    #[must_use]
    pub fn head(&self) -> Self {
        Self { status: self.status, headers: self.headers.clone(), content: String::new() }
    }

    /// Splits this response into the `(status, headers, content)` triple a transport
    /// wrapper maps onto the host protocol.
    #[must_use]
    pub fn to_parts(&self) -> (u16, BTreeMap<String, String>, String) {
        (self.status, self.headers.clone(), self.content.clone())
    }
}
