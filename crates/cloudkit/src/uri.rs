use std::collections::BTreeSet;

use http::Method;

pub const META_URI: &str = "cloudkit-meta";
const RESOLVED_SEGMENT: &str = "_resolved";
const VERSIONS_SEGMENT: &str = "versions";

/// The seven addressable resource shapes, plus `View` and `Unknown`.
///
/// Classification is a pure function of the URI's segments and the set of collection
/// and view names the store was configured with; it never touches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriKind {
    Meta,
    ResourceCollection,
    ResolvedResourceCollection,
    Resource,
    VersionCollection,
    ResolvedVersionCollection,
    ResourceVersion,
    View,
    Unknown,
}

impl UriKind {
    /// HTTP methods allowed against a URI of this kind. `OPTIONS` is always allowed
    /// for every known kind so `Store::options` can answer without a special case.
    #[must_use]
    pub fn allowed_methods(self) -> &'static [Method] {
        match self {
            UriKind::Meta
            | UriKind::ResolvedResourceCollection
            | UriKind::VersionCollection
            | UriKind::ResolvedVersionCollection
            | UriKind::ResourceVersion
            | UriKind::View => &[Method::GET, Method::HEAD, Method::OPTIONS],
            UriKind::ResourceCollection => {
                &[Method::GET, Method::HEAD, Method::POST, Method::OPTIONS]
            }
            UriKind::Resource => {
                &[Method::GET, Method::HEAD, Method::PUT, Method::DELETE, Method::OPTIONS]
            }
            UriKind::Unknown => &[],
        }
    }

    #[must_use]
    pub fn allows(self, method: &Method) -> bool {
        self.allowed_methods().contains(method)
    }
}

/// Splits a URI into non-empty segments, mirroring how the reference classifier
/// tolerates leading/trailing/duplicate slashes.
fn segments(uri: &str) -> Vec<&str> {
    uri.split('/').filter(|s| !s.is_empty()).collect()
}

/// Classifies a URI given the currently registered collection and view names.
///
/// Single-segment URIs must resolve against the registry to disambiguate a
/// collection from a view from an unknown name. Multi-segment shapes are
/// classified by segment count and marker segments (`versions`, `_resolved`)
/// alone, without checking whether the leading segment is actually a registered
/// collection — that is a separate concern, checked downstream by the engine so
/// a PUT against an unregistered name is rejected with "invalid entity type"
/// rather than silently falling through as `Unknown`.
#[must_use]
pub fn classify(uri: &str, collections: &BTreeSet<String>, views: &BTreeSet<String>) -> UriKind {
    let segs = segments(uri);
    match segs.as_slice() {
        [only] if *only == META_URI => UriKind::Meta,
        [only] if collections.contains(*only) => UriKind::ResourceCollection,
        [only] if views.contains(*only) => UriKind::View,
        [_] => UriKind::Unknown,
        [_, second] => {
            if *second == RESOLVED_SEGMENT {
                UriKind::ResolvedResourceCollection
            } else {
                UriKind::Resource
            }
        }
        [_, _, third] if *third == VERSIONS_SEGMENT => UriKind::VersionCollection,
        [_, _, third, fourth] if *third == VERSIONS_SEGMENT => {
            if *fourth == RESOLVED_SEGMENT {
                UriKind::ResolvedVersionCollection
            } else {
                UriKind::ResourceVersion
            }
        }
        _ => UriKind::Unknown,
    }
}

/// `"/{collection}"` for any URI under that collection.
#[must_use]
pub fn collection_uri_fragment(uri: &str) -> Option<String> {
    segments(uri).first().map(|c| format!("/{c}"))
}

/// `"/{collection}/{uuid}"`: the logical (current-version) resource URI that any
/// resource, version-collection, or resource-version URI belongs to.
#[must_use]
pub fn current_resource_uri(uri: &str) -> Option<String> {
    let segs = segments(uri);
    match segs.as_slice() {
        [collection, id, ..] => Some(format!("/{collection}/{id}")),
        _ => None,
    }
}
