//! Per-request caller context.

pub use axum::http::HeaderMap;

/// Builds the engine context for one request from its headers.
///
/// Any `Fn(&HeaderMap) -> C` closure is a provider.
pub trait ContextProvider<C>: Send + Sync {
    /// Context for a request carrying `headers`.
    fn provide(&self, headers: &HeaderMap) -> C;
}

impl<C, F> ContextProvider<C> for F
where
    F: Fn(&HeaderMap) -> C + Send + Sync,
{
    fn provide(&self, headers: &HeaderMap) -> C {
        self(headers)
    }
}

/// Value of `name` when present and valid UTF-8.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
