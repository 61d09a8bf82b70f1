//! The HTTP upgrade request a connection was opened with.
//!
//! WebSocket clients in browsers can't set arbitrary headers, so routing
//! and credentials travel in the URL: `/lobby/42?invite=abc&token=t`.
//! We capture the path, the decoded query pairs and (for non-browser
//! clients) an `Authorization: Bearer` header once, during the upgrade,
//! and keep them on the connection for the handler to inspect.

use std::collections::HashMap;

/// Route and credentials captured from the upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    path: String,
    query: HashMap<String, String>,
    bearer: Option<String>,
}

impl ConnectRequest {
    /// Builds a request from a raw path, optional query string and
    /// optional `Authorization` header value.
    pub fn new(
        path: &str,
        query: Option<&str>,
        authorization: Option<&str>,
    ) -> Self {
        let bearer = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        Self {
            path: path.to_string(),
            query: query.map(parse_query).unwrap_or_default(),
            bearer,
        }
    }

    /// Parses a `path?query` string, as produced by a request URI.
    pub fn from_uri(uri: &str) -> Self {
        match uri.split_once('?') {
            Some((path, query)) => Self::new(path, Some(query), None),
            None => Self::new(uri, None, None),
        }
    }

    /// The request path, e.g. `/lobby/42`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Non-empty path segments, e.g. `["lobby", "42"]`.
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Returns a query parameter, treating empty values as absent.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// The bearer token from the `Authorization` header, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}
