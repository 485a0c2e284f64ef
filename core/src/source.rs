// Data source contract
//
// A data source produces one named JSON snapshot. Sources are shared between
// the background poller and HTTP handlers, so they take `&self` and must be
// safe to call concurrently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Errors a data source can report while producing its snapshot
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Missing credentials: {0} is not set")]
    MissingCredentials(String),

    #[error("Malformed upstream data: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

/// A named producer of dashboard data
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Produce the current snapshot. May perform network or filesystem I/O.
    async fn get_data(&self) -> Result<Value, SourceError>;

    /// Endpoint name, used as the HTTP path segment and the push event prefix.
    fn endpoint_name(&self) -> &str;

    /// Answer on-demand fetches with `NotModified` when the client's
    /// `If-None-Match` tag still matches the snapshot.
    fn conditional_fetch(&self) -> bool {
        false
    }
}

/// JSON wrapper returned by on-demand fetches
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub endpoint: String,
    /// Unix timestamp in seconds
    pub last_update_time: f64,
    pub data: Value,
}

/// Result of an on-demand fetch
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    Fresh(Envelope),
    NotModified,
}

impl FetchOutcome {
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            FetchOutcome::Fresh(envelope) => Some(envelope),
            FetchOutcome::NotModified => None,
        }
    }
}

/// Quoted entity tag of a payload, stable for the process lifetime
pub fn entity_tag(data: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    data.to_string().hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

/// Whether an `If-None-Match` header value names `tag`
pub fn if_none_match(header: &str, tag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == tag
    })
}

/// Push event name for an endpoint
pub fn update_event_name(endpoint: &str) -> String {
    format!("{}_update", endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_event_name_appends_suffix() {
        assert_eq!(update_event_name("weather"), "weather_update");
    }

    #[test]
    fn envelope_serializes_expected_fields() {
        let envelope = Envelope {
            endpoint: "pictures".into(),
            last_update_time: 1_700_000_000.5,
            data: json!([{"url": "/static/photos/a.jpg"}]),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["endpoint"], "pictures");
        assert_eq!(value["last_update_time"], 1_700_000_000.5);
        assert_eq!(value["data"][0]["url"], "/static/photos/a.jpg");
    }

    #[test]
    fn entity_tags_follow_payload_equality() {
        let tag = entity_tag(&json!({"a": 1, "b": [true]}));
        assert_eq!(tag, entity_tag(&json!({"b": [true], "a": 1})));
        assert_ne!(tag, entity_tag(&json!({"a": 2, "b": [true]})));
        assert!(tag.starts_with('"') && tag.ends_with('"'));
    }

    #[test]
    fn if_none_match_accepts_lists_weak_tags_and_wildcard() {
        let tag = entity_tag(&json!(1));
        assert!(if_none_match(&tag, &tag));
        assert!(if_none_match(&format!("\"other\", W/{tag}"), &tag));
        assert!(if_none_match("*", &tag));
        assert!(!if_none_match("\"other\"", &tag));
    }

    #[test]
    fn source_error_messages_are_plain() {
        let err = SourceError::Other("calendar server unreachable".into());
        assert_eq!(err.to_string(), "calendar server unreachable");

        let err = SourceError::MissingCredentials("ICLOUD_USERNAME".into());
        assert_eq!(
            err.to_string(),
            "Missing credentials: ICLOUD_USERNAME is not set"
        );
    }
}
