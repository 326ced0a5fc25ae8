//! Socket endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_protocol::version::{Version, VERSION_PARAM};
use url::Url;

use crate::traits::TransportError;

/// Path segment every socket URL ends with.
const TRANSPORT_SEGMENT: &str = "websocket";

/// Where to connect, plus the connection parameters sent in the query string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Base socket URL, e.g. `ws://localhost:4000/socket`.
    pub url: String,
    /// Connection parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Endpoint {
    /// Create an endpoint without parameters.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: Map::new(),
        }
    }

    /// Add a connection parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Build the full socket URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not a valid `ws`/`wss` URL.
    pub fn to_url(&self, version: Version) -> Result<Url, TransportError> {
        let mut url =
            Url::parse(&self.url).map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        let ends_with_segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .is_some_and(|last| last == TRANSPORT_SEGMENT);
        if !ends_with_segment {
            let path = format!("{}/{}", url.path().trim_end_matches('/'), TRANSPORT_SEGMENT);
            url.set_path(&path);
        }

        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &self.params {
                match value {
                    Value::String(s) => query.append_pair(key, s),
                    other => query.append_pair(key, &other.to_string()),
                };
            }
            query.append_pair(VERSION_PARAM, &version.to_string());
        }

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::PROTOCOL_VERSION;

    #[test]
    fn test_url_appends_transport_and_version() {
        let url = Endpoint::new("ws://localhost:4000/socket")
            .to_url(PROTOCOL_VERSION)
            .unwrap();
        assert_eq!(url.as_str(), "ws://localhost:4000/socket/websocket?vsn=2.0.0");
    }

    #[test]
    fn test_url_keeps_existing_transport_segment() {
        let url = Endpoint::new("wss://example.com/socket/websocket")
            .with_param("token", "abc")
            .with_param("user_id", 7)
            .to_url(PROTOCOL_VERSION)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://example.com/socket/websocket?token=abc&user_id=7&vsn=2.0.0"
        );
    }

    #[test]
    fn test_invalid_endpoints() {
        assert!(matches!(
            Endpoint::new("not a url").to_url(PROTOCOL_VERSION),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            Endpoint::new("http://example.com/socket").to_url(PROTOCOL_VERSION),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }
}
