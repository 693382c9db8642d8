//! A cached forwarder for one (network, feature) endpoint.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{HeaderMap, HOST};
use axum::response::Response;
use tracing::debug;

use crate::error::Result;

/// Headers that describe the connection, not the message; they must not be
/// forwarded on either leg.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "transfer-encoding",
    "upgrade",
];

/// Forwards requests for one network feature to its node's host port.
///
/// An instance pins the target origin and the routing prefix to strip, and
/// shares the engine's outbound HTTP client. Instances are built once per
/// (network, feature) and cached; see [`crate::cache::ProxyCache`].
pub struct ReverseProxy {
    origin: String,
    prefix: String,
    client: reqwest::Client,
}

impl ReverseProxy {
    /// Creates a forwarder for `network_id` targeting `scheme://host:port`.
    pub fn new(network_id: &str, scheme: &str, host: &str, port: &str, client: reqwest::Client) -> Self {
        Self {
            origin: format!("{scheme}://{host}:{port}"),
            prefix: format!("/network/{network_id}"),
            client,
        }
    }

    /// The pinned target origin.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Full downstream URL for an incoming request path. The delegator's
    /// `/network/<id>` routing prefix is stripped; the feature segment is
    /// kept because it matches the daemon's own path space (`/api/...`).
    pub fn target_url(&self, path_and_query: &str) -> String {
        let stripped = path_and_query
            .strip_prefix(self.prefix.as_str())
            .filter(|rest| rest.starts_with('/'))
            .unwrap_or(path_and_query);
        format!("{}{}", self.origin, stripped)
    }

    /// Serves one request through the proxy.
    pub async fn forward(&self, req: Request) -> Result<Response> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = self.target_url(path_and_query);
        debug!(url = %url, method = %parts.method, "proxying request");

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(strip_hop_by_hop(&parts.headers))
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await?;

        let mut response = Response::new(Body::empty());
        *response.status_mut() = upstream.status();
        *response.headers_mut() = strip_hop_by_hop(upstream.headers());
        *response.body_mut() = Body::from_stream(upstream.bytes_stream());
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in HOP_BY_HOP {
        filtered.remove(name);
    }
    // The client sets the host for the new target.
    filtered.remove(HOST);
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn proxy() -> ReverseProxy {
        ReverseProxy::new("foo", "http", "127.0.0.1", "5055", reqwest::Client::new())
    }

    #[test]
    fn test_target_url_strips_routing_prefix() {
        assert_eq!(
            proxy().target_url("/network/foo/api/v0/id"),
            "http://127.0.0.1:5055/api/v0/id"
        );
    }

    #[test]
    fn test_target_url_keeps_query() {
        assert_eq!(
            proxy().target_url("/network/foo/api/v0/cat?arg=QmHash"),
            "http://127.0.0.1:5055/api/v0/cat?arg=QmHash"
        );
    }

    #[test]
    fn test_target_url_other_network_untouched() {
        // A proxy never sees another network's requests, but prefix
        // stripping must not mangle them either.
        assert_eq!(
            proxy().target_url("/network/football/api/v0/id"),
            "http://127.0.0.1:5055/network/football/api/v0/id"
        );
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert(HOST, HeaderValue::from_static("delegator.example.com"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        let filtered = strip_hop_by_hop(&headers);
        assert!(filtered.get("connection").is_none());
        assert!(filtered.get("transfer-encoding").is_none());
        assert!(filtered.get(HOST).is_none());
        assert_eq!(
            filtered.get("x-request-id"),
            Some(&HeaderValue::from_static("abc"))
        );
    }
}
