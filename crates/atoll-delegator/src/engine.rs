//! The delegator HTTP engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{any, get};
use axum::{Json, Router};
use jsonwebtoken::DecodingKey;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};

use atoll_registry::NodeRegistry;

use crate::auth::{self, AccessChecker};
use crate::cache::ProxyCache;
use crate::error::{EngineError, Result};
use crate::proxy::ReverseProxy;

/// How long in-flight requests get to drain after shutdown is requested.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(3);

/// Listener configuration for [`Engine::run`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Interface to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// Per-request deadline.
    pub timeout: Duration,
}

/// Request delegation engine.
///
/// Cheap to clone; all state is shared. One engine owns one proxy cache and
/// its sweeper.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<NodeRegistry>,
    cache: ProxyCache,
    http: reqwest::Client,
    checker: Option<Arc<dyn AccessChecker>>,
    decoding_key: Option<Arc<DecodingKey>>,
    version: String,
    private_host: String,
}

impl Engine {
    /// Creates an engine over a registry. Without an access checker every
    /// registered network is reachable (single-tenant mode).
    pub fn new(registry: Arc<NodeRegistry>, version: impl Into<String>, private_host: impl Into<String>) -> Self {
        Self {
            registry,
            cache: ProxyCache::default(),
            http: reqwest::Client::new(),
            checker: None,
            decoding_key: None,
            version: version.into(),
            private_host: private_host.into(),
        }
    }

    /// Enables per-network authorization: requests must carry a bearer JWT
    /// whose `id` claim passes the checker.
    pub fn with_access_checker(mut self, checker: Arc<dyn AccessChecker>, key: DecodingKey) -> Self {
        self.checker = Some(checker);
        self.decoding_key = Some(Arc::new(key));
        self
    }

    /// Overrides the proxy cache (TTL and sweep interval).
    pub fn with_proxy_cache(mut self, cache: ProxyCache) -> Self {
        self.cache = cache;
        self
    }

    /// Builds the router with the full middleware stack.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/status", get(status))
            .route("/network/:network/status", get(network_status))
            .route("/network/:network/:feature", any(delegate))
            .route("/network/:network/:feature/*rest", any(delegate))
            .with_state(self.clone())
            .layer(CatchPanicLayer::new())
            .layer(
                TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                    info_span!(
                        "request",
                        method = %req.method(),
                        uri = %req.uri(),
                        request_id = request_id(req.headers()),
                        client_ip = real_ip(req.headers()),
                    )
                }),
            )
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(CorsLayer::permissive())
    }

    /// Serves requests until the token is cancelled, then drains in-flight
    /// work for a bounded window. Shutdown is one-shot.
    pub async fn run(&self, opts: ServerOptions, token: CancellationToken) -> std::io::Result<()> {
        let engine_token = token.child_token();
        let sweeper = self.cache.spawn_sweeper(engine_token.clone());

        let router = self.router().layer(TimeoutLayer::new(opts.timeout));
        let addr = format!("{}:{}", opts.host, opts.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, version = %self.version, "delegator listening");

        let shutdown = token.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        let result = tokio::select! {
            joined = &mut server => flatten_join(joined),
            _ = token.cancelled() => {
                match tokio::time::timeout(SHUTDOWN_DRAIN, &mut server).await {
                    Ok(joined) => flatten_join(joined),
                    Err(_) => {
                        warn!("drain window elapsed, aborting in-flight requests");
                        server.abort();
                        Ok(())
                    }
                }
            }
        };

        engine_token.cancel();
        let _ = sweeper.await;
        result
    }
}

fn flatten_join(joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>) -> std::io::Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}

fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

/// Best-effort client address, honoring the usual proxy headers.
fn real_ip(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .unwrap_or("-")
}

async fn status(State(engine): State<Engine>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "online",
        "version": engine.version,
    }))
}

async fn network_status(
    State(engine): State<Engine>,
    Path(network): Path<String>,
) -> Result<Json<serde_json::Value>> {
    engine
        .registry
        .get(&network)
        .await
        .map_err(|_| EngineError::NetworkNotFound(network))?;
    Ok(Json(json!({"status": "registered"})))
}

async fn delegate(
    State(engine): State<Engine>,
    Path(params): Path<HashMap<String, String>>,
    req: Request,
) -> Result<Response> {
    let network = params.get("network").cloned().unwrap_or_default();
    let feature = params.get("feature").cloned().unwrap_or_default();

    // Unknown networks 404 before any proxy work happens.
    let node = engine
        .registry
        .get(&network)
        .await
        .map_err(|_| EngineError::NetworkNotFound(network.clone()))?;

    if let (Some(checker), Some(key)) = (&engine.checker, &engine.decoding_key) {
        let user = auth::user_from_jwt(req.headers(), key)?;
        match checker
            .check_if_user_has_access_to_network(&user, &network)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(EngineError::Forbidden(network)),
            Err(e) => {
                warn!(user = %user, network = %network, error = %e, "access check failed");
                return Err(EngineError::InvalidAuth);
            }
        }
    }

    let port = match feature.as_str() {
        "api" => &node.ports.api,
        "swarm" => &node.ports.swarm,
        _ => return Err(EngineError::UnknownFeature(feature)),
    };

    let scheme = req.uri().scheme_str().unwrap_or("http");
    let key = ProxyCache::key(&network, &feature);
    let proxy = match engine.cache.get(&key).await {
        Some(proxy) => proxy,
        None => {
            let proxy = Arc::new(ReverseProxy::new(
                &network,
                scheme,
                &engine.private_host,
                port,
                engine.http.clone(),
            ));
            engine.cache.put(key, Arc::clone(&proxy)).await;
            proxy
        }
    };

    proxy.forward(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::mock::MockAccessChecker;
    use atoll_registry::{NodeInfo, NodePorts, PortAllocations, PortRange};
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest, StatusCode};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tower::ServiceExt;

    const SECRET: &[u8] = b"engine-test-secret";

    fn allocations() -> PortAllocations {
        PortAllocations {
            swarm: PortRange::new(4001, 4010),
            api: PortRange::new(5050, 5060),
            gateway: PortRange::new(8080, 8090),
        }
    }

    fn seeded_registry() -> Arc<NodeRegistry> {
        let node = NodeInfo {
            network_id: "foo".to_string(),
            ports: NodePorts {
                swarm: "4001".to_string(),
                api: "5055".to_string(),
                gateway: "8080".to_string(),
            },
            ..NodeInfo::default()
        };
        Arc::new(NodeRegistry::new(allocations(), vec![node]))
    }

    fn engine() -> Engine {
        Engine::new(seeded_registry(), "test", "127.0.0.1")
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn bearer(claims: serde_json::Value) -> String {
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn test_status() {
        let response = engine()
            .router()
            .oneshot(HttpRequest::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("online"));
        assert!(body.contains("test"));
    }

    #[tokio::test]
    async fn test_network_status_registered() {
        let response = engine()
            .router()
            .oneshot(
                HttpRequest::get("/network/foo/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("registered"));
    }

    #[tokio::test]
    async fn test_network_status_unknown() {
        let response = engine()
            .router()
            .oneshot(
                HttpRequest::get("/network/ghost/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_string(response).await.contains("not found"));
    }

    #[tokio::test]
    async fn test_delegate_unknown_network() {
        let response = engine()
            .router()
            .oneshot(
                HttpRequest::get("/network/ghost/api/v0/id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delegate_unknown_feature() {
        let response = engine()
            .router()
            .oneshot(
                HttpRequest::get("/network/foo/gateway/ipfs/QmHash")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("invalid feature"));
    }

    #[tokio::test]
    async fn test_delegate_builds_and_reuses_cached_proxy() {
        let engine = engine();
        let router = engine.router();

        // The node endpoint is not live; the proxy leg fails with 502, but
        // the forwarder is built, cached, and pinned to the right target.
        let response = router
            .clone()
            .oneshot(
                HttpRequest::get("/network/foo/api/v0/id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let first = engine.cache.get("foo-api").await.unwrap();
        assert_eq!(
            first.target_url("/network/foo/api/v0/id"),
            "http://127.0.0.1:5055/api/v0/id"
        );

        let _ = router
            .oneshot(
                HttpRequest::get("/network/foo/api/v0/id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let second = engine.cache.get("foo-api").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_delegate_denied_by_checker() {
        let checker = Arc::new(MockAccessChecker::returning(false));
        let engine = engine().with_access_checker(
            Arc::clone(&checker) as Arc<dyn AccessChecker>,
            DecodingKey::from_secret(SECRET),
        );

        let response = engine
            .router()
            .oneshot(
                HttpRequest::get("/network/foo/api/v0/id")
                    .header(header::AUTHORIZATION, bearer(serde_json::json!({"id": "u1", "exp": 4_102_444_800u64})))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            checker.calls.lock().unwrap().as_slice(),
            &[("u1".to_string(), "foo".to_string())]
        );
    }

    #[tokio::test]
    async fn test_delegate_without_token_when_checker_configured() {
        let engine = engine().with_access_checker(
            Arc::new(MockAccessChecker::returning(true)),
            DecodingKey::from_secret(SECRET),
        );

        let response = engine
            .router()
            .oneshot(
                HttpRequest::get("/network/foo/api/v0/id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(response).await.contains("no authentication"));
    }

    #[tokio::test]
    async fn test_delegate_checker_error_is_unauthorized() {
        let engine = engine().with_access_checker(
            Arc::new(MockAccessChecker::failing()),
            DecodingKey::from_secret(SECRET),
        );

        let response = engine
            .router()
            .oneshot(
                HttpRequest::get("/network/foo/api/v0/id")
                    .header(header::AUTHORIZATION, bearer(serde_json::json!({"id": "u1", "exp": 4_102_444_800u64})))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_real_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(real_ip(&headers), "-");

        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(real_ip(&headers), "10.0.0.9");

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(real_ip(&headers), "203.0.113.7");
    }
}
