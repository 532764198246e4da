//! Integration Tests for the Gateway Pipeline
//!
//! Drives the full router with a scripted upstream and observable stores.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{self, header, HeaderName, Method, StatusCode},
    response::Response,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use gateway_cache::{
    cache::{CacheStore, InMemoryStore},
    config::{BasicUser, Config, RateLimitSettings},
    error::{CacheError, GatewayError, Result},
    gateway::{Upstream, X_CACHE},
    create_router, AppState,
};
use serde_json::Value;
use tokio::sync::Notify;
use tower::ServiceExt;

// == Test Doubles ==

/// Upstream answering every request with a fixed status and body.
struct ScriptedUpstream {
    status: StatusCode,
    body: &'static str,
    headers: Vec<(HeaderName, &'static str)>,
    calls: AtomicUsize,
    methods: Mutex<Vec<Method>>,
}

impl ScriptedUpstream {
    fn new(status: StatusCode, body: &'static str) -> Arc<Self> {
        Self::with_headers(status, body, &[])
    }

    fn with_headers(
        status: StatusCode,
        body: &'static str,
        headers: &[(HeaderName, &'static str)],
    ) -> Arc<Self> {
        Arc::new(Self {
            status,
            body,
            headers: headers.to_vec(),
            calls: AtomicUsize::new(0),
            methods: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn forward(&self, request: Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.methods.lock().unwrap().push(request.method().clone());
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        for (name, value) in &self.headers {
            response
                .headers_mut()
                .append(name.clone(), value.parse().unwrap());
        }
        Ok(response)
    }
}

/// Upstream that cannot be reached.
#[derive(Default)]
struct RefusingUpstream {
    calls: AtomicUsize,
}

#[async_trait]
impl Upstream for RefusingUpstream {
    async fn forward(&self, _request: Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GatewayError::Upstream("connection refused".into()))
    }
}

/// In-memory store that records what the pipeline asks of it.
struct RecordingStore {
    inner: InMemoryStore,
    gets: AtomicUsize,
    put_ttls: Mutex<Vec<Duration>>,
}

impl RecordingStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(100),
            gets: AtomicUsize::new(0),
            put_ttls: Mutex::new(Vec::new()),
        })
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn puts(&self) -> Vec<Duration> {
        self.put_ttls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<Bytes>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: String,
        value: Bytes,
        ttl: Duration,
    ) -> std::result::Result<(), CacheError> {
        self.put_ttls.lock().unwrap().push(ttl);
        self.inner.put(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> std::result::Result<bool, CacheError> {
        self.inner.delete(key).await
    }

    async fn delete_resource(&self, resource: &str) -> std::result::Result<usize, CacheError> {
        self.inner.delete_resource(resource).await
    }
}

/// In-memory store whose writes wait until the test releases them.
struct HeldWriteStore {
    inner: InMemoryStore,
    write_started: Notify,
    release: Notify,
}

#[async_trait]
impl CacheStore for HeldWriteStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<Bytes>, CacheError> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: String,
        value: Bytes,
        ttl: Duration,
    ) -> std::result::Result<(), CacheError> {
        self.write_started.notify_one();
        self.release.notified().await;
        self.inner.put(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> std::result::Result<bool, CacheError> {
        self.inner.delete(key).await
    }

    async fn delete_resource(&self, resource: &str) -> std::result::Result<usize, CacheError> {
        self.inner.delete_resource(resource).await
    }
}

/// Store whose backend is unreachable.
struct UnreachableStore;

#[async_trait]
impl CacheStore for UnreachableStore {
    async fn get(&self, _key: &str) -> std::result::Result<Option<Bytes>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn put(
        &self,
        _key: String,
        _value: Bytes,
        _ttl: Duration,
    ) -> std::result::Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> std::result::Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn delete_resource(&self, _resource: &str) -> std::result::Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

// == Helper Functions ==

fn test_config() -> Config {
    Config {
        users: vec![
            BasicUser {
                username: "alice".into(),
                password: "secret".into(),
            },
            BasicUser {
                username: "bob".into(),
                password: "hunter2".into(),
            },
        ],
        ..Config::default()
    }
}

fn create_test_app(
    config: &Config,
    store: Arc<dyn CacheStore>,
    upstream: Arc<ScriptedUpstream>,
) -> Router {
    create_router(AppState::from_config(config, store, upstream))
}

fn request_as(method: Method, uri: &str, user: &str, password: &str) -> Request {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))),
        )
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request {
    request_as(Method::GET, uri, "alice", "secret")
}

fn post(uri: &str) -> Request {
    request_as(Method::POST, uri, "alice", "secret")
}

fn from_peer(mut request: Request, addr: &str) -> Request {
    request
        .extensions_mut()
        .insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
    request
}

async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_to_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// == Read Path Tests ==

#[tokio::test]
async fn test_miss_forwards_once_and_stores_with_ttl() {
    let store = RecordingStore::new();
    let upstream = ScriptedUpstream::new(StatusCode::OK, r#"[{"id":1}]"#);
    let app = create_test_app(&test_config(), store.clone(), upstream.clone());

    let response = tokio_test::assert_ok!(app.oneshot(get("/api/products")).await);

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[X_CACHE], "MISS");
    assert_eq!(upstream.calls(), 1);
    assert_eq!(store.puts(), vec![Duration::from_secs(300)]);
    assert_eq!(&body_bytes(response).await[..], br#"[{"id":1}]"#);
}

#[tokio::test]
async fn test_hit_skips_upstream() {
    let store = RecordingStore::new();
    let upstream = ScriptedUpstream::new(StatusCode::OK, r#"[{"id":1}]"#);
    let app = create_test_app(&test_config(), store.clone(), upstream.clone());

    app.clone().oneshot(get("/api/products")).await.unwrap();
    let response = app.oneshot(get("/api/products")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[X_CACHE], "HIT");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(upstream.calls(), 1);
    assert_eq!(store.puts().len(), 1);
    assert_eq!(&body_bytes(response).await[..], br#"[{"id":1}]"#);
}

#[tokio::test]
async fn test_key_is_shared_across_credentials() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, r#"[{"id":1}]"#);
    let app = create_test_app(&test_config(), RecordingStore::new(), upstream.clone());

    app.clone()
        .oneshot(request_as(Method::GET, "/api/products", "alice", "secret"))
        .await
        .unwrap();
    let response = app
        .oneshot(request_as(Method::GET, "/api/products", "bob", "hunter2"))
        .await
        .unwrap();

    assert_eq!(response.headers()[X_CACHE], "HIT");
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn test_query_variants_are_cached_separately() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, "[]");
    let app = create_test_app(&test_config(), RecordingStore::new(), upstream.clone());

    app.clone().oneshot(get("/api/products?page=1")).await.unwrap();
    let response = app.oneshot(get("/api/products?page=2")).await.unwrap();

    assert_eq!(response.headers()[X_CACHE], "MISS");
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn test_empty_body_is_not_stored() {
    let store = RecordingStore::new();
    let upstream = ScriptedUpstream::new(StatusCode::OK, "");
    let app = create_test_app(&test_config(), store.clone(), upstream.clone());

    let response = app.oneshot(get("/api/products")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(store.puts().is_empty());
}

#[tokio::test]
async fn test_error_responses_are_not_stored() {
    let store = RecordingStore::new();
    let upstream = ScriptedUpstream::new(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"boom"}"#);
    let app = create_test_app(&test_config(), store.clone(), upstream.clone());

    app.clone().oneshot(get("/api/products")).await.unwrap();
    let response = app.oneshot(get("/api/products")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(store.puts().is_empty());
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn test_oversized_body_is_not_stored() {
    let store = RecordingStore::new();
    let upstream = ScriptedUpstream::new(StatusCode::OK, "0123456789");
    let config = Config {
        max_cacheable_bytes: 4,
        ..test_config()
    };
    let app = create_test_app(&config, store.clone(), upstream);

    let response = app.oneshot(get("/api/products")).await.unwrap();

    assert_eq!(&body_bytes(response).await[..], b"0123456789");
    assert!(store.puts().is_empty());
}

#[tokio::test]
async fn test_upstream_failure_is_not_stored() {
    let store = RecordingStore::new();
    let upstream = Arc::new(RefusingUpstream::default());
    let app = create_router(AppState::from_config(&test_config(), store.clone(), upstream.clone()));

    let response = app.clone().oneshot(get("/api/products")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(store.puts().is_empty());

    let retry = app.oneshot(get("/api/products")).await.unwrap();
    assert_eq!(retry.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(retry.headers()[X_CACHE], "MISS");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_write_in_flight_survives_dropped_request() {
    let store = Arc::new(HeldWriteStore {
        inner: InMemoryStore::new(10),
        write_started: Notify::new(),
        release: Notify::new(),
    });
    let upstream = ScriptedUpstream::new(StatusCode::OK, r#"[{"id":1}]"#);
    let app = create_test_app(&test_config(), store.clone(), upstream);

    let request = tokio::spawn(app.oneshot(get("/api/products")));
    store.write_started.notified().await;
    request.abort();
    assert!(request.await.unwrap_err().is_cancelled());

    store.release.notify_one();
    tokio::time::timeout(Duration::from_secs(1), async {
        while store.inner.is_empty().await {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("cache write should complete after the request was dropped");
    assert_eq!(store.inner.len().await, 1);
}

#[tokio::test]
async fn test_zero_ttl_disables_storing() {
    let store = RecordingStore::new();
    let upstream = ScriptedUpstream::new(StatusCode::OK, "[]");
    let config = Config {
        cache_ttl: 0,
        ..test_config()
    };
    let app = create_test_app(&config, store.clone(), upstream.clone());

    app.clone().oneshot(get("/api/products")).await.unwrap();
    let response = app.clone().oneshot(get("/api/products")).await.unwrap();

    assert_eq!(response.headers()[X_CACHE], "MISS");
    assert!(store.puts().is_empty());
    assert_eq!(upstream.calls(), 2);

    let json = body_to_json(app.oneshot(get("/stats")).await.unwrap()).await;
    assert_eq!(json["stores"], 0);
}

// == Shared Cache Safety Tests ==

#[tokio::test]
async fn test_cached_response_does_not_replay_cookies() {
    let upstream = ScriptedUpstream::with_headers(
        StatusCode::OK,
        r#"[{"id":1}]"#,
        &[(header::SET_COOKIE, "session=alice-session")],
    );
    let app = create_test_app(&test_config(), RecordingStore::new(), upstream.clone());

    let for_alice = app
        .clone()
        .oneshot(request_as(Method::GET, "/api/products", "alice", "secret"))
        .await
        .unwrap();
    assert_eq!(for_alice.headers()[header::SET_COOKIE], "session=alice-session");

    let for_bob = app
        .oneshot(request_as(Method::GET, "/api/products", "bob", "hunter2"))
        .await
        .unwrap();
    assert_eq!(for_bob.headers()[X_CACHE], "HIT");
    assert!(for_bob.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn test_private_and_no_store_responses_are_not_stored() {
    for directive in ["private, max-age=60", "no-store"] {
        let store = RecordingStore::new();
        let upstream = ScriptedUpstream::with_headers(
            StatusCode::OK,
            r#"{"owner":"alice"}"#,
            &[(header::CACHE_CONTROL, directive)],
        );
        let app = create_test_app(&test_config(), store.clone(), upstream.clone());

        app.clone().oneshot(get("/api/me")).await.unwrap();
        let response = app.oneshot(get("/api/me")).await.unwrap();

        assert_eq!(response.headers()[X_CACHE], "MISS", "{directive}");
        assert!(store.puts().is_empty(), "{directive}");
        assert_eq!(upstream.calls(), 2, "{directive}");
    }
}

#[tokio::test]
async fn test_binary_header_response_is_not_stored() {
    struct BinaryHeaderUpstream;

    #[async_trait]
    impl Upstream for BinaryHeaderUpstream {
        async fn forward(&self, _request: Request) -> Result<Response> {
            let mut response = Response::new(Body::from("[]"));
            response.headers_mut().insert(
                "x-raw",
                header::HeaderValue::from_bytes(b"caf\xe9").unwrap(),
            );
            Ok(response)
        }
    }

    let store = RecordingStore::new();
    let app = create_router(AppState::from_config(
        &test_config(),
        store.clone(),
        Arc::new(BinaryHeaderUpstream),
    ));

    let response = app.oneshot(get("/api/products")).await.unwrap();

    assert_eq!(response.headers()["x-raw"].as_bytes(), b"caf\xe9");
    assert!(store.puts().is_empty());
}

#[tokio::test]
async fn test_doubled_slash_does_not_alias_outside_path() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, "[]");
    let app = create_test_app(&test_config(), RecordingStore::new(), upstream.clone());

    app.clone().oneshot(get("/api//products")).await.unwrap();
    let outside = app.clone().oneshot(get("/products")).await.unwrap();
    assert_eq!(outside.headers()[X_CACHE], "MISS");

    let same_resource = app.oneshot(get("/api/products")).await.unwrap();
    assert_eq!(same_resource.headers()[X_CACHE], "HIT");
    assert_eq!(upstream.calls(), 2);
}

// == Invalidation Tests ==

#[tokio::test]
async fn test_write_invalidates_then_next_read_misses() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, r#"[{"id":1}]"#);
    let app = create_test_app(&test_config(), RecordingStore::new(), upstream.clone());

    app.clone().oneshot(get("/api/products")).await.unwrap();
    let hit = app.clone().oneshot(get("/api/products")).await.unwrap();
    assert_eq!(hit.headers()[X_CACHE], "HIT");

    let write = app.clone().oneshot(post("/api/products")).await.unwrap();
    assert_eq!(write.status(), StatusCode::OK);
    assert!(write.headers().get(X_CACHE).is_none());

    let response = app.oneshot(get("/api/products")).await.unwrap();
    assert_eq!(response.headers()[X_CACHE], "MISS");
    assert_eq!(
        *upstream.methods.lock().unwrap(),
        vec![Method::GET, Method::POST, Method::GET]
    );
}

#[tokio::test]
async fn test_write_leaves_other_resources_cached() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, "[]");
    let app = create_test_app(&test_config(), RecordingStore::new(), upstream.clone());

    app.clone().oneshot(get("/api/orders")).await.unwrap();
    app.clone().oneshot(post("/api/products")).await.unwrap();
    let response = app.oneshot(get("/api/orders")).await.unwrap();

    assert_eq!(response.headers()[X_CACHE], "HIT");
}

// == Access Gate Tests ==

#[tokio::test]
async fn test_exempt_path_passes_without_credentials() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, r#"{"status":"UP"}"#);
    let app = create_test_app(&test_config(), RecordingStore::new(), upstream.clone());

    let response = app
        .oneshot(
            http::Request::builder()
                .uri("/eureka/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn test_unauthenticated_request_rejected_before_cache() {
    let store = RecordingStore::new();
    let upstream = ScriptedUpstream::new(StatusCode::OK, "[]");
    let app = create_test_app(&test_config(), store.clone(), upstream.clone());

    let response = app
        .clone()
        .oneshot(
            http::Request::builder()
                .uri("/api/products")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    assert_eq!(store.gets(), 0);
    assert!(store.puts().is_empty());
    assert_eq!(upstream.calls(), 0);

    let wrong = app
        .oneshot(request_as(Method::GET, "/api/products", "alice", "nope"))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(upstream.calls(), 0);
}

// == Degraded Store Tests ==

#[tokio::test]
async fn test_store_outage_still_serves_reads() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, r#"[{"id":1}]"#);
    let app = create_test_app(&test_config(), Arc::new(UnreachableStore), upstream.clone());

    let response = app.oneshot(get("/api/products")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[X_CACHE], "BYPASS");
    assert_eq!(upstream.calls(), 1);
    assert_eq!(&body_bytes(response).await[..], br#"[{"id":1}]"#);
}

#[tokio::test]
async fn test_store_outage_still_forwards_writes() {
    let upstream = ScriptedUpstream::new(StatusCode::CREATED, r#"{"id":2}"#);
    let app = create_test_app(&test_config(), Arc::new(UnreachableStore), upstream.clone());

    let response = app.oneshot(post("/api/products")).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(upstream.calls(), 1);
}

// == Rate Limit Tests ==

fn rate_limited_config() -> Config {
    Config {
        rate_limit: Some(RateLimitSettings {
            burst: 1,
            replenish_per_sec: 1,
        }),
        ..test_config()
    }
}

#[tokio::test]
async fn test_rate_limit_rejects_over_budget() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, "[]");
    let app = create_test_app(&rate_limited_config(), RecordingStore::new(), upstream.clone());

    let first = app
        .clone()
        .oneshot(from_peer(get("/api/products"), "198.51.100.4:40000"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(from_peer(get("/api/products"), "198.51.100.4:40001"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let other_client = app
        .oneshot(from_peer(get("/api/products"), "198.51.100.5:40000"))
        .await
        .unwrap();
    assert_eq!(other_client.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_without_peer_address_fails() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, "[]");
    let app = create_test_app(&rate_limited_config(), RecordingStore::new(), upstream.clone());

    let response = app.oneshot(get("/api/products")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(upstream.calls(), 0);
}

// == Admin Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint_counts_pipeline_outcomes() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, "[]");
    let app = create_test_app(&test_config(), RecordingStore::new(), upstream);

    app.clone().oneshot(get("/api/products")).await.unwrap();
    app.clone().oneshot(get("/api/products")).await.unwrap();
    app.clone().oneshot(post("/api/products")).await.unwrap();
    app.clone()
        .oneshot(http::Request::builder().uri("/api/products").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let response = app.oneshot(get("/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response).await;
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["stores"], 1);
    assert_eq!(json["invalidations"], 1);
    assert_eq!(json["rejected"], 1);
    assert_eq!(json["hit_rate"], 0.5);
}

#[tokio::test]
async fn test_health_endpoint() {
    let upstream = ScriptedUpstream::new(StatusCode::OK, "[]");
    let app = create_test_app(&test_config(), RecordingStore::new(), upstream.clone());

    let response = app
        .oneshot(http::Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(upstream.calls(), 0);
}
