// Common test utilities

use axum::{
    body::{Body, Bytes},
    http::{Method, Request, StatusCode},
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use idempotency::{idempotency_guard, AttemptStore, IdempotencyEngine, SharedEngine, IDEMPOTENCY_KEY_HEADER};

/// Counts how many requests actually reached a handler.
#[derive(Clone, Default)]
pub struct HandlerHits(Arc<AtomicUsize>);

impl HandlerHits {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn engine_over(store: Arc<dyn AttemptStore>) -> SharedEngine {
    Arc::new(IdempotencyEngine::new(store))
}

/// Router with echo handlers behind the idempotency guard.
///
/// Handlers return the body they received so tests can check it arrives intact.
pub fn guarded_router(engine: SharedEngine, hits: HandlerHits) -> Router {
    let create_hits = hits.clone();
    let patch_hits = hits.clone();
    let list_hits = hits;

    Router::new()
        .route(
            "/users",
            post(move |body: Bytes| async move {
                create_hits.0.fetch_add(1, Ordering::SeqCst);
                (StatusCode::CREATED, body)
            })
            .get(move || async move {
                list_hits.0.fetch_add(1, Ordering::SeqCst);
                "[]"
            }),
        )
        .route(
            "/users/:id",
            patch(move |body: Bytes| async move {
                patch_hits.0.fetch_add(1, Ordering::SeqCst);
                (StatusCode::OK, body)
            }),
        )
        .route("/health", get(|| async { "ok" }))
        .route_layer(middleware::from_fn_with_state(engine, idempotency_guard))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: String,
}

pub async fn send(app: &Router, method: Method, uri: &str, key: Option<&str>, body: &str) -> TestResponse {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}
