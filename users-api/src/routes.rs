//! HTTP surface of the users service.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use idempotency::{idempotency_guard, SharedEngine};

use crate::error::ApiError;
use crate::repository::UserRepository;
use crate::users::{CreateUserRequest, PatchUserRequest, UpdateUserRequest, User};

pub type SharedRepository = Arc<dyn UserRepository>;

/// Full router. Every `/users` route sits behind the idempotency guard,
/// which only intercepts POST and PATCH.
pub fn router(repo: SharedRepository, engine: SharedEngine) -> Router {
    let users = Router::new()
        .route("/users", get(list_users).post(create_user).put(update_user))
        .route("/users/:id", get(get_user).patch(patch_user).delete(delete_user))
        .route_layer(middleware::from_fn_with_state(engine, idempotency_guard))
        .with_state(repo);

    Router::new()
        .route("/health", get(health))
        .merge(users)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_users(State(repo): State<SharedRepository>) -> Json<Vec<User>> {
    Json(repo.list().await)
}

async fn get_user(State(repo): State<SharedRepository>, Path(id): Path<u64>) -> Result<Json<User>, ApiError> {
    repo.get(id).await.map(Json).ok_or(ApiError::NotFound)
}

async fn create_user(
    State(repo): State<SharedRepository>,
    Json(request): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;
    let user = repo.create(request).await;
    info!(user_id = user.id, "User created");

    let location = format!("/users/{}", user.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(user)))
}

async fn update_user(
    State(repo): State<SharedRepository>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    request.validate()?;
    repo.update(request).await.map(Json).ok_or(ApiError::NotFound)
}

async fn patch_user(
    State(repo): State<SharedRepository>,
    Path(id): Path<u64>,
    Json(request): Json<PatchUserRequest>,
) -> Result<Json<User>, ApiError> {
    request.validate()?;
    if request.is_empty() {
        return Err(ApiError::Validation("no fields to update".to_string()));
    }
    repo.patch(id, request).await.map(Json).ok_or(ApiError::NotFound)
}

async fn delete_user(State(repo): State<SharedRepository>, Path(id): Path<u64>) -> Result<StatusCode, ApiError> {
    if repo.delete(id).await {
        info!(user_id = id, "User deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryUserRepository;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use idempotency::{IdempotencyEngine, MemoryAttemptStore, IDEMPOTENCY_KEY_HEADER};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app() -> Router {
        let engine = Arc::new(IdempotencyEngine::new(Arc::new(MemoryAttemptStore::default())));
        router(Arc::new(InMemoryUserRepository::new()), engine)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        key: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, json)
    }

    fn key() -> String {
        Uuid::new_v4().to_string()
    }

    #[tokio::test]
    async fn health_is_unguarded() {
        let (status, _, body) = call(&app(), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn create_then_fetch() {
        let app = app();
        let (status, headers, user) = call(
            &app,
            Method::POST,
            "/users",
            Some(&key()),
            Some(json!({"name": "Alice", "email": "alice@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers[header::LOCATION], "/users/1");
        assert_eq!(user["name"], "Alice");

        let (status, _, fetched) = call(&app, Method::GET, "/users/1", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, user);
    }

    #[tokio::test]
    async fn duplicate_create_does_not_insert_twice() {
        let app = app();
        let key = key();
        let payload = json!({"name": "Alice", "email": "alice@example.com"});

        let (first, _, _) = call(&app, Method::POST, "/users", Some(&key), Some(payload.clone())).await;
        assert_eq!(first, StatusCode::CREATED);
        let (second, _, message) = call(&app, Method::POST, "/users", Some(&key), Some(payload)).await;
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(message, "This request has already been processed.");

        let (status, _, bob) = call(
            &app,
            Method::POST,
            "/users",
            Some(&key),
            Some(json!({"name": "Bob", "email": "bob@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(bob.as_str().unwrap().contains("different request payload"));

        let (_, _, users) = call(&app, Method::GET, "/users", None, None).await;
        assert_eq!(users.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_requires_key() {
        let (status, _, message) = call(
            &app(),
            Method::POST,
            "/users",
            None,
            Some(json!({"name": "Alice", "email": "alice@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "Idempotency-Key header is required.");
    }

    #[tokio::test]
    async fn invalid_create_is_rejected() {
        let (status, _, message) = call(
            &app(),
            Method::POST,
            "/users",
            Some(&key()),
            Some(json!({"name": "", "email": "alice@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "name is required");
    }

    #[tokio::test]
    async fn put_is_not_guarded() {
        let app = app();
        call(
            &app,
            Method::POST,
            "/users",
            Some(&key()),
            Some(json!({"name": "Alice", "email": "alice@example.com"})),
        )
        .await;

        let update = json!({"id": 1, "name": "Alicia", "email": "alicia@example.com"});
        for _ in 0..2 {
            let (status, _, user) = call(&app, Method::PUT, "/users", None, Some(update.clone())).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(user["name"], "Alicia");
        }

        let missing = json!({"id": 99, "name": "Nobody", "email": "n@example.com"});
        let (status, _, _) = call(&app, Method::PUT, "/users", None, Some(missing)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_is_guarded() {
        let app = app();
        call(
            &app,
            Method::POST,
            "/users",
            Some(&key()),
            Some(json!({"name": "Alice", "email": "alice@example.com"})),
        )
        .await;

        let key = key();
        let change = json!({"email": "a@example.org"});
        let (status, _, user) = call(&app, Method::PATCH, "/users/1", Some(&key), Some(change.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["email"], "a@example.org");

        let (status, _, _) = call(&app, Method::PATCH, "/users/1", Some(&key), Some(change)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_user_and_delete() {
        let app = app();
        let (status, _, message) = call(&app, Method::GET, "/users/5", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(message, "user not found");

        call(
            &app,
            Method::POST,
            "/users",
            Some(&key()),
            Some(json!({"name": "Alice", "email": "alice@example.com"})),
        )
        .await;
        let (status, _, _) = call(&app, Method::DELETE, "/users/1", None, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _, _) = call(&app, Method::DELETE, "/users/1", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
