//! Decision engine: turns a request into proceed / reject.

use axum::http::{HeaderMap, Method};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::IdempotencyError;
use crate::fingerprint::fingerprint_body;
use crate::key::{key_from_headers, KeyError};
use crate::record::{AttemptRecord, Outcome};
use crate::store::AttemptStore;

/// Default ceiling on a single store round trip
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// What to do with a request when the attempt store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    /// Reject the request (503).
    #[default]
    Closed,
    /// Let the request through unchecked.
    Open,
}

/// Engine verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    ProceedToHandler,
    RejectClientError(KeyError),
    RejectDuplicate(AttemptRecord),
    RejectKeyReuse(AttemptRecord),
}

impl Decision {
    /// The error to answer with, or `None` if the handler should run.
    pub fn rejection(&self) -> Option<IdempotencyError> {
        match self {
            Decision::ProceedToHandler => None,
            Decision::RejectClientError(reason) => Some((*reason).into()),
            Decision::RejectDuplicate(_) => Some(IdempotencyError::DuplicateRequest),
            Decision::RejectKeyReuse(_) => Some(IdempotencyError::KeyReuse),
        }
    }
}

/// Shared engine handle for request handlers
pub type SharedEngine = Arc<IdempotencyEngine>;

pub struct IdempotencyEngine {
    store: Arc<dyn AttemptStore>,
    store_timeout: Duration,
    fail_mode: FailMode,
}

impl IdempotencyEngine {
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self {
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            fail_mode: FailMode::default(),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    /// Only POST and PATCH are checked.
    pub fn is_guarded(method: &Method) -> bool {
        matches!(*method, Method::POST | Method::PATCH)
    }

    /// Decide whether a request may reach its handler.
    ///
    /// Non-guarded methods return `ProceedToHandler` without touching the
    /// store, as do key errors (which are answered before any lookup).
    /// `Err` only comes back for store failures under [`FailMode::Closed`].
    pub async fn evaluate(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Decision, IdempotencyError> {
        if !Self::is_guarded(method) {
            return Ok(Decision::ProceedToHandler);
        }

        let key = match key_from_headers(headers) {
            Ok(key) => key,
            Err(reason) => {
                debug!(method = %method, path, ?reason, "Rejected request with invalid Idempotency-Key");
                return Ok(Decision::RejectClientError(reason));
            }
        };

        let fingerprint = fingerprint_body(body);

        let admitted = tokio::time::timeout(self.store_timeout, self.store.try_admit(key, &fingerprint, path))
            .await
            .unwrap_or_else(|_| {
                Err(IdempotencyError::StoreUnavailable(format!(
                    "{} store did not answer within {:?}",
                    self.store.backend(),
                    self.store_timeout
                )))
            });

        let outcome = match admitted {
            Ok(outcome) => outcome,
            Err(e) => return self.on_store_failure(e, &key.to_string(), path),
        };

        match outcome {
            Outcome::Admitted => {
                debug!(idempotency_key = %key, endpoint = path, "Idempotency key admitted");
                Ok(Decision::ProceedToHandler)
            }
            Outcome::Duplicate(record) => {
                warn!(
                    idempotency_key = %key,
                    endpoint = record.target_endpoint(),
                    attempt = record.attempt_count(),
                    requested_at = %record.first_seen_at(),
                    "Idempotent request detected"
                );
                Ok(Decision::RejectDuplicate(record))
            }
            Outcome::KeyReuse(record) => {
                warn!(
                    idempotency_key = %key,
                    endpoint = path,
                    original_endpoint = record.target_endpoint(),
                    requested_at = %record.first_seen_at(),
                    "Idempotency key reused with a different request"
                );
                Ok(Decision::RejectKeyReuse(record))
            }
        }
    }

    fn on_store_failure(&self, err: IdempotencyError, key: &str, path: &str) -> Result<Decision, IdempotencyError> {
        match self.fail_mode {
            FailMode::Open => {
                warn!(
                    idempotency_key = key,
                    endpoint = path,
                    store = self.store.backend(),
                    error = ?err,
                    "Attempt store failed, letting request through unchecked"
                );
                Ok(Decision::ProceedToHandler)
            }
            FailMode::Closed => {
                error!(
                    idempotency_key = key,
                    endpoint = path,
                    store = self.store.backend(),
                    error = ?err,
                    "Attempt store failed, rejecting request"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::key::{IdempotencyKey, IDEMPOTENCY_KEY_HEADER};
    use crate::store::MemoryAttemptStore;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and answers with a fixed result.
    struct ScriptedStore {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl ScriptedStore {
        fn new(fail: bool, delay: Option<Duration>) -> Self {
            Self { calls: AtomicUsize::new(0), fail, delay }
        }
    }

    #[async_trait]
    impl AttemptStore for ScriptedStore {
        async fn try_admit(&self, _: IdempotencyKey, _: &Fingerprint, _: &str) -> Result<Outcome, IdempotencyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                Err(IdempotencyError::StoreUnavailable("connection refused".into()))
            } else {
                Ok(Outcome::Admitted)
            }
        }

        fn backend(&self) -> &'static str {
            "scripted"
        }
    }

    fn headers_with(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        headers
    }

    const KEY: &str = "3f2b8c1e-5d4a-4e6b-9c7d-1a2b3c4d5e6f";

    #[tokio::test]
    async fn test_scenario_alice_alice_bob() {
        let engine = IdempotencyEngine::new(Arc::new(MemoryAttemptStore::default()));
        let headers = headers_with(KEY);

        let first = engine.evaluate(&Method::POST, "/users", &headers, br#"{"name":"Alice"}"#).await.unwrap();
        assert_eq!(first, Decision::ProceedToHandler);

        match engine.evaluate(&Method::POST, "/users", &headers, br#"{"name":"Alice"}"#).await.unwrap() {
            Decision::RejectDuplicate(record) => assert_eq!(record.attempt_count(), 2),
            other => panic!("expected duplicate, got {:?}", other),
        }

        let third = engine.evaluate(&Method::POST, "/users", &headers, br#"{"name":"Bob"}"#).await.unwrap();
        assert!(matches!(third, Decision::RejectKeyReuse(_)));
        assert!(matches!(third.rejection(), Some(IdempotencyError::KeyReuse)));
    }

    mod capture {
        use std::collections::HashMap;
        use std::fmt;
        use std::sync::{Arc, Mutex};
        use tracing::field::{Field, Visit};
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::layer::{Context, Layer};

        #[derive(Debug)]
        pub struct CapturedEvent {
            pub level: Level,
            pub fields: HashMap<String, String>,
        }

        /// Layer that keeps every event's fields as strings.
        #[derive(Clone, Default)]
        pub struct EventCapture(pub Arc<Mutex<Vec<CapturedEvent>>>);

        struct FieldMap<'a>(&'a mut HashMap<String, String>);

        impl Visit for FieldMap<'_> {
            fn record_str(&mut self, field: &Field, value: &str) {
                self.0.insert(field.name().to_string(), value.to_string());
            }

            fn record_u64(&mut self, field: &Field, value: u64) {
                self.0.insert(field.name().to_string(), value.to_string());
            }

            fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
                self.0.insert(field.name().to_string(), format!("{:?}", value));
            }
        }

        impl<S: Subscriber> Layer<S> for EventCapture {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                let mut fields = HashMap::new();
                event.record(&mut FieldMap(&mut fields));
                self.0.lock().unwrap().push(CapturedEvent {
                    level: *event.metadata().level(),
                    fields,
                });
            }
        }
    }

    #[tokio::test]
    async fn test_duplicate_emits_structured_warning() {
        use tracing_subscriber::layer::SubscriberExt;

        let capture = capture::EventCapture::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture.clone()));

        let store = Arc::new(MemoryAttemptStore::default());
        let engine = IdempotencyEngine::new(store.clone());
        let headers = headers_with(KEY);
        let body = br#"{"name":"Alice"}"#;

        engine.evaluate(&Method::POST, "/users", &headers, body).await.unwrap();
        engine.evaluate(&Method::POST, "/users", &headers, body).await.unwrap();

        let key: IdempotencyKey = uuid::Uuid::parse_str(KEY).unwrap().into();
        let first_seen = store.get(&key).unwrap().first_seen_at();

        let events = capture.0.lock().unwrap();
        let warning = events
            .iter()
            .find(|e| e.fields.get("message").map(String::as_str) == Some("Idempotent request detected"))
            .expect("duplicate warning was not emitted");
        assert_eq!(warning.level, tracing::Level::WARN);
        assert_eq!(warning.fields["idempotency_key"], KEY);
        assert_eq!(warning.fields["endpoint"], "/users");
        assert_eq!(warning.fields["attempt"], "2");
        assert_eq!(warning.fields["requested_at"], first_seen.to_string());
    }

    #[tokio::test]
    async fn test_safe_methods_bypass_store() {
        let store = Arc::new(ScriptedStore::new(true, None));
        let engine = IdempotencyEngine::new(store.clone());
        for method in [Method::GET, Method::PUT, Method::DELETE, Method::HEAD, Method::OPTIONS] {
            let decision = engine.evaluate(&method, "/users", &HeaderMap::new(), b"").await.unwrap();
            assert_eq!(decision, Decision::ProceedToHandler);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_key_errors_do_not_touch_store() {
        let store = Arc::new(ScriptedStore::new(false, None));
        let engine = IdempotencyEngine::new(store.clone());

        let missing = engine.evaluate(&Method::POST, "/users", &HeaderMap::new(), b"{}").await.unwrap();
        assert_eq!(missing, Decision::RejectClientError(KeyError::Missing));

        let blank = engine.evaluate(&Method::PATCH, "/users/1", &headers_with("  "), b"{}").await.unwrap();
        assert_eq!(blank, Decision::RejectClientError(KeyError::Missing));

        let malformed = engine.evaluate(&Method::POST, "/users", &headers_with("abc"), b"{}").await.unwrap();
        assert_eq!(malformed, Decision::RejectClientError(KeyError::Malformed));

        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_failure_fail_closed() {
        let engine = IdempotencyEngine::new(Arc::new(ScriptedStore::new(true, None)));
        let result = engine.evaluate(&Method::POST, "/users", &headers_with(KEY), b"{}").await;
        assert!(matches!(result, Err(IdempotencyError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_store_failure_fail_open() {
        let engine = IdempotencyEngine::new(Arc::new(ScriptedStore::new(true, None))).with_fail_mode(FailMode::Open);
        let result = engine.evaluate(&Method::POST, "/users", &headers_with(KEY), b"{}").await;
        assert_eq!(result.unwrap(), Decision::ProceedToHandler);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let engine = IdempotencyEngine::new(Arc::new(ScriptedStore::new(false, Some(Duration::from_secs(5)))))
            .with_store_timeout(Duration::from_millis(50));
        let result = engine.evaluate(&Method::POST, "/users", &headers_with(KEY), b"{}").await;
        assert!(matches!(result, Err(IdempotencyError::StoreUnavailable(_))));
    }

    #[test]
    fn test_guarded_methods() {
        assert!(IdempotencyEngine::is_guarded(&Method::POST));
        assert!(IdempotencyEngine::is_guarded(&Method::PATCH));
        assert!(!IdempotencyEngine::is_guarded(&Method::PUT));
        assert!(!IdempotencyEngine::is_guarded(&Method::GET));
    }
}
