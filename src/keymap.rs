//! Request-key-rewrite middleware.
//!
//! Callers of the gateway authenticate with locally minted `sk-` keys.  Before a
//! request reaches the gateway's handlers, [`ApiKeyRewriteLayer`] swaps the key
//! in `Authorization: Bearer ...` for the upstream token it is linked to.
//! Mapping files are re-read on every lookup so keys minted by the CLI take
//! effect without a restart.  Any failure leaves the request untouched.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::{AUTHORIZATION, HeaderValue};
use http::Request;
use tower::{Layer, Service};

use crate::error::Result;
use crate::observability::{KEYMAP_HITS, KEYMAP_LOAD_ERRORS, KEYMAP_LOOKUPS, KEYMAP_MISSES};
use crate::store::{API_KEY_PREFIX, ApiKeySet, TokenSet};

/// Characters of a key that may appear in logs.
const LOGGED_PREFIX_LEN: usize = 15;

/// Outcome of mapping one credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyMapping {
    /// The key is known and its token resolved.
    Mapped {
        /// Name of the API key entry.
        key_name: String,
        /// The upstream token to forward instead.
        token: String,
    },
    /// An `sk-` key that does not resolve to a token.
    Unmapped,
    /// Not an `sk-` key; never looked up.
    NotApiKey,
}

fn key_prefix(key: &str) -> String {
    key.chars().take(LOGGED_PREFIX_LEN).collect()
}

// ============================================================================
// Mapper
// ============================================================================

/// Resolves API keys against `apikeys.json` and `tokens.json`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiKeyMapper {
    apikeys_path: PathBuf,
    tokens_path: PathBuf,
}

impl Default for ApiKeyMapper {
    fn default() -> Self {
        Self::new("auth/apikeys.json", "auth/tokens.json")
    }
}

impl ApiKeyMapper {
    /// Create a mapper over the given files.
    pub fn new(apikeys_path: impl Into<PathBuf>, tokens_path: impl Into<PathBuf>) -> Self {
        Self {
            apikeys_path: apikeys_path.into(),
            tokens_path: tokens_path.into(),
        }
    }

    /// Maps a bearer credential to the token it stands for.
    pub async fn map(&self, credential: &str) -> KeyMapping {
        if !credential.starts_with(API_KEY_PREFIX) {
            return KeyMapping::NotApiKey;
        }
        KEYMAP_LOOKUPS.click();
        let prefix = key_prefix(credential);

        let (apikeys, tokens) = match self.load().await {
            Ok(loaded) => loaded,
            Err(err) => {
                KEYMAP_LOAD_ERRORS.click();
                tracing::error!(key_prefix = %prefix, error = %err, "could not load key mappings");
                return KeyMapping::Unmapped;
            }
        };
        tracing::debug!(
            key_prefix = %prefix,
            apikeys = apikeys.len(),
            tokens = tokens.len(),
            "checking API key"
        );

        let Some((key_name, record)) = apikeys.find_by_key(credential) else {
            KEYMAP_MISSES.click();
            tracing::warn!(key_prefix = %prefix, "API key not found in mapping");
            return KeyMapping::Unmapped;
        };
        match tokens.resolve(&record.token_name) {
            Some(token) => {
                KEYMAP_HITS.click();
                tracing::info!(key_name, token_name = %record.token_name, "mapped API key");
                KeyMapping::Mapped {
                    key_name: key_name.to_string(),
                    token: token.to_string(),
                }
            }
            None => {
                KEYMAP_MISSES.click();
                tracing::warn!(key_name, token_name = %record.token_name, "API key links to no token");
                KeyMapping::Unmapped
            }
        }
    }

    /// Rewrites the `Authorization` header of `request` in place when it carries
    /// a mapped API key.  Returns whether the header changed.
    pub async fn rewrite_request<B>(&self, request: &mut Request<B>) -> bool {
        let Some(credential) = bearer_credential(request) else {
            return false;
        };
        let KeyMapping::Mapped { token, .. } = self.map(&credential).await else {
            return false;
        };
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
                true
            }
            Err(_) => {
                tracing::warn!(key_prefix = %key_prefix(&credential), "mapped token is not a valid header value");
                false
            }
        }
    }

    async fn load(&self) -> Result<(ApiKeySet, TokenSet)> {
        let apikeys = match read_optional(&self.apikeys_path).await? {
            Some(json) => ApiKeySet::from_json(&json)?,
            None => ApiKeySet::default(),
        };
        let tokens = match read_optional(&self.tokens_path).await? {
            Some(json) => TokenSet::from_json(&json)?,
            None => TokenSet::default(),
        };
        Ok((apikeys, tokens))
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => Ok(Some(json)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn bearer_credential<B>(request: &Request<B>) -> Option<String> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(String::from)
}

// ============================================================================
// Tower Layer
// ============================================================================

/// Layer that installs [`ApiKeyRewriteService`] around a gateway's routes.
#[derive(Clone, Debug, Default)]
pub struct ApiKeyRewriteLayer {
    mapper: Arc<ApiKeyMapper>,
}

impl ApiKeyRewriteLayer {
    /// Create a new rewrite layer.
    pub fn new(mapper: ApiKeyMapper) -> Self {
        Self {
            mapper: Arc::new(mapper),
        }
    }
}

impl<S> Layer<S> for ApiKeyRewriteLayer {
    type Service = ApiKeyRewriteService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyRewriteService {
            inner,
            mapper: Arc::clone(&self.mapper),
        }
    }
}

// ============================================================================
// Tower Service
// ============================================================================

/// Service wrapper that rewrites mapped API keys before calling `inner`.
#[derive(Clone, Debug)]
pub struct ApiKeyRewriteService<S> {
    inner: S,
    mapper: Arc<ApiKeyMapper>,
}

type BoxFuture<T, E> =
    std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send>>;

impl<S, B> Service<Request<B>> for ApiKeyRewriteService<S>
where
    S: Service<Request<B>> + Send + Clone + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<S::Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let mapper = Arc::clone(&self.mapper);
        // The readied service handles this request; the clone waits for the next.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            mapper.rewrite_request(&mut req).await;
            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::fs;

    use tower::{ServiceBuilder, ServiceExt, service_fn};

    use super::*;

    const KEY: &str = "sk-abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUV";

    fn fixture(apikeys: &str, tokens: &str) -> (tempfile::TempDir, ApiKeyMapper) {
        let dir = tempfile::tempdir().unwrap();
        let apikeys_path = dir.path().join("apikeys.json");
        let tokens_path = dir.path().join("tokens.json");
        fs::write(&apikeys_path, apikeys).unwrap();
        fs::write(&tokens_path, tokens).unwrap();
        (dir, ApiKeyMapper::new(apikeys_path, tokens_path))
    }

    fn apikeys_linking(token_name: &str) -> String {
        serde_json::json!({
            "ci": {"key": KEY, "created": "2025-01-02T03:04:05Z", "token_name": token_name}
        })
        .to_string()
    }

    fn authorized(value: &str) -> Request<()> {
        Request::builder()
            .uri("/v1/chat/completions")
            .header(AUTHORIZATION, value)
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn maps_named_token() {
        let (_dir, mapper) = fixture(&apikeys_linking("work"), r#"{"home": "t-home", "work": "t-work"}"#);
        assert_eq!(
            mapper.map(KEY).await,
            KeyMapping::Mapped {
                key_name: "ci".into(),
                token: "t-work".into()
            }
        );
    }

    #[tokio::test]
    async fn auto_uses_first_token() {
        let (_dir, mapper) = fixture(&apikeys_linking("auto"), r#"{"home": "t-home", "work": "t-work"}"#);
        assert!(matches!(mapper.map(KEY).await, KeyMapping::Mapped { token, .. } if token == "t-home"));
    }

    #[tokio::test]
    async fn missing_link_is_unmapped() {
        let (_dir, mapper) = fixture(&apikeys_linking("gone"), r#"{"home": "t-home"}"#);
        assert_eq!(mapper.map(KEY).await, KeyMapping::Unmapped);
        let (_dir, mapper) = fixture(&apikeys_linking("auto"), "{}");
        assert_eq!(mapper.map(KEY).await, KeyMapping::Unmapped);
    }

    #[tokio::test]
    async fn non_api_key_is_never_looked_up() {
        let mapper = ApiKeyMapper::new("/nonexistent/apikeys.json", "/nonexistent/tokens.json");
        assert_eq!(mapper.map("eyJhbGciOi").await, KeyMapping::NotApiKey);
        assert_eq!(mapper.map("").await, KeyMapping::NotApiKey);
    }

    #[tokio::test]
    async fn corrupt_files_fail_open() {
        let (_dir, mapper) = fixture("{broken", r#"{"home": "t-home"}"#);
        assert_eq!(mapper.map(KEY).await, KeyMapping::Unmapped);
    }

    #[tokio::test]
    async fn missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = ApiKeyMapper::new(dir.path().join("a.json"), dir.path().join("t.json"));
        assert_eq!(mapper.map(KEY).await, KeyMapping::Unmapped);
    }

    #[tokio::test]
    async fn files_are_reread_on_every_lookup() {
        let (dir, mapper) = fixture("{}", r#"{"home": "t-home"}"#);
        assert_eq!(mapper.map(KEY).await, KeyMapping::Unmapped);
        fs::write(dir.path().join("apikeys.json"), apikeys_linking("home")).unwrap();
        assert!(matches!(mapper.map(KEY).await, KeyMapping::Mapped { .. }));
    }

    #[tokio::test]
    async fn rewrite_request_only_touches_mapped_keys() {
        let (_dir, mapper) = fixture(&apikeys_linking("home"), r#"{"home": "t-home"}"#);

        let mut mapped = authorized(&format!("Bearer {KEY}"));
        assert!(mapper.rewrite_request(&mut mapped).await);
        assert_eq!(mapped.headers()[AUTHORIZATION], "Bearer t-home");

        let mut upstream = authorized("Bearer eyJupstream");
        assert!(!mapper.rewrite_request(&mut upstream).await);
        assert_eq!(upstream.headers()[AUTHORIZATION], "Bearer eyJupstream");

        let mut unknown = authorized("Bearer sk-unknown");
        assert!(!mapper.rewrite_request(&mut unknown).await);
        assert_eq!(unknown.headers()[AUTHORIZATION], "Bearer sk-unknown");

        let mut basic = authorized(&format!("Basic {KEY}"));
        assert!(!mapper.rewrite_request(&mut basic).await);

        let mut bare = Request::builder().body(()).unwrap();
        assert!(!mapper.rewrite_request(&mut bare).await);
        assert!(bare.headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn layer_forwards_rewritten_header() {
        let (_dir, mapper) = fixture(&apikeys_linking("home"), r#"{"home": "t-home"}"#);
        let service = ServiceBuilder::new()
            .layer(ApiKeyRewriteLayer::new(mapper))
            .service(service_fn(|req: Request<()>| async move {
                let auth = req
                    .headers()
                    .get(AUTHORIZATION)
                    .map(|v| v.to_str().unwrap().to_string());
                Ok::<_, Infallible>(auth)
            }));

        let seen = service
            .clone()
            .oneshot(authorized(&format!("Bearer {KEY}")))
            .await
            .unwrap();
        assert_eq!(seen.as_deref(), Some("Bearer t-home"));

        let seen = service.oneshot(authorized("Bearer other")).await.unwrap();
        assert_eq!(seen.as_deref(), Some("Bearer other"));
    }
}
