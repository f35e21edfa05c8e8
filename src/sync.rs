//! Fire-and-forget replication of credential collections to the gateway.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::DEFAULT_ENDPOINT;
use crate::error::{Error, Result};
use crate::observability::{SYNC_ATTEMPTS, SYNC_FAILURES, SYNC_SKIPPED};
use crate::store::{SyncEvent, SyncHook};
use crate::transport::{HttpReply, Transport};

/// Timeout of a sync post.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Which collection a sync post carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncKind {
    Tokens,
    ApiKeys,
}

impl SyncKind {
    /// Both the URL segment and the body key.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Tokens => "tokens",
            SyncKind::ApiKeys => "apikeys",
        }
    }
}

/// `POST <endpoint>/admin/sync/<kind>` with `{"<kind>": payload, "sync_type": "<kind>"}`.
pub async fn post_sync(
    transport: &dyn Transport,
    endpoint: &str,
    kind: SyncKind,
    payload: Map<String, Value>,
) -> Result<HttpReply> {
    let mut body = Map::new();
    body.insert(kind.as_str().to_string(), Value::Object(payload));
    body.insert("sync_type".to_string(), Value::String(kind.as_str().to_string()));
    let url = format!("{endpoint}/admin/sync/{}", kind.as_str());
    let reply = transport
        .post_json(&url, None, &Value::Object(body), SYNC_TIMEOUT)
        .await?;
    if reply.status == 200 {
        Ok(reply)
    } else {
        Err(Error::from_status(reply.status, &reply.body, reply.retry_after))
    }
}

/// [`SyncHook`] that posts each event on a background tokio task.
///
/// Nothing is sent while the endpoint is still the local default.
#[derive(Clone)]
pub struct RemoteSync {
    transport: Arc<dyn Transport>,
    handle: tokio::runtime::Handle,
}

impl RemoteSync {
    /// Spawns onto `handle`.
    pub fn new(transport: Arc<dyn Transport>, handle: tokio::runtime::Handle) -> Self {
        Self { transport, handle }
    }
}

impl SyncHook for RemoteSync {
    fn notify(&self, endpoint: &str, event: SyncEvent) {
        if endpoint == DEFAULT_ENDPOINT {
            SYNC_SKIPPED.click();
            return;
        }
        let (kind, payload) = match event {
            SyncEvent::Tokens(payload) => (SyncKind::Tokens, payload),
            SyncEvent::ApiKeys(payload) => (SyncKind::ApiKeys, payload),
        };
        let transport = Arc::clone(&self.transport);
        let endpoint = endpoint.to_string();
        SYNC_ATTEMPTS.click();
        self.handle.spawn(async move {
            match post_sync(transport.as_ref(), &endpoint, kind, payload).await {
                Ok(_) => tracing::info!(endpoint = %endpoint, kind = kind.as_str(), "synced to server"),
                Err(err) => {
                    SYNC_FAILURES.click();
                    tracing::warn!(endpoint = %endpoint, kind = kind.as_str(), error = %err, "sync failed");
                }
            }
        });
    }
}
