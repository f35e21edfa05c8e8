use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use url::Url;

use crate::accumulating_stream::AccumulatingStream;
use crate::config::normalize_endpoint;
use crate::error::{Error, Result};
use crate::observability::{
    CHAT_INTERRUPTS, CHAT_REQUEST_DURATION, CHAT_REQUEST_ERRORS, CHAT_REQUESTS, PROBE_REQUESTS,
};
use crate::sse::process_data_lines;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{ChatCompletion, ChatCompletionRequest, ChatMessage};

/// Timeout of a chat turn.
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout of `/use` verification and `/apikey test` requests.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout of each endpoint probe request.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout of the `/status` reachability check.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// Result of one chat request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatOutcome {
    /// The assistant text, `None` when the gateway produced nothing.
    pub text: Option<String>,
    /// The model that served the request, defaulting to the requested one.
    pub model: String,
}

/// Result of probing a candidate endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// `GET /health` answered 200.
    Healthy,
    /// `/health` and `/v1/models` both answered 403 with an RBAC rejection.
    SecuredGateway,
    /// The endpoint answered, but not like a gateway.
    Rejected {
        /// Status of the deciding reply.
        status: u16,
    },
}

impl ProbeOutcome {
    /// True when the endpoint may be persisted.
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy | ProbeOutcome::SecuredGateway)
    }
}

/// Result of the `/status` check.
#[derive(Clone, Debug, PartialEq)]
pub enum Connectivity {
    /// The gateway answered with some HTTP status.
    Online {
        /// Status of `GET /v1/models`.
        status: u16,
        /// Round-trip time.
        elapsed: Duration,
    },
    /// No HTTP reply at all.
    Offline {
        /// Why the request failed.
        reason: String,
    },
}

/// Checks that `candidate` is an absolute `http`/`https` URL with a host and
/// returns it normalized.  No network traffic happens here.
pub fn validate_endpoint(candidate: &str) -> Result<String> {
    let normalized = normalize_endpoint(candidate);
    if !(normalized.starts_with("http://") || normalized.starts_with("https://")) {
        return Err(Error::validation(
            "endpoint must start with http:// or https://",
            Some("endpoint".to_string()),
        ));
    }
    let url = Url::parse(&normalized)?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation(
            "endpoint has no host",
            Some("endpoint".to_string()),
        ));
    }
    Ok(normalized)
}

/// Client for an OpenAI-compatible gateway.
#[derive(Clone)]
pub struct GatewayClient {
    transport: Arc<dyn Transport>,
    endpoint: String,
}

impl GatewayClient {
    /// Create a client for `endpoint` using `reqwest`.
    pub fn new(endpoint: &str) -> Result<Self> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::with_transport(Arc::new(transport), endpoint))
    }

    /// Create a client over an arbitrary transport.
    pub fn with_transport(transport: Arc<dyn Transport>, endpoint: &str) -> Self {
        Self {
            transport,
            endpoint: normalize_endpoint(endpoint),
        }
    }

    /// The transport this client sends through.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// The endpoint requests go to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Point subsequent requests somewhere else.
    pub fn set_endpoint(&mut self, endpoint: &str) {
        self.endpoint = normalize_endpoint(endpoint);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    /// Send one chat request in the requested mode.
    ///
    /// `on_text` sees every streamed increment; it is not called in
    /// non-streaming mode.
    pub async fn chat<I, F>(
        &self,
        bearer: &str,
        model: &str,
        messages: &[ChatMessage],
        stream: bool,
        interrupted: I,
        on_text: F,
    ) -> Result<ChatOutcome>
    where
        I: Fn() -> bool,
        F: FnMut(&str),
    {
        let request = ChatCompletionRequest::new(model, messages.to_vec());
        if stream {
            self.complete_streaming(bearer, request, interrupted, on_text)
                .await
        } else {
            self.complete(bearer, request, CHAT_TIMEOUT, interrupted).await
        }
    }

    /// Send a non-streaming chat request.
    pub async fn complete<I>(
        &self,
        bearer: &str,
        request: ChatCompletionRequest,
        timeout: Duration,
        interrupted: I,
    ) -> Result<ChatOutcome>
    where
        I: Fn() -> bool,
    {
        let request = request.with_stream(false);
        let body = serde_json::to_value(&request)?;
        let url = self.url("/v1/chat/completions");
        CHAT_REQUESTS.click();

        let reply = interruptible(
            self.transport.post_json(&url, Some(bearer), &body, timeout),
            &interrupted,
        )
        .await
        .inspect_err(|_| CHAT_REQUEST_ERRORS.click())?;
        CHAT_REQUEST_DURATION.add(reply.elapsed.as_secs_f64());

        if reply.status != 200 {
            CHAT_REQUEST_ERRORS.click();
            return Err(Error::from_status(
                reply.status,
                &reply.body,
                reply.retry_after,
            ));
        }

        let completion: ChatCompletion = serde_json::from_str(&reply.body).map_err(|e| {
            CHAT_REQUEST_ERRORS.click();
            Error::serialization(
                format!("Failed to parse response: {e}"),
                Some(Box::new(e)),
            )
        })?;
        Ok(ChatOutcome {
            text: completion
                .first_content()
                .filter(|t| !t.is_empty())
                .map(String::from),
            model: completion
                .served_model()
                .unwrap_or(&request.model)
                .to_string(),
        })
    }

    /// Send a streaming chat request, surfacing each text increment in order.
    ///
    /// `interrupted` is polled while waiting for the gateway; once it returns
    /// true the request is dropped and `Error::Abort` returned.
    pub async fn complete_streaming<I, F>(
        &self,
        bearer: &str,
        request: ChatCompletionRequest,
        interrupted: I,
        mut on_text: F,
    ) -> Result<ChatOutcome>
    where
        I: Fn() -> bool,
        F: FnMut(&str),
    {
        let request = request.with_stream(true);
        let body = serde_json::to_value(&request)?;
        let url = self.url("/v1/chat/completions");
        CHAT_REQUESTS.click();

        let reply = interruptible(
            self.transport.post_stream(&url, bearer, &body, CHAT_TIMEOUT),
            &interrupted,
        )
        .await
        .inspect_err(|_| CHAT_REQUEST_ERRORS.click())?;

        if reply.status != 200 {
            CHAT_REQUEST_ERRORS.click();
            let status = reply.status;
            let retry_after = reply.retry_after;
            let text = reply.into_text().await.unwrap_or_default();
            return Err(Error::from_status(status, &text, retry_after));
        }

        let (mut chunks, summary) = AccumulatingStream::new(process_data_lines(reply.body));
        loop {
            let next = interruptible(async { Ok(chunks.next().await) }, &interrupted).await?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.inspect_err(|_| CHAT_REQUEST_ERRORS.click())?;
            if let Some(text) = chunk.delta_text() {
                on_text(text);
            }
        }

        let summary = summary
            .await
            .map_err(|_| Error::streaming("stream ended without a summary", None))?;
        Ok(ChatOutcome {
            text: Some(summary.text).filter(|t| !t.is_empty()),
            model: summary.model.unwrap_or(request.model),
        })
    }

    /// Sends the one-turn `"Hi"` request `/use` verifies a model with and
    /// reports the model the gateway claims served it.
    pub async fn served_model<I>(&self, bearer: &str, model: &str, interrupted: I) -> Result<String>
    where
        I: Fn() -> bool,
    {
        let request = ChatCompletionRequest::new(model, vec![ChatMessage::user("Hi")]);
        let outcome = self
            .complete(bearer, request, VERIFY_TIMEOUT, interrupted)
            .await?;
        Ok(outcome.model)
    }

    /// Probe `candidate` without touching the configured endpoint.
    ///
    /// `GET /health` answering 200 is healthy.  A 403 there is confirmed by
    /// `GET /v1/models`, which on a secured gateway also answers 403 with a body
    /// that mentions RBAC.
    pub async fn probe_endpoint(&self, candidate: &str) -> Result<ProbeOutcome> {
        let endpoint = validate_endpoint(candidate)?;
        PROBE_REQUESTS.click();
        let health = self
            .transport
            .get(&format!("{endpoint}/health"), PROBE_TIMEOUT)
            .await?;
        tracing::debug!(endpoint = %endpoint, status = health.status, "health probe");
        match health.status {
            200 => Ok(ProbeOutcome::Healthy),
            403 => {
                let models = self
                    .transport
                    .get(&format!("{endpoint}/v1/models"), PROBE_TIMEOUT)
                    .await?;
                tracing::debug!(endpoint = %endpoint, status = models.status, "model listing probe");
                if models.status == 403 && models.body.contains("RBAC") {
                    Ok(ProbeOutcome::SecuredGateway)
                } else {
                    Ok(ProbeOutcome::Rejected {
                        status: models.status,
                    })
                }
            }
            status => Ok(ProbeOutcome::Rejected { status }),
        }
    }

    /// Is anything answering at the configured endpoint?
    pub async fn status(&self) -> Connectivity {
        match self
            .transport
            .get(&self.url("/v1/models"), STATUS_TIMEOUT)
            .await
        {
            Ok(reply) => Connectivity::Online {
                status: reply.status,
                elapsed: reply.elapsed,
            },
            Err(err) => Connectivity::Offline {
                reason: err.to_string(),
            },
        }
    }
}

/// Drives `fut` to completion unless `interrupted` becomes true first.
async fn interruptible<T, Fut, I>(fut: Fut, interrupted: &I) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
    I: Fn() -> bool,
{
    tokio::pin!(fut);
    loop {
        if interrupted() {
            CHAT_INTERRUPTS.click();
            return Err(Error::abort("interrupted by user"));
        }
        if let Ok(result) = tokio::time::timeout(INTERRUPT_POLL, &mut fut).await {
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::transport::testing::{FakeReply, FakeTransport};

    const ENDPOINT: &str = "https://gw.example.com";

    fn client(fake: &Arc<FakeTransport>) -> GatewayClient {
        GatewayClient::with_transport(fake.clone(), ENDPOINT)
    }

    fn chat_url() -> String {
        format!("{ENDPOINT}/v1/chat/completions")
    }

    #[test]
    fn validate_endpoint_rejects_bad_schemes() {
        assert!(validate_endpoint("ftp://gw.example.com").unwrap_err().is_validation());
        assert!(validate_endpoint("gw.example.com").unwrap_err().is_validation());
        assert!(validate_endpoint("http://").is_err());
        assert_eq!(
            validate_endpoint("https://gw.example.com:8080/").unwrap(),
            "https://gw.example.com:8080"
        );
    }

    #[tokio::test]
    async fn invalid_scheme_makes_no_request() {
        let fake = Arc::new(FakeTransport::default());
        let err = client(&fake).probe_endpoint("ftp://x").await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn probe_healthy() {
        let fake = Arc::new(FakeTransport::default());
        fake.push("GET", "https://new.example.com/health", FakeReply::Status(200, "ok".into()));
        let outcome = client(&fake).probe_endpoint("https://new.example.com/").await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Healthy);
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn probe_falls_back_on_forbidden() {
        let fake = Arc::new(FakeTransport::default());
        fake.push("GET", "https://new.example.com/health", FakeReply::Status(403, "".into()));
        fake.push(
            "GET",
            "https://new.example.com/v1/models",
            FakeReply::Status(403, r#"{"detail": "RBAC: access denied"}"#.into()),
        );
        let outcome = client(&fake).probe_endpoint("https://new.example.com").await.unwrap();
        assert_eq!(outcome, ProbeOutcome::SecuredGateway);
        assert!(outcome.is_reachable());
    }

    #[tokio::test]
    async fn probe_forbidden_without_rbac_is_rejected() {
        let fake = Arc::new(FakeTransport::default());
        fake.push("GET", "https://new.example.com/health", FakeReply::Status(403, "".into()));
        fake.push(
            "GET",
            "https://new.example.com/v1/models",
            FakeReply::Status(403, "forbidden".into()),
        );
        let outcome = client(&fake).probe_endpoint("https://new.example.com").await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Rejected { status: 403 });
        assert!(!outcome.is_reachable());
    }

    #[tokio::test]
    async fn probe_other_status_is_rejected_without_fallback() {
        let fake = Arc::new(FakeTransport::default());
        fake.push("GET", "https://new.example.com/health", FakeReply::Status(404, "".into()));
        let outcome = client(&fake).probe_endpoint("https://new.example.com").await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Rejected { status: 404 });
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn probe_timeout_is_distinct() {
        let fake = Arc::new(FakeTransport::default());
        fake.push("GET", "https://new.example.com/health", FakeReply::Timeout);
        let err = client(&fake).probe_endpoint("https://new.example.com").await.unwrap_err();
        assert!(err.is_timeout());
        let err = client(&fake).probe_endpoint("https://new.example.com").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn complete_reports_served_model() {
        let fake = Arc::new(FakeTransport::default());
        fake.push(
            "POST",
            &chat_url(),
            FakeReply::Status(
                200,
                r#"{"model": "gpt-4-0613", "choices": [{"message": {"role": "assistant", "content": "Hello"}}]}"#
                    .into(),
            ),
        );
        let outcome = client(&fake)
            .chat("tok", "gpt-4", &[ChatMessage::user("Hi")], false, || false, |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.text.as_deref(), Some("Hello"));
        assert_eq!(outcome.model, "gpt-4-0613");
        let call = &fake.calls()[0];
        assert_eq!(call.bearer.as_deref(), Some("tok"));
        assert_eq!(call.body.as_ref().unwrap()["stream"], false);
    }

    #[tokio::test]
    async fn complete_defaults_to_requested_model() {
        let fake = Arc::new(FakeTransport::default());
        fake.push(
            "POST",
            &chat_url(),
            FakeReply::Status(200, r#"{"choices": [{"message": {"content": ""}}]}"#.into()),
        );
        let outcome = client(&fake)
            .chat("tok", "gpt-4o", &[ChatMessage::user("Hi")], false, || false, |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.text, None);
        assert_eq!(outcome.model, "gpt-4o");
    }

    #[tokio::test]
    async fn complete_maps_error_status() {
        let fake = Arc::new(FakeTransport::default());
        fake.push("POST", &chat_url(), FakeReply::Status(401, "bad token".into()));
        let err = client(&fake)
            .chat("tok", "gpt-4o", &[ChatMessage::user("Hi")], false, || false, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn streaming_surfaces_increments_in_order() {
        let fake = Arc::new(FakeTransport::default());
        fake.push(
            "POST",
            &chat_url(),
            FakeReply::Stream(
                200,
                vec![
                    "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n".into(),
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\ndata: {bad\n".into(),
                    "data: {\"model\":\"gpt-4o-2024\",\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n".into(),
                    "data: [DONE]\n".into(),
                ],
            ),
        );
        let mut seen = Vec::new();
        let outcome = client(&fake)
            .chat("tok", "gpt-4", &[ChatMessage::user("Hi")], true, || false, |t| {
                seen.push(t.to_string())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(outcome.text.as_deref(), Some("Hello"));
        assert_eq!(outcome.model, "gpt-4o-2024");
        assert_eq!(fake.calls()[0].body.as_ref().unwrap()["stream"], true);
    }

    #[tokio::test]
    async fn streaming_without_model_keeps_requested() {
        let fake = Arc::new(FakeTransport::default());
        fake.push("POST", &chat_url(), FakeReply::Stream(200, vec!["data: [DONE]\n".into()]));
        let outcome = client(&fake)
            .chat("tok", "gpt-4", &[ChatMessage::user("Hi")], true, || false, |_| {})
            .await
            .unwrap();
        assert_eq!(outcome, ChatOutcome { text: None, model: "gpt-4".into() });
    }

    #[tokio::test]
    async fn streaming_error_status_fails_request() {
        let fake = Arc::new(FakeTransport::default());
        fake.push(
            "POST",
            &chat_url(),
            FakeReply::Stream(503, vec!["upstream ".into(), "down".into()]),
        );
        let err = client(&fake)
            .chat("tok", "gpt-4", &[ChatMessage::user("Hi")], true, || false, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_server_error());
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn interrupt_aborts_stream() {
        let fake = Arc::new(FakeTransport::default());
        fake.push(
            "POST",
            &chat_url(),
            FakeReply::Stream(
                200,
                vec![
                    "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".into(),
                    "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n".into(),
                ],
            ),
        );
        let fired = Cell::new(false);
        let err = client(&fake)
            .chat(
                "tok",
                "gpt-4",
                &[ChatMessage::user("Hi")],
                true,
                || fired.get(),
                |_| fired.set(true),
            )
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test]
    async fn status_reports_any_reply_as_online() {
        let fake = Arc::new(FakeTransport::default());
        fake.push("GET", &format!("{ENDPOINT}/v1/models"), FakeReply::Status(403, "".into()));
        assert!(matches!(
            client(&fake).status().await,
            Connectivity::Online { status: 403, .. }
        ));
        assert!(matches!(client(&fake).status().await, Connectivity::Offline { .. }));
    }
}
