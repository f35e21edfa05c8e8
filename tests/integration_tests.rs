//! End-to-end tests: credentials written by the CLI store are honoured by the
//! key-rewrite middleware in front of a local axum gateway.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::Json;
    use axum::Router;
    use axum::body::Body;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use axum::http::{HeaderMap, Request, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use chatgate::chat::ChatConfig;
    use chatgate::client::VERIFY_TIMEOUT;
    use chatgate::{
        ApiKeyMapper, ApiKeyRewriteLayer, ChatCompletionRequest, ChatMessage, CredentialStore,
        DataPaths, GatewayClient, RemoteSync,
    };

    const TOKEN: &str = "eyJhbGciOiJSUzI1NiJ9.upstream-account.signature";

    fn authorization(headers: &HeaderMap) -> String {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }

    async fn echo_authorization(headers: HeaderMap) -> String {
        authorization(&headers)
    }

    /// Answers only requests carrying the upstream token.
    async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> Response {
        if authorization(&headers) != format!("Bearer {TOKEN}") {
            return (StatusCode::UNAUTHORIZED, "unknown credential").into_response();
        }
        let model = body["model"].as_str().unwrap_or("").to_string();
        if body["stream"] == json!(true) {
            let first = json!({"model": model, "choices": [{"index": 0, "delta": {"content": "po"}}]});
            let second = json!({"choices": [{"index": 0, "delta": {"content": "ng"}}]});
            let body = format!("data: {first}\n\ndata: {second}\n\ndata: [DONE]\n\n");
            return ([(CONTENT_TYPE, "text/event-stream")], body).into_response();
        }
        Json(json!({
            "id": "chatcmpl-1",
            "model": format!("{model}-0613"),
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "pong"},
                "finish_reason": "stop"
            }]
        }))
        .into_response()
    }

    fn gateway(mapper: ApiKeyMapper, synced: Arc<Mutex<Vec<Value>>>) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/echo", get(echo_authorization))
            .route("/v1/chat/completions", post(completions))
            .route(
                "/admin/sync/tokens",
                post(move |Json(body): Json<Value>| {
                    let synced = Arc::clone(&synced);
                    async move {
                        synced.lock().unwrap().push(body);
                        "synced"
                    }
                }),
            )
            .layer(ApiKeyRewriteLayer::new(mapper))
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn store_with_key(dir: &tempfile::TempDir) -> (CredentialStore, String) {
        let mut store = CredentialStore::open(DataPaths::new(dir.path()));
        store.add_token("main", TOKEN).unwrap();
        assert!(store.use_token("main").unwrap());
        let key = store.generate_api_key("ci").unwrap();
        (store, key)
    }

    fn mapper_for(store: &CredentialStore) -> ApiKeyMapper {
        ApiKeyMapper::new(store.paths().apikeys_file(), store.paths().tokens_file())
    }

    async fn echo(app: Router, bearer: &str) -> String {
        let request = Request::builder()
            .uri("/echo")
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn minted_key_is_rewritten_to_its_token() {
        let dir = tempfile::tempdir().unwrap();
        let (store, key) = store_with_key(&dir);
        let app = gateway(mapper_for(&store), Arc::default());

        assert_eq!(echo(app, &key).await, format!("Bearer {TOKEN}"));
    }

    #[tokio::test]
    async fn removed_key_passes_through_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, key) = store_with_key(&dir);
        let app = gateway(mapper_for(&store), Arc::default());
        assert!(store.remove_apikey("ci").unwrap());

        assert_eq!(echo(app, &key).await, format!("Bearer {key}"));
    }

    #[tokio::test]
    async fn upstream_token_is_never_inspected() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_with_key(&dir);
        let app = gateway(mapper_for(&store), Arc::default());

        assert_eq!(echo(app, TOKEN).await, format!("Bearer {TOKEN}"));
    }

    #[tokio::test]
    async fn api_key_chats_through_a_running_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let (store, key) = store_with_key(&dir);
        let addr = serve(gateway(mapper_for(&store), Arc::default())).await;
        let client = GatewayClient::new(&format!("http://{addr}")).unwrap();

        let request = ChatCompletionRequest::new("gpt-4", vec![ChatMessage::user("Hi")]);
        let outcome = client
            .complete(&key, request, VERIFY_TIMEOUT, || false)
            .await
            .unwrap();
        assert_eq!(outcome.text.as_deref(), Some("pong"));
        assert_eq!(outcome.model, "gpt-4-0613");

        let request = ChatCompletionRequest::new("gpt-4o", vec![ChatMessage::user("Hi")]);
        let mut seen = Vec::new();
        let outcome = client
            .complete_streaming(&key, request, || false, |t| seen.push(t.to_string()))
            .await
            .unwrap();
        assert_eq!(seen, vec!["po", "ng"]);
        assert_eq!(outcome.text.as_deref(), Some("pong"));
        assert_eq!(outcome.model, "gpt-4o");

        let request = ChatCompletionRequest::new("gpt-4", vec![ChatMessage::user("Hi")]);
        let err = client
            .complete("sk-not-a-real-key", request, VERIFY_TIMEOUT, || false)
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn endpoint_probe_and_token_sync() {
        let dir = tempfile::tempdir().unwrap();
        let synced = Arc::new(Mutex::new(Vec::new()));
        let (store, _) = store_with_key(&dir);
        let addr = serve(gateway(mapper_for(&store), synced.clone())).await;
        let endpoint = format!("http://{addr}");

        let client = GatewayClient::new(&endpoint).unwrap();
        assert!(client.probe_endpoint(&endpoint).await.unwrap().is_reachable());

        let sync = RemoteSync::new(client.transport(), tokio::runtime::Handle::current());
        let mut store = CredentialStore::open(DataPaths::new(dir.path()))
            .with_sync_hook(Arc::new(sync));
        store.set_endpoint(&endpoint).unwrap();
        store.add_token("backup", "fk-0123456789abcdefghijklmnop").unwrap();

        let mut body = None;
        for _ in 0..50 {
            if let Some(first) = synced.lock().unwrap().first().cloned() {
                body = Some(first);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let body = body.expect("sync post never arrived");
        assert_eq!(body["sync_type"], "tokens");
        assert_eq!(body["tokens"]["main"], TOKEN);
        assert_eq!(body["tokens"]["backup"], "fk-0123456789abcdefghijklmnop");
    }

    #[tokio::test]
    async fn session_turn_uses_active_token() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_with_key(&dir);
        let addr = serve(gateway(mapper_for(&store), Arc::default())).await;
        let endpoint = format!("http://{addr}");

        let config = ChatConfig::new().with_endpoint(endpoint.clone());
        let client = GatewayClient::new(&endpoint).unwrap();
        let mut session = chatgate::chat::ChatSession::new(client, store, &config);
        let mut renderer = chatgate::chat::PlainTextRenderer::with_color(false);

        session.send("ping", &mut renderer).await.unwrap();
        assert_eq!(session.message_count(), 2);
        assert_eq!(session.history()[1].content, "pong");
    }
}
