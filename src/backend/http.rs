use super::{RealtimeStream, SyncBackend};
use crate::model::{ChatBuckets, FeedScope, MutationRequest, Post, StageFilter, SyncError};
use crate::realtime::RawEvent;
use crate::store::PageWindow;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;
use url::Url;

const MAX_BODY_SIZE: usize = 5 * 1024 * 1024; // 5MB
const MAX_EVENT_LINE: usize = 1024 * 1024; // 1MB

/// [`SyncBackend`] over the campus REST API.
///
/// Every call is bounded by the request timeout except the realtime stream,
/// whose body is open-ended; only its initial response is timed.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    token: Option<SecretString>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base", &self.base.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpBackend {
    /// `base` must end in `/`; see [`validate_api_base`](crate::util::validate_api_base).
    pub fn new(
        base: Url,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| SyncError::Network(format!("HTTP client setup failed: {e}")))?;
        if token.is_none() {
            tracing::warn!(base_url = %base, "No API token configured, requests are unauthenticated");
        }
        Ok(Self {
            client,
            base,
            token,
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        self.base
            .join(path)
            .map_err(|e| SyncError::Network(format!("Invalid endpoint {path}: {e}")))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => {
                request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            }
            None => request,
        }
    }

    /// Send with the request timeout. Returns the response whatever its status.
    async fn send(&self, request: RequestBuilder) -> Result<Response, SyncError> {
        let request = self.authorize(request);
        tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| {
                SyncError::Network(format!("Request timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| SyncError::Network(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SyncError> {
        let response = self.send(self.client.get(url.clone())).await?;
        let response = ensure_success(response, &url)?;
        self.read_json(response).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<Response, SyncError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| SyncError::Network(format!("Failed to encode request: {e}")))?;
        self.send(
            self.client
                .post(url.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(body),
        )
        .await
    }

    async fn read_json<T: DeserializeOwned>(&self, response: Response) -> Result<T, SyncError> {
        let bytes = tokio::time::timeout(self.timeout, read_limited(response, MAX_BODY_SIZE))
            .await
            .map_err(|_| SyncError::Network("Response body timed out".to_string()))??;
        serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Network(format!("Invalid response body: {e}")))
    }
}

#[async_trait::async_trait]
impl SyncBackend for HttpBackend {
    async fn fetch_page(
        &self,
        scope: FeedScope,
        window: PageWindow,
    ) -> Result<Vec<Post>, SyncError> {
        let mut url = self.endpoint("posts")?;
        url.query_pairs_mut()
            .append_pair("scope", scope.kind.as_str())
            .append_pair("stage", &stage_param(scope.stage))
            .append_pair("offset", &window.offset.to_string())
            .append_pair("limit", &window.limit.to_string());
        tracing::debug!(%scope, offset = window.offset, limit = window.limit, "Fetching feed page");
        self.get_json(url).await
    }

    async fn initialize_membership(&self, user_id: &str) -> Result<(), SyncError> {
        let url = self.endpoint("chats/membership")?;
        let response = self.post_json(&url, &json!({ "user_id": user_id })).await?;
        ensure_success(response, &url)?;
        tracing::debug!(user_id, "Group membership initialized");
        Ok(())
    }

    async fn fetch_bulk_chats(&self, user_id: &str) -> Result<ChatBuckets, SyncError> {
        let mut url = self.endpoint("chats")?;
        url.query_pairs_mut().append_pair("user_id", user_id);
        self.get_json(url).await
    }

    async fn fetch_unread_counts(
        &self,
        user_id: &str,
        chat_ids: &[String],
    ) -> Result<HashMap<String, u32>, SyncError> {
        let url = self.endpoint("chats/unread")?;
        let response = self
            .post_json(&url, &json!({ "user_id": user_id, "chat_ids": chat_ids }))
            .await?;
        let response = ensure_success(response, &url)?;
        self.read_json(response).await
    }

    async fn subscribe_realtime(&self) -> Result<RealtimeStream, SyncError> {
        let url = self.endpoint("realtime")?;
        let response = self
            .send(
                self.client
                    .get(url.clone())
                    .header(ACCEPT, "application/x-ndjson"),
            )
            .await?;
        let response = ensure_success(response, &url)?;
        tracing::info!(url = %url, "Realtime subscription opened");
        Ok(ndjson_events(response.bytes_stream()))
    }

    async fn submit_mutation(&self, request: &MutationRequest) -> Result<(), SyncError> {
        let url = self.endpoint("mutations")?;
        let response = self.post_json(&url, request).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(SyncError::Rejected(format!(
                    "{} on {} (HTTP {})",
                    request.kind,
                    request.target_id,
                    response.status().as_u16()
                )))
            }
            status => Err(SyncError::Network(format!(
                "HTTP error: status {} from {}",
                status.as_u16(),
                url.path()
            ))),
        }
    }
}

fn stage_param(stage: StageFilter) -> String {
    match stage {
        StageFilter::All => "all".to_string(),
        StageFilter::Stage(n) => n.to_string(),
    }
}

fn ensure_success(response: Response, url: &Url) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SyncError::Network(format!(
            "HTTP error: status {} from {}",
            status.as_u16(),
            url.path()
        )))
    }
}

/// Read a response body, refusing anything larger than `limit`.
async fn read_limited(response: Response, limit: usize) -> Result<Vec<u8>, SyncError> {
    let too_large = || SyncError::Network(format!("Response too large (exceeds {limit} bytes)"));
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(too_large());
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SyncError::Network(e.to_string()))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

struct LineReader<S> {
    chunks: Pin<Box<S>>,
    buffer: Vec<u8>,
    done: bool,
}

/// Split a byte stream into newline-delimited JSON envelopes.
///
/// Blank lines are keepalives and skipped. A line that is not a valid
/// envelope yields `MalformedEvent` and the stream continues; a transport
/// error or an oversized line yields `Network` and ends the stream.
fn ndjson_events<S, B, E>(chunks: S) -> RealtimeStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let reader = LineReader {
        chunks: Box::pin(chunks),
        buffer: Vec::new(),
        done: false,
    };
    Box::pin(futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(pos) = reader.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = reader.buffer.drain(..=pos).collect();
                if let Some(item) = parse_line(&line) {
                    return Some((item, reader));
                }
                continue;
            }
            if reader.done {
                let rest = std::mem::take(&mut reader.buffer);
                return parse_line(&rest).map(|item| (item, reader));
            }
            match reader.chunks.next().await {
                Some(Ok(chunk)) => {
                    let chunk = chunk.as_ref();
                    if reader.buffer.len().saturating_add(chunk.len()) > MAX_EVENT_LINE
                        && !chunk.contains(&b'\n')
                    {
                        reader.done = true;
                        reader.buffer.clear();
                        return Some((
                            Err(SyncError::Network(format!(
                                "Realtime event exceeds {MAX_EVENT_LINE} bytes"
                            ))),
                            reader,
                        ));
                    }
                    reader.buffer.extend_from_slice(chunk);
                }
                Some(Err(e)) => {
                    reader.done = true;
                    reader.buffer.clear();
                    return Some((
                        Err(SyncError::Network(format!("Realtime stream failed: {e}"))),
                        reader,
                    ));
                }
                None => reader.done = true,
            }
        }
    }))
}

fn parse_line(line: &[u8]) -> Option<Result<RawEvent, SyncError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(line)
            .map_err(|e| SyncError::MalformedEvent(format!("Invalid realtime envelope: {e}"))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeedKind, MutationKind};
    use serde_json::Value;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> HttpBackend {
        let base = crate::util::validate_api_base(&server.uri()).unwrap();
        HttpBackend::new(
            base,
            Some(SecretString::from("test-token".to_string())),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    fn post(id: &str) -> Value {
        json!({
            "id": id,
            "created_at": "2024-03-01T10:00:00Z",
            "scope": "major",
            "stage": 3,
            "title": "Exam schedule"
        })
    }

    #[tokio::test]
    async fn test_fetch_page_sends_window_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .and(query_param("scope", "major"))
            .and(query_param("stage", "3"))
            .and(query_param("offset", "15"))
            .and(query_param("limit", "15"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([post("p1"), post("p2")])))
            .expect(1)
            .mount(&server)
            .await;

        let scope = FeedScope::new(FeedKind::Major, StageFilter::Stage(3));
        let posts = backend(&server)
            .fetch_page(scope, PageWindow { offset: 15, limit: 15 })
            .await
            .unwrap();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].fields.get("title"), Some(&json!("Exam schedule")));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = backend(&server)
            .fetch_page(FeedScope::default(), PageWindow { offset: 0, limit: 15 })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let base = crate::util::validate_api_base(&server.uri()).unwrap();
        let backend = HttpBackend::new(base, None, Duration::from_millis(50)).unwrap();
        let err = backend.fetch_bulk_chats("me").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_bulk_chats_and_unread() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats"))
            .and(query_param("user_id", "me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "default_groups": [{ "id": "d1", "last_message_at": "2024-03-01T10:00:00Z" }],
                "private_chats": [{ "id": "p1", "last_message_at": "2024-03-02T10:00:00Z" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chats/unread"))
            .and(body_json(json!({ "user_id": "me", "chat_ids": ["d1", "p1"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "d1": 2, "p1": 0 })))
            .mount(&server)
            .await;

        let backend = backend(&server);
        let buckets = backend.fetch_bulk_chats("me").await.unwrap();
        assert_eq!(buckets.default_groups.len(), 1);
        assert!(buckets.custom_groups.is_empty());

        let unread = backend
            .fetch_unread_counts("me", &buckets.chat_ids())
            .await
            .unwrap();
        assert_eq!(unread.get("d1"), Some(&2));
    }

    #[tokio::test]
    async fn test_membership_posts_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chats/membership"))
            .and(body_json(json!({ "user_id": "me" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server).initialize_membership("me").await.unwrap();
    }

    #[tokio::test]
    async fn test_mutation_conflict_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mutations"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let request = MutationRequest {
            kind: MutationKind::Like,
            target_id: "p1".into(),
            user_id: "me".into(),
            value: json!({ "liked": true }),
        };
        let err = backend(&server).submit_mutation(&request).await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_mutation_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mutations"))
            .and(body_json(json!({
                "kind": "mark_read",
                "target_id": "c1",
                "user_id": "me",
                "value": { "read": true }
            })))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let request = MutationRequest {
            kind: MutationKind::MarkRead,
            target_id: "c1".into(),
            user_id: "me".into(),
            value: json!({ "read": true }),
        };
        assert!(backend(&server).submit_mutation(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_realtime_stream_yields_envelopes() {
        let server = MockServer::start().await;
        let body = concat!(
            r#"{"event_id":"e1","collection":"messages","operation":"create","payload":{}}"#,
            "\n\n",
            r#"{"collection":"chats","operation":"delete","payload":{"id":"c1"}}"#,
            "\n"
        );
        Mock::given(method("GET"))
            .and(path("/realtime"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let stream = backend(&server).subscribe_realtime().await.unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap().event_id.as_deref(),
            Some("e1")
        );
        assert_eq!(events[1].as_ref().unwrap().collection, "chats");
    }

    fn chunk(text: &'static str) -> Result<&'static [u8], std::io::Error> {
        Ok(text.as_bytes())
    }

    #[tokio::test]
    async fn test_ndjson_lines_split_across_chunks() {
        let chunks = vec![
            chunk(r#"{"collection":"po"#),
            chunk("sts\",\"operation\":\"delete\",\"payload\":{\"id\":\"p1\"}}\n{\"coll"),
            chunk(r#"ection":"likes","operation":"create"}"#),
        ];
        let events: Vec<_> = ndjson_events(futures::stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().collection, "posts");
        assert_eq!(events[1].as_ref().unwrap().operation, "create");
    }

    #[tokio::test]
    async fn test_ndjson_bad_line_then_continue() {
        let chunks = vec![chunk(
            "not json\n{\"collection\":\"chats\",\"operation\":\"update\"}\n",
        )];
        let events: Vec<_> = ndjson_events(futures::stream::iter(chunks)).collect().await;

        assert!(matches!(events[0], Err(SyncError::MalformedEvent(_))));
        assert!(events[1].is_ok());
    }

    #[tokio::test]
    async fn test_ndjson_transport_error_ends_stream() {
        let chunks = vec![
            chunk("{\"collection\":\"chats\",\"operation\":\"update\"}\n"),
            Err(std::io::Error::other("reset")),
            chunk("{\"collection\":\"chats\",\"operation\":\"update\"}\n"),
        ];
        let events: Vec<_> = ndjson_events(futures::stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(SyncError::Network(_))));
    }

    #[test]
    fn test_debug_masks_token() {
        let backend = HttpBackend::new(
            Url::parse("https://api.campus.example/").unwrap(),
            Some(SecretString::from("hunter2".to_string())),
            Duration::from_secs(1),
        )
        .unwrap();
        let debug = format!("{:?}", backend);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
