use super::types::ProviderDescriptor;
use crate::error::{CancelReason, TurnError};
use bytes::Bytes;
use futures_core::stream::BoxStream;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Deadline applied to every request unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub type ByteStream = BoxStream<'static, Result<Bytes, TurnError>>;

/// Aborts one in-flight request. Cheap to clone; all clones share state.
///
/// Only the first `cancel` has an effect, so a timeout racing a manual stop
/// reports whichever landed first.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: CancelReason) {
        if self.reason.set(reason).is_ok() {
            tracing::debug!(%reason, "cancelling request");
            self.token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    fn error(&self) -> TurnError {
        TurnError::Cancelled(self.reason().unwrap_or(CancelReason::Stopped))
    }
}

/// A started request: the response body and the handle that aborts it.
pub struct Dispatch {
    pub body: ByteStream,
    pub cancel: CancelHandle,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Start a POST to the provider described by `descriptor`.
    ///
    /// Returns immediately; the transfer runs on its own task and feeds the
    /// body stream. Failures arrive as the last item of the body. Must be
    /// called from within a tokio runtime.
    pub fn dispatch(&self, descriptor: &ProviderDescriptor, payload: serde_json::Value) -> Dispatch {
        let cancel = CancelHandle::new();
        let (tx, rx) = mpsc::channel::<Result<Bytes, TurnError>>(64);

        let req = self
            .http
            .post(descriptor.endpoint.clone())
            .headers(descriptor.headers.clone())
            .json(&payload);

        tracing::debug!(
            provider = descriptor.kind.name(),
            endpoint = %descriptor.endpoint,
            "dispatching request"
        );

        let handle = cancel.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            let mut transfer = Box::pin(transfer(req, &tx));

            let result = tokio::select! {
                biased;
                _ = handle.cancelled() => Err(handle.error()),
                _ = &mut deadline => {
                    handle.cancel(CancelReason::TimedOut);
                    Err(handle.error())
                }
                r = &mut transfer => r,
            };

            // Close the connection before reporting.
            drop(transfer);
            if let Err(e) = result {
                let _ = tx.send(Err(e)).await;
            }
        });

        Dispatch {
            body: Box::pin(ReceiverStream::new(rx)),
            cancel,
        }
    }
}

async fn transfer(
    req: reqwest::RequestBuilder,
    tx: &mpsc::Sender<Result<Bytes, TurnError>>,
) -> Result<(), TurnError> {
    let resp = req.send().await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.bytes().await?;
        return Err(error_from_body(status, &body));
    }

    let mut stream = resp.bytes_stream();
    while let Some(item) = stream.next().await {
        let bytes = item?;
        if tx.send(Ok(bytes)).await.is_err() {
            // Receiver dropped; nobody is listening any more.
            return Ok(());
        }
    }
    Ok(())
}

/// Turn a non-2xx response body into a provider error.
fn error_from_body(status: reqwest::StatusCode, body: &[u8]) -> TurnError {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| {
            ["/details", "/error", "/error/message"]
                .iter()
                .filter_map(|p| v.pointer(p).and_then(|f| f.as_str()))
                .find(|s| !s.is_empty())
        })
        .map(str::to_owned)
        .unwrap_or_else(|| format!("Failed to generate response: {status}"));

    TurnError::provider(Some(status.as_u16()), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::{ProviderKind, StreamFormat, WireFormat};
    use reqwest::header::HeaderMap;
    use reqwest::Url;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor(server: &MockServer) -> ProviderDescriptor {
        ProviderDescriptor {
            kind: ProviderKind::FastLlm,
            endpoint: Url::parse(&format!("{}/api/groq", server.uri())).unwrap(),
            headers: HeaderMap::new(),
            format: WireFormat::Stream(StreamFormat::ProxyEnvelope),
        }
    }

    async fn collect(mut body: ByteStream) -> (Vec<u8>, Option<TurnError>) {
        let mut out = Vec::new();
        while let Some(item) = body.next().await {
            match item {
                Ok(b) => out.extend_from_slice(&b),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    #[tokio::test]
    async fn streams_body_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/groq"))
            .and(body_json(serde_json::json!({"model": "m", "prompt": "p"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: {\"content\":\"ab\"}\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new(reqwest::Client::new(), DEFAULT_TIMEOUT);
        let d = dispatcher.dispatch(
            &descriptor(&server),
            serde_json::json!({"model": "m", "prompt": "p"}),
        );
        let (bytes, err) = collect(d.body).await;
        assert_eq!(bytes, b"data: {\"content\":\"ab\"}\n\n");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn non_success_status_uses_details() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "An error occurred while processing your request.",
                "details": "GROQ_API_KEY is not set",
            })))
            .mount(&server)
            .await;

        let d = Dispatcher::new(reqwest::Client::new(), DEFAULT_TIMEOUT)
            .dispatch(&descriptor(&server), serde_json::json!({}));
        let (_, err) = collect(d.body).await;
        assert_eq!(
            err,
            Some(TurnError::provider(Some(500), "GROQ_API_KEY is not set"))
        );
    }

    #[tokio::test]
    async fn non_json_error_body_falls_back_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let d = Dispatcher::new(reqwest::Client::new(), DEFAULT_TIMEOUT)
            .dispatch(&descriptor(&server), serde_json::json!({}));
        let (_, err) = collect(d.body).await;
        match err {
            Some(TurnError::Provider { status, message }) => {
                assert_eq!(status, Some(502));
                assert!(message.starts_with("Failed to generate response: 502"), "{message}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn openai_style_error_object() {
        let body = br#"{"error":{"message":"invalid api key","type":"auth"}}"#;
        assert_eq!(
            error_from_body(reqwest::StatusCode::UNAUTHORIZED, body),
            TurnError::provider(Some(401), "invalid api key")
        );
    }

    #[tokio::test]
    async fn deadline_cancels_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let d = Dispatcher::new(reqwest::Client::new(), Duration::from_millis(100))
            .dispatch(&descriptor(&server), serde_json::json!({}));
        let (_, err) = collect(d.body).await;
        assert_eq!(err, Some(TurnError::Cancelled(CancelReason::TimedOut)));
        assert_eq!(d.cancel.reason(), Some(CancelReason::TimedOut));
    }

    #[tokio::test]
    async fn manual_cancel_wins_and_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let d = Dispatcher::new(reqwest::Client::new(), Duration::from_secs(30))
            .dispatch(&descriptor(&server), serde_json::json!({}));
        d.cancel.cancel(CancelReason::Stopped);
        d.cancel.cancel(CancelReason::TimedOut);
        d.cancel.cancel(CancelReason::Stopped);

        let (bytes, err) = collect(d.body).await;
        assert!(bytes.is_empty());
        assert_eq!(err, Some(TurnError::Cancelled(CancelReason::Stopped)));
        assert_eq!(d.cancel.reason(), Some(CancelReason::Stopped));
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        // Bind then drop so the port is (almost certainly) closed.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let descriptor = ProviderDescriptor {
            kind: ProviderKind::FastLlm,
            endpoint: Url::parse(&format!("http://127.0.0.1:{port}/api/groq")).unwrap(),
            headers: HeaderMap::new(),
            format: WireFormat::Stream(StreamFormat::ProxyEnvelope),
        };
        let d = Dispatcher::new(reqwest::Client::new(), DEFAULT_TIMEOUT)
            .dispatch(&descriptor, serde_json::json!({}));
        let (_, err) = collect(d.body).await;
        assert!(matches!(err, Some(TurnError::Transport(_))), "{err:?}");
    }
}
