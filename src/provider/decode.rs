use super::dispatch::ByteStream;
use super::types::StreamFormat;
use crate::error::TurnError;
use base64::Engine;
use futures_core::Stream;
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Text to append. May be empty.
    Fragment(String),
    /// Upstream said it is finished.
    Done,
}

/// Incremental decoder for streamed response bodies.
///
/// - Buffers bytes until a complete record is available
/// - Stops for good after `Done` or the first error
pub struct StreamDecoder {
    format: StreamFormat,
    buf: Vec<u8>,
    /// `buf[..scanned]` holds no complete delimiter.
    scanned: usize,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            buf: Vec::new(),
            scanned: 0,
            finished: false,
        }
    }

    fn delimiter(&self) -> &'static [u8] {
        match self.format {
            StreamFormat::ProxyEnvelope => b"\n\n",
            StreamFormat::OpenAiSse => b"\n",
        }
    }

    /// Feed a chunk and return every record it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Record, TurnError>> {
        if self.finished {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);

        let delim = self.delimiter();
        let mut out = Vec::new();
        loop {
            // Back up so a delimiter split across chunks is still found.
            let from = self.scanned.saturating_sub(delim.len() - 1);
            let Some(pos) = find(&self.buf[from..], delim).map(|p| from + p) else {
                self.scanned = self.buf.len();
                break;
            };
            let raw: Vec<u8> = self.buf.drain(..pos + delim.len()).take(pos).collect();
            self.scanned = 0;
            if self.decode_into(&raw, &mut out) {
                break;
            }
        }
        out
    }

    /// The body ended; decode whatever is left as a final record.
    pub fn finish(&mut self) -> Vec<Result<Record, TurnError>> {
        let mut out = Vec::new();
        if !self.finished {
            let raw = std::mem::take(&mut self.buf);
            self.scanned = 0;
            self.decode_into(&raw, &mut out);
            self.finished = true;
        }
        out
    }

    /// Returns true once the stream is over.
    fn decode_into(&mut self, raw: &[u8], out: &mut Vec<Result<Record, TurnError>>) -> bool {
        let decoded = match std::str::from_utf8(raw) {
            Ok(s) => match self.format {
                StreamFormat::ProxyEnvelope => decode_envelope(s),
                StreamFormat::OpenAiSse => decode_openai(s),
            },
            Err(e) => Some(Err(TurnError::Decode(format!("record is not valid UTF-8: {e}")))),
        };

        let Some(item) = decoded else {
            return false;
        };
        let terminal = !matches!(item, Ok(Record::Fragment(_)));
        out.push(item);
        if terminal {
            self.finished = true;
            self.buf.clear();
        }
        terminal
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    details: Option<serde_json::Value>,
    #[serde(default)]
    token: Option<TokenDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenDelta {
    #[serde(default)]
    text: Option<String>,
}

fn decode_envelope(record: &str) -> Option<Result<Record, TurnError>> {
    let record = record.trim_matches(|c| c == '\r' || c == '\n');
    let Some(json) = record.strip_prefix("data: ") else {
        if !record.trim().is_empty() {
            tracing::trace!(record, "ignoring non-data record");
        }
        return None;
    };

    let env: Envelope = match serde_json::from_str(json) {
        Ok(e) => e,
        Err(e) => return Some(Err(TurnError::Decode(e.to_string()))),
    };

    if env.error.as_ref().is_some_and(is_truthy) {
        let message = env
            .details
            .as_ref()
            .and_then(|d| d.as_str())
            .filter(|d| !d.is_empty())
            .unwrap_or("An error occurred during streaming");
        return Some(Err(TurnError::provider(None, message)));
    }

    let text = env
        .content
        .filter(|c| !c.is_empty())
        .or_else(|| env.token.and_then(|t| t.text))
        .unwrap_or_default();
    Some(Ok(Record::Fragment(text)))
}

fn is_truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

fn decode_openai(line: &str) -> Option<Result<Record, TurnError>> {
    let line = line.trim_end_matches('\r');
    // Ignore other fields: event:, id:, retry:, comments
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim();

    if payload == "[DONE]" {
        return Some(Ok(Record::Done));
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => {
            let text = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .unwrap_or_default();
            Some(Ok(Record::Fragment(text)))
        }
        Err(e) => {
            tracing::warn!(error = %e, payload, "skipping malformed stream record");
            None
        }
    }
}

/// Lazy stream of text fragments decoded from a response body.
///
/// Ends normally when the body closes or a done marker arrives; ends after
/// yielding the first error otherwise.
pub struct Fragments {
    body: ByteStream,
    decoder: StreamDecoder,
    pending: VecDeque<Result<String, TurnError>>,
    done: bool,
}

impl Fragments {
    pub fn new(body: ByteStream, format: StreamFormat) -> Self {
        Self {
            body,
            decoder: StreamDecoder::new(format),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn absorb(&mut self, records: Vec<Result<Record, TurnError>>) {
        for r in records {
            match r {
                Ok(Record::Fragment(text)) => self.pending.push_back(Ok(text)),
                Ok(Record::Done) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.done = true;
                    break;
                }
            }
        }
    }
}

impl Stream for Fragments {
    type Item = Result<String, TurnError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(bytes))) => {
                    let records = this.decoder.push(&bytes);
                    this.absorb(records);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.pending.push_back(Err(e));
                    this.done = true;
                }
                Poll::Ready(None) => {
                    let records = this.decoder.finish();
                    this.absorb(records);
                    this.done = true;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    image: String,
}

/// Parse the one-shot image payload `{"image": "<data-uri>"}`.
pub fn decode_image(body: &[u8]) -> Result<String, TurnError> {
    let resp: ImageResponse = serde_json::from_slice(body)
        .map_err(|e| TurnError::Decode(format!("invalid image payload: {e}")))?;
    Ok(resp.image)
}

/// A decoded `data:<mime>;base64,<payload>` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUri {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    pub fn parse(uri: &str) -> anyhow::Result<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| anyhow::anyhow!("not a data URI"))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| anyhow::anyhow!("data URI has no payload"))?;
        let mime = meta
            .strip_suffix(";base64")
            .ok_or_else(|| anyhow::anyhow!("only base64 data URIs are supported"))?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
        Ok(Self {
            mime: mime.to_string(),
            bytes,
        })
    }

    /// File extension for the mime type, if it is an image we know.
    pub fn extension(&self) -> Option<&'static str> {
        match self.mime.as_str() {
            "image/jpeg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/webp" => Some("webp"),
            _ => None,
        }
    }
}
