use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::Serialize;

/// Which upstream a model is served by. Decided once by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    FastLlm,
    InferenceProxy,
    CodeGen,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FastLlm => "fast-llm",
            Self::InferenceProxy => "inference-proxy",
            Self::CodeGen => "codegen",
        }
    }
}

/// Record layout of a streamed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// `data: <json>` records separated by a blank line.
    ProxyEnvelope,
    /// `data: <json>` lines, terminated by `data: [DONE]`.
    OpenAiSse,
}

/// What the response body looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Stream(StreamFormat),
    /// One JSON object `{"image": "<data-uri>"}`.
    ImagePayload,
}

/// One entry of the conversation as sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Everything the dispatcher needs to reach a provider.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub endpoint: Url,
    pub headers: HeaderMap,
    pub format: WireFormat,
}

impl ProviderDescriptor {
    /// Build the JSON request body for `model`.
    ///
    /// `transcript` is the completed conversation ending with the new user
    /// message. The proxies only take the latest prompt; the code-generation
    /// provider gets the whole history.
    pub fn body(&self, model: &str, transcript: &[ChatMessage]) -> serde_json::Value {
        match self.kind {
            ProviderKind::FastLlm | ProviderKind::InferenceProxy => {
                let prompt = transcript
                    .iter()
                    .rev()
                    .find(|m| m.role == "user")
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                serde_json::json!({ "model": model, "prompt": prompt })
            }
            ProviderKind::CodeGen => serde_json::json!({
                "model": model,
                "messages": transcript,
                "stream": true,
            }),
        }
    }
}
