use super::types::{ProviderDescriptor, ProviderKind, StreamFormat, WireFormat};
use anyhow::{anyhow, Context};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;

pub const DEFAULT_MODEL: &str = "gemma2-9b-it";

/// Text-to-image model served by the inference proxy.
pub const IMAGE_MODEL: &str = "XLabs-AI/flux-RealismLora";

pub const ZEPHYR_MODEL: &str = "HuggingFaceH4/zephyr-7b-beta";

/// Models served by the OpenAI-compatible code-generation provider.
pub const CODEGEN_MODELS: &[&str] = &[
    "Qwen/Qwen2.5-Coder-32B-Instruct",
    "deepseek-ai/deepseek-coder-33b-instruct",
    "codellama/CodeLlama-34b-Instruct-hf",
];

/// Where each provider lives.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub fast_llm: String,
    pub inference: String,
    pub codegen: String,
    pub codegen_api_key: Option<String>,
}

/// Maps a model identifier to the provider that serves it.
///
/// Endpoints and headers are validated up front so `route` cannot fail.
#[derive(Debug, Clone)]
pub struct Router {
    fast_llm: Url,
    inference: Url,
    codegen: Url,
    proxy_headers: HeaderMap,
    codegen_headers: HeaderMap,
}

impl Router {
    pub fn new(endpoints: &Endpoints) -> anyhow::Result<Self> {
        let parse = |name: &str, raw: &str| {
            Url::parse(raw).with_context(|| format!("invalid {name} endpoint: {raw}"))
        };

        let mut proxy_headers = HeaderMap::new();
        proxy_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut codegen_headers = proxy_headers.clone();
        codegen_headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        match &endpoints.codegen_api_key {
            Some(key) => {
                let v = HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| anyhow!(e).context("codegen api key is not a valid header value"))?;
                codegen_headers.insert(AUTHORIZATION, v);
            }
            None => tracing::warn!("no codegen api key configured; codegen models will be rejected upstream"),
        }

        Ok(Self {
            fast_llm: parse("fast_llm", &endpoints.fast_llm)?,
            inference: parse("inference", &endpoints.inference)?,
            codegen: parse("codegen", &endpoints.codegen)?,
            proxy_headers,
            codegen_headers,
        })
    }

    /// Pick the provider for `model`. First match wins.
    pub fn route(&self, model: &str) -> ProviderDescriptor {
        if CODEGEN_MODELS.contains(&model) {
            return ProviderDescriptor {
                kind: ProviderKind::CodeGen,
                endpoint: self.codegen.clone(),
                headers: self.codegen_headers.clone(),
                format: WireFormat::Stream(StreamFormat::OpenAiSse),
            };
        }

        if model == IMAGE_MODEL {
            return ProviderDescriptor {
                kind: ProviderKind::InferenceProxy,
                endpoint: self.inference.clone(),
                headers: self.proxy_headers.clone(),
                format: WireFormat::ImagePayload,
            };
        }

        let (kind, endpoint) = if model.starts_with("microsoft/") || model == ZEPHYR_MODEL {
            (ProviderKind::InferenceProxy, &self.inference)
        } else {
            (ProviderKind::FastLlm, &self.fast_llm)
        };

        ProviderDescriptor {
            kind,
            endpoint: endpoint.clone(),
            headers: self.proxy_headers.clone(),
            format: WireFormat::Stream(StreamFormat::ProxyEnvelope),
        }
    }
}
