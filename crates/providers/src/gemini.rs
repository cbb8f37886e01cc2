//! Cloud chat backend over the Gemini generateContent API.
//!
//! One request, one complete response; no retries and no upstream
//! streaming. Upstream failures are normalized into the `ChatError`
//! taxonomy by substring-matching the error body.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use shared::chat_api::{ChatOutcome, ChatRequest, InlineImage};
use shared::error::ChatError;
use shared::settings::ModelConfig;
use shared::types::{EbookData, MapData, ModelTier, WebSource};

use crate::keypool;
use crate::ChatBackend;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(45))
        .build()
        .expect("failed to build HTTP client")
});

// Coarse request classifiers, independent of the per-message intent
// detector: these only steer model-tier selection and payload parsing,
// never artifact gating.
static IMAGE_REQUEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(gambar(kan)?|lukis(kan)?|ilustrasi|foto|draw|image)\b").unwrap()
});
static CODE_REQUEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(kode|code|script|html|css|javascript|python|website|aplikasi|komponen|function|landing page)\b")
        .unwrap()
});
static EBOOK_REQUEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ebook|e-book|buku|presentasi|slide|deck|materi)\b").unwrap()
});

pub fn is_image_request(message: &str) -> bool {
    IMAGE_REQUEST_RE.is_match(message)
}

pub fn is_code_request(message: &str) -> bool {
    CODE_REQUEST_RE.is_match(message)
}

pub fn is_ebook_request(message: &str) -> bool {
    EBOOK_REQUEST_RE.is_match(message)
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    #[serde(rename = "groundingMetadata")]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GroundingMetadata {
    #[serde(rename = "groundingChunks", default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<GroundingWeb>,
}

#[derive(Debug, Deserialize)]
struct GroundingWeb {
    uri: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

pub struct CloudClient {
    http: Client,
    config: ModelConfig,
}

impl CloudClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            config,
        }
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Light => &self.config.light_model,
            ModelTier::Heavy => &self.config.heavy_model,
        }
    }
}

#[async_trait]
impl ChatBackend for CloudClient {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatOutcome, ChatError> {
        let key = keypool::select_key(&self.config.api_key);
        if key.is_empty() {
            return Err(ChatError::MissingApiKey);
        }

        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let model = self.model_for(req.tier);
        debug!(model, turns = req.messages.len(), "dispatching cloud request");

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            model, key
        );
        let body = GeminiRequest {
            contents: build_contents(&req.messages, &req.images),
            system_instruction: Some(GeminiContent {
                role: "system".to_string(),
                parts: vec![GeminiPart {
                    text: Some(req.system_instruction.clone()),
                    inline_data: None,
                }],
            }),
        };

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_upstream_error(status, &body));
        }

        let parsed: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| ChatError::Upstream(format!("bad response body: {e}")))?;

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            return Err(ChatError::Upstream("empty candidate list".into()));
        };

        let mut text = String::new();
        let mut image_url = None;
        if let Some(content) = &candidate.content {
            for part in &content.parts {
                if let Some(t) = &part.text {
                    text.push_str(t);
                }
                if image_url.is_none() {
                    if let Some(inline) = &part.inline_data {
                        image_url =
                            Some(format!("data:{};base64,{}", inline.mime_type, inline.data));
                    }
                }
            }
        }

        let sources = candidate
            .grounding_metadata
            .map(|g| {
                g.grounding_chunks
                    .into_iter()
                    .filter_map(|c| c.web)
                    .map(|w| WebSource {
                        title: w.title,
                        url: w.uri,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let ebook_data = if is_ebook_request(&last_user) {
            extract_json_payload::<EbookData>(&text)
        } else {
            None
        };
        let map_data = if req.location.is_some() && ebook_data.is_none() {
            extract_json_payload::<MapData>(&text)
        } else {
            None
        };

        Ok(ChatOutcome {
            // The UI strips fenced blocks from the prose view; the raw
            // text stays intact here.
            code_snippet: extract_code_block(&text),
            text,
            image_url,
            sources,
            ebook_data,
            map_data,
            is_offline: false,
        })
    }
}

/// Linear role-alternating history. Image parts for the final message
/// go ahead of its text part.
fn build_contents(
    messages: &[shared::chat_api::ChatMessage],
    images: &[InlineImage],
) -> Vec<GeminiContent> {
    let last = messages.len().saturating_sub(1);
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            // Gemini expects "user" | "model"; the app uses
            // "user" | "assistant".
            let role = match m.role.as_str() {
                "assistant" => "model",
                other => other,
            };
            let mut parts = Vec::new();
            if i == last {
                for img in images {
                    parts.push(GeminiPart {
                        text: None,
                        inline_data: Some(GeminiInlineData {
                            mime_type: img.mime_type.clone(),
                            data: img.data.clone(),
                        }),
                    });
                }
            }
            parts.push(GeminiPart {
                text: Some(m.content.clone()),
                inline_data: None,
            });
            GeminiContent {
                role: role.to_string(),
                parts,
            }
        })
        .collect()
}

/// Map an upstream failure onto the error taxonomy. Matching is by
/// substring because the API reports structured reasons inside a free
/// text body.
fn classify_upstream_error(status: StatusCode, body: &str) -> ChatError {
    let lower = body.to_lowercase();
    if lower.contains("api key not valid") || lower.contains("api_key_invalid") {
        return ChatError::MissingApiKey;
    }
    if lower.contains("resource_exhausted") || lower.contains("quota") {
        return ChatError::QuotaExceeded;
    }
    if status == StatusCode::TOO_MANY_REQUESTS || lower.contains("rate limit") {
        return ChatError::RateLimited;
    }
    let snippet: String = body.trim().chars().take(300).collect();
    if snippet.is_empty() {
        ChatError::Upstream(status.to_string())
    } else {
        ChatError::Upstream(format!("{status}: {snippet}"))
    }
}

/// Body of the first fenced code block, language line stripped.
pub fn extract_code_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    let snippet = body[..end].trim_end_matches('\n');
    if snippet.is_empty() {
        None
    } else {
        Some(snippet.to_string())
    }
}

/// Parse the first fenced ```json block into a typed payload.
/// Malformed or missing payloads degrade to `None` rather than failing
/// the whole response.
pub fn extract_json_payload<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let raw = extract_code_block(text)?;
    serde_json::from_str(&raw).ok()
}

/// Decode a data URL back into an inline image part. Used when resent
/// history carries previously attached images.
pub fn inline_image_from_data_url(url: &str) -> Option<InlineImage> {
    let rest = url.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    // Validate the payload so garbage never reaches the API.
    base64::engine::general_purpose::STANDARD.decode(data).ok()?;
    Some(InlineImage {
        mime_type: mime.to_string(),
        data: data.to_string(),
    })
}
