//! Core conversation data model.
//!
//! Sessions and messages are what the session store persists; intent
//! detection results are transient and never written to disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder title until the first user message arrives.
pub const NEW_SESSION_TITLE: &str = "Obrolan Baru";

/// Maximum derived-title length in characters.
const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Conversation mode. Canvas is the only mode in which code-creation
/// intents may produce an artifact; elsewhere code stays prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Chat,
    Canvas,
}

/// Closed set of code-intent classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeIntent {
    CasualChat,
    CodeDebug,
    CodeCreation,
    CodeExplanation,
    CodeQuestion,
}

/// Binary query-complexity class used for model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryComplexity {
    Fast,
    Expert,
}

/// Cloud model tier. Light serves ordinary conversation; Heavy is the
/// escalation for code and e-book/presentation generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelTier {
    #[default]
    Light,
    Heavy,
}

/// Per-message classification result. Produced fresh for every send,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentDetection {
    pub intent: CodeIntent,
    /// 0-100.
    pub confidence: u8,
    /// Matched phrases for the winning rule only.
    pub keywords: Vec<String>,
    pub should_create_artifact: bool,
}

/// A web citation attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    pub title: String,
    pub url: String,
}

/// Coordinates rendered as a map widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EbookPage {
    pub heading: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
}

/// A generated e-book/presentation deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EbookData {
    pub title: String,
    pub pages: Vec<EbookPage>,
}

/// One turn in a conversation.
///
/// For a streaming assistant message `content` and `timestamp` are
/// rewritten on every partial snapshot until streaming completes, then
/// frozen. `id` is the streaming-target identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_urls: Option<Vec<String>>,
    /// Body of the first fenced code block embedded in `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<WebSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_data: Option<MapData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebook_data: Option<EbookData>,
    /// Saved to the gallery.
    #[serde(default)]
    pub is_saved: bool,
    /// Produced by the local engine rather than the cloud API.
    #[serde(default)]
    pub is_offline: bool,
    #[serde(default)]
    pub should_show_artifact_card: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_intent: Option<CodeIntent>,
}

impl Message {
    fn base(id: String, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp: Utc::now(),
            image_url: None,
            image_urls: None,
            code_snippet: None,
            sources: None,
            map_data: None,
            ebook_data: None,
            is_saved: false,
            is_offline: false,
            should_show_artifact_card: false,
            code_intent: None,
        }
    }

    /// New user turn. Ids are derived from creation time.
    pub fn user(content: impl Into<String>) -> Self {
        let id = Utc::now().timestamp_millis().to_string();
        Self::base(id, Role::User, content)
    }

    /// New assistant turn. The id suffix keeps a user/assistant pair
    /// created in the same millisecond distinct.
    pub fn assistant(content: impl Into<String>) -> Self {
        let id = format!("{}-ai", Utc::now().timestamp_millis());
        Self::base(id, Role::Assistant, content)
    }
}

/// One conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: NEW_SESSION_TITLE.to_string(),
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Replace the message array wholesale and refresh `updated_at`
    /// and the derived title. This is the only mutation entry point;
    /// sessions are never merged or split.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.updated_at = Utc::now();
        self.title = self.derive_title();
    }

    fn derive_title(&self) -> String {
        let Some(first_user) = self.messages.iter().find(|m| m.role == Role::User) else {
            return NEW_SESSION_TITLE.to_string();
        };
        let trimmed = first_user.content.trim();
        if trimmed.is_empty() {
            return NEW_SESSION_TITLE.to_string();
        }
        let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        if trimmed.chars().count() > TITLE_MAX_CHARS {
            title.push_str("...");
        }
        title
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}
