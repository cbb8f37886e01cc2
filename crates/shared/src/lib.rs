pub mod error;
pub mod types;

pub mod settings {
    use serde::{Deserialize, Serialize};

    fn default_font_size() -> u8 {
        16
    }

    fn default_ui_scale() -> f32 {
        1.0
    }

    /// Model selection for the cloud backend plus the offline model tag.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        /// Default tier for ordinary conversation.
        pub light_model: String,
        /// Escalation tier for code and e-book/presentation generation.
        pub heavy_model: String,
        /// Model tag the offline engine downloads and runs locally.
        pub offline_model: String,
        /// Raw credential string; may contain comma-separated keys that
        /// are rotated per request.
        pub api_key: String,
    }

    impl Default for ModelConfig {
        fn default() -> Self {
            Self {
                light_model: "gemini-1.5-flash".into(),
                heavy_model: "gemini-1.5-pro".into(),
                offline_model: "qwen2.5:0.5b".into(),
                api_key: String::new(),
            }
        }
    }

    /// Single row of user + assistant configuration. Not versioned.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UserProfile {
        pub name: String,
        pub avatar: Option<String>,
        pub ai_name: String,
        pub ai_avatar: Option<String>,
        /// Free-text fragment injected into the system instruction.
        pub ai_persona: String,

        // Presentation passthrough; the core never interprets these.
        pub theme: String,
        pub font: String,
        #[serde(default = "default_font_size")]
        pub font_size: u8,
        #[serde(default = "default_ui_scale")]
        pub ui_scale: f32,

        /// Raises the daily image-generation quota from 5 to 100.
        #[serde(default)]
        pub is_subscribed: bool,
        /// Routes sends to the local engine instead of the cloud API.
        /// The UI boundary only enables this once the engine is ready;
        /// the orchestrator trusts the flag.
        #[serde(default)]
        pub is_offline_mode: bool,
        #[serde(default)]
        pub offline_model_downloaded: bool,

        /// Daily image-generation counter, rolled over by date.
        #[serde(default)]
        pub images_generated_today: u32,
        /// Day (YYYY-MM-DD) the counter applies to.
        #[serde(default)]
        pub last_image_date: Option<String>,
    }

    impl Default for UserProfile {
        fn default() -> Self {
            Self {
                name: String::new(),
                avatar: None,
                ai_name: "Rival".into(),
                ai_avatar: None,
                ai_persona: String::new(),
                theme: "dark".into(),
                font: "Inter".into(),
                font_size: default_font_size(),
                ui_scale: default_ui_scale(),
                is_subscribed: false,
                is_offline_mode: false,
                offline_model_downloaded: false,
                images_generated_today: 0,
                last_image_date: None,
            }
        }
    }
}

pub mod chat_api {
    use serde::{Deserialize, Serialize};

    use crate::types::{EbookData, MapData, ModelTier, WebSource};

    /// One wire-level turn: "system" | "user" | "assistant".
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String,
        pub content: String,
    }

    impl ChatMessage {
        pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
            Self {
                role: role.into(),
                content: content.into(),
            }
        }
    }

    /// An attachment already converted to embeddable form.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct InlineImage {
        pub mime_type: String,
        /// Base64 payload without a data-URL prefix.
        pub data: String,
    }

    impl InlineImage {
        /// Render as a data URL for display inside a message.
        pub fn to_data_url(&self) -> String {
            format!("data:{};base64,{}", self.mime_type, self.data)
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
    pub struct Location {
        pub latitude: f64,
        pub longitude: f64,
    }

    /// Everything a backend needs for one send.
    #[derive(Debug, Clone)]
    pub struct ChatRequest {
        /// Composed platform + persona instruction for the cloud model.
        /// The offline engine uses its own fixed preamble instead.
        pub system_instruction: String,
        /// Prior turns plus the final user turn, oldest first.
        pub messages: Vec<ChatMessage>,
        pub tier: ModelTier,
        pub images: Vec<InlineImage>,
        pub location: Option<Location>,
    }

    /// Result envelope normalized across the cloud and offline backends.
    #[derive(Debug, Clone, Default)]
    pub struct ChatOutcome {
        pub text: String,
        pub code_snippet: Option<String>,
        pub image_url: Option<String>,
        pub sources: Vec<WebSource>,
        pub ebook_data: Option<EbookData>,
        pub map_data: Option<MapData>,
        pub is_offline: bool,
    }
}
