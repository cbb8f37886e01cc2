pub mod gemini;
pub mod keypool;
pub mod offline;

use async_trait::async_trait;
use shared::chat_api::{ChatOutcome, ChatRequest};
use shared::error::ChatError;

/// A backend that can turn one chat request into one complete
/// response. Implemented by the cloud client and the offline engine;
/// the orchestrator only sees this seam.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatOutcome, ChatError>;
}
