//! End-to-end send pipeline.
//!
//! One `send` call covers the whole turn: input gating, quota, the
//! optimistic user append, intent classification, prompt composition,
//! backend dispatch, and handing the finished reply to the presenter.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use providers::ChatBackend;
use shared::chat_api::{ChatMessage, ChatRequest, InlineImage, Location};
use shared::types::{ChatMode, Message, Role};

use crate::intent::{detect_code_intent, should_generate_artifact};
use crate::presenter::{Presenter, StreamingState};
use crate::profile::{ImageQuotaGate, ProfileStore};
use crate::prompts::{compose_system_instruction, select_model_tier};
use crate::sessions::{MessageSink, SessionStore};

/// Prior turns handed to the backend, newest kept. The final user turn
/// is on top of this window.
const HISTORY_WINDOW: usize = 24;

/// Shown when a backend error carries no displayable text.
const FALLBACK_APOLOGY: &str = "Maaf, terjadi kendala. Coba lagi sebentar lagi, ya.";

/// What a send call did. Quota and input gating resolve before any
/// message is constructed, so `Ignored` and `ImageLimitReached` leave
/// the session untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input with no attachments, or no session to write into.
    Ignored,
    /// The daily image budget is spent.
    ImageLimitReached,
    /// A reply is streaming into the session.
    Streamed,
    /// The backend failed; the error text was appended as the reply.
    Failed,
}

pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    profiles: Arc<ProfileStore>,
    quota: Arc<dyn ImageQuotaGate>,
    cloud: Arc<dyn ChatBackend>,
    offline: Arc<dyn ChatBackend>,
    presenter: Presenter,
    streaming: Arc<StreamingState>,
    inflight: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        profiles: Arc<ProfileStore>,
        quota: Arc<dyn ImageQuotaGate>,
        cloud: Arc<dyn ChatBackend>,
        offline: Arc<dyn ChatBackend>,
        presenter: Presenter,
        streaming: Arc<StreamingState>,
    ) -> Self {
        Self {
            sessions,
            profiles,
            quota,
            cloud,
            offline,
            presenter,
            streaming,
            inflight: Mutex::new(None),
        }
    }

    /// Run one full conversation turn against the current session.
    pub async fn send(
        &self,
        input: &str,
        images: Vec<InlineImage>,
        mode: ChatMode,
        location: Option<Location>,
    ) -> SendOutcome {
        let input = input.trim();
        if input.is_empty() && images.is_empty() {
            return SendOutcome::Ignored;
        }
        let Some(session) = self.sessions.current() else {
            return SendOutcome::Ignored;
        };
        if !images.is_empty() && !self.quota.check_limit() {
            return SendOutcome::ImageLimitReached;
        }

        // A new send supersedes any reveal still in progress.
        if let Some(handle) = self.inflight.lock().take() {
            handle.abort();
        }
        self.streaming.reset();

        let mut user_message = Message::user(input);
        if !images.is_empty() {
            user_message.image_urls = Some(images.iter().map(InlineImage::to_data_url).collect());
        }
        let mut messages = session.messages.clone();
        messages.push(user_message);
        self.sessions.replace_messages(&session.id, messages.clone());

        let canvas = mode == ChatMode::Canvas;
        let intent = detect_code_intent(input, canvas);
        let profile = self.profiles.get();
        let request = ChatRequest {
            system_instruction: compose_system_instruction(mode, &intent, &profile),
            messages: backend_turns(&messages),
            tier: select_model_tier(input),
            images: images.clone(),
            location,
        };
        debug!(
            intent = ?intent.intent,
            confidence = intent.confidence,
            tier = ?request.tier,
            offline = profile.is_offline_mode,
            "dispatching turn"
        );

        let backend: &Arc<dyn ChatBackend> = if profile.is_offline_mode {
            &self.offline
        } else {
            &self.cloud
        };

        match backend.chat(&request).await {
            Ok(outcome) => {
                if !images.is_empty() {
                    self.quota.increment_usage();
                }

                let mut reply = Message::assistant(outcome.text);
                reply.code_snippet = outcome.code_snippet;
                reply.image_url = outcome.image_url;
                reply.sources = (!outcome.sources.is_empty()).then_some(outcome.sources);
                reply.ebook_data = outcome.ebook_data;
                reply.map_data = outcome.map_data;
                reply.is_offline = outcome.is_offline;
                reply.code_intent = Some(intent.intent);
                reply.should_show_artifact_card =
                    should_generate_artifact(intent.intent, canvas, input.chars().count());

                let handle = self.presenter.present(&session.id, messages, reply);
                *self.inflight.lock() = Some(handle);
                SendOutcome::Streamed
            }
            Err(e) => {
                warn!(error = %e, "backend turn failed");
                let text = e.to_string();
                let mut reply = Message::assistant(if text.is_empty() {
                    FALLBACK_APOLOGY.to_string()
                } else {
                    text
                });
                reply.is_offline = profile.is_offline_mode;
                messages.push(reply);
                self.sessions.replace_messages(&session.id, messages);
                SendOutcome::Failed
            }
        }
    }

    /// Abort any in-flight reveal and clear the streaming marker.
    /// Called when the user switches sessions mid-stream so a stale
    /// task never writes into a session that is no longer current.
    pub fn cancel_stream(&self) {
        if let Some(handle) = self.inflight.lock().take() {
            handle.abort();
        }
        self.streaming.reset();
    }

    /// Block until the current reveal finishes. Mainly for shutdown
    /// and tests.
    pub async fn wait_for_stream(&self) {
        let handle = self.inflight.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Map stored messages to backend turns, bounded to the history
/// window. Offline-fallback replies are real turns and stay in.
fn backend_turns(messages: &[Message]) -> Vec<ChatMessage> {
    let start = messages.len().saturating_sub(HISTORY_WINDOW + 1);
    messages[start..]
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            ChatMessage::new(role, m.content.clone())
        })
        .collect()
}
