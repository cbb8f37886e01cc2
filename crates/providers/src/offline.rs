//! Local chat backend.
//!
//! Manages a single shared inference runtime with an explicit
//! lifecycle: download-with-progress, cancellation, templated
//! generation, reply extraction. `init` and `chat` are serialized
//! against each other so interleaved calls never corrupt the runtime.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use shared::chat_api::{ChatMessage, ChatOutcome, ChatRequest};
use shared::error::ChatError;

use crate::ChatBackend;

/// In-band reply when offline mode is selected before the model is
/// ready. Deliberately not an error: offline is an optional degraded
/// path.
pub const NOT_READY_REPLY: &str =
    "Model offline belum siap. Unduh dulu modelnya lewat pengaturan, ya.";

// Turn delimiters the offline model was tuned on.
const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";
const ASSISTANT_MARKER: &str = "<|im_start|>assistant";

const SYSTEM_PREAMBLE: &str = "Kamu adalah Rival, asisten AI yang ramah dan ringkas. \
Jawab dalam bahasa yang dipakai pengguna, tanpa basa-basi berlebihan.";

/// How many prior turns are kept in the templated prompt.
const HISTORY_WINDOW: usize = 4;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .expect("failed to build HTTP client")
});

/// Fixed sampling parameters for local generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOptions {
    pub num_predict: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub stop: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            num_predict: 512,
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            repeat_penalty: 1.1,
            stop: vec![IM_END.to_string(), IM_START.to_string()],
        }
    }
}

/// The underlying inference runtime, consumed as a black box: a model
/// pull with progress plus raw-prompt generation.
#[async_trait]
pub trait LocalRuntime: Send + Sync {
    /// Download/set up the model, emitting fractional progress (0-1).
    /// Implementations should return early once `cancelled` is raised;
    /// the engine treats that as an abandoned, not failed, setup.
    async fn pull(
        &self,
        model: &str,
        progress: UnboundedSender<f32>,
        cancelled: Arc<AtomicBool>,
    ) -> anyhow::Result<()>;

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

/// Pull progress: each line of the streamed body is one of these.
#[derive(Debug, Deserialize)]
struct PullChunk {
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    raw: bool,
    stream: bool,
    options: &'a GenerationOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP implementation against an Ollama-compatible runtime.
pub struct HttpRuntime {
    http: Client,
    base: String,
}

impl HttpRuntime {
    pub fn new() -> Self {
        let base = env::var("RIVAL_RUNTIME_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string());
        Self {
            http: SHARED_HTTP.clone(),
            base,
        }
    }

    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base: base.into(),
        }
    }

    /// TCP-level readiness probe for the UI boundary, so offline mode
    /// is only offered when a runtime is actually listening.
    pub fn reachable(&self) -> bool {
        let Some(addr) = self
            .base
            .strip_prefix("http://")
            .and_then(|rest| rest.parse::<std::net::SocketAddr>().ok())
        else {
            return false;
        };
        std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_ok()
    }
}

impl Default for HttpRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalRuntime for HttpRuntime {
    async fn pull(
        &self,
        model: &str,
        progress: UnboundedSender<f32>,
        cancelled: Arc<AtomicBool>,
    ) -> anyhow::Result<()> {
        let url = format!("{}/api/pull", self.base);
        let req = PullRequest {
            name: model,
            stream: true,
        };
        let resp = self.http.post(url).json(&req).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("runtime pull error: {}", resp.status());
        }

        // The runtime streams line-delimited JSON progress objects.
        let mut stream = resp.bytes_stream();
        let mut buf = String::new();

        while let Some(chunk) = stream.next().await {
            if cancelled.load(Ordering::SeqCst) {
                debug!(model, "model pull abandoned by cancellation");
                return Ok(());
            }
            let bytes = chunk.map_err(|e| anyhow::anyhow!("pull stream read error: {e}"))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim().to_string();
                buf = buf[pos + 1..].to_string();
                if line.is_empty() {
                    continue;
                }
                let parsed: PullChunk = match serde_json::from_str(&line) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if let Some(err) = parsed.error {
                    anyhow::bail!("runtime pull failed: {err}");
                }
                if let (Some(done), Some(total)) = (parsed.completed, parsed.total) {
                    if total > 0 {
                        let _ = progress.send((done as f32 / total as f32).clamp(0.0, 1.0));
                    }
                }
            }
        }

        let _ = progress.send(1.0);
        Ok(())
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> anyhow::Result<String> {
        let url = format!("{}/api/generate", self.base);
        let req = GenerateRequest {
            model,
            prompt,
            raw: true,
            stream: false,
            options: opts,
        };
        let resp = self.http.post(url).json(&req).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("runtime generate error: {}", resp.status());
        }
        let body: GenerateResponse = resp.json().await?;
        Ok(body.response)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Process-wide owner of the local inference runtime.
pub struct OfflineEngine {
    runtime: Arc<dyn LocalRuntime>,
    model: String,
    state: Mutex<EngineState>,
    cancel_requested: Arc<AtomicBool>,
    working: AtomicBool,
    /// Serializes `init` and `chat` so only one touches the runtime
    /// at a time.
    turn_lock: tokio::sync::Mutex<()>,
    options: GenerationOptions,
}

impl OfflineEngine {
    pub fn new(runtime: Arc<dyn LocalRuntime>, model: impl Into<String>) -> Self {
        Self {
            runtime,
            model: model.into(),
            state: Mutex::new(EngineState::Uninitialized),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            working: AtomicBool::new(false),
            turn_lock: tokio::sync::Mutex::new(()),
            options: GenerationOptions::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.state.lock() == EngineState::Ready
    }

    pub fn is_initializing(&self) -> bool {
        *self.state.lock() == EngineState::Initializing
    }

    /// A generation pass is currently executing.
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    /// Idempotent. Raises the cancellation flag and clears the
    /// initializing status immediately; the underlying download may
    /// take a moment longer to actually stop.
    pub fn cancel_init(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        let mut state = self.state.lock();
        if *state == EngineState::Initializing {
            *state = EngineState::Uninitialized;
        }
    }

    /// Download and set up the model. No-op when already ready.
    ///
    /// A cancelled setup resolves without error but leaves the engine
    /// not ready; callers must re-check `is_ready()`. A genuine
    /// failure resets the engine and is re-thrown.
    pub async fn init(&self, progress: UnboundedSender<f32>) -> Result<(), ChatError> {
        let _guard = self.turn_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        self.cancel_requested.store(false, Ordering::SeqCst);
        *self.state.lock() = EngineState::Initializing;
        debug!(model = %self.model, "offline model setup started");

        let result = self
            .runtime
            .pull(&self.model, progress, Arc::clone(&self.cancel_requested))
            .await;

        match result {
            Ok(()) => {
                if self.cancel_requested.load(Ordering::SeqCst) {
                    *self.state.lock() = EngineState::Uninitialized;
                    Ok(())
                } else {
                    *self.state.lock() = EngineState::Ready;
                    debug!(model = %self.model, "offline model ready");
                    Ok(())
                }
            }
            Err(e) => {
                *self.state.lock() = EngineState::Uninitialized;
                warn!(model = %self.model, error = %e, "offline model setup failed");
                Err(ChatError::EngineSetup(e.to_string()))
            }
        }
    }

    /// Generate one reply. Soft-fails with an in-band reply when the
    /// engine is not ready.
    pub async fn chat(
        &self,
        input: &str,
        history: &[ChatMessage],
    ) -> Result<String, ChatError> {
        if !self.is_ready() {
            return Ok(NOT_READY_REPLY.to_string());
        }

        let _guard = self.turn_lock.lock().await;
        self.working.store(true, Ordering::SeqCst);
        let prompt = build_prompt(input, history);
        let result = self
            .runtime
            .generate(&self.model, &prompt, &self.options)
            .await;
        self.working.store(false, Ordering::SeqCst);

        match result {
            Ok(raw) => Ok(extract_reply(&raw)),
            Err(e) => Err(ChatError::Upstream(e.to_string())),
        }
    }
}

#[async_trait]
impl ChatBackend for OfflineEngine {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatOutcome, ChatError> {
        let (input, history) = match req.messages.split_last() {
            Some((last, rest)) if last.role == "user" => (last.content.as_str(), rest),
            _ => ("", req.messages.as_slice()),
        };
        let text = OfflineEngine::chat(self, input, history).await?;
        Ok(ChatOutcome {
            text,
            is_offline: true,
            ..ChatOutcome::default()
        })
    }
}

/// Fixed system preamble, the last four history turns, and the new
/// user turn, each wrapped in the turn delimiters, ending with an open
/// assistant turn for the model to complete.
fn build_prompt(input: &str, history: &[ChatMessage]) -> String {
    let mut prompt = format!("{IM_START}system\n{SYSTEM_PREAMBLE}{IM_END}\n");
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    for turn in &history[start..] {
        prompt.push_str(&format!(
            "{IM_START}{}\n{}{IM_END}\n",
            turn.role, turn.content
        ));
    }
    prompt.push_str(&format!("{IM_START}user\n{input}{IM_END}\n"));
    prompt.push_str(&format!("{IM_START}assistant\n"));
    prompt
}

/// Newest assistant turn from potentially malformed raw output: text
/// after the last assistant marker, cut at the next end-of-turn
/// marker. Without a marker, the whole trimmed output stands.
fn extract_reply(raw: &str) -> String {
    let Some(pos) = raw.rfind(ASSISTANT_MARKER) else {
        return raw.trim().to_string();
    };
    let after = &raw[pos + ASSISTANT_MARKER.len()..];
    let end = after.find(IM_END).unwrap_or(after.len());
    after[..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::unbounded_channel;

    /// Scripted runtime for lifecycle tests: no network involved.
    struct FakeRuntime {
        fail_pull: bool,
        cancel_during_pull: bool,
        generate_delay_ms: u64,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeRuntime {
        fn new() -> Self {
            Self {
                fail_pull: false,
                cancel_during_pull: false,
                generate_delay_ms: 0,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail_pull: true,
                ..Self::new()
            }
        }

        fn cancelling() -> Self {
            Self {
                cancel_during_pull: true,
                ..Self::new()
            }
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                generate_delay_ms: delay_ms,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl LocalRuntime for FakeRuntime {
        async fn pull(
            &self,
            _model: &str,
            progress: UnboundedSender<f32>,
            cancelled: Arc<AtomicBool>,
        ) -> anyhow::Result<()> {
            if self.fail_pull {
                anyhow::bail!("download interrupted");
            }
            let _ = progress.send(0.5);
            if self.cancel_during_pull {
                // Emulates the user hitting cancel mid-download.
                cancelled.store(true, Ordering::SeqCst);
            }
            if cancelled.load(Ordering::SeqCst) {
                return Ok(());
            }
            let _ = progress.send(1.0);
            Ok(())
        }

        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _opts: &GenerationOptions,
        ) -> anyhow::Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.generate_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.generate_delay_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("halo dari model lokal".to_string())
        }
    }

    fn engine(runtime: FakeRuntime) -> OfflineEngine {
        OfflineEngine::new(Arc::new(runtime), "qwen2.5:0.5b")
    }

    #[test]
    fn prompt_template_keeps_last_four_turns() {
        let history: Vec<ChatMessage> = (0..6)
            .map(|i| {
                let role = if i % 2 == 0 { "user" } else { "assistant" };
                ChatMessage::new(role, format!("pesan {i}"))
            })
            .collect();

        let prompt = build_prompt("pertanyaan baru", &history);
        assert!(prompt.starts_with("<|im_start|>system\n"));
        assert!(!prompt.contains("pesan 0"));
        assert!(!prompt.contains("pesan 1"));
        assert!(prompt.contains("pesan 2"));
        assert!(prompt.contains("pesan 5"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn reply_extraction_handles_markers_and_malformed_output() {
        let raw = "<|im_start|>assistant\njawaban pertama<|im_end|>\n<|im_start|>assistant\njawaban kedua<|im_end|>sisa";
        assert_eq!(extract_reply(raw), "jawaban kedua");

        // End marker missing: take everything after the last start.
        assert_eq!(
            extract_reply("<|im_start|>assistant\ntanpa penutup"),
            "tanpa penutup"
        );

        // No markers at all: whole output, trimmed.
        assert_eq!(extract_reply("  jawaban polos \n"), "jawaban polos");
    }

    #[tokio::test]
    async fn chat_before_init_soft_fails_in_band() {
        let engine = engine(FakeRuntime::new());
        let reply = engine.chat("hai", &[]).await.unwrap();
        assert_eq!(reply, NOT_READY_REPLY);
        assert!(!engine.is_ready());
    }

    #[tokio::test]
    async fn init_reports_progress_and_reaches_ready() {
        let engine = engine(FakeRuntime::new());
        let (tx, mut rx) = unbounded_channel();
        engine.init(tx).await.unwrap();
        assert!(engine.is_ready());
        assert_eq!(rx.recv().await, Some(0.5));
        assert_eq!(rx.recv().await, Some(1.0));

        // Second init is a no-op.
        let (tx, _rx) = unbounded_channel();
        engine.init(tx).await.unwrap();
        assert!(engine.is_ready());
    }

    #[tokio::test]
    async fn failed_setup_resets_state_and_rethrows() {
        let engine = engine(FakeRuntime::failing());
        let (tx, _rx) = unbounded_channel();
        let err = engine.init(tx).await.unwrap_err();
        assert!(matches!(err, ChatError::EngineSetup(_)));
        assert!(!engine.is_ready());
        assert!(!engine.is_initializing());
    }

    #[tokio::test]
    async fn cancelled_setup_resolves_without_readiness() {
        let engine = engine(FakeRuntime::cancelling());
        let (tx, mut rx) = unbounded_channel();
        engine.init(tx).await.unwrap();
        assert!(!engine.is_ready());
        assert!(!engine.is_initializing());
        // Progress reporting stopped at the cancellation point.
        assert_eq!(rx.recv().await, Some(0.5));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn cancel_init_is_idempotent() {
        let engine = engine(FakeRuntime::new());
        engine.cancel_init();
        engine.cancel_init();
        assert!(!engine.is_ready());
        assert!(!engine.is_initializing());
    }

    #[tokio::test]
    async fn ready_engine_generates_and_extracts() {
        let engine = engine(FakeRuntime::new());
        let (tx, _rx) = unbounded_channel();
        engine.init(tx).await.unwrap();

        let history = vec![ChatMessage::new("user", "hai")];
        let reply = engine.chat("apa kabar?", &history).await.unwrap();
        assert_eq!(reply, "halo dari model lokal");
        assert!(!engine.is_working());
    }

    #[tokio::test]
    async fn interleaved_chats_are_serialized() {
        let runtime = Arc::new(FakeRuntime::slow(30));
        let engine = Arc::new(OfflineEngine::new(
            Arc::clone(&runtime) as Arc<dyn LocalRuntime>,
            "qwen2.5:0.5b",
        ));
        let (tx, _rx) = unbounded_channel();
        engine.init(tx).await.unwrap();

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.chat("satu", &[]).await })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.chat("dua", &[]).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(runtime.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_impl_tags_offline_provenance() {
        let engine = engine(FakeRuntime::new());
        let req = ChatRequest {
            system_instruction: String::new(),
            messages: vec![ChatMessage::new("user", "hai")],
            tier: Default::default(),
            images: vec![],
            location: None,
        };
        let outcome = ChatBackend::chat(&engine, &req).await.unwrap();
        assert!(outcome.is_offline);
        assert_eq!(outcome.text, NOT_READY_REPLY);
    }
}
