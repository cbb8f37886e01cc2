//! Word-by-word reveal of a completed assistant reply.
//!
//! Generation finishes before presentation starts. The presenter then
//! replays the final text one word at a time, publishing a full
//! message-array snapshot through the store on every step so readers
//! always observe a consistent conversation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use shared::types::Message;

use crate::sessions::MessageSink;

const WORD_DELAY: Duration = Duration::from_millis(35);

/// Which message id, if any, is currently being streamed. The UI keys
/// its typing indicator off this.
#[derive(Default)]
pub struct StreamingState {
    current: Mutex<Option<String>>,
}

impl StreamingState {
    pub fn streaming_id(&self) -> Option<String> {
        self.current.lock().clone()
    }

    pub fn set(&self, id: &str) {
        *self.current.lock() = Some(id.to_string());
    }

    /// Clears only if `id` is still the active stream, so a newer
    /// stream started for the same session is never clobbered.
    pub fn clear_if(&self, id: &str) {
        let mut current = self.current.lock();
        if current.as_deref() == Some(id) {
            *current = None;
        }
    }

    pub fn reset(&self) {
        *self.current.lock() = None;
    }
}

pub struct Presenter {
    sink: Arc<dyn MessageSink>,
    streaming: Arc<StreamingState>,
    word_delay: Duration,
}

impl Presenter {
    pub fn new(sink: Arc<dyn MessageSink>, streaming: Arc<StreamingState>) -> Self {
        Self {
            sink,
            streaming,
            word_delay: WORD_DELAY,
        }
    }

    /// Tests shorten the delay instead of faking the clock.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.word_delay = delay;
        self
    }

    /// Reveal `reply` into the session word by word. The streaming
    /// marker is set before this returns; the reveal itself runs on a
    /// spawned task whose handle the caller may abort.
    pub fn present(
        &self,
        session_id: &str,
        base_messages: Vec<Message>,
        reply: Message,
    ) -> JoinHandle<()> {
        self.streaming.set(&reply.id);

        let sink = Arc::clone(&self.sink);
        let streaming = Arc::clone(&self.streaming);
        let session_id = session_id.to_string();
        let delay = self.word_delay;

        tokio::spawn(async move {
            let full_text = reply.content.clone();
            // Splitting on single spaces keeps newlines and runs of
            // whitespace attached to the surrounding words, so joining
            // the pieces reproduces the text byte for byte.
            let words: Vec<&str> = full_text.split(' ').collect();

            let mut shown = String::new();
            for (i, word) in words.iter().enumerate() {
                // Abort only lands at an await point, so a superseded
                // task could otherwise publish one more snapshot after
                // a new send took over. Re-check ownership of the
                // stream before every write.
                if streaming.streaming_id().as_deref() != Some(reply.id.as_str()) {
                    return;
                }
                if i > 0 {
                    shown.push(' ');
                }
                shown.push_str(word);

                let mut snapshot = reply.clone();
                snapshot.content = shown.clone();
                snapshot.timestamp = Utc::now();

                let mut messages = base_messages.clone();
                messages.push(snapshot);
                sink.replace_messages(&session_id, messages);

                if i + 1 < words.len() {
                    tokio::time::sleep(delay).await;
                }
            }
            streaming.clear_if(&reply.id);
        })
    }
}
