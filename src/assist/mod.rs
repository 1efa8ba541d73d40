//! Request/response collaborators around the overlay.
//!
//! None of these take part in the render loop. They are the services the
//! assistant shell talks to, reduced to async traits so concrete backends
//! (hosted completion APIs, a database service, the platform speech engine)
//! can be plugged in:
//! - `ChatStore`: chats and their messages, keyed by chat id
//! - `TextCompletion`: prompt in, text out
//! - `VisionCompletion`: image plus prompt in, text out
//! - `Transcriber`: recorded audio in, text out
//! - `SpeechSynthesizer`: text to spoken audio, reporting progress as events
//!
//! `VoiceQuery` chains them for the "ask about what the camera sees" flow.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

mod memory;

pub use memory::InMemoryChatStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub created_at: u64,
    pub messages: Vec<ChatMessage>,
}

/// Persistence for chats and messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat(&self, title: &str) -> Result<Chat>;
    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>>;
    /// Newest first.
    async fn list_chats(&self) -> Result<Vec<Chat>>;
    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<()>;
    /// Returns false when no such chat existed.
    async fn delete_chat(&self, chat_id: &str) -> Result<bool>;

    async fn add_message(&self, chat_id: &str, role: Role, content: &str) -> Result<ChatMessage>;
    async fn update_message(&self, chat_id: &str, message_id: &str, content: &str) -> Result<()>;
    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait VisionCompletion: Send + Sync {
    /// `image` is an encoded still (JPEG).
    async fn describe(&self, image: &[u8], prompt: &str) -> Result<String>;
}

/// Recorded audio as produced by the recorder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioClip {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioClip) -> Result<String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpeechEvent {
    Started,
    Finished,
    Failed(String),
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text`, reporting progress on `events`. Returns once playback
    /// has ended (or failed to start).
    async fn speak(&self, text: &str, events: mpsc::UnboundedSender<SpeechEvent>) -> Result<()>;
}

// ----------------------------------------------------------------------------
// VoiceQuery
// ----------------------------------------------------------------------------

/// Outcome of one voice question.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceAnswer {
    pub question: String,
    pub answer: String,
    /// True when speech playback finished.
    pub spoken: bool,
}

/// Transcribe a spoken question, ask the vision model about the current frame,
/// store both sides in the chat, then read the answer aloud.
pub struct VoiceQuery<'a> {
    pub transcriber: &'a dyn Transcriber,
    pub vision: &'a dyn VisionCompletion,
    pub store: &'a dyn ChatStore,
    pub speech: &'a dyn SpeechSynthesizer,
}

impl VoiceQuery<'_> {
    pub async fn ask(&self, chat_id: &str, audio: &AudioClip, image: &[u8]) -> Result<VoiceAnswer> {
        if audio.bytes.is_empty() {
            return Err(anyhow!("no audio was recorded"));
        }
        let question = self
            .transcriber
            .transcribe(audio)
            .await
            .context("transcribe question")?;
        let question = question.trim().to_string();
        if question.is_empty() {
            return Err(anyhow!("nothing was said"));
        }
        log::info!("voice query for chat {}: {} chars", chat_id, question.len());

        let answer = self
            .vision
            .describe(image, &question)
            .await
            .context("analyze frame")?;

        self.store
            .add_message(chat_id, Role::User, &question)
            .await
            .context("store question")?;
        self.store
            .add_message(chat_id, Role::Assistant, &answer)
            .await
            .context("store answer")?;

        let spoken = self.read_aloud(&answer).await;
        Ok(VoiceAnswer {
            question,
            answer,
            spoken,
        })
    }

    /// Speech failures are logged; the answer is already stored and returned.
    async fn read_aloud(&self, text: &str) -> bool {
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Err(err) = self.speech.speak(text, tx).await {
            log::warn!("speech playback failed: {:#}", err);
            return false;
        }
        let mut finished = false;
        while let Some(event) = rx.recv().await {
            match event {
                SpeechEvent::Started => log::debug!("speech started"),
                SpeechEvent::Finished => finished = true,
                SpeechEvent::Failed(reason) => {
                    log::warn!("speech playback failed: {}", reason);
                    return false;
                }
            }
        }
        finished
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
