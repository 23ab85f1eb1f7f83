//! Conversational messages and token deltas surfaced during a build.
//!
//! Components emit chat output while they run: whole messages
//! (`add_message` / `remove_message`) and incremental token deltas that
//! append to an existing message. The [`MessageStore`] keeps that state for
//! the session and guarantees token ordering: deltas apply in sequence order
//! per message, and replaying a delta is a no-op.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A chat message produced during a build.
///
/// # Examples
///
/// ```rust
/// use flowbuild::message::ChatMessage;
///
/// let notice = ChatMessage::machine("Build finished");
/// assert_eq!(notice.sender, ChatMessage::MACHINE);
///
/// let failure = ChatMessage::error("Component exploded");
/// assert!(failure.is_error());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default = "generated_id")]
    pub id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub text: String,
    /// `"message"` for ordinary chat output, `"error"` for user-visible
    /// failures.
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn generated_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_category() -> String {
    ChatMessage::CATEGORY_MESSAGE.to_string()
}

impl ChatMessage {
    /// Sender value for component-produced output.
    pub const MACHINE: &'static str = "Machine";
    /// Sender value for user input echoed into the conversation.
    pub const USER: &'static str = "User";

    pub const CATEGORY_MESSAGE: &'static str = "message";
    pub const CATEGORY_ERROR: &'static str = "error";

    /// Create a message with an explicit sender.
    #[must_use]
    pub fn new(sender: &str, sender_name: &str, text: &str) -> Self {
        Self {
            id: generated_id(),
            sender: sender.to_string(),
            sender_name: sender_name.to_string(),
            session_id: None,
            text: text.to_string(),
            category: default_category(),
            timestamp: Utc::now(),
        }
    }

    /// Component-produced message.
    #[must_use]
    pub fn machine(text: &str) -> Self {
        Self::new(Self::MACHINE, Self::MACHINE, text)
    }

    /// User-authored message.
    #[must_use]
    pub fn user(text: &str) -> Self {
        Self::new(Self::USER, Self::USER, text)
    }

    /// User-visible error message.
    #[must_use]
    pub fn error(text: &str) -> Self {
        let mut message = Self::machine(text);
        message.category = Self::CATEGORY_ERROR.to_string();
        message
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.category == Self::CATEGORY_ERROR
    }
}

/// An incremental text delta for an existing message.
///
/// `seq` orders deltas within one message. Streams that do not number their
/// tokens leave it unset and are applied in arrival order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDelta {
    /// Message the chunk belongs to.
    pub id: String,
    pub chunk: String,
    #[serde(default)]
    pub seq: Option<u64>,
}

#[derive(Debug)]
struct MessageSlot {
    message: ChatMessage,
    /// Chunk text keyed by sequence number; the map keeps deltas ordered and
    /// makes replaying a sequence number a no-op.
    chunks: BTreeMap<u64, String>,
    next_seq: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    order: Vec<String>,
    slots: FxHashMap<String, MessageSlot>,
}

/// Session-lifetime store of chat messages with ordered token application.
///
/// Cloning a `MessageStore` clones a handle to the same store.
#[derive(Clone, Default)]
pub struct MessageStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Re-adding an id replaces the message text but keeps
    /// its position.
    pub fn add(&self, message: ChatMessage) {
        let mut inner = self.inner.lock().expect("message store poisoned");
        let id = message.id.clone();
        if let Some(slot) = inner.slots.get_mut(&id) {
            slot.message = message;
        } else {
            inner.order.push(id.clone());
            inner.slots.insert(
                id,
                MessageSlot {
                    message,
                    chunks: BTreeMap::new(),
                    next_seq: 0,
                },
            );
        }
    }

    /// Remove a message. Returns false when the id is unknown.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("message store poisoned");
        if inner.slots.remove(id).is_none() {
            return false;
        }
        inner.order.retain(|existing| existing != id);
        true
    }

    /// Apply a token delta to an existing message.
    ///
    /// Returns false when the message id is unknown; the delta is dropped.
    /// Deltas carrying a sequence number land at that position regardless of
    /// arrival order, and a repeated sequence number is ignored.
    pub fn apply_token(&self, delta: &TokenDelta) -> bool {
        let mut inner = self.inner.lock().expect("message store poisoned");
        let Some(slot) = inner.slots.get_mut(&delta.id) else {
            return false;
        };
        let seq = delta.seq.unwrap_or(slot.next_seq);
        slot.next_seq = slot.next_seq.max(seq + 1);
        slot.chunks.entry(seq).or_insert_with(|| delta.chunk.clone());
        true
    }

    /// Materialized text of one message: its base text plus all applied
    /// chunks in sequence order.
    #[must_use]
    pub fn text_of(&self, id: &str) -> Option<String> {
        let inner = self.inner.lock().expect("message store poisoned");
        inner.slots.get(id).map(materialize)
    }

    /// Snapshot of all messages in insertion order, with token chunks
    /// materialized into the text.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        let inner = self.inner.lock().expect("message store poisoned");
        inner
            .order
            .iter()
            .filter_map(|id| inner.slots.get(id))
            .map(|slot| {
                let mut message = slot.message.clone();
                message.text = materialize(slot);
                message
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("message store poisoned").order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("message store poisoned");
        inner.order.clear();
        inner.slots.clear();
    }
}

fn materialize(slot: &MessageSlot) -> String {
    let mut text = slot.message.text.clone();
    for chunk in slot.chunks.values() {
        text.push_str(chunk);
    }
    text
}
