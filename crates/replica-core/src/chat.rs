//! Chat log shared alongside the file tree.

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Cache format: `{id, author, body, createdAt, originIsLocal}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Derived from the creation stamp; unique per origin.
    pub id: i64,
    pub author: String,
    pub body: String,
    pub created_at: Timestamp,
    pub origin_is_local: bool,
}

/// Append-only, in local arrival order, deduplicated by id.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    ids: HashSet<i64>,
    revision: u64,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns `false` if a message with the same id is already present.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        self.revision += 1;
        true
    }

    /// Replace the log wholesale. Later duplicates of an id are dropped.
    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.messages.clear();
        self.ids.clear();
        for message in messages {
            if self.ids.insert(message.id) {
                self.messages.push(message);
            }
        }
        self.revision += 1;
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.revision += 1;
    }
}
