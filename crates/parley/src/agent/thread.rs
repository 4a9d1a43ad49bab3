//! A conversation thread: the ordered history of one logical session.

use crate::{Message, MessageRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    /// Ordered history. Once the first round commits, the first entry is the
    /// system instruction.
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            created_at: now,
            last_active_at: now,
        }
    }

    /// Whether the system instruction is already in place.
    pub fn has_system_instruction(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|m| m.role == MessageRole::System)
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}
