//! Per-conversation bounded turn history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Characters of a turn kept when serializing history for the reasoning service
const HISTORY_CONTENT_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One recorded message. Never modified after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub max_exchanges: usize,
}

/// Bounded FIFO of turns owned by a single conversation.
///
/// Holds at most `2 * max_exchanges` turns (one user and one assistant turn per
/// exchange). Inserting past the bound evicts the oldest turns first.
#[derive(Debug, Clone)]
pub struct SessionMemory {
    turns: VecDeque<Turn>,
    max_exchanges: usize,
}

impl SessionMemory {
    pub fn new(max_exchanges: usize) -> Self {
        let max_exchanges = max_exchanges.max(1);
        Self {
            turns: VecDeque::with_capacity(max_exchanges * 2),
            max_exchanges,
        }
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push_back(Turn {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });

        while self.turns.len() > self.max_exchanges * 2 {
            self.turns.pop_front();
        }
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.add_message(Role::User, content);
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.add_message(Role::Assistant, content);
    }

    /// Format the last `last_n` exchanges as `ROLE: content` lines.
    ///
    /// Output size is bounded by `last_n` regardless of how much is stored:
    /// each turn is cut to 200 characters.
    ///
    /// ```
    /// use warden_engine::memory::SessionMemory;
    ///
    /// let mut session = SessionMemory::new(8);
    /// assert_eq!(session.history_string(5), "No prior conversation.");
    ///
    /// session.add_user("analyze src/");
    /// session.add_assistant("Done.");
    /// assert_eq!(session.history_string(5), "USER: analyze src/\nASSISTANT: Done.");
    /// ```
    pub fn history_string(&self, last_n: usize) -> String {
        let keep = last_n.saturating_mul(2);
        let skip = self.turns.len().saturating_sub(keep);

        let lines: Vec<String> = self
            .turns
            .iter()
            .skip(skip)
            .map(|turn| {
                format!(
                    "{}: {}",
                    turn.role.to_string().to_uppercase(),
                    truncate_chars(&turn.content, HISTORY_CONTENT_LIMIT)
                )
            })
            .collect();

        if lines.is_empty() {
            "No prior conversation.".to_string()
        } else {
            lines.join("\n")
        }
    }

    pub fn conversation_summary(&self) -> String {
        if self.turns.is_empty() {
            return "New conversation".to_string();
        }
        format!("{} messages exchanged", self.count(Role::User))
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            total_messages: self.turns.len(),
            user_messages: self.count(Role::User),
            assistant_messages: self.count(Role::Assistant),
            max_exchanges: self.max_exchanges,
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_exchanges(&self) -> usize {
        self.max_exchanges
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn count(&self, role: Role) -> usize {
        self.turns.iter().filter(|t| t.role == role).count()
    }
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new(8)
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
