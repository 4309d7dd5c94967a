//! Conversation memory.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub message: String,
}

/// Ordered `(role, text)` history with a bounded rendering window.
/// `to_json` exposes the full history; `get_conversation` renders only the
/// last `memory_size` messages into the prompt.
#[derive(Debug, Clone)]
pub struct Memory {
    messages: Vec<Message>,
    memory_size: usize,
    agent_description: Option<String>,
}

pub const DEFAULT_MEMORY_SIZE: usize = 10;

impl Memory {
    pub fn new(memory_size: usize, agent_description: Option<String>) -> Self {
        Self {
            messages: Vec::new(),
            memory_size,
            agent_description,
        }
    }

    pub fn add(&mut self, text: &str, is_user: bool) {
        let role = if is_user { Role::User } else { Role::Assistant };
        self.messages.push(Message {
            role,
            message: text.to_string(),
        });
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn agent_description(&self) -> Option<&str> {
        self.agent_description.as_deref()
    }

    /// Messages inside the rendering window.
    pub fn windowed(&self) -> &[Message] {
        let start = self.messages.len().saturating_sub(self.memory_size);
        &self.messages[start..]
    }

    /// Windowed history rendered for prompt assembly.
    pub fn get_conversation(&self) -> String {
        self.windowed()
            .iter()
            .map(|m| match m.role {
                Role::User => format!("### QUERY\n{}", m.message),
                Role::Assistant => format!("### ANSWER\n{}", m.message),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full history as JSON, used for cache fingerprinting and prompt
    /// structured forms.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_bounds_rendered_history() {
        let mut memory = Memory::new(2, None);
        memory.add("one", true);
        memory.add("two", false);
        memory.add("three", true);
        let conversation = memory.get_conversation();
        assert!(!conversation.contains("one"));
        assert!(conversation.contains("### ANSWER\ntwo"));
        assert!(conversation.contains("### QUERY\nthree"));
        // full history still visible to the fingerprint
        assert_eq!(memory.to_json().as_array().unwrap().len(), 3);
    }

    #[test]
    fn clear_empties_history() {
        let mut memory = Memory::new(10, Some("analyst".into()));
        memory.add("hello", true);
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.agent_description(), Some("analyst"));
    }
}
