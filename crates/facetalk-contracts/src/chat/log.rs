use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bot,
}

impl Speaker {
    pub fn label(self) -> &'static str {
        match self {
            Speaker::User => "User",
            Speaker::Bot => "Bot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Speaker,
    pub text: String,
}

/// Transcript of one conversation, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_greeting(text: impl Into<String>) -> Self {
        let mut log = Self::new();
        log.push_bot(text);
        log
    }

    /// Returns the index of the new entry.
    pub fn push_user(&mut self, text: impl Into<String>) -> usize {
        self.push(Speaker::User, text.into())
    }

    pub fn push_bot(&mut self, text: impl Into<String>) -> usize {
        self.push(Speaker::Bot, text.into())
    }

    fn push(&mut self, role: Speaker, text: String) -> usize {
        self.entries.push(ChatEntry { role, text });
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Plain-text export, one `Bot: ...` / `User: ...` line per entry.
    pub fn export_text(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}: {}", entry.role.label(), entry.text))
            .collect::<Vec<String>>()
            .join("\n")
    }
}
