//! UI-agnostic chat state types
//!
//! Sessions and messages as the client holds them in memory and mirrors them
//! into the local store. Nothing here talks to the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Title given to sessions that have not been named yet.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

const MAX_DERIVED_TITLE_CHARS: usize = 50;

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A file uploaded to the backend and attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A chat message in the conversation. Never edited once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileAttachment>>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            files: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn with_files(mut self, files: Vec<FileAttachment>) -> Self {
        if !files.is_empty() {
            self.files = Some(files);
        }
        self
    }
}

/// Where a session id came from.
///
/// A session starts with a client-generated id and switches to the
/// backend-issued one once the backend has created the chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SessionId {
    Local { temp_id: String },
    Remote { id: String },
}

impl SessionId {
    pub fn new_local() -> Self {
        SessionId::Local {
            temp_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn remote(id: impl Into<String>) -> Self {
        SessionId::Remote { id: id.into() }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SessionId::Local { temp_id } => temp_id,
            SessionId::Remote { id } => id,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SessionId::Remote { .. })
    }

    /// The backend id, if the backend knows this session.
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            SessionId::Remote { id } => Some(id),
            SessionId::Local { .. } => None,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub model: String,
    #[serde(default)]
    pub pinned: bool,
}

impl ChatSession {
    /// A fresh, empty session that the backend does not know about yet.
    pub fn new_local(model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new_local(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            model: model.into(),
            pinned: false,
        }
    }

    pub fn has_default_title(&self) -> bool {
        is_default_title(&self.title)
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.updated_at = message.timestamp;
        self.messages.push(message);
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub fn is_default_title(title: &str) -> bool {
    let title = title.trim();
    title.is_empty() || title == DEFAULT_SESSION_TITLE
}

/// Derives a session title from the first outgoing message.
pub fn title_from_message(content: &str) -> String {
    let first_line = content.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if first_line.is_empty() {
        return DEFAULT_SESSION_TITLE.to_string();
    }

    let mut title: String = first_line.chars().take(MAX_DERIVED_TITLE_CHARS).collect();
    if first_line.chars().count() > MAX_DERIVED_TITLE_CHARS {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_serializes_as_tagged_union() {
        let local = SessionId::Local { temp_id: "abc".into() };
        let json = serde_json::to_value(&local).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "local", "temp_id": "abc"}));

        let remote: SessionId =
            serde_json::from_value(serde_json::json!({"kind": "remote", "id": "r-1"})).unwrap();
        assert_eq!(remote.remote_id(), Some("r-1"));
        assert!(remote.is_remote());
    }

    #[test]
    fn test_new_local_ids_are_unique() {
        assert_ne!(SessionId::new_local(), SessionId::new_local());
    }

    #[test]
    fn test_title_from_message() {
        assert_eq!(title_from_message("hello"), "hello");
        assert_eq!(title_from_message("\n  first line \nsecond"), "first line");
        assert_eq!(title_from_message("   "), DEFAULT_SESSION_TITLE);

        let long = "x".repeat(80);
        let title = title_from_message(&long);
        assert_eq!(title.chars().count(), MAX_DERIVED_TITLE_CHARS + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_push_updates_timestamp() {
        let mut session = ChatSession::new_local("model-a");
        let message = ChatMessage::user("hi");
        let stamp = message.timestamp;
        session.push(message);
        assert_eq!(session.updated_at, stamp);
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&ChatRole::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(ChatRole::User.as_str(), "user");
    }
}
