//! Request and response bodies exchanged with the chat backend.

use crate::state::{ChatMessage, ChatRole, FileAttachment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignInResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// One row of the paginated chat list.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteChatSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub pinned: Option<bool>,
}

/// A full chat record. The conversation lives in the free-form `chat` blob.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteChat {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub chat: Value,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RemoteMessage {
    #[serde(default)]
    id: Option<String>,
    role: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    files: Option<Vec<FileAttachment>>,
}

impl RemoteChat {
    /// Messages stored in the chat blob, skipping roles the client doesn't show.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let Some(raw) = self.chat.get("messages").and_then(Value::as_array) else {
            return Vec::new();
        };

        raw.iter()
            .filter_map(|m| serde_json::from_value::<RemoteMessage>(m.clone()).ok())
            .filter_map(|m| {
                let role = match m.role.as_str() {
                    "user" => ChatRole::User,
                    "assistant" => ChatRole::Assistant,
                    _ => return None,
                };
                let content = match m.content {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                let mut message = ChatMessage::new(role, content);
                if let Some(id) = m.id {
                    message.id = id;
                }
                if let Some(ts) = parse_timestamp(&m.timestamp) {
                    message.timestamp = ts;
                }
                message.files = m.files;
                Some(message)
            })
            .collect()
    }
}

/// The backend reports timestamps as epoch seconds, some older records in
/// milliseconds.
pub fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 10_000_000_000 {
        DateTime::from_timestamp_millis(ts)
    } else {
        DateTime::from_timestamp(ts, 0)
    }
}

// Histories written by this client carry RFC 3339 strings.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(timestamp_to_datetime),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        _ => None,
    }
}

/// Body for chat creation and full-history replacement.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub title: String,
    pub models: Vec<String>,
    pub messages: Vec<ChatMessage>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatEnvelope<'a> {
    pub chat: &'a ChatPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

impl From<&ChatMessage> for CompletionMessage {
    fn from(m: &ChatMessage) -> Self {
        Self {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }
    }
}

/// Optional backend features toggled per request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Features {
    pub web_search: bool,
    pub image_generation: bool,
    pub code_interpreter: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<CompletionMessage>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub stream: bool,
    pub features: Features,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
}

/// Body of the best-effort "completed" notification.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRequest {
    pub model: String,
    pub messages: Vec<CompletionMessage>,
    pub chat_id: String,
    pub session_id: String,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileProcessing {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl FileStatus {
    pub fn processing(&self) -> FileProcessing {
        match self.status.to_lowercase().as_str() {
            "completed" | "done" | "success" => FileProcessing::Completed,
            "failed" | "error" => FileProcessing::Failed,
            _ => FileProcessing::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_chat_messages_skip_system_roles() {
        let chat: RemoteChat = serde_json::from_value(json!({
            "id": "chat-1",
            "title": "Greeting",
            "chat": {"messages": [
                {"role": "system", "content": "be nice"},
                {"id": "m1", "role": "user", "content": "hello", "timestamp": 1_700_000_000},
                {"role": "assistant", "content": "hi there"}
            ]}
        }))
        .unwrap();

        let messages = chat.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[0].timestamp.timestamp(), 1_700_000_000);
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].content, "hi there");
    }

    #[test]
    fn test_remote_chat_reads_back_client_history() {
        let written = vec![ChatMessage::user("hello"), ChatMessage::assistant("hi")];
        let chat = RemoteChat {
            id: "c".into(),
            title: String::new(),
            chat: json!({ "messages": written }),
            created_at: None,
            updated_at: None,
        };
        assert_eq!(chat.messages(), written);
    }

    #[test]
    fn test_remote_chat_without_messages() {
        let chat: RemoteChat = serde_json::from_value(json!({"id": "c"})).unwrap();
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn test_timestamp_units() {
        assert_eq!(timestamp_to_datetime(1_700_000_000).unwrap().timestamp(), 1_700_000_000);
        assert_eq!(
            timestamp_to_datetime(1_700_000_000_123).unwrap().timestamp_millis(),
            1_700_000_000_123
        );
    }

    #[test]
    fn test_completion_request_shape() {
        let request = CompletionRequest {
            model: "m".into(),
            messages: vec![CompletionMessage { role: "user".into(), content: "hello".into() }],
            session_id: "s".into(),
            chat_id: None,
            stream: false,
            features: Features::default(),
            metadata: Map::new(),
            files: Vec::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], json!(false));
        assert_eq!(value["features"]["web_search"], json!(false));
        assert!(value.get("files").is_none());
        assert!(value.get("chat_id").is_none());
    }

    #[test]
    fn test_file_status_processing() {
        let status = FileStatus { status: "Completed".into(), error: None };
        assert_eq!(status.processing(), FileProcessing::Completed);
        let status = FileStatus { status: "processing".into(), error: None };
        assert_eq!(status.processing(), FileProcessing::Pending);
    }
}
