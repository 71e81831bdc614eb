//! In-memory backend for unit tests. Records every call it receives.

use super::*;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct FakeState {
    pub calls: Vec<String>,
    pub chats: HashMap<String, RemoteChat>,
    pub chat_list: Vec<RemoteChatSummary>,
    pub next_chat_id: u32,
    pub models: Option<Value>,
    pub base_models: Option<Value>,
    pub completions: VecDeque<ApiResult<Value>>,
    pub completion_requests: Vec<CompletionRequest>,
    pub sign_in: Option<ApiResult<SignInResponse>>,
    pub file_statuses: VecDeque<FileStatus>,
    pub config_updates: Vec<(ConfigArea, Value)>,
    pub fail_list: bool,
    pub ignore_page: bool,
    pub fail_create: bool,
    pub fail_delete: bool,
    pub fail_rename: bool,
    pub fail_models: bool,
    pub session_token: Option<String>,
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    pub state: Mutex<FakeState>,
    pub models_delay: Option<Duration>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(models: Value) -> Self {
        let backend = Self::new();
        backend.state().models = Some(models);
        backend
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn push_completion(&self, result: ApiResult<Value>) {
        self.state().completions.push_back(result);
    }

    pub fn calls(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|c| c.as_str() == name).count()
    }

    fn record(&self, name: &str) {
        self.state().calls.push(name.to_string());
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Http {
        status: 404,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn sign_in(&self, _request: &SignInRequest) -> ApiResult<SignInResponse> {
        self.record("sign_in");
        self.state()
            .sign_in
            .clone()
            .unwrap_or_else(|| Err(ApiError::Network("no sign-in configured".into())))
    }

    async fn sign_out(&self) -> ApiResult<()> {
        self.record("sign_out");
        Ok(())
    }

    fn set_session_token(&self, token: Option<String>) {
        self.state().session_token = token;
    }

    async fn list_chats(&self, page: u32) -> ApiResult<Vec<RemoteChatSummary>> {
        self.record("list_chats");
        if self.state().fail_list {
            return Err(ApiError::Network("chat list unavailable".into()));
        }
        if page > 1 && !self.state().ignore_page {
            return Ok(Vec::new());
        }
        Ok(self.state().chat_list.clone())
    }

    async fn get_chat(&self, id: &str) -> ApiResult<RemoteChat> {
        self.record("get_chat");
        self.state().chats.get(id).cloned().ok_or_else(|| not_found("chat"))
    }

    async fn create_chat(&self, chat: &ChatPayload) -> ApiResult<RemoteChat> {
        self.record("create_chat");
        let mut state = self.state();
        if state.fail_create {
            return Err(ApiError::Network("create failed".into()));
        }
        state.next_chat_id += 1;
        let id = format!("remote-chat-{:04}-0000-0000-000000000000", state.next_chat_id);
        let remote = RemoteChat {
            id: id.clone(),
            title: chat.title.clone(),
            chat: json!({ "messages": [] }),
            created_at: Some(chat.timestamp),
            updated_at: Some(chat.timestamp),
        };
        state.chats.insert(id.clone(), remote.clone());
        state.chat_list.push(RemoteChatSummary {
            id,
            title: chat.title.clone(),
            created_at: Some(chat.timestamp),
            updated_at: Some(chat.timestamp),
            pinned: None,
        });
        Ok(remote)
    }

    async fn update_chat(&self, id: &str, chat: &ChatPayload) -> ApiResult<()> {
        self.record("update_chat");
        let mut state = self.state();
        let entry = state.chats.get_mut(id).ok_or_else(|| not_found("chat"))?;
        entry.chat = json!({ "messages": chat.messages });
        Ok(())
    }

    async fn rename_chat(&self, id: &str, title: &str) -> ApiResult<()> {
        self.record("rename_chat");
        let mut state = self.state();
        if state.fail_rename {
            return Err(ApiError::Http { status: 500, message: "rename failed".into() });
        }
        let entry = state.chats.get_mut(id).ok_or_else(|| not_found("chat"))?;
        entry.title = title.to_string();
        Ok(())
    }

    async fn toggle_pin(&self, _id: &str) -> ApiResult<()> {
        self.record("toggle_pin");
        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> ApiResult<()> {
        self.record("delete_chat");
        let mut state = self.state();
        if state.fail_delete {
            return Err(ApiError::Http { status: 500, message: "delete failed".into() });
        }
        state.chats.remove(id);
        state.chat_list.retain(|c| c.id != id);
        Ok(())
    }

    async fn mark_completed(&self, _request: &CompletedRequest) -> ApiResult<()> {
        self.record("mark_completed");
        Ok(())
    }

    async fn list_models(&self) -> ApiResult<Value> {
        self.record("list_models");
        if let Some(delay) = self.models_delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state();
        if state.fail_models {
            return Err(ApiError::Network("models unavailable".into()));
        }
        Ok(state.models.clone().unwrap_or_else(|| json!([])))
    }

    async fn list_base_models(&self) -> ApiResult<Value> {
        self.record("list_base_models");
        self.state().base_models.clone().ok_or_else(|| not_found("base models"))
    }

    async fn complete(&self, request: &CompletionRequest) -> ApiResult<Value> {
        self.record("complete");
        let mut state = self.state();
        state.completion_requests.push(request.clone());
        state
            .completions
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "content": "ok" })))
    }

    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> ApiResult<UploadedFile> {
        self.record("upload_file");
        Ok(UploadedFile {
            id: format!("file-{}", bytes.len()),
            filename: file_name.to_string(),
            meta: None,
        })
    }

    async fn file_status(&self, _id: &str) -> ApiResult<FileStatus> {
        self.record("file_status");
        Ok(self.state().file_statuses.pop_front().unwrap_or(FileStatus {
            status: "completed".into(),
            error: None,
        }))
    }

    async fn update_config(&self, area: ConfigArea, payload: &Value) -> ApiResult<Value> {
        self.record("update_config");
        self.state().config_updates.push((area, payload.clone()));
        Ok(payload.clone())
    }
}
