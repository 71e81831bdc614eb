//! The chat backend as seen by the client.
//!
//! [`Backend`] lists every REST call the client makes. [`HttpBackend`] is the
//! real implementation; tests swap in an in-memory one.

pub mod http;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;

pub use http::HttpBackend;
pub use types::*;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Admin configuration areas that have their own update endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigArea {
    Image,
    Video,
    OnPrem,
}

impl ConfigArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigArea::Image => "image",
            ConfigArea::Video => "video",
            ConfigArea::OnPrem => "onprem",
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    // Auth
    async fn sign_in(&self, request: &SignInRequest) -> ApiResult<SignInResponse>;
    async fn sign_out(&self) -> ApiResult<()>;

    /// Token attached to subsequent requests. `None` falls back to whatever
    /// the backend was configured with.
    fn set_session_token(&self, _token: Option<String>) {}

    // Chats
    async fn list_chats(&self, page: u32) -> ApiResult<Vec<RemoteChatSummary>>;
    async fn get_chat(&self, id: &str) -> ApiResult<RemoteChat>;
    async fn create_chat(&self, chat: &ChatPayload) -> ApiResult<RemoteChat>;
    /// Replaces the stored history of a chat.
    async fn update_chat(&self, id: &str, chat: &ChatPayload) -> ApiResult<()>;
    async fn rename_chat(&self, id: &str, title: &str) -> ApiResult<()>;
    async fn toggle_pin(&self, id: &str) -> ApiResult<()>;
    async fn delete_chat(&self, id: &str) -> ApiResult<()>;
    async fn mark_completed(&self, request: &CompletedRequest) -> ApiResult<()>;

    // Models; envelopes are returned raw and normalized by the registry
    async fn list_models(&self) -> ApiResult<Value>;
    async fn list_base_models(&self) -> ApiResult<Value>;

    async fn complete(&self, request: &CompletionRequest) -> ApiResult<Value>;

    // Files
    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> ApiResult<UploadedFile>;
    async fn file_status(&self, id: &str) -> ApiResult<FileStatus>;

    async fn update_config(&self, area: ConfigArea, payload: &Value) -> ApiResult<Value>;
}
