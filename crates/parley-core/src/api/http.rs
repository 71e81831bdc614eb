use super::{
    ApiResult, Backend, ChatEnvelope, ChatPayload, CompletedRequest, CompletionRequest,
    ConfigArea, FileStatus, RemoteChat, RemoteChatSummary, SignInRequest, SignInResponse,
    UploadedFile,
};
use crate::config::Config;
use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::RwLock;
use tracing::debug;

/// `Backend` over HTTP/JSON.
///
/// Cookies set by the backend are kept for later requests. Every request
/// carries `Authorization: Bearer` (session token, else configured token) and
/// `X-API-Key` when an API key is configured.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    bearer_token: Option<String>,
    session_token: RwLock<Option<String>>,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            bearer_token: None,
            session_token: RwLock::new(None),
        })
    }

    pub fn from_config(config: &Config) -> ApiResult<Self> {
        let mut backend = Self::new(config.base_url())?;
        backend.api_key = config.api_key.clone();
        backend.bearer_token = config.bearer_token.clone();
        Ok(backend)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Option<String> {
        let session = self
            .session_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        session
            .or_else(|| self.bearer_token.clone())
            .or_else(|| self.api_key.clone())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(token) = self.bearer() {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        request
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.delete(self.url(path)))
    }

    fn sign_in_request(&self, request: &SignInRequest, as_form: bool) -> RequestBuilder {
        let builder = self.post("/api/v1/auths/signin");
        if as_form {
            builder.form(request)
        } else {
            builder.json(request)
        }
    }

    async fn sign_in_with(
        &self,
        request: &SignInRequest,
        as_form: bool,
    ) -> ApiResult<SignInResponse> {
        read_json(self.sign_in_request(request, as_form).send().await?).await
    }
}

/// Runs `attempt` with a JSON body, and once more form-encoded if the backend
/// answered that the body was missing.
async fn with_form_fallback<T, F, Fut>(mut attempt: F) -> ApiResult<T>
where
    F: FnMut(bool) -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    match attempt(false).await {
        Err(e) if e.is_missing_body() => {
            debug!("request rejected the JSON body, retrying form-encoded");
            attempt(true).await
        }
        other => other,
    }
}

async fn check(response: Response) -> ApiResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_response(status, &body))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let response = check(response).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

async fn read_empty(response: Response) -> ApiResult<()> {
    check(response).await?;
    Ok(())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn sign_in(&self, request: &SignInRequest) -> ApiResult<SignInResponse> {
        with_form_fallback(move |as_form| self.sign_in_with(request, as_form)).await
    }

    async fn sign_out(&self) -> ApiResult<()> {
        read_empty(self.get("/api/v1/auths/signout").send().await?).await
    }

    fn set_session_token(&self, token: Option<String>) {
        let mut guard = self
            .session_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = token;
    }

    async fn list_chats(&self, page: u32) -> ApiResult<Vec<RemoteChatSummary>> {
        let response = self
            .get("/api/v1/chats/")
            .query(&[("page", page)])
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_chat(&self, id: &str) -> ApiResult<RemoteChat> {
        read_json(self.get(&format!("/api/v1/chats/{}", id)).send().await?).await
    }

    async fn create_chat(&self, chat: &ChatPayload) -> ApiResult<RemoteChat> {
        let response = self
            .post("/api/v1/chats/new")
            .json(&ChatEnvelope { chat })
            .send()
            .await?;
        read_json(response).await
    }

    async fn update_chat(&self, id: &str, chat: &ChatPayload) -> ApiResult<()> {
        let response = self
            .post(&format!("/api/v1/chats/{}", id))
            .json(&ChatEnvelope { chat })
            .send()
            .await?;
        read_empty(response).await
    }

    async fn rename_chat(&self, id: &str, title: &str) -> ApiResult<()> {
        let response = self
            .post(&format!("/api/v1/chats/{}", id))
            .json(&json!({ "chat": { "title": title } }))
            .send()
            .await?;
        read_empty(response).await
    }

    async fn toggle_pin(&self, id: &str) -> ApiResult<()> {
        read_empty(self.post(&format!("/api/v1/chats/{}/pin", id)).send().await?).await
    }

    async fn delete_chat(&self, id: &str) -> ApiResult<()> {
        read_empty(self.delete(&format!("/api/v1/chats/{}", id)).send().await?).await
    }

    async fn mark_completed(&self, request: &CompletedRequest) -> ApiResult<()> {
        read_empty(self.post("/api/chat/completed").json(request).send().await?).await
    }

    async fn list_models(&self) -> ApiResult<Value> {
        read_json(self.get("/api/models").send().await?).await
    }

    async fn list_base_models(&self) -> ApiResult<Value> {
        read_json(self.get("/api/v1/models/base").send().await?).await
    }

    async fn complete(&self, request: &CompletionRequest) -> ApiResult<Value> {
        let response = self
            .post("/api/chat/completions")
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> ApiResult<UploadedFile> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let form = multipart::Form::new().part("file", part);

        read_json(self.post("/api/v1/files/").multipart(form).send().await?).await
    }

    async fn file_status(&self, id: &str) -> ApiResult<FileStatus> {
        let response = self
            .get(&format!("/api/v1/files/{}/process/status", id))
            .send()
            .await?;
        read_json(response).await
    }

    async fn update_config(&self, area: ConfigArea, payload: &Value) -> ApiResult<Value> {
        let path = match area {
            ConfigArea::Image => "/api/v1/images/config/update",
            ConfigArea::Video => "/api/v1/videos/config/update",
            ConfigArea::OnPrem => "/api/v1/configs/onprem/update",
        };
        read_json(self.post(path).json(payload).send().await?).await
    }
}
