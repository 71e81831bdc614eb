//! Client-side view of chat sessions.
//!
//! [`SessionStore`] owns the in-memory session list and is the only writer of
//! its local-store mirror. The backend holds a second copy that is merged in
//! on [`SessionStore::sync_sessions`]. Every backend call except the
//! completion itself is best effort: failures are logged and local state is
//! left as it was.

use crate::api::{
    timestamp_to_datetime, Backend, ChatPayload, CompletedRequest, CompletionMessage,
    CompletionRequest, Features, RemoteChatSummary,
};
use crate::error::{ApiError, ParleyError, Result};
use crate::models::{AIModel, ModelRegistry};
use crate::recommendation::{
    extract_answer, is_recommendation, model_not_found, parse_recommendation, Recommendation,
};
use crate::state::{
    is_default_title, title_from_message, ChatMessage, ChatSession, FileAttachment, SessionId,
    DEFAULT_SESSION_TITLE,
};
use crate::storage::{LocalStore, KEY_CURRENT_SESSION, KEY_SESSIONS};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const MAX_SYNC_PAGES: u32 = 20;

/// Per-message options sent alongside the history.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Model for this message only; the selected model is left alone.
    pub model: Option<String>,
    pub features: Features,
    pub metadata: Map<String, Value>,
    pub files: Vec<FileAttachment>,
}

/// What became of a sent message.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The assistant answered; the answer was appended to the session.
    Answered {
        session_id: SessionId,
        message: ChatMessage,
    },
    /// The backend suggested another model. Session messages are unchanged
    /// beyond the user's message; resend with a model override to continue.
    Recommendation {
        session_id: SessionId,
        recommendation: Recommendation,
    },
    /// The completion call failed; the error text was appended as the
    /// assistant's reply.
    Failed {
        session_id: SessionId,
        message: ChatMessage,
    },
}

#[derive(Default)]
struct SessionState {
    sessions: Vec<ChatSession>,
    current: Option<SessionId>,
    in_flight: usize,
}

impl SessionState {
    fn find(&self, id: &SessionId) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    fn find_mut(&mut self, id: &SessionId) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }
}

pub struct SessionStore {
    backend: Arc<dyn Backend>,
    store: LocalStore,
    models: Arc<ModelRegistry>,
    state: RwLock<SessionState>,
}

impl SessionStore {
    /// Opens the store with whatever sessions were cached locally.
    pub fn open(backend: Arc<dyn Backend>, store: LocalStore, models: Arc<ModelRegistry>) -> Self {
        let sessions = store
            .get::<Vec<ChatSession>>(KEY_SESSIONS)
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not read cached sessions");
                None
            })
            .unwrap_or_default();
        let current = store
            .get::<SessionId>(KEY_CURRENT_SESSION)
            .ok()
            .flatten()
            .filter(|id| sessions.iter().any(|s| &s.id == id));

        debug!(count = sessions.len(), "restored cached sessions");
        Self {
            backend,
            store,
            models,
            state: RwLock::new(SessionState {
                sessions,
                current,
                in_flight: 0,
            }),
        }
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    /// Loads the backend's session list and the model list.
    pub async fn initialize(&self) -> Result<()> {
        self.sync_sessions().await?;
        self.ensure_models_loaded().await;
        Ok(())
    }

    pub async fn sessions(&self) -> Vec<ChatSession> {
        self.state.read().await.sessions.clone()
    }

    pub async fn session(&self, id: &SessionId) -> Option<ChatSession> {
        self.state.read().await.find(id).cloned()
    }

    pub async fn current_session_id(&self) -> Option<SessionId> {
        self.state.read().await.current.clone()
    }

    pub async fn current_session(&self) -> Option<ChatSession> {
        let state = self.state.read().await;
        state.current.as_ref().and_then(|id| state.find(id)).cloned()
    }

    /// True while any completion request is waiting for an answer.
    pub async fn is_loading(&self) -> bool {
        self.state.read().await.in_flight > 0
    }

    /// Resolves a user-supplied id string (local or backend-issued).
    pub async fn find_id(&self, raw: &str) -> Option<SessionId> {
        self.state
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.id.as_str() == raw)
            .map(|s| s.id.clone())
    }

    fn persist(&self, state: &SessionState) {
        if let Err(e) = self.store.set(KEY_SESSIONS, &state.sessions) {
            warn!(error = %e, "could not persist sessions");
        }
        let current = match &state.current {
            Some(id) => self.store.set(KEY_CURRENT_SESSION, id),
            None => self.store.remove(KEY_CURRENT_SESSION),
        };
        if let Err(e) = current {
            warn!(error = %e, "could not persist current session");
        }
    }

    /// Starts an empty session at the head of the list and makes it current.
    /// The backend only hears about it when the first message is sent.
    pub async fn create_new_session(&self) -> SessionId {
        let model = self.models.selected_model().await.unwrap_or_default();
        let session = ChatSession::new_local(model);
        let id = session.id.clone();

        let mut state = self.state.write().await;
        state.sessions.insert(0, session);
        state.current = Some(id.clone());
        self.persist(&state);
        debug!(session_id = %id, "created local session");
        id
    }

    /// Makes `id` current, loading its history from the backend if it has
    /// none cached.
    pub async fn select_session(&self, id: &SessionId) -> Result<()> {
        let needs_history = {
            let mut state = self.state.write().await;
            let session = state
                .find(id)
                .ok_or_else(|| ParleyError::SessionNotFound(id.to_string()))?;
            let needs_history = session.messages.is_empty() && id.is_remote();
            state.current = Some(id.clone());
            self.persist(&state);
            needs_history
        };

        let Some(remote_id) = id.remote_id().filter(|_| needs_history) else {
            return Ok(());
        };

        match self.backend.get_chat(remote_id).await {
            Ok(chat) => {
                let messages = chat.messages();
                let mut state = self.state.write().await;
                if let Some(session) = state.find_mut(id) {
                    debug!(session_id = %id, count = messages.len(), "loaded history");
                    session.messages = messages;
                }
                self.persist(&state);
            }
            Err(e) => warn!(session_id = %id, error = %e, "could not load session history"),
        }
        Ok(())
    }

    /// Deletes a session. Backend-known sessions are removed locally only
    /// once the backend confirms; returns whether the session was removed.
    pub async fn delete_session(&self, id: &SessionId) -> Result<bool> {
        if self.session(id).await.is_none() {
            return Err(ParleyError::SessionNotFound(id.to_string()));
        }

        if let Some(remote_id) = id.remote_id() {
            if let Err(e) = self.backend.delete_chat(remote_id).await {
                warn!(session_id = %id, error = %e, "backend delete failed, keeping session");
                return Ok(false);
            }
        }

        let mut state = self.state.write().await;
        state.sessions.retain(|s| &s.id != id);
        if state.current.as_ref() == Some(id) {
            state.current = None;
        }
        self.persist(&state);
        info!(session_id = %id, "session deleted");
        Ok(true)
    }

    /// Renames locally, then tells the backend (best effort).
    pub async fn rename_session(&self, id: &SessionId, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ParleyError::InvalidInput("title must not be empty".into()));
        }
        {
            let mut state = self.state.write().await;
            let session = state
                .find_mut(id)
                .ok_or_else(|| ParleyError::SessionNotFound(id.to_string()))?;
            session.title = title.to_string();
            session.touch();
            self.persist(&state);
        }

        if let Some(remote_id) = id.remote_id() {
            if let Err(e) = self.backend.rename_chat(remote_id, title).await {
                warn!(session_id = %id, error = %e, "backend rename failed");
            }
        }
        Ok(())
    }

    /// Flips the pinned flag locally, then tells the backend (best effort).
    /// Returns the new flag.
    pub async fn toggle_pin(&self, id: &SessionId) -> Result<bool> {
        let pinned = {
            let mut state = self.state.write().await;
            let session = state
                .find_mut(id)
                .ok_or_else(|| ParleyError::SessionNotFound(id.to_string()))?;
            session.pinned = !session.pinned;
            let pinned = session.pinned;
            self.persist(&state);
            pinned
        };

        if let Some(remote_id) = id.remote_id() {
            if let Err(e) = self.backend.toggle_pin(remote_id).await {
                warn!(session_id = %id, error = %e, "backend pin toggle failed");
            }
        }
        Ok(pinned)
    }

    /// Merges the backend's session list into the local one.
    pub async fn sync_sessions(&self) -> Result<()> {
        let mut remote = Vec::new();
        let mut seen = HashSet::new();
        for page in 1..=MAX_SYNC_PAGES {
            match self.backend.list_chats(page).await {
                Ok(chats) if chats.is_empty() => break,
                Ok(chats) => {
                    let before = seen.len();
                    seen.extend(chats.iter().map(|c| c.id.clone()));
                    remote.extend(chats);
                    // a backend that ignores `page` keeps returning the same rows
                    if seen.len() == before {
                        debug!(page, "page brought no new sessions, stopping");
                        break;
                    }
                }
                Err(e) if page == 1 => {
                    warn!(error = %e, "could not load sessions from backend, using local cache");
                    return Ok(());
                }
                Err(e) => {
                    warn!(page, error = %e, "stopped paging backend sessions");
                    break;
                }
            }
        }

        let model = self.models.selected_model().await.unwrap_or_default();
        let mut state = self.state.write().await;
        let local = std::mem::take(&mut state.sessions);
        state.sessions = merge_sessions(local, remote, &model);
        if let Some(current) = state.current.clone() {
            if state.find(&current).is_none() {
                state.current = None;
            }
        }
        self.persist(&state);
        debug!(count = state.sessions.len(), "sessions synced");
        Ok(())
    }

    pub async fn ensure_models_loaded(&self) -> Vec<AIModel> {
        self.models.ensure_models_loaded().await
    }

    pub async fn refresh_models(&self) -> Vec<AIModel> {
        self.models.refresh_models().await
    }

    pub async fn update_model<F>(&self, id: &str, update: F) -> Result<AIModel>
    where
        F: FnOnce(&mut AIModel),
    {
        self.models.update_model(id, update).await
    }

    pub async fn add_model(&self, model: AIModel) -> Result<()> {
        self.models.add_model(model).await
    }

    pub async fn remove_model(&self, id: &str) -> Result<bool> {
        self.models.remove_model(id).await
    }

    /// Uploads a file so it can be attached to the next message.
    pub async fn upload_file(&self, path: &Path) -> Result<FileAttachment> {
        crate::files::upload_file(self.backend.as_ref(), path).await
    }

    /// Sends `content` in the current session (creating one if needed).
    ///
    /// `model_override` marks a resend after a recommendation: the user's
    /// message is already in the session and is not appended again.
    pub async fn send_message(
        &self,
        content: &str,
        model_override: Option<&str>,
        options: SendOptions,
    ) -> Result<SendOutcome> {
        let content = content.trim();
        if content.is_empty() && model_override.is_none() {
            return Err(ParleyError::InvalidInput("message must not be empty".into()));
        }

        let mut session_id = match self.current_session_id().await {
            Some(id) => id,
            None => self.create_new_session().await,
        };
        let model = match model_override.map(str::to_string).or_else(|| options.model.clone()) {
            Some(model) => model,
            None => self.models.selected_model().await.unwrap_or_default(),
        };
        let user_message = ChatMessage::user(content).with_files(options.files.clone());

        let first_message = {
            let state = self.state.read().await;
            let session = state
                .find(&session_id)
                .ok_or_else(|| ParleyError::SessionNotFound(session_id.to_string()))?;
            session.messages.is_empty() && !session.id.is_remote()
        };
        if first_message {
            session_id = self
                .create_remote_session(&session_id, &model, &user_message)
                .await;
        }

        let (history, chat_id) = {
            let mut state = self.state.write().await;
            let session = state
                .find_mut(&session_id)
                .ok_or_else(|| ParleyError::SessionNotFound(session_id.to_string()))?;
            if model_override.is_none() {
                if session.messages.is_empty() && session.has_default_title() {
                    session.title = title_from_message(content);
                }
                session.push(user_message);
            }
            session.model = model.clone();
            let history: Vec<CompletionMessage> =
                session.messages.iter().map(CompletionMessage::from).collect();
            let chat_id = session.id.remote_id().map(str::to_string);
            state.in_flight += 1;
            self.persist(&state);
            (history, chat_id)
        };

        let request = CompletionRequest {
            model: model.clone(),
            messages: history,
            session_id: session_id.to_string(),
            chat_id,
            stream: false,
            features: options.features,
            metadata: options.metadata,
            files: options.files,
        };
        let result = self.backend.complete(&request).await;
        self.state.write().await.in_flight -= 1;

        let known = self.models.models().await;
        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_model_not_found() => {
                info!(model = %model, "model rejected, offering alternatives");
                let message = match &e {
                    ApiError::Http { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                return Ok(SendOutcome::Recommendation {
                    session_id,
                    recommendation: model_not_found(&message, &model, &known),
                });
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "completion failed");
                let message = ChatMessage::assistant(e.to_string());
                self.append(&session_id, message.clone()).await;
                return Ok(SendOutcome::Failed { session_id, message });
            }
        };

        if is_recommendation(&response) {
            info!(model = %model, "backend recommended another model");
            return Ok(SendOutcome::Recommendation {
                session_id,
                recommendation: parse_recommendation(&response, &model, &known),
            });
        }

        let answer = extract_answer(&response).unwrap_or_else(|| response.to_string());
        let message = ChatMessage::assistant(answer);
        if let Some(session) = self.append(&session_id, message.clone()).await {
            self.save_remote_history(&session, &model, &message.id);
        }

        Ok(SendOutcome::Answered { session_id, message })
    }

    /// Creates the backend chat for a local session and swaps the id in the
    /// session list and current pointer together. Returns the id to use from
    /// now on, which stays local if the backend call fails.
    async fn create_remote_session(
        &self,
        local_id: &SessionId,
        model: &str,
        first_message: &ChatMessage,
    ) -> SessionId {
        let payload = ChatPayload {
            title: title_from_message(&first_message.content),
            models: vec![model.to_string()],
            messages: vec![first_message.clone()],
            timestamp: Utc::now().timestamp(),
        };

        let created = match self.backend.create_chat(&payload).await {
            Ok(created) => created,
            Err(e) => {
                warn!(session_id = %local_id, error = %e, "backend chat creation failed, staying local");
                return local_id.clone();
            }
        };
        let remote_id = SessionId::remote(created.id);

        {
            let mut state = self.state.write().await;
            if let Some(session) = state.find_mut(local_id) {
                session.id = remote_id.clone();
            }
            if state.current.as_ref() == Some(local_id) {
                state.current = Some(remote_id.clone());
            }
            self.persist(&state);
        }
        info!(local_id = %local_id, remote_id = %remote_id, "session confirmed by backend");

        if let Err(e) = self.sync_sessions().await {
            warn!(error = %e, "session refresh after creation failed");
        }
        remote_id
    }

    /// Appends a message and persists. Returns the updated session, or `None`
    /// if the session vanished while the request was in flight.
    async fn append(&self, id: &SessionId, message: ChatMessage) -> Option<ChatSession> {
        let mut state = self.state.write().await;
        let Some(session) = state.find_mut(id) else {
            warn!(session_id = %id, "session gone before the reply arrived");
            return None;
        };
        session.push(message);
        let session = session.clone();
        self.persist(&state);
        Some(session)
    }

    /// Fire-and-forget: mark the exchange completed and replace the stored
    /// history on the backend. Failures are only logged.
    fn save_remote_history(&self, session: &ChatSession, model: &str, message_id: &str) {
        let Some(remote_id) = session.id.remote_id() else {
            return;
        };

        let backend = Arc::clone(&self.backend);
        let remote_id = remote_id.to_string();
        let completed = CompletedRequest {
            model: model.to_string(),
            messages: session.messages.iter().map(CompletionMessage::from).collect(),
            chat_id: remote_id.clone(),
            session_id: remote_id.clone(),
            id: message_id.to_string(),
        };
        let payload = ChatPayload {
            title: session.title.clone(),
            models: vec![model.to_string()],
            messages: session.messages.clone(),
            timestamp: Utc::now().timestamp(),
        };

        tokio::spawn(async move {
            if let Err(e) = backend.mark_completed(&completed).await {
                warn!(session_id = %remote_id, error = %e, "completed notification failed");
            }
            if let Err(e) = backend.update_chat(&remote_id, &payload).await {
                warn!(session_id = %remote_id, error = %e, "history save failed");
            }
        });
    }

    /// Drops all in-memory sessions without touching the cache. Used when
    /// tearing the store down on sign-out.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.sessions.clear();
        state.current = None;
    }
}

/// Merges the backend's list into the local sessions.
///
/// Local messages win over the backend's empty placeholder; the backend
/// title wins unless it is still the default. Sessions only one side knows
/// are kept. Result is pinned-first, then most recently updated first.
pub fn merge_sessions(
    mut local: Vec<ChatSession>,
    remote: Vec<RemoteChatSummary>,
    model: &str,
) -> Vec<ChatSession> {
    let mut merged = Vec::with_capacity(local.len() + remote.len());
    let mut seen = HashSet::new();

    for summary in remote {
        // the same chat can show up on two pages if the list shifts while paging
        if !seen.insert(summary.id.clone()) {
            continue;
        }
        let updated_at = summary.updated_at.and_then(timestamp_to_datetime);
        let position = local
            .iter()
            .position(|s| s.id.remote_id() == Some(summary.id.as_str()));

        let session = match position {
            Some(index) => {
                let mut session = local.remove(index);
                if !is_default_title(&summary.title) {
                    session.title = summary.title;
                }
                if let Some(pinned) = summary.pinned {
                    session.pinned = pinned;
                }
                if let Some(updated_at) = updated_at {
                    session.updated_at = session.updated_at.max(updated_at);
                }
                session
            }
            None => {
                let now = Utc::now();
                let created_at = summary.created_at.and_then(timestamp_to_datetime);
                ChatSession {
                    id: SessionId::remote(summary.id),
                    title: if is_default_title(&summary.title) {
                        DEFAULT_SESSION_TITLE.to_string()
                    } else {
                        summary.title
                    },
                    messages: Vec::new(),
                    created_at: created_at.or(updated_at).unwrap_or(now),
                    updated_at: updated_at.or(created_at).unwrap_or(now),
                    model: model.to_string(),
                    pinned: summary.pinned.unwrap_or(false),
                }
            }
        };
        merged.push(session);
    }

    merged.extend(local);
    merged.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeBackend;
    use crate::api::RemoteChat;
    use crate::state::ChatRole;
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: LocalStore,
        backend: Arc<FakeBackend>,
        sessions: SessionStore,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let backend = Arc::new(FakeBackend::new());
        let models = Arc::new(ModelRegistry::new(backend.clone(), store.clone(), None));
        let sessions = SessionStore::open(backend.clone(), store.clone(), models);
        Harness {
            _dir: dir,
            store,
            backend,
            sessions,
        }
    }

    fn summary(id: &str, title: &str, updated_at: i64) -> RemoteChatSummary {
        RemoteChatSummary {
            id: id.to_string(),
            title: title.to_string(),
            created_at: Some(updated_at),
            updated_at: Some(updated_at),
            pinned: None,
        }
    }

    #[tokio::test]
    async fn test_first_message_creates_backend_chat_once() {
        let h = harness();
        h.backend.push_completion(Ok(json!({"content": "hi there"})));

        let outcome = h.sessions.send_message("hello", None, SendOptions::default()).await.unwrap();

        assert_eq!(h.backend.calls("create_chat"), 1);
        let current = h.sessions.current_session_id().await.unwrap();
        assert!(current.is_remote());
        let sessions = h.sessions.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, current);

        let requests = h.backend.state().completion_requests.clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].messages,
            vec![CompletionMessage { role: "user".into(), content: "hello".into() }]
        );
        assert_eq!(requests[0].session_id, current.as_str());
        assert!(!requests[0].stream);

        let session = &sessions[0];
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, ChatRole::User);
        assert_eq!(session.messages[0].content, "hello");
        assert_eq!(session.messages[1].role, ChatRole::Assistant);
        assert_eq!(session.messages[1].content, "hi there");
        assert_eq!(session.title, "hello");
        match outcome {
            SendOutcome::Answered { session_id, message } => {
                assert_eq!(session_id, current);
                assert_eq!(message.content, "hi there");
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        h.sessions.send_message("again", None, SendOptions::default()).await.unwrap();
        assert_eq!(h.backend.calls("create_chat"), 1);
        assert_eq!(h.sessions.current_session().await.unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn test_explicit_new_session_then_send() {
        let h = harness();
        let local = h.sessions.create_new_session().await;
        assert!(!local.is_remote());
        assert_eq!(h.backend.calls("create_chat"), 0);

        h.sessions.send_message("hello", None, SendOptions::default()).await.unwrap();
        let current = h.sessions.current_session_id().await.unwrap();
        assert_ne!(current, local);
        assert!(h.sessions.session(&local).await.is_none());
        assert_eq!(h.backend.calls("create_chat"), 1);

        let persisted: SessionId = h.store.get(KEY_CURRENT_SESSION).unwrap().unwrap();
        assert_eq!(persisted, current);
    }

    #[tokio::test]
    async fn test_create_failure_keeps_local_id() {
        let h = harness();
        h.backend.state().fail_create = true;

        h.sessions.send_message("hello", None, SendOptions::default()).await.unwrap();
        let current = h.sessions.current_session_id().await.unwrap();
        assert!(!current.is_remote());
        assert_eq!(h.sessions.current_session().await.unwrap().messages.len(), 2);
        // nothing to mark completed on the backend
        tokio::task::yield_now().await;
        assert_eq!(h.backend.calls("mark_completed"), 0);
    }

    #[tokio::test]
    async fn test_model_not_found_becomes_recommendation() {
        let h = harness();
        h.backend.push_completion(Err(ApiError::Http {
            status: 400,
            message: "Model not found".into(),
        }));

        let outcome = h
            .sessions
            .send_message("draw a cat", None, SendOptions::default())
            .await
            .unwrap();
        let SendOutcome::Recommendation { recommendation, .. } = outcome else {
            panic!("expected a recommendation");
        };
        assert_eq!(recommendation.message, "Model not found");
        assert_eq!(recommendation.requested_model, "gpt-4o");
        assert!(recommendation.alternatives.iter().all(|m| m.id != "gpt-4o"));

        // only the user's message is in the session
        let session = h.sessions.current_session().await.unwrap();
        assert_eq!(session.messages.len(), 1);

        // resend with the suggested model does not append the message again
        h.backend.push_completion(Ok(json!({"content": "a cat"})));
        let outcome = h
            .sessions
            .send_message("draw a cat", Some("gpt-4o-mini"), SendOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Answered { .. }));
        let session = h.sessions.current_session().await.unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.model, "gpt-4o-mini");
        let last = h.backend.state().completion_requests.last().cloned().unwrap();
        assert_eq!(last.model, "gpt-4o-mini");
        assert_eq!(last.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_recommendation_payload_leaves_messages_alone() {
        let h = harness();
        h.backend.push_completion(Ok(json!({
            "recommended_model": "on-prem-secure",
            "message": "Use the on-prem model for this"
        })));

        let outcome = h.sessions.send_message("secret stuff", None, SendOptions::default()).await.unwrap();
        let SendOutcome::Recommendation { recommendation, .. } = outcome else {
            panic!("expected a recommendation");
        };
        assert_eq!(recommendation.recommended_model.as_deref(), Some("on-prem-secure"));
        assert_eq!(h.sessions.current_session().await.unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_completion_failure_is_shown_as_assistant_message() {
        let h = harness();
        h.backend.push_completion(Err(ApiError::Http {
            status: 500,
            message: "upstream timeout".into(),
        }));

        let outcome = h.sessions.send_message("hello", None, SendOptions::default()).await.unwrap();
        let SendOutcome::Failed { message, .. } = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(message.content, "HTTP 500: upstream timeout");
        let session = h.sessions.current_session().await.unwrap();
        assert_eq!(session.messages.last().unwrap().content, "HTTP 500: upstream timeout");
        assert!(!h.sessions.is_loading().await);
    }

    #[tokio::test]
    async fn test_answer_saves_history_in_background() {
        let h = harness();
        h.sessions.send_message("hello", None, SendOptions::default()).await.unwrap();

        for _ in 0..10 {
            if h.backend.calls("update_chat") > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.backend.calls("mark_completed"), 1);
        assert_eq!(h.backend.calls("update_chat"), 1);

        let id = h.sessions.current_session_id().await.unwrap();
        let chat = h.backend.state().chats.get(id.as_str()).cloned().unwrap();
        assert_eq!(chat.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let h = harness();
        assert!(matches!(
            h.sessions.send_message("   ", None, SendOptions::default()).await,
            Err(ParleyError::InvalidInput(_))
        ));
        assert!(h.sessions.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_features_and_files_are_forwarded() {
        let h = harness();
        let mut metadata = Map::new();
        metadata.insert("source".into(), json!("cli"));
        let options = SendOptions {
            features: Features {
                web_search: true,
                ..Features::default()
            },
            metadata,
            files: vec![FileAttachment {
                id: "f1".into(),
                name: "notes.txt".into(),
                url: None,
                size: Some(3),
            }],
            ..SendOptions::default()
        };
        h.sessions.send_message("summarize", None, options).await.unwrap();

        let request = h.backend.state().completion_requests[0].clone();
        assert!(request.features.web_search);
        assert_eq!(request.metadata["source"], "cli");
        assert_eq!(request.files.len(), 1);
        let session = h.sessions.current_session().await.unwrap();
        assert_eq!(session.messages[0].files.as_ref().unwrap()[0].id, "f1");
    }

    #[tokio::test]
    async fn test_select_loads_history_for_remote_session() {
        let h = harness();
        {
            let mut state = h.backend.state();
            state.chat_list.push(summary("remote-1", "Old chat", 1_700_000_000));
            state.chats.insert(
                "remote-1".into(),
                RemoteChat {
                    id: "remote-1".into(),
                    title: "Old chat".into(),
                    chat: json!({"messages": [
                        {"role": "user", "content": "q"},
                        {"role": "assistant", "content": "a"}
                    ]}),
                    created_at: None,
                    updated_at: None,
                },
            );
        }
        h.sessions.sync_sessions().await.unwrap();
        let id = h.sessions.find_id("remote-1").await.unwrap();
        assert!(h.sessions.session(&id).await.unwrap().messages.is_empty());

        h.sessions.select_session(&id).await.unwrap();
        assert_eq!(h.sessions.session(&id).await.unwrap().messages.len(), 2);
        assert_eq!(h.sessions.current_session_id().await, Some(id.clone()));

        // cached now, no second fetch
        h.sessions.select_session(&id).await.unwrap();
        assert_eq!(h.backend.calls("get_chat"), 1);
    }

    #[tokio::test]
    async fn test_select_local_session_skips_backend() {
        let h = harness();
        let id = h.sessions.create_new_session().await;
        h.sessions.select_session(&id).await.unwrap();
        assert_eq!(h.backend.calls("get_chat"), 0);

        let missing = SessionId::remote("nope");
        assert!(matches!(
            h.sessions.select_session(&missing).await,
            Err(ParleyError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_only_after_backend_confirms() {
        let h = harness();
        h.sessions.send_message("hello", None, SendOptions::default()).await.unwrap();
        let id = h.sessions.current_session_id().await.unwrap();

        h.backend.state().fail_delete = true;
        assert!(!h.sessions.delete_session(&id).await.unwrap());
        assert!(h.sessions.session(&id).await.is_some());
        assert_eq!(h.sessions.current_session_id().await, Some(id.clone()));

        h.backend.state().fail_delete = false;
        assert!(h.sessions.delete_session(&id).await.unwrap());
        assert!(h.sessions.session(&id).await.is_none());
        assert!(h.sessions.current_session_id().await.is_none());
        assert!(h.store.get::<SessionId>(KEY_CURRENT_SESSION).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_local_session_skips_backend() {
        let h = harness();
        let id = h.sessions.create_new_session().await;
        assert!(h.sessions.delete_session(&id).await.unwrap());
        assert_eq!(h.backend.calls("delete_chat"), 0);
    }

    #[tokio::test]
    async fn test_rename_and_pin_are_best_effort() {
        let h = harness();
        h.sessions.send_message("hello", None, SendOptions::default()).await.unwrap();
        let id = h.sessions.current_session_id().await.unwrap();

        h.backend.state().fail_rename = true;
        h.sessions.rename_session(&id, "Greetings").await.unwrap();
        assert_eq!(h.sessions.session(&id).await.unwrap().title, "Greetings");
        assert_eq!(h.backend.calls("rename_chat"), 1);

        assert!(h.sessions.toggle_pin(&id).await.unwrap());
        assert!(!h.sessions.toggle_pin(&id).await.unwrap());
        assert_eq!(h.backend.calls("toggle_pin"), 2);

        assert!(matches!(
            h.sessions.rename_session(&id, "  ").await,
            Err(ParleyError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_sessions_survive_reopen() {
        let h = harness();
        h.sessions.send_message("hello", None, SendOptions::default()).await.unwrap();
        let before = h.sessions.sessions().await;

        let models = Arc::new(ModelRegistry::new(h.backend.clone(), h.store.clone(), None));
        let reopened = SessionStore::open(h.backend.clone(), h.store.clone(), models);
        assert_eq!(reopened.sessions().await, before);
        assert_eq!(reopened.current_session_id().await, Some(before[0].id.clone()));
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_local_sessions() {
        let h = harness();
        let id = h.sessions.create_new_session().await;
        h.backend.state().fail_list = true;

        h.sessions.sync_sessions().await.unwrap();
        let sessions = h.sessions.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, id);
        assert_eq!(h.sessions.current_session_id().await, Some(id));
    }

    #[test]
    fn test_merge_rules() {
        let mut confirmed = ChatSession::new_local("m");
        confirmed.id = SessionId::remote("r1");
        confirmed.title = "Local title".into();
        confirmed.push(ChatMessage::user("cached"));

        let mut default_titled = ChatSession::new_local("m");
        default_titled.id = SessionId::remote("r2");
        default_titled.title = "Kept".into();

        let unconfirmed = ChatSession::new_local("m");

        let remote = vec![
            summary("r1", "Backend title", 1_600_000_000),
            summary("r2", DEFAULT_SESSION_TITLE, 1_600_000_000),
            RemoteChatSummary {
                pinned: Some(true),
                ..summary("r3", "Only on backend", 1_500_000_000)
            },
        ];

        let merged = merge_sessions(
            vec![confirmed.clone(), default_titled, unconfirmed.clone()],
            remote,
            "m",
        );
        assert_eq!(merged.len(), 4);

        // pinned first
        assert_eq!(merged[0].id, SessionId::remote("r3"));
        assert!(merged[0].messages.is_empty());
        assert_eq!(merged[0].title, "Only on backend");

        let r1 = merged.iter().find(|s| s.id == SessionId::remote("r1")).unwrap();
        assert_eq!(r1.title, "Backend title");
        assert_eq!(r1.messages, confirmed.messages);
        let r2 = merged.iter().find(|s| s.id == SessionId::remote("r2")).unwrap();
        assert_eq!(r2.title, "Kept");
        assert!(merged.iter().any(|s| s.id == unconfirmed.id));
    }

    #[test]
    fn test_merge_keeps_one_session_per_backend_id() {
        let mut cached = ChatSession::new_local("m");
        cached.id = SessionId::remote("r1");
        cached.push(ChatMessage::user("cached"));

        let repeated = summary("r1", "Shifted", 1_600_000_000);
        let merged = merge_sessions(vec![], vec![repeated.clone(), repeated.clone()], "m");
        assert_eq!(merged.len(), 1);

        let merged = merge_sessions(vec![cached], vec![repeated.clone(), repeated], "m");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_stops_when_backend_ignores_page() {
        let h = harness();
        {
            let mut state = h.backend.state();
            state.ignore_page = true;
            state.chat_list.push(summary("r1", "One", 1_600_000_000));
            state.chat_list.push(summary("r2", "Two", 1_600_000_001));
        }

        h.sessions.sync_sessions().await.unwrap();
        assert_eq!(h.sessions.sessions().await.len(), 2);
        assert_eq!(h.backend.calls("list_chats"), 2);
    }

    #[tokio::test]
    async fn test_explicit_model_still_sends_the_message() {
        let h = harness();
        let options = SendOptions {
            model: Some("gpt-4o-mini".into()),
            ..SendOptions::default()
        };

        let outcome = h.sessions.send_message("hello", None, options).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Answered { .. }));

        let request = h.backend.state().completion_requests[0].clone();
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(
            request.messages,
            vec![CompletionMessage { role: "user".into(), content: "hello".into() }]
        );

        let session = h.sessions.current_session().await.unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].content, "hello");
        assert_eq!(session.model, "gpt-4o-mini");
        // a one-off choice does not change the selection
        assert_eq!(h.sessions.models().selected_model().await.as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn test_local_model_mutations_do_not_hit_backend() {
        let h = harness();
        h.sessions
            .add_model(AIModel::new("mine", "Mine", "local"))
            .await
            .unwrap();
        h.sessions.update_model("mine", |m| m.enabled = false).await.unwrap();
        assert!(h.sessions.remove_model("mine").await.unwrap());
        assert_eq!(h.backend.calls("list_models"), 0);
    }
}
