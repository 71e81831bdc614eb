//! Who is signed in, and whether they are an admin.
//!
//! Identity comes from the backend sign-in call when it is reachable, or from
//! a local heuristic otherwise. It is mirrored into the local store so a
//! restart picks it up again, and every change is broadcast to subscribers.

use crate::api::{Backend, SignInRequest, SignInResponse};
use crate::config::{AuthMode, Config};
use crate::error::{ParleyError, Result};
use crate::storage::{
    LocalStore, KEY_AUTH_SESSION, KEY_AUTH_TOKEN, KEY_MODELS_CACHE, KEY_MODEL_CONFIG,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: AuthUser,
    pub role: UserRole,
    #[serde(default)]
    pub token: Option<String>,
    /// True when the backend confirmed the identity.
    #[serde(default)]
    pub verified: bool,
}

impl AuthSession {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    SignedOut,
    /// Identity reloaded from the local store.
    Changed(Option<AuthSession>),
}

/// Role for a locally-derived identity: the override if set, else admin when
/// the email mentions "admin".
pub fn infer_role(email: &str, admin_override: Option<bool>) -> UserRole {
    let is_admin = admin_override.unwrap_or_else(|| email.to_lowercase().contains("admin"));
    if is_admin {
        UserRole::Admin
    } else {
        UserRole::User
    }
}

fn name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

pub struct AuthState {
    backend: Arc<dyn Backend>,
    store: LocalStore,
    mode: AuthMode,
    admin_override: Option<bool>,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthState {
    pub fn new(backend: Arc<dyn Backend>, store: LocalStore, config: &Config) -> Self {
        Self::with_mode(backend, store, config.auth_mode, config.admin_override)
    }

    pub fn with_mode(
        backend: Arc<dyn Backend>,
        store: LocalStore,
        mode: AuthMode,
        admin_override: Option<bool>,
    ) -> Self {
        let restored = load_session(&store);
        if let Some(session) = &restored {
            backend.set_session_token(session.token.clone());
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            backend,
            store,
            mode,
            admin_override,
            session: RwLock::new(restored),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub async fn current(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub async fn is_signed_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn is_admin(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .map(AuthSession::is_admin)
            .unwrap_or(false)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ParleyError::Auth("email and password are required".into()));
        }

        let session = match self.mode {
            AuthMode::Static => self.static_session(email),
            AuthMode::Backend => {
                let request = SignInRequest {
                    email: email.to_string(),
                    password: password.to_string(),
                };
                match self.backend.sign_in(&request).await {
                    Ok(response) => verified_session(email, response),
                    Err(e) if e.is_network() => {
                        warn!(error = %e, "backend unreachable, signing in locally");
                        self.static_session(email)
                    }
                    Err(e) => return Err(ParleyError::Auth(e.to_string())),
                }
            }
        };

        self.store.set(KEY_AUTH_SESSION, &session)?;
        match &session.token {
            Some(token) => self.store.set(KEY_AUTH_TOKEN, token)?,
            None => self.store.remove(KEY_AUTH_TOKEN)?,
        }
        self.backend.set_session_token(session.token.clone());
        *self.session.write().await = Some(session.clone());

        info!(email = %session.user.email, role = session.role.as_str(), verified = session.verified, "signed in");
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    /// Clears identity, token and model caches, and tells subscribers.
    pub async fn sign_out(&self) -> Result<()> {
        let previous = self.session.write().await.take();

        if previous.as_ref().is_some_and(|s| s.verified) {
            if let Err(e) = self.backend.sign_out().await {
                warn!(error = %e, "backend sign-out failed");
            }
        }

        self.backend.set_session_token(None);
        self.store.clear_keys(&[
            KEY_AUTH_SESSION,
            KEY_AUTH_TOKEN,
            KEY_MODELS_CACHE,
            KEY_MODEL_CONFIG,
        ])?;

        info!("signed out");
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    /// Reloads identity from the local store, picking up changes written by
    /// another client instance.
    pub async fn recheck(&self) -> Option<AuthSession> {
        let session = load_session(&self.store);
        self.backend
            .set_session_token(session.as_ref().and_then(|s| s.token.clone()));
        *self.session.write().await = session.clone();
        let _ = self.events.send(AuthEvent::Changed(session.clone()));
        session
    }

    fn static_session(&self, email: &str) -> AuthSession {
        AuthSession {
            user: AuthUser {
                id: None,
                email: email.to_string(),
                name: name_from_email(email),
            },
            role: infer_role(email, self.admin_override),
            token: None,
            verified: false,
        }
    }
}

fn verified_session(email: &str, response: SignInResponse) -> AuthSession {
    let email = response.email.unwrap_or_else(|| email.to_string());
    let role = match response.role.as_deref() {
        Some(role) if role.eq_ignore_ascii_case("admin") => UserRole::Admin,
        _ => UserRole::User,
    };
    AuthSession {
        user: AuthUser {
            id: response.id,
            name: response.name.unwrap_or_else(|| name_from_email(&email)),
            email,
        },
        role,
        token: response.token,
        verified: true,
    }
}

fn load_session(store: &LocalStore) -> Option<AuthSession> {
    let mut session = store.get::<AuthSession>(KEY_AUTH_SESSION).unwrap_or_else(|e| {
        warn!(error = %e, "could not read stored session");
        None
    })?;
    if session.token.is_none() {
        session.token = store.get::<String>(KEY_AUTH_TOKEN).ok().flatten();
    }
    Some(session)
}
