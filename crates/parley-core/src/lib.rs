pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod files;
pub mod models;
pub mod recommendation;
pub mod scanner;
pub mod state;
pub mod storage;
pub mod store;

// Re-export main types for convenience
pub use admin::{AdminConsole, ImageConfig, ImageEngine, ModelConfig, OnPremConfig, VideoConfig};
pub use api::{Backend, ConfigArea, Features, HttpBackend};
pub use auth::{AuthEvent, AuthSession, AuthState, AuthUser, UserRole};
pub use config::{AuthMode, Config};
pub use error::{ApiError, ParleyError, Result};
pub use models::{AIModel, ModelRegistry};
pub use recommendation::Recommendation;
pub use scanner::{detect_sensitive_data, Confidence, SensitiveDataReport};
pub use state::{ChatMessage, ChatRole, ChatSession, FileAttachment, SessionId};
pub use storage::LocalStore;
pub use store::{SendOptions, SendOutcome, SessionStore};
