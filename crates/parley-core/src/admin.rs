//! Admin-only configuration of image, video and on-prem models.

use crate::api::{Backend, ConfigArea};
use crate::auth::AuthState;
use crate::error::{ParleyError, Result};
use crate::storage::{LocalStore, KEY_MODEL_CONFIG};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

/// Image generation engine and its engine-specific settings.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageEngine {
    OpenAi {
        api_base_url: String,
        api_key: String,
    },
    ComfyUi {
        base_url: String,
        workflow: Value,
    },
    Automatic1111 {
        base_url: String,
        steps: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageConfig {
    pub enabled: bool,
    pub engine: ImageEngine,
    pub model: String,
    pub image_size: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoConfig {
    pub enabled: bool,
    pub engine: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnPremConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model_id: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelConfig {
    Image(ImageConfig),
    Video(VideoConfig),
    OnPrem(OnPremConfig),
}

impl ModelConfig {
    pub fn area(&self) -> ConfigArea {
        match self {
            ModelConfig::Image(_) => ConfigArea::Image,
            ModelConfig::Video(_) => ConfigArea::Video,
            ModelConfig::OnPrem(_) => ConfigArea::OnPrem,
        }
    }

    /// Request body in the shape the backend expects for this area.
    pub fn to_payload(&self) -> Value {
        match self {
            ModelConfig::Image(config) => image_payload(config),
            ModelConfig::Video(config) => json!({
                "enabled": config.enabled,
                "engine": config.engine,
                "model": config.model,
                "api_key": config.api_key,
            }),
            ModelConfig::OnPrem(config) => json!({
                "enabled": config.enabled,
                "endpoint": config.endpoint,
                "model_id": config.model_id,
                "api_key": config.api_key,
            }),
        }
    }
}

fn image_payload(config: &ImageConfig) -> Value {
    let (engine, settings) = match &config.engine {
        ImageEngine::OpenAi { api_base_url, api_key } => (
            "openai",
            json!({ "OPENAI_API_BASE_URL": api_base_url, "OPENAI_API_KEY": api_key }),
        ),
        ImageEngine::ComfyUi { base_url, workflow } => (
            "comfyui",
            json!({ "COMFYUI_BASE_URL": base_url, "COMFYUI_WORKFLOW": workflow }),
        ),
        ImageEngine::Automatic1111 { base_url, steps } => (
            "automatic1111",
            json!({ "AUTOMATIC1111_BASE_URL": base_url, "AUTOMATIC1111_STEPS": steps }),
        ),
    };

    let mut payload = Map::new();
    payload.insert("enabled".into(), json!(config.enabled));
    payload.insert("engine".into(), json!(engine));
    payload.insert("model".into(), json!(config.model));
    payload.insert("image_size".into(), json!(config.image_size));
    payload.insert(engine.into(), settings);
    Value::Object(payload)
}

pub struct AdminConsole {
    backend: Arc<dyn Backend>,
    store: LocalStore,
    auth: Arc<AuthState>,
}

impl AdminConsole {
    pub fn new(backend: Arc<dyn Backend>, store: LocalStore, auth: Arc<AuthState>) -> Self {
        Self { backend, store, auth }
    }

    /// Sends a configuration update. Only admins may do this.
    pub async fn apply(&self, config: &ModelConfig) -> Result<Value> {
        if !self.auth.is_admin().await {
            return Err(ParleyError::Forbidden(
                "model configuration requires an admin account".into(),
            ));
        }

        let area = config.area();
        let payload = config.to_payload();
        let response = self.backend.update_config(area, &payload).await?;
        info!(area = area.as_str(), "model configuration updated");

        let mut cached = self
            .store
            .get::<Map<String, Value>>(KEY_MODEL_CONFIG)?
            .unwrap_or_default();
        cached.insert(area.as_str().to_string(), payload);
        self.store.set(KEY_MODEL_CONFIG, &cached)?;

        Ok(response)
    }

    /// Last configuration submitted from this client for `area`.
    pub fn cached(&self, area: ConfigArea) -> Result<Option<Value>> {
        let cached = self.store.get::<Map<String, Value>>(KEY_MODEL_CONFIG)?;
        Ok(cached.and_then(|mut c| c.remove(area.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeBackend;
    use crate::config::AuthMode;
    use tempfile::TempDir;

    fn on_prem() -> ModelConfig {
        ModelConfig::OnPrem(OnPremConfig {
            enabled: true,
            endpoint: "http://10.0.0.5:8000/v1".into(),
            model_id: "llama-3-70b".into(),
            api_key: None,
        })
    }

    async fn console(email: &str) -> (TempDir, Arc<FakeBackend>, AdminConsole) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let backend = Arc::new(FakeBackend::new());
        let auth = Arc::new(AuthState::with_mode(
            backend.clone(),
            store.clone(),
            AuthMode::Static,
            None,
        ));
        auth.sign_in(email, "pw").await.unwrap();
        let console = AdminConsole::new(backend.clone(), store, auth);
        (dir, backend, console)
    }

    #[test]
    fn test_image_payload_per_engine() {
        let config = ModelConfig::Image(ImageConfig {
            enabled: true,
            engine: ImageEngine::Automatic1111 {
                base_url: "http://sd:7860".into(),
                steps: 30,
            },
            model: "sdxl".into(),
            image_size: "1024x1024".into(),
        });
        let payload = config.to_payload();
        assert_eq!(payload["engine"], "automatic1111");
        assert_eq!(payload["automatic1111"]["AUTOMATIC1111_STEPS"], 30);
        assert!(payload.get("openai").is_none());
        assert_eq!(config.area(), ConfigArea::Image);
    }

    #[tokio::test]
    async fn test_admin_can_apply_and_it_is_cached() {
        let (_dir, backend, console) = console("admin@corp.com").await;
        console.apply(&on_prem()).await.unwrap();

        let updates = backend.state().config_updates.clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, ConfigArea::OnPrem);
        assert_eq!(updates[0].1["model_id"], "llama-3-70b");

        let cached = console.cached(ConfigArea::OnPrem).unwrap().unwrap();
        assert_eq!(cached, on_prem().to_payload());
        assert!(console.cached(ConfigArea::Video).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_admin_is_refused() {
        let (_dir, backend, console) = console("jane@corp.com").await;
        assert!(matches!(console.apply(&on_prem()).await, Err(ParleyError::Forbidden(_))));
        assert_eq!(backend.calls("update_config"), 0);
    }
}
