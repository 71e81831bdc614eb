use super::{default_models, map_models, merge_base_models, reconcile_selection, AIModel};
use crate::api::Backend;
use crate::error::{ApiError, ParleyError, Result};
use crate::storage::{LocalStore, KEY_MODELS_CACHE, KEY_SELECTED_MODEL};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

struct RegistryState {
    models: Vec<AIModel>,
    selected: Option<String>,
    loaded: bool,
}

/// Cached view of the models available for selection.
///
/// Starts from the local cache (or built-in defaults) and is refreshed from
/// the backend at most once at a time: callers arriving while a fetch is in
/// flight wait for it and share its result instead of fetching again.
pub struct ModelRegistry {
    backend: Arc<dyn Backend>,
    store: LocalStore,
    state: RwLock<RegistryState>,
    fetch_lock: Mutex<()>,
    generation: AtomicU64,
}

impl ModelRegistry {
    pub fn new(backend: Arc<dyn Backend>, store: LocalStore, default_model: Option<String>) -> Self {
        let models = load_cached_models(&store);
        let stored_selection = store.get::<String>(KEY_SELECTED_MODEL).unwrap_or_else(|e| {
            warn!(error = %e, "could not read selected model");
            None
        });
        let preferred = stored_selection.or(default_model);
        let selected = reconcile_selection(&models, preferred.as_deref());

        Self {
            backend,
            store,
            state: RwLock::new(RegistryState {
                models,
                selected,
                loaded: false,
            }),
            fetch_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn models(&self) -> Vec<AIModel> {
        self.state.read().await.models.clone()
    }

    pub async fn enabled_models(&self) -> Vec<AIModel> {
        self.state
            .read()
            .await
            .models
            .iter()
            .filter(|m| m.enabled)
            .cloned()
            .collect()
    }

    pub async fn selected_model(&self) -> Option<String> {
        self.state.read().await.selected.clone()
    }

    pub async fn get(&self, id: &str) -> Option<AIModel> {
        self.state.read().await.models.iter().find(|m| m.id == id).cloned()
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }

    /// Selects a model by id. The id must be in the current list.
    pub async fn select_model(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.models.iter().any(|m| m.id == id) {
            return Err(ParleyError::ModelNotFound(id.to_string()));
        }
        state.selected = Some(id.to_string());
        self.store.set(KEY_SELECTED_MODEL, id)?;
        Ok(())
    }

    /// Fetches the model list unless it has already been fetched.
    pub async fn ensure_models_loaded(&self) -> Vec<AIModel> {
        let _guard = self.fetch_lock.lock().await;
        if self.state.read().await.loaded {
            return self.models().await;
        }
        self.fetch_locked().await
    }

    /// Fetches the model list again. A refresh that had to wait for another
    /// fetch to finish reuses that fetch's result.
    pub async fn refresh_models(&self) -> Vec<AIModel> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.fetch_lock.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            return self.models().await;
        }
        self.fetch_locked().await
    }

    /// Must be called with `fetch_lock` held.
    async fn fetch_locked(&self) -> Vec<AIModel> {
        let fetched = self.fetch_remote().await;
        self.generation.fetch_add(1, Ordering::AcqRel);

        let mut state = self.state.write().await;
        state.loaded = true;
        match fetched {
            Ok(models) if !models.is_empty() => {
                info!(count = models.len(), "loaded models from backend");
                if let Err(e) = self.store.set(KEY_MODELS_CACHE, &models) {
                    warn!(error = %e, "could not cache model list");
                }
                state.models = models;
            }
            Ok(_) => {
                warn!("backend returned no models, keeping cached list");
            }
            Err(e) => {
                warn!(error = %e, "model fetch failed, keeping cached list");
            }
        }
        if state.models.is_empty() {
            state.models = default_models();
        }

        self.reconcile_locked(&mut state);
        state.models.clone()
    }

    async fn fetch_remote(&self) -> std::result::Result<Vec<AIModel>, ApiError> {
        let response = self.backend.list_models().await?;
        let mut models = map_models(&response)
            .ok_or_else(|| ApiError::Decode("unrecognized model listing".to_string()))?;

        match self.backend.list_base_models().await {
            Ok(base) => merge_base_models(&mut models, &base),
            Err(e) => debug!(error = %e, "base models unavailable, skipping enrichment"),
        }
        Ok(models)
    }

    fn reconcile_locked(&self, state: &mut RegistryState) {
        let selected = reconcile_selection(&state.models, state.selected.as_deref());
        if selected != state.selected {
            debug!(from = ?state.selected, to = ?selected, "selection moved");
            state.selected = selected;
        }
        let persisted = match &state.selected {
            Some(id) => self.store.set(KEY_SELECTED_MODEL, id.as_str()),
            None => self.store.remove(KEY_SELECTED_MODEL),
        };
        if let Err(e) = persisted {
            warn!(error = %e, "could not persist selected model");
        }
    }

    fn persist_locked(&self, state: &mut RegistryState) -> Result<()> {
        self.store.set(KEY_MODELS_CACHE, &state.models)?;
        self.reconcile_locked(state);
        Ok(())
    }

    /// Applies `update` to the model with `id`. Local only; the backend is
    /// not told.
    pub async fn update_model<F>(&self, id: &str, update: F) -> Result<AIModel>
    where
        F: FnOnce(&mut AIModel),
    {
        let mut state = self.state.write().await;
        let model = state
            .models
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ParleyError::ModelNotFound(id.to_string()))?;
        update(model);
        // the id is the key
        model.id = id.to_string();
        let updated = model.clone();
        self.persist_locked(&mut state)?;
        Ok(updated)
    }

    /// Adds a model, replacing any existing one with the same id. Local only.
    pub async fn add_model(&self, model: AIModel) -> Result<()> {
        let mut state = self.state.write().await;
        match state.models.iter_mut().find(|m| m.id == model.id) {
            Some(existing) => *existing = model,
            None => state.models.push(model),
        }
        self.persist_locked(&mut state)
    }

    /// Removes a model. Local only. Returns whether anything was removed.
    pub async fn remove_model(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.models.len();
        state.models.retain(|m| m.id != id);
        let removed = state.models.len() != before;
        if removed {
            self.persist_locked(&mut state)?;
        }
        Ok(removed)
    }

    /// Forgets everything fetched. Used on sign-out.
    pub async fn reset(&self) {
        let _guard = self.fetch_lock.lock().await;
        let mut state = self.state.write().await;
        state.models = default_models();
        state.selected = reconcile_selection(&state.models, None);
        state.loaded = false;
    }
}

fn load_cached_models(store: &LocalStore) -> Vec<AIModel> {
    match store.get::<Vec<AIModel>>(KEY_MODELS_CACHE) {
        Ok(Some(models)) if !models.is_empty() => models,
        Ok(_) => default_models(),
        Err(e) => {
            warn!(error = %e, "could not read model cache");
            default_models()
        }
    }
}
