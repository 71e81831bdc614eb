//! Model records and the rules that turn backend model listings into them.

pub mod registry;

pub use registry::ModelRegistry;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The privacy-preserving model suggested when outgoing text looks sensitive.
pub const ON_PREM_MODEL_ID: &str = "on-prem-secure";

/// A selectable model as shown in the picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AIModel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_saved: Option<bool>,
}

impl AIModel {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            enabled: true,
            raw_data: None,
            is_saved: None,
        }
    }
}

/// Fallback list used when the backend has never answered.
pub fn default_models() -> Vec<AIModel> {
    vec![
        AIModel::new("gpt-4o", "GPT-4o", "OpenAI flagship multimodal model"),
        AIModel::new("gpt-4o-mini", "GPT-4o mini", "Fast, low-cost OpenAI model"),
        AIModel::new(
            "claude-sonnet-4-20250514",
            "Claude Sonnet 4",
            "Anthropic model for reasoning and writing",
        ),
        AIModel::new(
            ON_PREM_MODEL_ID,
            "On-Prem Secure",
            "Runs inside your network; nothing leaves the premises",
        ),
    ]
}

/// Shape of the `access_control` field on a backend model record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessControl {
    /// Field missing: the model has no saved record on the backend.
    Absent,
    /// `null`: visible to everyone.
    Public,
    /// Any other value: restricted to specific users or groups.
    Restricted,
}

impl AccessControl {
    pub fn of(raw: &Value) -> Self {
        match raw.get("access_control") {
            None => AccessControl::Absent,
            Some(Value::Null) => AccessControl::Public,
            Some(_) => AccessControl::Restricted,
        }
    }
}

/// Resolved availability of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub enabled: bool,
    pub is_saved: bool,
}

/// Availability decision table.
///
/// | access_control | explicit `enabled` | enabled | saved |
/// |----------------|--------------------|---------|-------|
/// | absent         | none               | false   | false |
/// | null           | none               | true    | true  |
/// | object / other | none               | false   | true  |
/// | any            | `Some(b)`          | b       | as row|
pub fn derive_availability(access: AccessControl, explicit: Option<bool>) -> Availability {
    let (derived, is_saved) = match access {
        AccessControl::Absent => (false, false),
        AccessControl::Public => (true, true),
        AccessControl::Restricted => (false, true),
    };
    Availability {
        enabled: explicit.unwrap_or(derived),
        is_saved,
    }
}

/// Availability of a raw backend record.
pub fn availability_of(raw: &Value) -> Availability {
    let explicit = raw.get("enabled").and_then(Value::as_bool);
    derive_availability(AccessControl::of(raw), explicit)
}

/// Keys under which the backend has been seen to nest its model array.
const ENVELOPE_KEYS: [&str; 6] = ["models", "data", "items", "results", "result", "payload"];

/// Finds the array of model records in a listing response.
///
/// Accepts a bare array or an object holding the array under one of
/// [`ENVELOPE_KEYS`]. Returns `None` for anything else.
pub fn normalize_envelope(response: &Value) -> Option<&Vec<Value>> {
    if let Value::Array(items) = response {
        return Some(items);
    }
    ENVELOPE_KEYS
        .iter()
        .find_map(|key| response.get(*key).and_then(Value::as_array))
}

fn str_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// Maps one backend record to an [`AIModel`]. Records without any id are
/// skipped.
pub fn map_raw_model(raw: &Value) -> Option<AIModel> {
    let id = str_field(raw, "id")
        .or_else(|| str_field(raw, "model"))
        .or_else(|| str_field(raw, "name"))?;

    let name = str_field(raw, "name").unwrap_or(id);
    let description = str_field(raw, "description")
        .or_else(|| {
            raw.pointer("/info/meta/description")
                .and_then(Value::as_str)
        })
        .unwrap_or("");

    let availability = availability_of(raw);

    Some(AIModel {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        enabled: availability.enabled,
        raw_data: Some(raw.clone()),
        is_saved: Some(availability.is_saved),
    })
}

/// Normalizes and maps a whole listing response.
pub fn map_models(response: &Value) -> Option<Vec<AIModel>> {
    normalize_envelope(response).map(|items| items.iter().filter_map(map_raw_model).collect())
}

/// Overrides availability with data from the base-models listing, by id.
///
/// Only base records that carry `access_control` (or an explicit `enabled`)
/// change anything.
pub fn merge_base_models(models: &mut [AIModel], base_response: &Value) {
    let Some(base) = normalize_envelope(base_response) else {
        return;
    };

    for model in models.iter_mut() {
        let Some(record) = base
            .iter()
            .find(|b| str_field(b, "id") == Some(model.id.as_str()))
        else {
            continue;
        };

        if record.get("access_control").is_none() && record.get("enabled").is_none() {
            continue;
        }

        let availability = availability_of(record);
        model.enabled = availability.enabled;
        model.is_saved = Some(availability.is_saved);
        if let Some(Value::Object(raw)) = model.raw_data.as_mut() {
            if let Some(access) = record.get("access_control") {
                raw.insert("access_control".to_string(), access.clone());
            }
        }
    }
}

/// Picks the model that should be selected after the list changed.
///
/// The selection must be one of the enabled models, or of all models when
/// none are enabled. Returns `None` only for an empty list.
pub fn reconcile_selection(models: &[AIModel], selected: Option<&str>) -> Option<String> {
    let enabled: Vec<&AIModel> = models.iter().filter(|m| m.enabled).collect();
    let candidates: Vec<&AIModel> = if enabled.is_empty() {
        models.iter().collect()
    } else {
        enabled
    };

    if let Some(current) = selected {
        if candidates.iter().any(|m| m.id == current) {
            return Some(current.to_string());
        }
    }
    candidates.first().map(|m| m.id.clone())
}
