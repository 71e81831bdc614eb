//! Telling a model recommendation apart from an ordinary answer.

use crate::models::AIModel;
use serde::Serialize;
use serde_json::Value;

/// Fields whose presence marks a completion response as a recommendation.
///
/// This is loose on purpose: the backend has no explicit discriminator, and
/// an answer that happens to carry one of these keys is treated as a
/// recommendation too.
const RECOMMENDATION_FIELDS: [&str; 7] = [
    "recommended_model",
    "recommendation",
    "model_recommendation",
    "suggested_model",
    "suggested_models",
    "alternative_models",
    "intent",
];

const DEFAULT_MESSAGE: &str = "The selected model can't handle this request. Try one of the suggested models.";

/// The backend declined the requested model and suggests others.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub message: String,
    pub requested_model: String,
    pub recommended_model: Option<String>,
    pub alternatives: Vec<AIModel>,
    pub intent: Option<String>,
}

pub fn is_recommendation(response: &Value) -> bool {
    let Some(object) = response.as_object() else {
        return false;
    };
    object.get("type").and_then(Value::as_str) == Some("model_recommendation")
        || RECOMMENDATION_FIELDS.iter().any(|f| object.contains_key(*f))
}

fn model_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(o) => o
            .get("id")
            .or_else(|| o.get("model"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn text(response: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| response.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Builds a recommendation from a response that [`is_recommendation`]
/// accepted. Suggested ids are resolved against `known`; when the response
/// names none, every enabled model except the requested one is offered.
pub fn parse_recommendation(response: &Value, requested_model: &str, known: &[AIModel]) -> Recommendation {
    let recommended_model = ["recommended_model", "suggested_model", "model_recommendation"]
        .iter()
        .find_map(|k| response.get(*k).and_then(model_id))
        .or_else(|| response.pointer("/recommendation/model").and_then(model_id));

    let mut suggested: Vec<String> = ["suggested_models", "alternative_models"]
        .iter()
        .filter_map(|k| response.get(*k).and_then(Value::as_array))
        .flatten()
        .filter_map(model_id)
        .collect();
    if let Some(id) = &recommended_model {
        if !suggested.contains(id) {
            suggested.insert(0, id.clone());
        }
    }

    let alternatives = if suggested.is_empty() {
        fallback_alternatives(requested_model, known)
    } else {
        suggested
            .iter()
            .filter(|id| id.as_str() != requested_model)
            .map(|id| {
                known
                    .iter()
                    .find(|m| &m.id == id)
                    .cloned()
                    .unwrap_or_else(|| AIModel::new(id, id, ""))
            })
            .collect()
    };

    Recommendation {
        message: text(response, &["message", "reason", "content"])
            .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
        requested_model: requested_model.to_string(),
        recommended_model,
        alternatives,
        intent: text(response, &["intent"]),
    }
}

/// Recommendation for a request the backend rejected because the model
/// does not exist.
pub fn model_not_found(message: &str, requested_model: &str, known: &[AIModel]) -> Recommendation {
    let alternatives = fallback_alternatives(requested_model, known);
    Recommendation {
        message: message.to_string(),
        requested_model: requested_model.to_string(),
        recommended_model: alternatives.first().map(|m| m.id.clone()),
        alternatives,
        intent: None,
    }
}

fn fallback_alternatives(requested_model: &str, known: &[AIModel]) -> Vec<AIModel> {
    known
        .iter()
        .filter(|m| m.enabled && m.id != requested_model)
        .cloned()
        .collect()
}

/// Pulls the assistant text out of a completion response.
pub fn extract_answer(response: &Value) -> Option<String> {
    let candidates = [
        response.get("content"),
        response.pointer("/choices/0/message/content"),
        response.pointer("/message/content"),
        response.get("message"),
        response.get("response"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
}
