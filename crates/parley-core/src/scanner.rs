//! Heuristic detection of sensitive content in outgoing messages.
//!
//! Pure functions over the message text. A positive result is only a hint to
//! offer the on-prem model before sending.

use crate::models::ON_PREM_MODEL_ID;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

const MAX_DESCRIBED_TYPES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensitiveDataReport {
    pub is_sensitive: bool,
    pub confidence: Confidence,
    /// Detected categories in detection order, without duplicates.
    pub detected_types: Vec<String>,
    pub description: String,
    pub suggested_model: Option<String>,
}

struct PatternRule {
    kind: &'static str,
    label: &'static str,
    regex: Regex,
}

fn rule(kind: &'static str, label: &'static str, pattern: &str) -> PatternRule {
    PatternRule {
        kind,
        label,
        // patterns are constants covered by the tests below
        regex: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid {kind} pattern: {e}")),
    }
}

static PATTERNS: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        rule("credit_card", "credit card number", r"\b(?:\d{4}[- ]?){3}\d{4}\b"),
        rule("ssn", "social security number", r"\b\d{3}-\d{2}-\d{4}\b"),
        rule(
            "api_key",
            "API key or token",
            r"\b(?:sk|pk|rk|api|key|token)[-_][A-Za-z0-9_\-]{16,}\b|\bAKIA[0-9A-Z]{16}\b|\bgh[pousr]_[A-Za-z0-9]{30,}\b",
        ),
        rule("email", "email address", r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b"),
        rule(
            "phone",
            "phone number",
            r"(?:\+\d{1,3}[ .\-]?)?\(?\b\d{3}\)?[ .\-]\d{3}[ .\-]\d{4}\b",
        ),
        rule(
            "ip_address",
            "IP address",
            r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
        ),
    ]
});

const KEYWORD_GROUPS: &[(&str, &str, &[&str])] = &[
    ("password", "password", &["password", "passwd", "passcode", "pwd"]),
    (
        "credentials",
        "credentials",
        &["secret key", "private key", "credential", "credentials", "api key", "access token"],
    ),
    (
        "financial",
        "financial details",
        &["bank account", "routing number", "iban", "account number", "salary"],
    ),
    (
        "medical",
        "medical information",
        &["diagnosis", "medical record", "patient", "prescription"],
    ),
    (
        "personal_id",
        "personal identifiers",
        &["social security", "passport number", "date of birth", "driver's license"],
    ),
    (
        "confidential",
        "confidential material",
        &["confidential", "internal only", "proprietary", "trade secret"],
    ),
];

static KEYWORDS: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    KEYWORD_GROUPS
        .iter()
        .map(|&(kind, label, words)| {
            let alternatives: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
            rule(kind, label, &format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
        })
        .collect()
});

/// Scans `text` for patterns and keywords that suggest sensitive content.
///
/// Confidence grows with the number of distinct categories found: one is
/// low, two medium, three or more high.
pub fn detect_sensitive_data(text: &str) -> SensitiveDataReport {
    let mut detected: Vec<&PatternRule> = Vec::new();

    for rule in PATTERNS.iter().chain(KEYWORDS.iter()) {
        if rule.regex.is_match(text) && !detected.iter().any(|r| r.kind == rule.kind) {
            detected.push(rule);
        }
    }

    let confidence = match detected.len() {
        0 | 1 => Confidence::Low,
        2 => Confidence::Medium,
        _ => Confidence::High,
    };
    let is_sensitive = !detected.is_empty();

    SensitiveDataReport {
        is_sensitive,
        confidence,
        detected_types: detected.iter().map(|r| r.kind.to_string()).collect(),
        description: describe(&detected),
        suggested_model: is_sensitive.then(|| ON_PREM_MODEL_ID.to_string()),
    }
}

fn describe(detected: &[&PatternRule]) -> String {
    if detected.is_empty() {
        return "No sensitive data detected".to_string();
    }

    let labels: Vec<&str> = detected
        .iter()
        .take(MAX_DESCRIBED_TYPES)
        .map(|r| r.label)
        .collect();
    let mut description = format!("Possible sensitive data detected: {}", labels.join(", "));
    if detected.len() > MAX_DESCRIBED_TYPES {
        description.push_str(&format!(" and {} more", detected.len() - MAX_DESCRIBED_TYPES));
    }
    description
}
