use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Answer value as it arrives from the test UI: either a scale/choice number or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    Text(String),
}

impl AnswerValue {
    /// Numeric view of the answer; textual answers like `"4"` count as numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnswerValue::Number(n) => Some(*n),
            AnswerValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(AnswerValue::Number),
            serde_json::Value::String(s) => Some(AnswerValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(AnswerValue::Text(b.to_string())),
            _ => None,
        }
    }

    /// Loose comparison used to grade multiple-choice answers (`"b"` matches `"B"`).
    pub fn matches_choice(&self, correct: &str) -> bool {
        match self {
            AnswerValue::Text(s) => s.trim().eq_ignore_ascii_case(correct.trim()),
            AnswerValue::Number(n) => correct
                .trim()
                .parse::<f64>()
                .map(|c| (c - n).abs() < f64::EPSILON)
                .unwrap_or(false),
        }
    }
}

/// One answered item in submission order, the input of the timing and pattern checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePattern {
    pub question_id: String,
    pub answer: AnswerValue,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Behavioral telemetry snapshot for a section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AntiCheatSignals {
    pub mouse_movements: u32,
    pub tab_switches: u32,
    pub copy_paste_events: u32,
    pub time_away_ms: u64,
    #[validate(range(min = 1, message = "total_time_ms must be positive"))]
    pub total_time_ms: u64,
}

impl AntiCheatSignals {
    /// Folds a newer snapshot in. Counters only move forward, so a late or
    /// re-sent snapshot cannot roll the section back.
    pub fn merge_monotonic(&mut self, newer: &AntiCheatSignals) {
        self.mouse_movements = self.mouse_movements.max(newer.mouse_movements);
        self.tab_switches = self.tab_switches.max(newer.tab_switches);
        self.copy_paste_events = self.copy_paste_events.max(newer.copy_paste_events);
        self.time_away_ms = self.time_away_ms.max(newer.time_away_ms);
        self.total_time_ms = self.total_time_ms.max(newer.total_time_ms);
    }
}

/// Unique key of a stored response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResponseKey {
    pub attempt_id: String,
    pub section_id: String,
    pub question_id: String,
}

impl ResponseKey {
    pub fn new(
        attempt_id: impl Into<String>,
        section_id: impl Into<String>,
        question_id: impl Into<String>,
    ) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            section_id: section_id.into(),
            question_id: question_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub attempt_id: String,
    pub section_id: String,
    pub question_id: String,
    pub response_value: serde_json::Value,
    pub is_correct: Option<bool>,
    pub saved_at: DateTime<Utc>,
}

impl StoredResponse {
    pub fn key(&self) -> ResponseKey {
        ResponseKey::new(&self.attempt_id, &self.section_id, &self.question_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveResponseRequest {
    #[serde(default)]
    pub attempt_id: String,
    pub question_id: String,
    /// May be empty when the question id carries its own section.
    #[serde(default)]
    pub section_id: String,
    #[serde(default)]
    pub response_value: Option<serde_json::Value>,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
}

/// Result of a save. Errors are carried as data so callers never crash the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<ResponseKey>,
}

impl SaveOutcome {
    pub fn saved(key: ResponseKey) -> Self {
        Self {
            success: true,
            error: None,
            key: Some(key),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            key: None,
        }
    }
}

/// Null or missing values are stored as an empty string; everything else as given.
pub fn sanitize_response_value(value: Option<&serde_json::Value>) -> serde_json::Value {
    match value {
        None | Some(serde_json::Value::Null) => serde_json::Value::String(String::new()),
        Some(v) => v.clone(),
    }
}
