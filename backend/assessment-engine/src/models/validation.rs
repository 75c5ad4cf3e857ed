use serde::{Deserialize, Serialize};

/// Risk scores are additive but never exceed this value.
pub const MAX_RISK_SCORE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    TooFast,
    UniformTiming,
    StraightLining,
    AlternatingPattern,
    MidpointBias,
    NoMouseMovement,
    ExcessiveTabSwitching,
    TimeAway,
    CopyPasteDetected,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::TooFast => "TOO_FAST",
            WarningCode::UniformTiming => "UNIFORM_TIMING",
            WarningCode::StraightLining => "STRAIGHT_LINING",
            WarningCode::AlternatingPattern => "ALTERNATING_PATTERN",
            WarningCode::MidpointBias => "MIDPOINT_BIAS",
            WarningCode::NoMouseMovement => "NO_MOUSE_MOVEMENT",
            WarningCode::ExcessiveTabSwitching => "EXCESSIVE_TAB_SWITCHING",
            WarningCode::TimeAway => "TIME_AWAY",
            WarningCode::CopyPasteDetected => "COPY_PASTE_DETECTED",
        }
    }
}

impl std::fmt::Display for WarningCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub code: WarningCode,
    pub severity: WarningSeverity,
    pub message: String,
}

/// Outcome of one integrity check. Produced for every input, including empty ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub score: u32,
    pub warnings: Vec<ValidationWarning>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::clean()
    }
}

impl ValidationResult {
    pub fn clean() -> Self {
        Self {
            is_valid: true,
            score: 0,
            warnings: Vec::new(),
        }
    }

    /// Appends a warning and adds `weight` to the risk score, capped at [`MAX_RISK_SCORE`].
    pub fn flag(
        &mut self,
        code: WarningCode,
        severity: WarningSeverity,
        message: impl Into<String>,
        weight: u32,
    ) {
        self.warnings.push(ValidationWarning {
            code,
            severity,
            message: message.into(),
        });
        self.score = self.score.saturating_add(weight).min(MAX_RISK_SCORE);
    }

    /// Marks the result invalid once the accumulated score reaches `threshold`.
    pub fn with_invalid_threshold(mut self, threshold: u32) -> Self {
        self.is_valid = self.score < threshold;
        self
    }

    pub fn has_warning(&self, code: WarningCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    pub fn codes(&self) -> Vec<WarningCode> {
        self.warnings.iter().map(|w| w.code).collect()
    }
}
