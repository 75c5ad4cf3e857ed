use crate::config::PatternThresholds;
use crate::models::{ValidationResult, WarningCode, WarningSeverity};

const VALUE_EPSILON: f64 = 1e-9;

fn same(a: f64, b: f64) -> bool {
    (a - b).abs() < VALUE_EPSILON
}

/// Checks the answer values of one section for disengaged or scripted patterns.
///
/// `answers` are `(question_id, value)` pairs in presentation order; the
/// alternating check depends on that order. Every check runs independently,
/// so one answer set can raise several warnings.
pub fn validate_response_patterns(
    answers: &[(String, f64)],
    section_id: &str,
    thresholds: &PatternThresholds,
) -> ValidationResult {
    let mut result = ValidationResult::clean();

    if answers.len() < thresholds.min_answers.max(1) {
        return result;
    }

    let values: Vec<f64> = answers.iter().map(|(_, v)| *v).collect();
    let first = values[0];

    if values.iter().all(|v| same(*v, first)) {
        result.flag(
            WarningCode::StraightLining,
            WarningSeverity::High,
            format!(
                "All {} answers in section {} were {}",
                values.len(),
                section_id,
                first
            ),
            thresholds.straight_lining_score,
        );
    } else if is_alternating(&values) {
        result.flag(
            WarningCode::AlternatingPattern,
            WarningSeverity::Medium,
            format!(
                "Answers in section {} alternated between {} and {}",
                section_id, values[0], values[1]
            ),
            thresholds.alternating_score,
        );
    }

    let midpoint = thresholds.scale_for(section_id).midpoint();
    let at_midpoint = values.iter().filter(|v| same(**v, midpoint)).count();
    let ratio = at_midpoint as f64 / values.len() as f64;
    if ratio >= thresholds.midpoint_ratio {
        result.flag(
            WarningCode::MidpointBias,
            WarningSeverity::Low,
            format!(
                "{} of {} answers in section {} were the scale midpoint {}",
                at_midpoint,
                values.len(),
                section_id,
                midpoint
            ),
            thresholds.midpoint_score,
        );
    }

    result.with_invalid_threshold(thresholds.invalid_score)
}

/// Exactly two distinct values repeating with period 2 across the whole sequence.
fn is_alternating(values: &[f64]) -> bool {
    if values.len() < 2 || same(values[0], values[1]) {
        return false;
    }
    values
        .iter()
        .enumerate()
        .all(|(i, v)| same(*v, values[i % 2]))
}
