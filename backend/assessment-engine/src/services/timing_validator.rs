use crate::config::TimingThresholds;
use crate::models::{ResponsePattern, ValidationResult, WarningCode, WarningSeverity};

/// Checks response latencies of one section for signs of automation.
///
/// Timing anomalies are advisory: the result is always valid and only the
/// risk score and warnings change.
pub fn validate_timing(
    responses: &[ResponsePattern],
    section_type: &str,
    thresholds: &TimingThresholds,
) -> ValidationResult {
    let mut result = ValidationResult::clean();

    if responses.len() < thresholds.min_responses.max(1) {
        return result;
    }

    let times: Vec<f64> = responses
        .iter()
        .map(|r| r.response_time_ms as f64)
        .collect();

    let fast_ms = thresholds.fast_threshold_ms(section_type);
    let fast_hits = responses
        .iter()
        .take(thresholds.fast_sample)
        .filter(|r| r.response_time_ms < fast_ms)
        .count();
    if fast_hits >= thresholds.fast_hits {
        result.flag(
            WarningCode::TooFast,
            WarningSeverity::High,
            format!(
                "{} of the first {} responses were faster than {}ms",
                fast_hits,
                thresholds.fast_sample.min(responses.len()),
                fast_ms
            ),
            thresholds.too_fast_score,
        );
    }

    let window = thresholds.uniform_window.max(2);
    if times.len() >= window {
        let windows_total = times.len() - window + 1;
        let mut triggered = times
            .windows(window)
            .filter(|w| std_dev(w) < thresholds.uniform_std_dev_ms)
            .count();
        // a flat overall profile counts even if no single window dips below the bound
        if triggered == 0 && std_dev(&times) < thresholds.uniform_std_dev_ms {
            triggered = 1;
        }

        if triggered > 0 {
            let weight = (thresholds.uniform_score_per_window * triggered as u32)
                .min(thresholds.uniform_score_cap);
            result.flag(
                WarningCode::UniformTiming,
                WarningSeverity::Medium,
                format!(
                    "{} of {} windows of {} responses had near-constant timing (std dev < {}ms)",
                    triggered, windows_total, window, thresholds.uniform_std_dev_ms
                ),
                weight,
            );
        }
    }

    result
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerValue;
    use chrono::Utc;

    fn responses(times: &[u64]) -> Vec<ResponsePattern> {
        times
            .iter()
            .enumerate()
            .map(|(i, t)| ResponsePattern {
                question_id: format!("q{}", i),
                answer: AnswerValue::Number(((i % 5) + 1) as f64),
                response_time_ms: *t,
                timestamp: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn empty_history_is_valid_without_warnings() {
        let result = validate_timing(&[], "aptitude", &TimingThresholds::default());
        assert!(result.is_valid);
        assert!(result.warnings.is_empty());
        assert_eq!(result.score, 0);
    }

    #[test]
    fn short_history_is_not_judged() {
        let result = validate_timing(
            &responses(&[100, 100, 100, 100]),
            "aptitude",
            &TimingThresholds::default(),
        );
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn three_fast_answers_in_first_five_flag_too_fast() {
        let result = validate_timing(
            &responses(&[300, 400, 9000, 350, 12000]),
            "aptitude",
            &TimingThresholds::default(),
        );
        assert!(result.has_warning(WarningCode::TooFast));
        assert!(result.is_valid);
        assert_eq!(result.score, 30);
    }

    #[test]
    fn fast_threshold_depends_on_section() {
        // 1200ms is fast for aptitude items but normal for a likert section
        let times = [1200, 1200, 1200, 5000, 7000];
        let thresholds = TimingThresholds::default();
        assert!(validate_timing(&responses(&times), "aptitude", &thresholds)
            .has_warning(WarningCode::TooFast));
        assert!(!validate_timing(&responses(&times), "riasec", &thresholds)
            .has_warning(WarningCode::TooFast));
    }

    #[test]
    fn constant_timing_flags_uniform() {
        let result = validate_timing(
            &responses(&[5000, 5010, 4990, 5000, 5005, 4995, 5000]),
            "riasec",
            &TimingThresholds::default(),
        );
        assert!(result.has_warning(WarningCode::UniformTiming));
        assert!(!result.has_warning(WarningCode::TooFast));
        // two windows of six triggered
        assert_eq!(result.score, 20);
        assert!(result.is_valid);
    }

    #[test]
    fn uniform_score_is_capped() {
        let times = vec![4000; 30];
        let result = validate_timing(&responses(&times), "riasec", &TimingThresholds::default());
        assert_eq!(result.score, 50);
    }

    #[test]
    fn varied_human_timing_is_clean() {
        let result = validate_timing(
            &responses(&[4200, 9100, 3100, 15000, 6400, 2500, 8800, 11000]),
            "aptitude",
            &TimingThresholds::default(),
        );
        assert!(result.warnings.is_empty());
        assert_eq!(result.score, 0);
    }

    #[test]
    fn std_dev_of_constant_series_is_zero() {
        assert_eq!(std_dev(&[3.0, 3.0, 3.0]), 0.0);
        assert!((std_dev(&[1.0, 3.0]) - 1.0).abs() < 1e-9);
    }
}
