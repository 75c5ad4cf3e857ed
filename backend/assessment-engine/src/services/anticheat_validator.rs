use crate::config::AntiCheatThresholds;
use crate::models::{AntiCheatSignals, ValidationResult, WarningCode, WarningSeverity};

/// Checks the behavioral telemetry snapshot of a section. Flags add up into the score.
pub fn validate_anti_cheat_signals(
    signals: &AntiCheatSignals,
    thresholds: &AntiCheatThresholds,
) -> ValidationResult {
    let mut result = ValidationResult::clean();

    // Mouse activity is only judged once a full observation window has elapsed.
    if thresholds.mouse_window_ms > 0 && signals.total_time_ms >= thresholds.mouse_window_ms {
        let windows = signals.total_time_ms / thresholds.mouse_window_ms;
        let required = (thresholds.min_mouse_per_window as u64).saturating_mul(windows);
        if (signals.mouse_movements as u64) < required {
            result.flag(
                WarningCode::NoMouseMovement,
                WarningSeverity::High,
                format!(
                    "Only {} mouse movements in {}s (expected at least {})",
                    signals.mouse_movements,
                    signals.total_time_ms / 1000,
                    required
                ),
                thresholds.no_mouse_score,
            );
        }
    }

    if signals.tab_switches > thresholds.max_tab_switches {
        result.flag(
            WarningCode::ExcessiveTabSwitching,
            WarningSeverity::High,
            format!(
                "Switched tabs {} times (limit {})",
                signals.tab_switches, thresholds.max_tab_switches
            ),
            thresholds.tab_switch_score,
        );
    }

    if signals.total_time_ms > 0 {
        let away_ratio = signals.time_away_ms as f64 / signals.total_time_ms as f64;
        if away_ratio > thresholds.max_time_away_ratio {
            result.flag(
                WarningCode::TimeAway,
                WarningSeverity::Medium,
                format!(
                    "Away from the test for {:.0}% of the section",
                    away_ratio * 100.0
                ),
                thresholds.time_away_score,
            );
        }
    }

    if signals.copy_paste_events > thresholds.max_copy_paste_events {
        result.flag(
            WarningCode::CopyPasteDetected,
            WarningSeverity::Medium,
            format!("{} copy/paste events", signals.copy_paste_events),
            thresholds.copy_paste_score,
        );
    }

    result.with_invalid_threshold(thresholds.invalid_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal() -> AntiCheatSignals {
        AntiCheatSignals {
            mouse_movements: 240,
            tab_switches: 1,
            copy_paste_events: 0,
            time_away_ms: 3_000,
            total_time_ms: 300_000,
        }
    }

    #[test]
    fn normal_behavior_is_clean() {
        let result = validate_anti_cheat_signals(&normal(), &AntiCheatThresholds::default());
        assert!(result.warnings.is_empty());
        assert_eq!(result.score, 0);
        assert!(result.is_valid);
    }

    #[test]
    fn idle_mouse_over_a_minute_is_flagged() {
        let signals = AntiCheatSignals {
            mouse_movements: 5,
            total_time_ms: 60_000,
            ..normal()
        };
        let result = validate_anti_cheat_signals(&signals, &AntiCheatThresholds::default());
        assert!(result.has_warning(WarningCode::NoMouseMovement));
    }

    #[test]
    fn mouse_requirement_scales_with_time() {
        // 15 moves is enough for one minute but not for five
        let mut signals = AntiCheatSignals {
            mouse_movements: 15,
            total_time_ms: 60_000,
            ..normal()
        };
        let thresholds = AntiCheatThresholds::default();
        assert!(!validate_anti_cheat_signals(&signals, &thresholds)
            .has_warning(WarningCode::NoMouseMovement));
        signals.total_time_ms = 300_000;
        assert!(validate_anti_cheat_signals(&signals, &thresholds)
            .has_warning(WarningCode::NoMouseMovement));
    }

    #[test]
    fn short_sections_skip_mouse_check() {
        let signals = AntiCheatSignals {
            mouse_movements: 0,
            total_time_ms: 30_000,
            time_away_ms: 0,
            ..normal()
        };
        let result = validate_anti_cheat_signals(&signals, &AntiCheatThresholds::default());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn tab_switching_above_limit_is_flagged() {
        let thresholds = AntiCheatThresholds::default();
        let at_limit = AntiCheatSignals {
            tab_switches: 5,
            ..normal()
        };
        assert!(validate_anti_cheat_signals(&at_limit, &thresholds).warnings.is_empty());

        let over = AntiCheatSignals {
            tab_switches: 6,
            ..normal()
        };
        assert_eq!(
            validate_anti_cheat_signals(&over, &thresholds).codes(),
            vec![WarningCode::ExcessiveTabSwitching]
        );
    }

    #[test]
    fn long_absence_is_flagged() {
        let signals = AntiCheatSignals {
            time_away_ms: 150_000,
            ..normal()
        };
        let result = validate_anti_cheat_signals(&signals, &AntiCheatThresholds::default());
        assert_eq!(result.codes(), vec![WarningCode::TimeAway]);
    }

    #[test]
    fn flags_combine_additively() {
        let signals = AntiCheatSignals {
            mouse_movements: 0,
            tab_switches: 12,
            copy_paste_events: 4,
            time_away_ms: 200_000,
            total_time_ms: 300_000,
        };
        let result = validate_anti_cheat_signals(&signals, &AntiCheatThresholds::default());
        assert_eq!(result.warnings.len(), 4);
        assert_eq!(result.score, 100);
        assert!(!result.is_valid);
    }
}
