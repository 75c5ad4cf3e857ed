use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::EngineSettings;
use crate::metrics::VALIDATION_FLAGS_TOTAL;
use crate::models::{
    AbilityTier, AntiCheatSignals, ResponsePattern, SectionClosure, SectionState, StoredResponse,
    Subtag, TestPhase, TrajectoryPoint, ValidationResult,
};
use crate::services::anticheat_validator::validate_anti_cheat_signals;
use crate::services::pattern_validator::validate_response_patterns;
use crate::services::timing_validator::validate_timing;

const DOMINANT_DIRECTION_RATIO: f64 = 0.6;

/// Overall shape of a difficulty path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathShape {
    Stable,
    Ascending,
    Descending,
    Fluctuating,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccuracyStat {
    pub answered: u32,
    pub correct: u32,
    pub accuracy: f64,
}

impl AccuracyStat {
    fn add(&mut self, correct: bool) {
        self.answered += 1;
        if correct {
            self.correct += 1;
        }
        self.accuracy = self.correct as f64 / self.answered as f64;
    }
}

/// One question text served under more than one id, as happens once the
/// fallback bank is exhausted and starts repeating.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepeatedText {
    pub text: String,
    pub question_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionValidations {
    pub timing: ValidationResult,
    pub patterns: ValidationResult,
    /// Absent until the client has sent a telemetry snapshot.
    pub anticheat: Option<ValidationResult>,
}

/// What reporting receives for one section. Descriptive only: no aptitude score.
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub attempt_id: String,
    pub section_id: String,
    pub finished: bool,
    pub closed: Option<SectionClosure>,
    pub phase: Option<TestPhase>,
    pub tier: Option<AbilityTier>,
    pub validations: SectionValidations,
    pub trajectory: Vec<TrajectoryPoint>,
    pub difficulty_path: Vec<u8>,
    pub path_shape: PathShape,
    pub accuracy_by_difficulty: BTreeMap<u8, AccuracyStat>,
    pub accuracy_by_subtag: BTreeMap<Subtag, AccuracyStat>,
    pub responses: Vec<StoredResponse>,
    /// Question ids answered more than once in the section's answer sequence.
    pub duplicate_question_ids: Vec<String>,
    pub repeated_texts: Vec<RepeatedText>,
}

pub struct ReportInput<'a> {
    pub attempt_id: &'a str,
    pub section_id: &'a str,
    pub state: Option<&'a SectionState>,
    pub history: &'a [ResponsePattern],
    pub signals: Option<&'a AntiCheatSignals>,
    pub responses: Vec<StoredResponse>,
}

pub struct ReportingService {
    settings: EngineSettings,
}

impl ReportingService {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn section_report(&self, input: ReportInput<'_>) -> SectionReport {
        let timing = validate_timing(input.history, input.section_id, &self.settings.timing);

        let numeric_answers: Vec<(String, f64)> = input
            .history
            .iter()
            .filter_map(|r| r.answer.as_number().map(|v| (r.question_id.clone(), v)))
            .collect();
        let patterns =
            validate_response_patterns(&numeric_answers, input.section_id, &self.settings.patterns);

        let anticheat = input
            .signals
            .map(|s| validate_anti_cheat_signals(s, &self.settings.anticheat));

        for result in [Some(&timing), Some(&patterns), anticheat.as_ref()]
            .into_iter()
            .flatten()
        {
            for warning in &result.warnings {
                VALIDATION_FLAGS_TOTAL
                    .with_label_values(&[warning.code.as_str()])
                    .inc();
            }
        }

        let trajectory = input
            .state
            .map(|s| s.trajectory.clone())
            .unwrap_or_default();
        let difficulty_path: Vec<u8> = trajectory.iter().map(|p| p.difficulty).collect();

        let mut accuracy_by_difficulty: BTreeMap<u8, AccuracyStat> = BTreeMap::new();
        let mut accuracy_by_subtag: BTreeMap<Subtag, AccuracyStat> = BTreeMap::new();
        for point in &trajectory {
            accuracy_by_difficulty
                .entry(point.difficulty)
                .or_default()
                .add(point.is_correct);
            accuracy_by_subtag
                .entry(point.subtag)
                .or_default()
                .add(point.is_correct);
        }

        let duplicate_question_ids = duplicate_question_ids(&trajectory, input.history);
        if !duplicate_question_ids.is_empty() {
            tracing::error!(
                "Duplicate questions answered: attempt={}, section={}, ids={:?}",
                input.attempt_id,
                input.section_id,
                duplicate_question_ids
            );
        }
        let repeated_texts = input.state.map(repeated_texts).unwrap_or_default();
        if !repeated_texts.is_empty() {
            tracing::warn!(
                "Question texts repeated: attempt={}, section={}, texts={}",
                input.attempt_id,
                input.section_id,
                repeated_texts.len()
            );
        }

        SectionReport {
            attempt_id: input.attempt_id.to_string(),
            section_id: input.section_id.to_string(),
            finished: input.state.map(SectionState::is_finished).unwrap_or(false),
            closed: input.state.and_then(|s| s.closed),
            phase: input.state.filter(|s| s.is_adaptive()).map(|s| s.phase),
            tier: input.state.and_then(|s| s.tier),
            validations: SectionValidations {
                timing,
                patterns,
                anticheat,
            },
            path_shape: classify_path(&difficulty_path),
            difficulty_path,
            trajectory,
            accuracy_by_difficulty,
            accuracy_by_subtag,
            responses: input.responses,
            duplicate_question_ids,
            repeated_texts,
        }
    }
}

/// Classifies a difficulty path by its dominant step direction. A direction
/// (including "no change") dominates at 60% of the steps; otherwise the path
/// fluctuates.
pub fn classify_path(path: &[u8]) -> PathShape {
    if path.len() < 2 {
        return PathShape::Stable;
    }

    let (mut up, mut down, mut flat) = (0usize, 0usize, 0usize);
    for step in path.windows(2) {
        match step[1].cmp(&step[0]) {
            std::cmp::Ordering::Greater => up += 1,
            std::cmp::Ordering::Less => down += 1,
            std::cmp::Ordering::Equal => flat += 1,
        }
    }

    let steps = (path.len() - 1) as f64;
    if flat as f64 / steps >= DOMINANT_DIRECTION_RATIO {
        PathShape::Stable
    } else if up as f64 / steps >= DOMINANT_DIRECTION_RATIO {
        PathShape::Ascending
    } else if down as f64 / steps >= DOMINANT_DIRECTION_RATIO {
        PathShape::Descending
    } else {
        PathShape::Fluctuating
    }
}

/// Ids that occur twice in either answer sequence: the graded trajectory or
/// the response history the validators read.
fn duplicate_question_ids(
    trajectory: &[TrajectoryPoint],
    history: &[ResponsePattern],
) -> Vec<String> {
    let mut duplicates = BTreeSet::new();
    for ids in [
        trajectory.iter().map(|p| p.question_id.as_str()).collect::<Vec<_>>(),
        history.iter().map(|r| r.question_id.as_str()).collect(),
    ] {
        let mut seen = BTreeSet::new();
        for id in ids {
            if !seen.insert(id) {
                duplicates.insert(id.to_string());
            }
        }
    }
    duplicates.into_iter().collect()
}

fn repeated_texts(state: &SectionState) -> Vec<RepeatedText> {
    let mut by_text: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for question in state.served.values() {
        by_text
            .entry(question.text.as_str())
            .or_default()
            .push(question.id.clone());
    }
    by_text
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(text, question_ids)| RepeatedText {
            text: text.to_string(),
            question_ids,
        })
        .collect()
}
