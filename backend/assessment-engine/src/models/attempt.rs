use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::question::{GradeLevel, Question, QuestionSource, Subtag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Active,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub student_id: String,
    pub grade_level: GradeLevel,
    pub section_states: BTreeMap<String, SectionState>,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyChange {
    Increased,
    Decreased,
    Unchanged,
}

impl DifficultyChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyChange::Increased => "increased",
            DifficultyChange::Decreased => "decreased",
            DifficultyChange::Unchanged => "unchanged",
        }
    }
}

/// Streak-driven difficulty state for one subtag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyTracker {
    pub level: u8,
    pub min: u8,
    pub max: u8,
    pub correct_streak: u32,
    pub incorrect_streak: u32,
    pub streak_threshold: u32,
}

impl DifficultyTracker {
    pub fn new(start: u8, min: u8, max: u8, streak_threshold: u32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            level: start.clamp(min, max),
            min,
            max,
            correct_streak: 0,
            incorrect_streak: 0,
            streak_threshold: streak_threshold.max(1),
        }
    }

    /// Applies one graded answer. A streak only grows in one direction; reaching
    /// the threshold moves the level one step (clamped) and restarts the streak.
    pub fn record(&mut self, correct: bool) -> DifficultyChange {
        if correct {
            self.incorrect_streak = 0;
            self.correct_streak += 1;
            if self.correct_streak >= self.streak_threshold {
                self.correct_streak = 0;
                if self.level < self.max {
                    self.level += 1;
                    return DifficultyChange::Increased;
                }
            }
        } else {
            self.correct_streak = 0;
            self.incorrect_streak += 1;
            if self.incorrect_streak >= self.streak_threshold {
                self.incorrect_streak = 0;
                if self.level > self.min {
                    self.level -= 1;
                    return DifficultyChange::Decreased;
                }
            }
        }
        DifficultyChange::Unchanged
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtagProgress {
    pub subtag: Subtag,
    pub quota: u32,
    pub asked: u32,
    pub tracker: DifficultyTracker,
}

impl SubtagProgress {
    pub fn quota_met(&self) -> bool {
        self.asked >= self.quota
    }
}

/// Stage of an adaptive section. The screener runs at the starting level and
/// only classifies; stability confirmation holds the level it inherits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    DiagnosticScreener,
    AdaptiveCore,
    StabilityConfirmation,
}

impl TestPhase {
    /// Only the core phase moves difficulty.
    pub fn moves_difficulty(&self) -> bool {
        matches!(self, TestPhase::AdaptiveCore)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityTier {
    Low,
    Medium,
    High,
}

impl AbilityTier {
    /// Screener accuracy below `low_below` is low, at or above `high_from` is
    /// high. No screener answers counts as medium.
    pub fn classify(correct: usize, total: usize, low_below: f64, high_from: f64) -> Self {
        if total == 0 {
            return AbilityTier::Medium;
        }
        let accuracy = correct as f64 / total as f64;
        if accuracy < low_below {
            AbilityTier::Low
        } else if accuracy >= high_from {
            AbilityTier::High
        } else {
            AbilityTier::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AbilityTier::Low => "low",
            AbilityTier::Medium => "medium",
            AbilityTier::High => "high",
        }
    }
}

/// One graded step of the difficulty trajectory handed to reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub sequence: u32,
    pub question_id: String,
    pub subtag: Subtag,
    pub difficulty: u8,
    pub is_correct: bool,
    pub change: DifficultyChange,
    pub source: QuestionSource,
    pub phase: TestPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionClosure {
    QuotaExhausted,
    TimeLimit,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionState {
    pub section_id: String,
    pub subtags: Vec<SubtagProgress>,
    /// Index of the subtag the next rotation step starts from.
    pub cursor: usize,
    /// Subtag currently being asked (last one served).
    pub current: Option<usize>,
    pub asked_question_ids: BTreeSet<String>,
    pub excluded_fallback_texts: BTreeSet<String>,
    pub answered_count: u32,
    pub served: BTreeMap<String, Question>,
    pub answered: BTreeSet<String>,
    pub pending_question_id: Option<String>,
    pub trajectory: Vec<TrajectoryPoint>,
    pub closed: Option<SectionClosure>,
    pub phase: TestPhase,
    /// Set when the screener finishes.
    pub tier: Option<AbilityTier>,
    /// Answers the screener phase takes; 0 skips it.
    pub screener_questions: u32,
    /// Trailing answers graded without moving difficulty.
    pub stability_questions: u32,
}

impl SectionState {
    pub fn new(section_id: impl Into<String>, subtags: Vec<SubtagProgress>) -> Self {
        Self {
            section_id: section_id.into(),
            subtags,
            cursor: 0,
            current: None,
            asked_question_ids: BTreeSet::new(),
            excluded_fallback_texts: BTreeSet::new(),
            answered_count: 0,
            served: BTreeMap::new(),
            answered: BTreeSet::new(),
            pending_question_id: None,
            trajectory: Vec::new(),
            closed: None,
            phase: TestPhase::AdaptiveCore,
            tier: None,
            screener_questions: 0,
            stability_questions: 0,
        }
    }

    pub fn with_phases(mut self, screener_questions: u32, stability_questions: u32) -> Self {
        self.screener_questions = screener_questions;
        self.stability_questions = stability_questions;
        if screener_questions > 0 && self.is_adaptive() {
            self.phase = TestPhase::DiagnosticScreener;
        }
        self
    }

    pub fn total_quota(&self) -> u32 {
        self.subtags.iter().map(|p| p.quota).sum()
    }

    /// Answers left before stability confirmation begins.
    fn stability_starts_at(&self) -> Option<u32> {
        (self.stability_questions > 0)
            .then(|| self.total_quota().saturating_sub(self.stability_questions))
    }

    /// Leaves the core phase once only the stability answers remain.
    pub fn enter_stability_if_due(&mut self) -> bool {
        match self.stability_starts_at() {
            Some(start)
                if self.phase == TestPhase::AdaptiveCore && self.answered_count >= start =>
            {
                self.phase = TestPhase::StabilityConfirmation;
                true
            }
            _ => false,
        }
    }

    pub fn is_adaptive(&self) -> bool {
        !self.subtags.is_empty()
    }

    fn current_tracker(&self) -> Option<&DifficultyTracker> {
        self.current
            .or(if self.subtags.is_empty() { None } else { Some(0) })
            .and_then(|idx| self.subtags.get(idx))
            .map(|p| &p.tracker)
    }

    pub fn current_difficulty(&self) -> Option<u8> {
        self.current_tracker().map(|t| t.level)
    }

    pub fn correct_streak(&self) -> u32 {
        self.current_tracker().map(|t| t.correct_streak).unwrap_or(0)
    }

    pub fn incorrect_streak(&self) -> u32 {
        self.current_tracker().map(|t| t.incorrect_streak).unwrap_or(0)
    }

    pub fn quotas_exhausted(&self) -> bool {
        self.subtags.iter().all(SubtagProgress::quota_met)
    }

    /// A section is finished once closed by the timer, or once every quota has
    /// been served and the last served question was answered.
    pub fn is_finished(&self) -> bool {
        self.closed.is_some()
            || (self.is_adaptive()
                && self.quotas_exhausted()
                && self.pending_question_id.is_none())
    }

    pub fn difficulty_path(&self) -> Vec<u8> {
        self.trajectory.iter().map(|p| p.difficulty).collect()
    }
}
