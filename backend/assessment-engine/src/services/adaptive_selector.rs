use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AdaptiveSettings;
use crate::metrics::{DIFFICULTY_CHANGES_TOTAL, FALLBACK_DEGRADED_TOTAL, QUESTIONS_SERVED_TOTAL};
use crate::models::{
    AbilityTier, AnswerValue, DifficultyChange, DifficultyTracker, GradeLevel, Question,
    QuestionRequest, QuestionSource, SectionClosure, SectionState, Subtag, SubtagProgress,
    TestPhase, TrajectoryPoint,
};
use crate::services::fallback_bank::{DrawTier, FallbackBank};
use crate::services::question_provider::{fetch_with_timeout, QuestionProvider};

/// Effect of one graded answer on its subtag's difficulty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerOutcome {
    pub question_id: String,
    pub subtag: Subtag,
    pub is_correct: bool,
    pub change: DifficultyChange,
    pub difficulty: u8,
}

pub struct AdaptiveSelector {
    provider: Arc<dyn QuestionProvider>,
    bank: Arc<FallbackBank>,
    provider_timeout: Duration,
    settings: AdaptiveSettings,
}

impl AdaptiveSelector {
    pub fn new(
        provider: Arc<dyn QuestionProvider>,
        bank: Arc<FallbackBank>,
        provider_timeout: Duration,
        settings: AdaptiveSettings,
    ) -> Self {
        Self {
            provider,
            bank,
            provider_timeout,
            settings,
        }
    }

    /// Fresh section state. An empty plan makes a non-adaptive section
    /// (likert inventories) that only collects responses.
    pub fn new_section(&self, section_id: &str, plan: &[(Subtag, Option<u32>)]) -> SectionState {
        let mut subtags: Vec<SubtagProgress> = Vec::with_capacity(plan.len());
        for (subtag, quota) in plan {
            if subtags.iter().any(|p| p.subtag == *subtag) {
                continue;
            }
            subtags.push(SubtagProgress {
                subtag: *subtag,
                quota: quota.unwrap_or(self.settings.default_subtag_quota),
                asked: 0,
                tracker: DifficultyTracker::new(
                    self.settings.starting_difficulty,
                    self.settings.min_difficulty,
                    self.settings.max_difficulty,
                    self.settings.streak_threshold,
                ),
            });
        }
        SectionState::new(section_id, subtags).with_phases(
            self.settings.screener_questions,
            self.settings.stability_questions,
        )
    }

    /// Round-robin from the cursor, skipping subtags whose quota is met.
    pub fn next_subtag(state: &SectionState) -> Option<usize> {
        let n = state.subtags.len();
        (0..n)
            .map(|offset| (state.cursor + offset) % n)
            .find(|idx| !state.subtags[*idx].quota_met())
    }

    /// Serves the next question of the section, or `None` once the section is
    /// finished. An unanswered question is served again rather than replaced.
    pub async fn next_question<R: Rng + Send>(
        &self,
        state: &mut SectionState,
        grade: GradeLevel,
        rng: &mut R,
    ) -> Option<Question> {
        if state.closed.is_some() || !state.is_adaptive() {
            return None;
        }

        if let Some(pending) = state
            .pending_question_id
            .as_ref()
            .and_then(|id| state.served.get(id))
        {
            return Some(pending.clone());
        }

        let idx = Self::next_subtag(state)?;
        let subtag = state.subtags[idx].subtag;
        let difficulty = state.subtags[idx].tracker.level;

        let request = QuestionRequest {
            subtag,
            difficulty,
            grade_level: grade,
            exclude_texts: state
                .asked_question_ids
                .iter()
                .chain(state.excluded_fallback_texts.iter())
                .cloned()
                .collect(),
        };

        let question = match fetch_with_timeout(self.provider.as_ref(), &request, self.provider_timeout)
            .await
        {
            Ok(q) if q.id.trim().is_empty()
                || state.asked_question_ids.contains(&q.id)
                || state.excluded_fallback_texts.contains(&q.text) =>
            {
                tracing::warn!(
                    "Provider repeated a question, using fallback bank: section={}, subtag={}, question={}",
                    state.section_id,
                    subtag,
                    q.id
                );
                self.draw_fallback(state, grade, subtag, difficulty, rng)?
            }
            Ok(q) => q,
            Err(e) if e.is_recoverable_by_fallback() => {
                tracing::warn!(
                    "Question provider unavailable, using fallback bank: section={}, subtag={}, error={}",
                    state.section_id,
                    subtag,
                    e
                );
                self.draw_fallback(state, grade, subtag, difficulty, rng)?
            }
            Err(e) => {
                tracing::error!(
                    "Question provider returned an unexpected error, using fallback bank: section={}, subtag={}, error={}",
                    state.section_id,
                    subtag,
                    e
                );
                self.draw_fallback(state, grade, subtag, difficulty, rng)?
            }
        };

        let progress = &mut state.subtags[idx];
        progress.asked += 1;
        state.current = Some(idx);
        state.cursor = (idx + 1) % state.subtags.len();
        state.asked_question_ids.insert(question.id.clone());
        state.excluded_fallback_texts.insert(question.text.clone());
        state.pending_question_id = Some(question.id.clone());
        state.served.insert(question.id.clone(), question.clone());

        let source = match question.source {
            QuestionSource::Provider => "provider",
            QuestionSource::Fallback => "fallback",
        };
        QUESTIONS_SERVED_TOTAL.with_label_values(&[source]).inc();
        tracing::debug!(
            "Question served: section={}, subtag={}, difficulty={}, source={}, question={}",
            state.section_id,
            subtag,
            difficulty,
            source,
            question.id
        );

        Some(question)
    }

    fn draw_fallback<R: Rng>(
        &self,
        state: &SectionState,
        grade: GradeLevel,
        subtag: Subtag,
        difficulty: u8,
        rng: &mut R,
    ) -> Option<Question> {
        let Some(draw) = self
            .bank
            .draw(grade, subtag, &state.excluded_fallback_texts, rng)
        else {
            tracing::error!(
                "Fallback bank has no questions: grade={}, subtag={}",
                grade.as_str(),
                subtag
            );
            return None;
        };

        match draw.tier {
            DrawTier::Requested => {}
            DrawTier::Sibling => {
                FALLBACK_DEGRADED_TOTAL.with_label_values(&["sibling"]).inc();
                tracing::info!(
                    "Fallback pool exhausted for {}, borrowed from {}: section={}",
                    subtag,
                    draw.subtag,
                    state.section_id
                );
            }
            DrawTier::Reused => {
                FALLBACK_DEGRADED_TOTAL.with_label_values(&["reused"]).inc();
                tracing::warn!(
                    "Fallback bank exhausted, repeating a question: section={}, subtag={}",
                    state.section_id,
                    subtag
                );
            }
        }

        let mut id = generated_question_id(rng);
        while state.asked_question_ids.contains(&id) {
            id = generated_question_id(rng);
        }

        // The question is tracked under the requested subtag's difficulty track
        // even when its text was borrowed from a sibling pool.
        Some(Question {
            id,
            text: draw.item.text.clone(),
            options: draw.item.options.clone(),
            correct_answer: draw.item.correct_answer.clone(),
            explanation: None,
            subtag,
            difficulty,
            source: QuestionSource::Fallback,
        })
    }

    /// Grades an answer to a served question and moves that subtag's
    /// difficulty. Unknown or already graded questions are ignored.
    pub fn record_answer(
        &self,
        state: &mut SectionState,
        question_id: &str,
        answer: &AnswerValue,
    ) -> Option<AnswerOutcome> {
        if state.answered.contains(question_id) {
            return None;
        }
        let question = state.served.get(question_id)?;
        let idx = state
            .subtags
            .iter()
            .position(|p| p.subtag == question.subtag)?;

        let is_correct = answer.matches_choice(&question.correct_answer);
        let difficulty = question.difficulty;
        let subtag = question.subtag;
        let source = question.source;

        let phase = state.phase;
        let change = if phase.moves_difficulty() {
            state.subtags[idx].tracker.record(is_correct)
        } else {
            DifficultyChange::Unchanged
        };
        DIFFICULTY_CHANGES_TOTAL
            .with_label_values(&[change.as_str()])
            .inc();

        state.answered.insert(question_id.to_string());
        state.answered_count += 1;
        state.current = Some(idx);
        if state.pending_question_id.as_deref() == Some(question_id) {
            state.pending_question_id = None;
        }
        state.trajectory.push(TrajectoryPoint {
            sequence: state.trajectory.len() as u32 + 1,
            question_id: question_id.to_string(),
            subtag,
            difficulty,
            is_correct,
            change,
            source,
            phase,
        });
        self.advance_phase(state);

        let next_level = state.subtags[idx].tracker.level;
        tracing::debug!(
            "Answer graded: section={}, subtag={}, correct={}, difficulty {} -> {} ({})",
            state.section_id,
            subtag,
            is_correct,
            difficulty,
            next_level,
            change.as_str()
        );

        Some(AnswerOutcome {
            question_id: question_id.to_string(),
            subtag,
            is_correct,
            change,
            difficulty: next_level,
        })
    }

    /// Moves the section forward once the screener or core answers are in.
    fn advance_phase(&self, state: &mut SectionState) {
        if state.phase == TestPhase::DiagnosticScreener
            && state.answered_count >= state.screener_questions
        {
            let screener: Vec<bool> = state
                .trajectory
                .iter()
                .filter(|p| p.phase == TestPhase::DiagnosticScreener)
                .map(|p| p.is_correct)
                .collect();
            let correct = screener.iter().filter(|c| **c).count();
            let tier = AbilityTier::classify(
                correct,
                screener.len(),
                self.settings.tier_low_below,
                self.settings.tier_high_from,
            );
            let start = self.settings.start_for(tier);
            for progress in state.subtags.iter_mut() {
                progress.tracker = DifficultyTracker::new(
                    start,
                    self.settings.min_difficulty,
                    self.settings.max_difficulty,
                    self.settings.streak_threshold,
                );
            }
            state.tier = Some(tier);
            state.phase = TestPhase::AdaptiveCore;
            tracing::info!(
                "Screener finished: section={}, correct={}/{}, tier={}, starting_difficulty={}",
                state.section_id,
                correct,
                screener.len(),
                tier.as_str(),
                start
            );
        }

        if state.enter_stability_if_due() {
            tracing::info!(
                "Stability confirmation started: section={}, answered={}, difficulty={:?}",
                state.section_id,
                state.answered_count,
                state.current_difficulty()
            );
        }
    }

    /// External timer expiry. Idempotent; the first closure reason wins.
    pub fn close(state: &mut SectionState, reason: SectionClosure) {
        if state.closed.is_none() {
            state.closed = Some(reason);
            state.pending_question_id = None;
            tracing::info!(
                "Section closed: section={}, reason={:?}, answered={}",
                state.section_id,
                reason,
                state.answered_count
            );
        }
    }
}

fn generated_question_id<R: Rng>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}
