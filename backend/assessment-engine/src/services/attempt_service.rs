use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
use validator::Validate;

use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::metrics::ATTEMPTS_ACTIVE;
use crate::models::{
    AnswerValue, AntiCheatSignals, Attempt, AttemptStatus, GradeLevel, QuestionRef, QuestionView,
    ResponsePattern, SaveOutcome, SaveResponseRequest, SectionClosure, SectionState, Subtag,
    ValidationResult,
};
use crate::services::adaptive_selector::{AdaptiveSelector, AnswerOutcome};
use crate::services::anticheat_validator::validate_anti_cheat_signals;
use crate::services::reporting_service::{ReportInput, ReportingService, SectionReport};
use crate::services::response_persistence::{
    IdempotencyCache, ResponsePersistence, NO_ACTIVE_ATTEMPT,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SubtagPlan {
    pub subtag: Subtag,
    #[serde(default)]
    pub quota: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StartSectionRequest {
    /// Continue an existing attempt; a new one is created when absent.
    #[serde(default)]
    pub attempt_id: Option<String>,
    #[validate(length(min = 1, message = "student_id is required"))]
    pub student_id: String,
    pub grade_level: GradeLevel,
    #[validate(length(min = 1, message = "section_id is required"))]
    pub section_id: String,
    /// Adaptive subtags of the section; empty for likert inventories.
    #[serde(default)]
    pub subtags: Vec<SubtagPlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionStatus {
    pub attempt_id: String,
    pub section_id: String,
    pub adaptive: bool,
    pub subtags: Vec<Subtag>,
    pub current_difficulty: Option<u8>,
    pub answered_count: u32,
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextQuestionResponse {
    pub finished: bool,
    pub question: Option<QuestionView>,
    pub current_difficulty: Option<u8>,
    pub answered_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    #[serde(flatten)]
    pub save: SaveOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<AnswerOutcome>,
}

impl SubmitResult {
    fn rejected(error: impl Into<String>) -> Self {
        Self {
            save: SaveOutcome::failure(error),
            adjustment: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub attempt_id: String,
    pub student_id: String,
    pub grade_level: GradeLevel,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub sections: Vec<SectionStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InProgressQuery {
    pub student_id: String,
    #[serde(default)]
    pub grade_level: Option<GradeLevel>,
}

/// Everything one attempt owns. Only that student's submissions mutate it,
/// always under the context lock.
struct AttemptContext {
    attempt: Attempt,
    cache: IdempotencyCache,
    histories: HashMap<String, Vec<ResponsePattern>>,
    signals: HashMap<String, AntiCheatSignals>,
    last_event: HashMap<String, DateTime<Utc>>,
    rng: StdRng,
}

impl AttemptContext {
    fn section_status(&self, section_id: &str) -> Option<SectionStatus> {
        let state = self.attempt.section_states.get(section_id)?;
        Some(status_of(&self.attempt.id, state))
    }

    fn summary(&self) -> AttemptSummary {
        AttemptSummary {
            attempt_id: self.attempt.id.clone(),
            student_id: self.attempt.student_id.clone(),
            grade_level: self.attempt.grade_level,
            status: self.attempt.status,
            started_at: self.attempt.started_at,
            completed_at: self.attempt.completed_at,
            sections: self
                .attempt
                .section_states
                .values()
                .map(|s| status_of(&self.attempt.id, s))
                .collect(),
        }
    }

    /// Stops the attempt: stamps `status` and closes every open section.
    fn finish(&mut self, status: AttemptStatus, closure: SectionClosure) {
        self.attempt.status = status;
        self.attempt.completed_at = Some(Utc::now());
        for state in self.attempt.section_states.values_mut() {
            if state.closed.is_none() {
                state.closed = Some(closure);
                state.pending_question_id = None;
            }
        }
    }
}

/// Finished attempts kept in memory for reports and restart checks. Oldest
/// entries are evicted past `capacity`; their reports are rebuilt from the
/// response store.
struct Archive {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Arc<Mutex<AttemptContext>>>,
}

impl Archive {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, attempt_id: &str) -> Option<Arc<Mutex<AttemptContext>>> {
        self.entries.get(attempt_id).cloned()
    }

    fn contains(&self, attempt_id: &str) -> bool {
        self.entries.contains_key(attempt_id)
    }

    /// Returns the ids evicted to make room.
    fn insert(&mut self, attempt_id: String, ctx: Arc<Mutex<AttemptContext>>) -> Vec<String> {
        if self.entries.insert(attempt_id.clone(), ctx).is_none() {
            self.order.push_back(attempt_id);
        }
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn status_of(attempt_id: &str, state: &SectionState) -> SectionStatus {
    SectionStatus {
        attempt_id: attempt_id.to_string(),
        section_id: state.section_id.clone(),
        adaptive: state.is_adaptive(),
        subtags: state.subtags.iter().map(|p| p.subtag).collect(),
        current_difficulty: state.current_difficulty(),
        answered_count: state.answered_count,
        finished: state.is_finished(),
    }
}

pub struct AttemptService {
    selector: AdaptiveSelector,
    persistence: ResponsePersistence,
    reporting: ReportingService,
    settings: EngineSettings,
    idempotency_ttl: Duration,
    active: RwLock<HashMap<String, Arc<Mutex<AttemptContext>>>>,
    archived: RwLock<Archive>,
}

impl AttemptService {
    pub fn new(
        selector: AdaptiveSelector,
        persistence: ResponsePersistence,
        settings: EngineSettings,
        idempotency_ttl: Duration,
        archive_capacity: usize,
    ) -> Self {
        Self {
            selector,
            persistence,
            reporting: ReportingService::new(settings.clone()),
            settings,
            idempotency_ttl,
            active: RwLock::new(HashMap::new()),
            archived: RwLock::new(Archive::new(archive_capacity)),
        }
    }

    async fn active_context(&self, attempt_id: &str) -> Option<Arc<Mutex<AttemptContext>>> {
        self.active.read().await.get(attempt_id).cloned()
    }

    async fn any_context(&self, attempt_id: &str) -> Option<Arc<Mutex<AttemptContext>>> {
        match self.active_context(attempt_id).await {
            Some(ctx) => Some(ctx),
            None => self.archived.read().await.get(attempt_id),
        }
    }

    fn new_rng(&self, attempt_id: &str) -> StdRng {
        match self.settings.adaptive.rng_seed {
            Some(seed) => {
                let salt = attempt_id
                    .bytes()
                    .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                        (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
                    });
                StdRng::seed_from_u64(seed ^ salt)
            }
            None => StdRng::from_os_rng(),
        }
    }

    /// Starts a section, creating the attempt on first use. Starting a section
    /// that already exists returns its current status unchanged.
    pub async fn start_section(&self, request: StartSectionRequest) -> EngineResult<SectionStatus> {
        request
            .validate()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let attempt_id = match request.attempt_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        if self.archived.read().await.contains(&attempt_id) {
            return Err(EngineError::InvalidInput(format!(
                "attempt {} is already finished",
                attempt_id
            )));
        }

        let plan: Vec<(Subtag, Option<u32>)> =
            request.subtags.iter().map(|p| (p.subtag, p.quota)).collect();

        let ctx = {
            let mut active = self.active.write().await;
            match active.get(&attempt_id) {
                Some(ctx) => ctx.clone(),
                None => {
                    let ctx = Arc::new(Mutex::new(AttemptContext {
                        attempt: Attempt {
                            id: attempt_id.clone(),
                            student_id: request.student_id.clone(),
                            grade_level: request.grade_level,
                            section_states: BTreeMap::new(),
                            status: AttemptStatus::Active,
                            started_at: Utc::now(),
                            completed_at: None,
                        },
                        cache: IdempotencyCache::new(self.idempotency_ttl),
                        histories: HashMap::new(),
                        signals: HashMap::new(),
                        last_event: HashMap::new(),
                        rng: self.new_rng(&attempt_id),
                    }));
                    active.insert(attempt_id.clone(), ctx.clone());
                    ATTEMPTS_ACTIVE.inc();
                    tracing::info!(
                        "Attempt started: attempt={}, student={}, grade={}",
                        attempt_id,
                        request.student_id,
                        request.grade_level.as_str()
                    );
                    ctx
                }
            }
        };

        let mut guard = ctx.lock().await;
        if guard.attempt.student_id != request.student_id {
            return Err(EngineError::InvalidInput(format!(
                "attempt {} belongs to another student",
                attempt_id
            )));
        }

        if let Some(existing) = guard.section_status(&request.section_id) {
            return Ok(existing);
        }

        let state = self.selector.new_section(&request.section_id, &plan);
        let status = status_of(&attempt_id, &state);
        guard
            .attempt
            .section_states
            .insert(request.section_id.clone(), state);
        guard
            .last_event
            .insert(request.section_id.clone(), Utc::now());

        tracing::info!(
            "Section started: attempt={}, section={}, adaptive={}, subtags={}",
            attempt_id,
            request.section_id,
            status.adaptive,
            status.subtags.len()
        );
        Ok(status)
    }

    pub async fn next_question(
        &self,
        attempt_id: &str,
        section_id: &str,
    ) -> EngineResult<NextQuestionResponse> {
        let ctx = self
            .active_context(attempt_id)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("attempt {}", attempt_id)))?;
        let mut guard = ctx.lock().await;
        let ctx = &mut *guard;
        let grade = ctx.attempt.grade_level;

        let state = ctx
            .attempt
            .section_states
            .get_mut(section_id)
            .ok_or_else(|| EngineError::NotFound(format!("section {}", section_id)))?;
        if !state.is_adaptive() {
            return Err(EngineError::InvalidInput(format!(
                "section {} has no adaptive subtags",
                section_id
            )));
        }

        let question = self
            .selector
            .next_question(state, grade, &mut ctx.rng)
            .await;
        let response = NextQuestionResponse {
            finished: question.is_none() || state.is_finished(),
            question: question.as_ref().map(QuestionView::from),
            current_difficulty: state.current_difficulty(),
            answered_count: state.answered_count,
        };
        Ok(response)
    }

    /// Saves an answer and feeds it to the selector. Never fails: problems are
    /// reported in the returned [`SaveOutcome`].
    pub async fn submit_response(&self, mut request: SaveResponseRequest) -> SubmitResult {
        request.attempt_id = request.attempt_id.trim().to_string();
        if request.attempt_id.is_empty() {
            return SubmitResult {
                save: self
                    .persistence
                    .save(&mut IdempotencyCache::new(Duration::ZERO), &request)
                    .await,
                adjustment: None,
            };
        }
        let Some(ctx) = self.active_context(&request.attempt_id).await else {
            tracing::warn!(
                "Response for inactive attempt rejected: attempt={}, question={}",
                request.attempt_id,
                request.question_id
            );
            return SubmitResult::rejected(NO_ACTIVE_ATTEMPT);
        };

        let mut guard = ctx.lock().await;
        let ctx = &mut *guard;

        let question = QuestionRef::classify(&request.question_id);
        let section_id = question.section_id(request.section_id.trim()).to_string();
        let question_id = question.question_id().to_string();

        let Some(state) = ctx.attempt.section_states.get_mut(&section_id) else {
            return SubmitResult::rejected(
                EngineError::NotFound(format!("section {}", section_id)).to_string(),
            );
        };
        if state.closed.is_some() {
            return SubmitResult::rejected(EngineError::SectionClosed(section_id).to_string());
        }

        let answer = request
            .response_value
            .as_ref()
            .and_then(AnswerValue::from_json);
        // The first grade is final; a changed answer overwrites the stored
        // value but keeps the correctness the trajectory already recorded.
        let graded = state
            .trajectory
            .iter()
            .find(|p| p.question_id == question_id)
            .map(|p| p.is_correct);
        match (graded, state.served.get(&question_id), answer.as_ref()) {
            (Some(first), _, _) => {
                tracing::debug!(
                    "Answer changed after grading: attempt={}, question={}, kept correct={}",
                    request.attempt_id,
                    question_id,
                    first
                );
                request.is_correct = Some(first);
            }
            (None, Some(served), Some(answer)) => {
                request.is_correct = Some(answer.matches_choice(&served.correct_answer));
            }
            _ => {}
        }

        let save = self.persistence.save(&mut ctx.cache, &request).await;
        if !save.success {
            return SubmitResult {
                save,
                adjustment: None,
            };
        }

        let now = Utc::now();
        let response_time_ms = request.response_time_ms.unwrap_or_else(|| {
            ctx.last_event
                .get(&section_id)
                .map(|t| (now - *t).num_milliseconds().max(0) as u64)
                .unwrap_or(0)
        });
        ctx.last_event.insert(section_id.clone(), now);

        if let Some(answer) = answer.as_ref() {
            let history = ctx.histories.entry(section_id.clone()).or_default();
            match history.iter_mut().find(|r| r.question_id == question_id) {
                Some(existing) => existing.answer = answer.clone(),
                None => history.push(ResponsePattern {
                    question_id: question_id.clone(),
                    answer: answer.clone(),
                    response_time_ms,
                    timestamp: now,
                }),
            }
        }

        let adjustment = match answer.as_ref() {
            Some(answer) if state.is_adaptive() => {
                self.selector.record_answer(state, &question_id, answer)
            }
            _ => {
                if !state.is_adaptive() {
                    state.answered_count = ctx
                        .histories
                        .get(&section_id)
                        .map(|h| h.len() as u32)
                        .unwrap_or(state.answered_count);
                }
                None
            }
        };

        SubmitResult { save, adjustment }
    }

    /// Folds in a telemetry snapshot and returns the live anti-cheat verdict.
    pub async fn update_signals(
        &self,
        attempt_id: &str,
        section_id: &str,
        signals: AntiCheatSignals,
    ) -> EngineResult<ValidationResult> {
        signals
            .validate()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let ctx = self
            .active_context(attempt_id)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("attempt {}", attempt_id)))?;
        let mut guard = ctx.lock().await;
        if !guard.attempt.section_states.contains_key(section_id) {
            return Err(EngineError::NotFound(format!("section {}", section_id)));
        }

        let merged = guard
            .signals
            .entry(section_id.to_string())
            .or_insert_with(|| signals.clone());
        merged.merge_monotonic(&signals);

        let result = validate_anti_cheat_signals(merged, &self.settings.anticheat);
        if !result.warnings.is_empty() {
            tracing::warn!(
                "Anti-cheat flags: attempt={}, section={}, score={}, codes={:?}",
                attempt_id,
                section_id,
                result.score,
                result.codes()
            );
        }
        Ok(result)
    }

    /// External timer expiry: closes the section and returns its report.
    pub async fn close_section(
        &self,
        attempt_id: &str,
        section_id: &str,
    ) -> EngineResult<SectionReport> {
        {
            let ctx = self
                .active_context(attempt_id)
                .await
                .ok_or_else(|| EngineError::NotFound(format!("attempt {}", attempt_id)))?;
            let mut guard = ctx.lock().await;
            let state = guard
                .attempt
                .section_states
                .get_mut(section_id)
                .ok_or_else(|| EngineError::NotFound(format!("section {}", section_id)))?;
            AdaptiveSelector::close(state, SectionClosure::TimeLimit);
        }
        self.section_report(attempt_id, section_id).await
    }

    /// Report for a live or archived section. Attempts evicted from the
    /// archive are reported from their stored rows alone.
    pub async fn section_report(
        &self,
        attempt_id: &str,
        section_id: &str,
    ) -> EngineResult<SectionReport> {
        let Some(ctx) = self.any_context(attempt_id).await else {
            return self.stored_section_report(attempt_id, section_id).await;
        };
        let (state, history, signals) = {
            let guard = ctx.lock().await;
            let state = guard
                .attempt
                .section_states
                .get(section_id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("section {}", section_id)))?;
            (
                state,
                guard.histories.get(section_id).cloned().unwrap_or_default(),
                guard.signals.get(section_id).cloned(),
            )
        };

        let responses = self
            .persistence
            .store()
            .list_section(attempt_id, section_id)
            .await?;

        Ok(self.reporting.section_report(ReportInput {
            attempt_id,
            section_id,
            state: Some(&state),
            history: &history,
            signals: signals.as_ref(),
            responses,
        }))
    }

    async fn stored_section_report(
        &self,
        attempt_id: &str,
        section_id: &str,
    ) -> EngineResult<SectionReport> {
        let responses = self
            .persistence
            .store()
            .list_section(attempt_id, section_id)
            .await?;
        if responses.is_empty() {
            return Err(EngineError::NotFound(format!("attempt {}", attempt_id)));
        }
        tracing::debug!(
            "Section report rebuilt from store: attempt={}, section={}, rows={}",
            attempt_id,
            section_id,
            responses.len()
        );
        Ok(self.reporting.section_report(ReportInput {
            attempt_id,
            section_id,
            state: None,
            history: &[],
            signals: None,
            responses,
        }))
    }

    /// Most recently started active attempt of a student, optionally for one grade.
    pub async fn find_in_progress(
        &self,
        student_id: &str,
        grade_level: Option<GradeLevel>,
    ) -> EngineResult<AttemptSummary> {
        let contexts: Vec<Arc<Mutex<AttemptContext>>> =
            self.active.read().await.values().cloned().collect();

        let mut latest: Option<AttemptSummary> = None;
        for ctx in contexts {
            let guard = ctx.lock().await;
            let attempt = &guard.attempt;
            if attempt.student_id != student_id
                || grade_level.is_some_and(|g| g != attempt.grade_level)
            {
                continue;
            }
            if latest
                .as_ref()
                .map_or(true, |l| attempt.started_at > l.started_at)
            {
                latest = Some(guard.summary());
            }
        }
        latest.ok_or_else(|| {
            EngineError::NotFound(format!("in-progress attempt for student {}", student_id))
        })
    }

    /// Marks the attempt completed and archives it. Later saves are rejected.
    pub async fn complete_attempt(&self, attempt_id: &str) -> EngineResult<AttemptSummary> {
        self.finish_attempt(
            attempt_id,
            AttemptStatus::Completed,
            SectionClosure::QuotaExhausted,
        )
        .await
    }

    /// Gives up on the attempt. Open sections close as abandoned and later
    /// saves are rejected; answers already stored stay reportable.
    pub async fn abandon_attempt(&self, attempt_id: &str) -> EngineResult<AttemptSummary> {
        self.finish_attempt(attempt_id, AttemptStatus::Abandoned, SectionClosure::Abandoned)
            .await
    }

    async fn finish_attempt(
        &self,
        attempt_id: &str,
        status: AttemptStatus,
        closure: SectionClosure,
    ) -> EngineResult<AttemptSummary> {
        let ctx = self
            .active
            .write()
            .await
            .remove(attempt_id)
            .ok_or_else(|| EngineError::NotFound(format!("attempt {}", attempt_id)))?;
        ATTEMPTS_ACTIVE.dec();

        let summary = {
            let mut guard = ctx.lock().await;
            guard.finish(status, closure);
            guard.summary()
        };

        let (evicted, archived) = {
            let mut archive = self.archived.write().await;
            let evicted = archive.insert(attempt_id.to_string(), ctx);
            (evicted, archive.len())
        };
        if !evicted.is_empty() {
            tracing::debug!(
                "Archive full, evicted {} attempt(s): {:?}",
                evicted.len(),
                evicted
            );
        }
        tracing::info!(
            "Attempt finished: attempt={}, status={:?}, sections={}, archived={}",
            attempt_id,
            summary.status,
            summary.sections.len(),
            archived
        );
        Ok(summary)
    }
}
