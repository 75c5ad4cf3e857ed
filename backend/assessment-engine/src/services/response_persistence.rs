use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::{record_cache_hit, record_cache_miss, RESPONSES_SAVED_TOTAL};
use crate::models::response::sanitize_response_value;
use crate::models::{QuestionRef, ResponseKey, SaveOutcome, SaveResponseRequest, StoredResponse};
use crate::services::response_store::ResponseStore;

pub const NO_ACTIVE_ATTEMPT: &str = "No active attempt";

/// Short-lived memory of successful saves for one attempt. A repeated
/// (attempt, question, value, correctness) submission inside the TTL skips the store.
#[derive(Debug)]
pub struct IdempotencyCache {
    ttl: Duration,
    entries: HashMap<String, (Instant, ResponseKey)>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn lookup(&mut self, key: &str, now: Instant) -> Option<ResponseKey> {
        match self.entries.get(key) {
            Some((saved_at, stored)) if now.duration_since(*saved_at) < self.ttl => {
                Some(stored.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remember(&mut self, key: String, stored: ResponseKey, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (saved_at, _)| now.duration_since(*saved_at) < ttl);
        self.entries.insert(key, (now, stored));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fingerprint of a submission: a digest over the resolved store key, the
/// value and the correctness flag. The parts are hashed as a JSON array so
/// no two distinct submissions share a preimage, and a retry that only
/// changes `is_correct` still reaches the store.
pub fn cache_key(key: &ResponseKey, value: &serde_json::Value, is_correct: Option<bool>) -> String {
    let preimage = serde_json::json!([
        key.attempt_id,
        key.section_id,
        key.question_id,
        value,
        is_correct
    ]);
    let mut hasher = Sha256::new();
    hasher.update(preimage.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Idempotent response writer. Never returns an error: failures are reported
/// through [`SaveOutcome`] so a flaky store cannot abort an attempt.
pub struct ResponsePersistence {
    store: Arc<dyn ResponseStore>,
}

impl ResponsePersistence {
    pub fn new(store: Arc<dyn ResponseStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ResponseStore> {
        &self.store
    }

    pub async fn save(
        &self,
        cache: &mut IdempotencyCache,
        request: &SaveResponseRequest,
    ) -> SaveOutcome {
        let attempt_id = request.attempt_id.trim();
        if attempt_id.is_empty() {
            RESPONSES_SAVED_TOTAL.with_label_values(&["rejected"]).inc();
            return SaveOutcome::failure(NO_ACTIVE_ATTEMPT);
        }

        let question = QuestionRef::classify(&request.question_id);
        if question.question_id().is_empty() {
            RESPONSES_SAVED_TOTAL.with_label_values(&["rejected"]).inc();
            return SaveOutcome::failure("Missing question id");
        }
        let section_id = question.section_id(request.section_id.trim());
        if section_id.is_empty() {
            RESPONSES_SAVED_TOTAL.with_label_values(&["rejected"]).inc();
            return SaveOutcome::failure("Missing section id");
        }

        let key = ResponseKey::new(attempt_id, section_id, question.question_id());
        let value = sanitize_response_value(request.response_value.as_ref());
        let fingerprint = cache_key(&key, &value, request.is_correct);

        if let Some(stored) = cache.lookup(&fingerprint, Instant::now()) {
            record_cache_hit();
            RESPONSES_SAVED_TOTAL
                .with_label_values(&["deduplicated"])
                .inc();
            tracing::debug!(
                "Duplicate response skipped: attempt={}, section={}, question={}",
                stored.attempt_id,
                stored.section_id,
                stored.question_id
            );
            return SaveOutcome::saved(stored);
        }
        record_cache_miss();

        let row = StoredResponse {
            attempt_id: key.attempt_id.clone(),
            section_id: key.section_id.clone(),
            question_id: key.question_id.clone(),
            response_value: value,
            is_correct: request.is_correct,
            saved_at: Utc::now(),
        };

        match self.store.upsert(&row).await {
            Ok(()) => {
                cache.remember(fingerprint, key.clone(), Instant::now());
                RESPONSES_SAVED_TOTAL.with_label_values(&["saved"]).inc();
                tracing::info!(
                    "Response saved: attempt={}, section={}, question={}, backend={}",
                    key.attempt_id,
                    key.section_id,
                    key.question_id,
                    self.store.backend_name()
                );
                SaveOutcome::saved(key)
            }
            Err(e) => {
                RESPONSES_SAVED_TOTAL.with_label_values(&["failed"]).inc();
                tracing::error!(
                    "Failed to save response: attempt={}, question={}, error={}",
                    key.attempt_id,
                    key.question_id,
                    e
                );
                SaveOutcome::failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, EngineResult};
    use crate::services::response_store::InMemoryResponseStore;
    use async_trait::async_trait;
    use serde_json::json;

    fn request(attempt: &str, question: &str, section: &str, value: serde_json::Value) -> SaveResponseRequest {
        SaveResponseRequest {
            attempt_id: attempt.into(),
            question_id: question.into(),
            section_id: section.into(),
            response_value: Some(value),
            is_correct: None,
            response_time_ms: None,
        }
    }

    fn cache() -> IdempotencyCache {
        IdempotencyCache::new(Duration::from_secs(30))
    }

    struct BrokenStore;

    #[async_trait]
    impl ResponseStore for BrokenStore {
        async fn upsert(&self, _response: &StoredResponse) -> EngineResult<()> {
            Err(EngineError::Persistence("connection reset".into()))
        }
        async fn get(&self, _key: &ResponseKey) -> EngineResult<Option<StoredResponse>> {
            Ok(None)
        }
        async fn list_section(&self, _a: &str, _s: &str) -> EngineResult<Vec<StoredResponse>> {
            Ok(Vec::new())
        }
        async fn health(&self) -> EngineResult<()> {
            Err(EngineError::Persistence("connection reset".into()))
        }
        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn empty_attempt_id_is_rejected_without_write() {
        let store = Arc::new(InMemoryResponseStore::new());
        let persistence = ResponsePersistence::new(store.clone());

        let outcome = persistence
            .save(&mut cache(), &request("", "riasec_r1", "riasec", json!(5)))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some(NO_ACTIVE_ATTEMPT));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn saving_twice_keeps_one_row() {
        let store = Arc::new(InMemoryResponseStore::new());
        let persistence = ResponsePersistence::new(store.clone());
        let mut cache = cache();
        let req = request("att-1", "riasec_r1", "riasec", json!(4));

        let first = persistence.save(&mut cache, &req).await;
        let second = persistence.save(&mut cache, &req).await;

        assert!(first.success);
        assert!(second.success);
        assert_eq!(first.key, second.key);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn changed_answer_overwrites_instead_of_duplicating() {
        let store = Arc::new(InMemoryResponseStore::new());
        let persistence = ResponsePersistence::new(store.clone());
        let mut cache = cache();

        persistence
            .save(&mut cache, &request("att-1", "riasec_r1", "riasec", json!(2)))
            .await;
        persistence
            .save(&mut cache, &request("att-1", "riasec_r1", "riasec", json!(5)))
            .await;

        assert_eq!(store.len().await, 1);
        let row = store
            .get(&ResponseKey::new("att-1", "riasec", "riasec_r1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.response_value, json!(5));
    }

    #[tokio::test]
    async fn composite_question_id_resolves_section_and_uuid() {
        let store = Arc::new(InMemoryResponseStore::new());
        let persistence = ResponsePersistence::new(store.clone());

        let outcome = persistence
            .save(
                &mut cache(),
                &request(
                    "att-1",
                    "aptitude_f48f122d-bd34-408f-b45c-948dba1d4701",
                    "ignored",
                    json!("B"),
                ),
            )
            .await;

        let key = outcome.key.unwrap();
        assert_eq!(key.section_id, "aptitude");
        assert_eq!(key.question_id, "f48f122d-bd34-408f-b45c-948dba1d4701");
    }

    #[tokio::test]
    async fn null_value_is_stored_as_empty_string() {
        let store = Arc::new(InMemoryResponseStore::new());
        let persistence = ResponsePersistence::new(store.clone());

        let mut req = request("att-1", "values_v3", "values", json!(null));
        req.response_value = None;
        assert!(persistence.save(&mut cache(), &req).await.success);

        let row = store
            .get(&ResponseKey::new("att-1", "values", "values_v3"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.response_value, json!(""));
    }

    #[tokio::test]
    async fn store_failure_is_reported_not_raised() {
        let persistence = ResponsePersistence::new(Arc::new(BrokenStore));
        let mut cache = cache();

        let outcome = persistence
            .save(&mut cache, &request("att-1", "riasec_r1", "riasec", json!(3)))
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("connection reset"));
        // failures are not cached, so a retry reaches the store again
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_entries_expire_after_ttl() {
        let mut cache = IdempotencyCache::new(Duration::from_millis(10));
        let start = Instant::now();
        cache.remember("k".into(), ResponseKey::new("a", "s", "q"), start);

        assert!(cache.lookup("k", start + Duration::from_millis(5)).is_some());
        assert!(cache.lookup("k", start + Duration::from_millis(20)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_key_depends_on_value_and_correctness() {
        let key = ResponseKey::new("a", "s", "q");
        assert_ne!(
            cache_key(&key, &json!(1), None),
            cache_key(&key, &json!(2), None)
        );
        assert_eq!(
            cache_key(&key, &json!("A"), Some(true)),
            cache_key(&key, &json!("A"), Some(true))
        );
        assert_ne!(
            cache_key(&key, &json!("A"), Some(true)),
            cache_key(&key, &json!("A"), Some(false))
        );
    }

    #[test]
    fn cache_key_keeps_separator_laden_ids_apart() {
        let left = ResponseKey::new("x:y", "z", "q");
        let right = ResponseKey::new("x", "y:z", "q");
        assert_ne!(
            cache_key(&left, &json!("A"), None),
            cache_key(&right, &json!("A"), None)
        );
    }

    #[tokio::test]
    async fn correcting_only_the_flag_reaches_the_store() {
        let store = Arc::new(InMemoryResponseStore::new());
        let persistence = ResponsePersistence::new(store.clone());
        let mut cache = IdempotencyCache::new(Duration::from_secs(30));

        let mut request = request("att-1", "knowledge_k1", "knowledge", json!("B"));
        request.is_correct = Some(false);
        assert!(persistence.save(&mut cache, &request).await.success);
        request.is_correct = Some(true);
        assert!(persistence.save(&mut cache, &request).await.success);

        let row = store
            .get(&ResponseKey::new("att-1", "knowledge", "knowledge_k1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.is_correct, Some(true));
        assert_eq!(cache.len(), 2);
    }
}
