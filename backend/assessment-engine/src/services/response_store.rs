use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::metrics::track_db_operation;
use crate::models::{ResponseKey, StoredResponse};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

pub const RESPONSES_COLLECTION: &str = "assessment_responses";

/// Durable storage for answers, keyed by (attempt, section, question).
/// `upsert` replaces any existing row with the same key.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn upsert(&self, response: &StoredResponse) -> EngineResult<()>;

    async fn get(&self, key: &ResponseKey) -> EngineResult<Option<StoredResponse>>;

    /// Rows of one section, oldest first.
    async fn list_section(
        &self,
        attempt_id: &str,
        section_id: &str,
    ) -> EngineResult<Vec<StoredResponse>>;

    async fn health(&self) -> EngineResult<()>;

    fn backend_name(&self) -> &'static str;
}

#[derive(Default)]
pub struct InMemoryResponseStore {
    rows: RwLock<HashMap<ResponseKey, StoredResponse>>,
}

impl InMemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn upsert(&self, response: &StoredResponse) -> EngineResult<()> {
        self.rows
            .write()
            .await
            .insert(response.key(), response.clone());
        Ok(())
    }

    async fn get(&self, key: &ResponseKey) -> EngineResult<Option<StoredResponse>> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn list_section(
        &self,
        attempt_id: &str,
        section_id: &str,
    ) -> EngineResult<Vec<StoredResponse>> {
        let mut rows: Vec<StoredResponse> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.attempt_id == attempt_id && r.section_id == section_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.saved_at
                .cmp(&b.saved_at)
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        Ok(rows)
    }

    async fn health(&self) -> EngineResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// The key is stored as a sub-document `_id`, so ids containing any
/// separator cannot collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResponseDocument {
    #[serde(rename = "_id")]
    id: ResponseKey,
    #[serde(flatten)]
    response: StoredResponse,
}

fn id_filter(key: &ResponseKey) -> Document {
    doc! {
        "_id": {
            "attempt_id": &key.attempt_id,
            "section_id": &key.section_id,
            "question_id": &key.question_id,
        }
    }
}

pub struct MongoResponseStore {
    collection: Collection<ResponseDocument>,
    mongo: Database,
    retry: RetryConfig,
}

impl MongoResponseStore {
    pub fn new(mongo: Database) -> Self {
        Self {
            collection: mongo.collection(RESPONSES_COLLECTION),
            mongo,
            retry: RetryConfig::persistent_write(),
        }
    }
}

#[async_trait]
impl ResponseStore for MongoResponseStore {
    async fn upsert(&self, response: &StoredResponse) -> EngineResult<()> {
        let document = ResponseDocument {
            id: response.key(),
            response: response.clone(),
        };

        track_db_operation(
            "upsert",
            RESPONSES_COLLECTION,
            retry_async_with_config(self.retry.clone(), || async {
                self.collection
                    .replace_one(id_filter(&document.id), &document)
                    .with_options(
                        mongodb::options::ReplaceOptions::builder()
                            .upsert(true)
                            .build(),
                    )
                    .await
                    .map(|_| ())
            }),
        )
        .await
        .map_err(EngineError::from)
    }

    async fn get(&self, key: &ResponseKey) -> EngineResult<Option<StoredResponse>> {
        let found = track_db_operation(
            "find_one",
            RESPONSES_COLLECTION,
            async {
                self.collection
                    .find_one(id_filter(key))
                    .await
            },
        )
        .await?;
        Ok(found.map(|d| d.response))
    }

    async fn list_section(
        &self,
        attempt_id: &str,
        section_id: &str,
    ) -> EngineResult<Vec<StoredResponse>> {
        let docs: Vec<ResponseDocument> = track_db_operation("find", RESPONSES_COLLECTION, async {
            self.collection
                .find(doc! { "attempt_id": attempt_id, "section_id": section_id })
                .sort(doc! { "saved_at": 1, "question_id": 1 })
                .await?
                .try_collect()
                .await
        })
        .await?;
        Ok(docs.into_iter().map(|d| d.response).collect())
    }

    async fn health(&self) -> EngineResult<()> {
        self.mongo.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "mongodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn row(question_id: &str, value: serde_json::Value, offset_ms: i64) -> StoredResponse {
        StoredResponse {
            attempt_id: "att-1".into(),
            section_id: "aptitude".into(),
            question_id: question_id.into(),
            response_value: value,
            is_correct: None,
            saved_at: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_row_with_same_key() {
        let store = InMemoryResponseStore::new();
        store.upsert(&row("q1", json!("A"), 0)).await.unwrap();
        store.upsert(&row("q1", json!("C"), 5)).await.unwrap();

        assert_eq!(store.len().await, 1);
        let stored = store
            .get(&ResponseKey::new("att-1", "aptitude", "q1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.response_value, json!("C"));
    }

    #[tokio::test]
    async fn list_section_filters_and_orders_by_save_time() {
        let store = InMemoryResponseStore::new();
        store.upsert(&row("q2", json!(2), 10)).await.unwrap();
        store.upsert(&row("q1", json!(1), 0)).await.unwrap();
        let mut other = row("q3", json!(3), 5);
        other.section_id = "riasec".into();
        store.upsert(&other).await.unwrap();

        let rows = store.list_section("att-1", "aptitude").await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.question_id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2"]);
    }

    #[test]
    fn mongo_document_flattens_response_under_compound_id() {
        let response = row("q1", json!("B"), 0);
        let document = ResponseDocument {
            id: response.key(),
            response,
        };
        let value = serde_json::to_value(&document).unwrap();
        assert_eq!(
            value["_id"],
            json!({"attempt_id": "att-1", "section_id": "aptitude", "question_id": "q1"})
        );
        assert_eq!(value["question_id"], json!("q1"));
    }

    #[test]
    fn separator_laden_keys_get_distinct_filters() {
        let left = ResponseKey::new("x:y", "z", "q");
        let right = ResponseKey::new("x", "y:z", "q");
        assert_ne!(id_filter(&left), id_filter(&right));

        let filter = id_filter(&left);
        let id = filter.get_document("_id").unwrap();
        assert_eq!(id.get_str("attempt_id").unwrap(), "x:y");
        assert_eq!(id.get_str("section_id").unwrap(), "z");
    }

    #[tokio::test]
    async fn separator_laden_keys_keep_separate_rows() {
        let store = InMemoryResponseStore::new();
        let mut left = row("q", json!("A"), 0);
        left.attempt_id = "x:y".into();
        left.section_id = "z".into();
        let mut right = row("q", json!("B"), 1);
        right.attempt_id = "x".into();
        right.section_id = "y:z".into();

        store.upsert(&left).await.unwrap();
        store.upsert(&right).await.unwrap();

        assert_eq!(store.len().await, 2);
        let stored = store
            .get(&ResponseKey::new("x", "y:z", "q"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.response_value, json!("B"));
    }
}
