use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::{ChangeEvent, ChangeFeed, ChangeKind, Filter, Query, RowStore, StoreError};

/// In-process row store used for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Value> = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                )
                .unwrap_or(Ordering::Equal);
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        let rows = rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Value) -> Result<Value, StoreError> {
        let object = row
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidRow("row must be a JSON object".to_string()))?;

        let needs_id = !matches!(object.get("id"), Some(Value::String(id)) if !id.is_empty());
        if needs_id {
            object.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }

        {
            let mut tables = self.tables.write().await;
            let rows = tables.entry(table.to_string()).or_default();
            if rows.iter().any(|existing| existing.get("id") == row.get("id")) {
                return Err(StoreError::Status {
                    status: 409,
                    body: format!("duplicate id in {}", table),
                });
            }
            rows.push(row.clone());
        }

        self.feed.publish(table, ChangeKind::Insert, row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let patch = patch
            .as_object()
            .ok_or_else(|| StoreError::InvalidRow("patch must be a JSON object".to_string()))?
            .clone();

        let updated: Vec<Value> = {
            let mut tables = self.tables.write().await;
            let Some(rows) = tables.get_mut(table) else {
                return Ok(Vec::new());
            };

            rows.iter_mut()
                .filter(|row| matches(row, &query.filters))
                .filter_map(|row| {
                    let object = row.as_object_mut()?;
                    for (key, value) in &patch {
                        if key != "id" {
                            object.insert(key.clone(), value.clone());
                        }
                    }
                    Some(row.clone())
                })
                .collect()
        };

        for row in &updated {
            self.feed.publish(table, ChangeKind::Update, row.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        let removed: Vec<Value> = {
            let mut tables = self.tables.write().await;
            let Some(rows) = tables.get_mut(table) else {
                return Ok(0);
            };
            let (removed, kept): (Vec<Value>, Vec<Value>) = rows
                .drain(..)
                .partition(|row| matches(row, &query.filters));
            *rows = kept;
            removed
        };

        let count = removed.len() as u64;
        for row in removed {
            self.feed.publish(table, ChangeKind::Delete, row);
        }
        Ok(count)
    }

    fn subscribe(&self, table: &str) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe(table)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn matches(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        let actual = row.get(filter.column()).unwrap_or(&Value::Null);
        match filter {
            Filter::Eq(_, expected) => equals(actual, expected),
            Filter::Neq(_, expected) => !equals(actual, expected),
            Filter::Gte(_, bound) => {
                matches!(compare(actual, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            Filter::Lte(_, bound) => {
                matches!(compare(actual, bound), Some(Ordering::Less | Ordering::Equal))
            }
            Filter::Lt(_, bound) => matches!(compare(actual, bound), Some(Ordering::Less)),
            Filter::In(_, values) => values.iter().any(|value| equals(actual, value)),
        }
    })
}

fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Orders numbers numerically, RFC 3339 timestamps chronologically and
/// other strings lexicographically. Mixed or non-scalar values are unordered.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (parse_timestamp(x), parse_timestamp(y)) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QUESTIONS;
    use serde_json::json;

    #[tokio::test]
    async fn insert_assigns_id_and_notifies() {
        let store = MemoryStore::new();
        let mut changes = store.subscribe(QUESTIONS);

        let row = store
            .insert(QUESTIONS, json!({ "text": "2 + 2?" }))
            .await
            .unwrap();

        assert!(row["id"].as_str().is_some_and(|id| !id.is_empty()));
        let event = changes.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.row["id"], row["id"]);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        store.insert(QUESTIONS, json!({ "id": "q1" })).await.unwrap();
        let err = store.insert(QUESTIONS, json!({ "id": "q1" })).await;
        assert!(matches!(err, Err(StoreError::Status { status: 409, .. })));
    }

    #[tokio::test]
    async fn update_merges_patch_into_matching_rows() {
        let store = MemoryStore::new();
        store
            .insert(QUESTIONS, json!({ "id": "q1", "subject": "math", "active": true }))
            .await
            .unwrap();
        store
            .insert(QUESTIONS, json!({ "id": "q2", "subject": "bio", "active": true }))
            .await
            .unwrap();

        let updated = store
            .update(
                QUESTIONS,
                &Query::new().eq("subject", "math"),
                json!({ "active": false, "id": "ignored" }),
            )
            .await
            .unwrap();

        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["id"], "q1");
        assert_eq!(updated[0]["active"], false);

        let active = store
            .select(QUESTIONS, &Query::new().eq("active", true))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0]["id"], "q2");
    }

    #[tokio::test]
    async fn range_filters_compare_timestamps_chronologically() {
        let store = MemoryStore::new();
        store
            .insert("t", json!({ "at": "2026-01-01T10:00:00.5Z" }))
            .await
            .unwrap();
        store
            .insert("t", json!({ "at": "2026-01-01T10:00:00Z" }))
            .await
            .unwrap();

        let rows = store
            .select(
                "t",
                &Query::new()
                    .gte("at", "2026-01-01T10:00:00.1Z")
                    .order_by("at", true),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["at"], "2026-01-01T10:00:00.5Z");
    }

    #[tokio::test]
    async fn numbers_compare_across_integer_and_float() {
        let store = MemoryStore::new();
        store.insert("t", json!({ "n": 3 })).await.unwrap();
        let rows = store
            .select("t", &Query::new().eq("n", 3.0))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_rows_and_reports_count() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.insert("t", json!({ "id": id })).await.unwrap();
        }

        let removed = store
            .delete(
                "t",
                &Query::new().is_in("id", vec![json!("a"), json!("c")]),
            )
            .await
            .unwrap();

        assert_eq!(removed, 2);
        let rest = store.select("t", &Query::new()).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0]["id"], "b");
    }
}
