//! Row store collaborator.
//!
//! Persistence and change notifications live in an external managed
//! backend. Everything in the service talks to it through [`RowStore`]:
//! flat JSON rows keyed by a string `id`, filtered with [`Query`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::metrics::track_store_operation;

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

pub const QUESTIONS: &str = "questions";
pub const TEST_RESULTS: &str = "test_results";
pub const SCHEDULED_TESTS: &str = "scheduled_tests";
pub const PROFILES: &str = "profiles";

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Row store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Row store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Row (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Invalid store URL: {0}")]
    Url(#[from] url::ParseError),
}

impl StoreError {
    /// Transport failures and 5xx responses are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StoreError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Gte(String, Value),
    Lte(String, Value),
    Lt(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::Neq(c, _)
            | Filter::Gte(c, _)
            | Filter::Lte(c, _)
            | Filter::Lt(c, _)
            | Filter::In(c, _) => c,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Conjunction of filters plus optional ordering and paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().eq("id", id)
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn neq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Neq(column.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(column.to_string(), value.into()));
        self
    }

    pub fn lt(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lt(column.to_string(), value.into()));
        self
    }

    pub fn is_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.filters.push(Filter::In(column.to_string(), values));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Push notification emitted after a row changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub row: Value,
}

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// Inserts one row and returns it as stored (with its `id`).
    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError>;

    /// Shallow-merges `patch` into every matching row.
    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError>;

    async fn delete(&self, table: &str, query: &Query) -> Result<u64, StoreError>;

    fn subscribe(&self, table: &str) -> broadcast::Receiver<ChangeEvent>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn RowStore>;

/// Per-table broadcast channels shared by the store implementations.
#[derive(Default)]
pub(crate) struct ChangeFeed {
    channels: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    fn sender(&self, table: &str) -> broadcast::Sender<ChangeEvent> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_FEED_CAPACITY).0)
            .clone()
    }

    pub(crate) fn subscribe(&self, table: &str) -> broadcast::Receiver<ChangeEvent> {
        self.sender(table).subscribe()
    }

    pub(crate) fn publish(&self, table: &str, kind: ChangeKind, row: Value) {
        // No subscribers is not an error.
        let _ = self.sender(table).send(ChangeEvent {
            table: table.to_string(),
            kind,
            row,
        });
    }
}

/// Pulls every matching row page by page until a short page comes back.
pub async fn fetch_all(
    store: &dyn RowStore,
    table: &str,
    query: &Query,
    page_size: usize,
) -> Result<Vec<Value>, StoreError> {
    let page_size = page_size.max(1);
    let mut rows = Vec::new();
    let mut offset = query.offset;

    loop {
        let page_query = query.clone().offset(offset).limit(page_size);
        let page = track_store_operation("select_page", table, store.select(table, &page_query))
            .await?;
        let fetched = page.len();
        rows.extend(page);

        if fetched < page_size {
            break;
        }
        offset += fetched;
    }

    tracing::debug!("Fetched {} rows from {} in pages of {}", rows.len(), table, page_size);
    Ok(rows)
}

pub async fn select_as<T: DeserializeOwned>(
    store: &dyn RowStore,
    table: &str,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    let rows = track_store_operation("select", table, store.select(table, query)).await?;
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoreError::from))
        .collect()
}

pub async fn find_one<T: DeserializeOwned>(
    store: &dyn RowStore,
    table: &str,
    query: &Query,
) -> Result<Option<T>, StoreError> {
    let query = query.clone().limit(1);
    Ok(select_as(store, table, &query).await?.into_iter().next())
}

pub async fn insert_as<T: Serialize + DeserializeOwned>(
    store: &dyn RowStore,
    table: &str,
    row: &T,
) -> Result<T, StoreError> {
    let value = serde_json::to_value(row)?;
    let stored = track_store_operation("insert", table, store.insert(table, value)).await?;
    Ok(serde_json::from_value(stored)?)
}

/// Replaces the editable columns of the row with the same `id`.
pub async fn update_by_id<T: Serialize>(
    store: &dyn RowStore,
    table: &str,
    id: &str,
    patch: &T,
) -> Result<usize, StoreError> {
    update_where(store, table, &Query::by_id(id), patch).await
}

/// Patches every row matching `query` and returns how many were changed.
/// A zero count means the filters no longer matched at write time.
pub async fn update_where<T: Serialize>(
    store: &dyn RowStore,
    table: &str,
    query: &Query,
    patch: &T,
) -> Result<usize, StoreError> {
    let patch = serde_json::to_value(patch)?;
    let updated = track_store_operation("update", table, store.update(table, query, patch)).await?;
    Ok(updated.len())
}

pub async fn delete_by_id(store: &dyn RowStore, table: &str, id: &str) -> Result<u64, StoreError> {
    track_store_operation("delete", table, store.delete(table, &Query::by_id(id))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fetch_all_walks_every_page() {
        let store = MemoryStore::new();
        for number in 0..25 {
            store
                .insert(QUESTIONS, json!({ "number": number, "active": true }))
                .await
                .unwrap();
        }

        let query = Query::new().eq("active", true).order_by("number", true);
        let rows = fetch_all(&store, QUESTIONS, &query, 10).await.unwrap();

        assert_eq!(rows.len(), 25);
        assert_eq!(rows[0]["number"], 0);
        assert_eq!(rows[24]["number"], 24);
    }

    #[tokio::test]
    async fn fetch_all_stops_on_exact_multiple() {
        let store = MemoryStore::new();
        for number in 0..20 {
            store
                .insert(QUESTIONS, json!({ "number": number }))
                .await
                .unwrap();
        }

        let rows = fetch_all(&store, QUESTIONS, &Query::new(), 10).await.unwrap();
        assert_eq!(rows.len(), 20);
    }

    #[test]
    fn query_builder_collects_filters() {
        let query = Query::new()
            .eq("subject", "math")
            .gte("number", 3)
            .lte("number", 9)
            .order_by("number", false)
            .limit(5);

        assert_eq!(query.filters.len(), 3);
        assert_eq!(query.filters[1].column(), "number");
        assert_eq!(query.limit, Some(5));
        assert!(!query.order.unwrap().ascending);
    }
}
