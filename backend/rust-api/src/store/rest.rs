use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;

use super::{ChangeEvent, ChangeFeed, ChangeKind, Filter, Query, RowStore, StoreError};
use crate::utils::retry::{retry_with_backoff, RetryConfig};

/// PostgREST-style HTTP client for the managed row store.
///
/// Change notifications only cover writes issued through this client;
/// the managed backend's own realtime channel is not consumed.
pub struct RestStore {
    http_client: Client,
    base_url: Url,
    api_key: String,
    feed: ChangeFeed,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
            api_key: api_key.to_string(),
            feed: ChangeFeed::default(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        Ok(self.base_url.join(&format!("rest/v1/{}", table))?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn select_once(
        &self,
        url: &Url,
        params: &[(String, String)],
    ) -> Result<Vec<Value>, StoreError> {
        let response = self
            .request(Method::GET, url.clone())
            .query(params)
            .send()
            .await?;
        Self::rows(response).await
    }

    async fn rows(response: Response) -> Result<Vec<Value>, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match response.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }
}

#[async_trait]
impl RowStore for RestStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        let url = self.table_url(table)?;
        let params = query_params(query, true);

        retry_with_backoff(&RetryConfig::default(), StoreError::is_transient, || {
            self.select_once(&url, &params)
        })
        .await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        let response = self
            .request(Method::POST, self.table_url(table)?)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;

        let stored = Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidRow("insert returned no row".to_string()))?;

        self.feed.publish(table, ChangeKind::Insert, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let response = self
            .request(Method::PATCH, self.table_url(table)?)
            .header("Prefer", "return=representation")
            .query(&query_params(query, false))
            .json(&patch)
            .send()
            .await?;

        let updated = Self::rows(response).await?;
        for row in &updated {
            self.feed.publish(table, ChangeKind::Update, row.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        let response = self
            .request(Method::DELETE, self.table_url(table)?)
            .header("Prefer", "return=representation")
            .query(&query_params(query, false))
            .send()
            .await?;

        let removed = Self::rows(response).await?;
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
        let query = Query::new().limit(1);
        self.select(super::QUESTIONS, &query).await.map(|_| ())
    }
}

fn query_params(query: &Query, with_paging: bool) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = query
        .filters
        .iter()
        .map(|filter| {
            let value = match filter {
                Filter::Eq(_, v) if v.is_null() => "is.null".to_string(),
                Filter::Eq(_, v) => format!("eq.{}", scalar(v)),
                Filter::Neq(_, v) => format!("neq.{}", scalar(v)),
                Filter::Gte(_, v) => format!("gte.{}", scalar(v)),
                Filter::Lte(_, v) => format!("lte.{}", scalar(v)),
                Filter::Lt(_, v) => format!("lt.{}", scalar(v)),
                Filter::In(_, values) => {
                    let list: Vec<String> = values
                        .iter()
                        .map(|v| match v {
                            Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
                            other => scalar(other),
                        })
                        .collect();
                    format!("in.({})", list.join(","))
                }
            };
            (filter.column().to_string(), value)
        })
        .collect();

    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }

    if with_paging {
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if query.offset > 0 {
            params.push(("offset".to_string(), query.offset.to_string()));
        }
    }

    params
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
