//! Thin wrapper over the document-store HTTP API (spec §4.D, §6): bulk
//! index/update/delete with routing, mget, search/scroll paging, and
//! delete-by-query. One shared `reqwest::Client` carries the API-key
//! header and optional TLS-skip-verify for every request, the way the
//! teacher's proxy layer builds one client and hands it to every
//! consumer. Transient failures retry through `backon`'s
//! exponential-backoff-with-jitter policy; the cursor and aggregators
//! never see a raw HTTP error, only `IngestError`.

use backon::{ExponentialBuilder, Retryable};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use crate::config::EsConfig;
use crate::error::{IngestError, IngestResult};
use crate::metrics::MetricsCollector;
use crate::model::Keyed;

/// Outcome of a bulk index/delete/update call: per-item failures are
/// already filtered for benign 404s by the time this is returned.
#[derive(Debug, Default, Clone)]
pub struct BulkOutcome {
    pub took_ms: u64,
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct DeleteItem {
    pub key: String,
    pub routing: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScriptUpdate {
    pub key: String,
    pub routing: Option<String>,
    pub script_source: String,
    pub params: Value,
    pub upsert: Option<Value>,
    pub scripted_upsert: bool,
}

#[derive(Debug, Clone)]
pub struct MgetKey {
    pub key: String,
    pub routing: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub took_ms: u64,
    pub total: u64,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub id: String,
    pub source: Value,
    pub sort: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Default, Clone)]
pub struct DeleteByQueryOutcome {
    pub deleted: u64,
    pub version_conflicts: u64,
    pub took_ms: u64,
}

pub struct IndexerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    metrics: Option<MetricsCollector>,
}

fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_jitter()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(5)
}

impl IndexerClient {
    pub fn new(config: &EsConfig) -> IngestResult<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.tls_skip_verify)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IngestError::Permanent(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            metrics: None,
        })
    }

    /// Attaches a metrics sink; every request's server-reported `took`
    /// is recorded as `indexer.<op>.took_ms` (spec §4.D).
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record_took(&self, op: &str, took_ms: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.record(&format!("indexer.{op}.took_ms"), took_ms as f64);
        }
    }

    fn auth_header(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("ApiKey {}", self.api_key))
        }
    }

    fn classify_status(status: reqwest::StatusCode) -> Option<IngestError> {
        if status.is_success() {
            None
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Some(IngestError::NotFound(status.to_string()))
        } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            Some(IngestError::Transient(format!("server returned {status}")))
        } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Some(IngestError::Auth(format!("server returned {status}")))
        } else {
            Some(IngestError::Permanent(format!("server returned {status}")))
        }
    }

    async fn send_bulk(&self, body: String) -> IngestResult<Value> {
        let url = format!("{}/_bulk", self.base_url);
        let body = std::sync::Arc::new(body);
        (|| {
            let url = url.clone();
            let body = body.clone();
            async move {
                let request = self
                    .auth_header(self.client.post(&url))
                    .header("Content-Type", "application/x-ndjson")
                    .body((*body).clone());
                let response = request
                    .send()
                    .await
                    .map_err(|e| IngestError::Transient(format!("bulk request failed: {e}")))?;
                if let Some(err) = Self::classify_status(response.status()) {
                    return Err(err);
                }
                response
                    .json::<Value>()
                    .await
                    .map_err(|e| IngestError::Decode(format!("bulk response decode failed: {e}")))
            }
        })
        .retry(retry_policy())
        .when(|e: &IngestError| e.is_retryable())
        .await
    }

    fn count_bulk_failures(response: &Value, tolerate_404: bool) -> usize {
        let Some(items) = response.get("items").and_then(|v| v.as_array()) else {
            return 0;
        };
        items
            .iter()
            .filter(|item| {
                let Some(entry) = item.as_object().and_then(|o| o.values().next()) else {
                    return false;
                };
                let Some(error) = entry.get("error") else {
                    return false;
                };
                if error.is_null() {
                    return false;
                }
                if tolerate_404 && entry.get("status").and_then(|s| s.as_u64()) == Some(404) {
                    return false;
                }
                true
            })
            .count()
    }

    /// `BulkIndex`: one `index` action per doc with non-empty key;
    /// empty-keyed docs are dropped and logged, never sent (spec §4.D).
    pub async fn bulk_index<T: Keyed + Serialize>(
        &self,
        index: &str,
        docs: &[T],
    ) -> IngestResult<BulkOutcome> {
        let mut body = String::new();
        let mut attempted = 0usize;
        for doc in docs {
            if doc.key().is_empty() {
                tracing::warn!(index, "dropping doc with empty key");
                continue;
            }
            let action = json!({
                "index": {
                    "_index": index,
                    "_id": doc.key(),
                    "routing": doc.routing(),
                }
            });
            writeln!(body, "{action}").ok();
            writeln!(body, "{}", serde_json::to_string(doc)?).ok();
            attempted += 1;
        }
        if attempted == 0 {
            return Ok(BulkOutcome::default());
        }

        let response = self.send_bulk(body).await?;
        let failed = Self::count_bulk_failures(&response, true);
        if failed > 0 {
            tracing::warn!(index, failed, "bulk index reported failed items");
        }
        let took_ms = response.get("took").and_then(|v| v.as_u64()).unwrap_or(0);
        self.record_took("bulk_index", took_ms);
        Ok(BulkOutcome { took_ms, attempted, failed })
    }

    /// `BulkDelete`: 404s are not errors, a document may already be gone.
    pub async fn bulk_delete(&self, index: &str, items: &[DeleteItem]) -> IngestResult<BulkOutcome> {
        let mut body = String::new();
        for item in items {
            let action = json!({
                "delete": {
                    "_index": index,
                    "_id": item.key,
                    "routing": item.routing,
                }
            });
            writeln!(body, "{action}").ok();
        }
        if items.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let response = self.send_bulk(body).await?;
        let failed = Self::count_bulk_failures(&response, true);
        let took_ms = response.get("took").and_then(|v| v.as_u64()).unwrap_or(0);
        self.record_took("bulk_delete", took_ms);
        Ok(BulkOutcome { took_ms, attempted: items.len(), failed })
    }

    /// `BulkUpdateScript`: a 404 on the target reflects a like whose
    /// post has not yet arrived, not a failure (spec §4.D).
    pub async fn bulk_update_script(
        &self,
        index: &str,
        items: &[ScriptUpdate],
    ) -> IngestResult<BulkOutcome> {
        let mut body = String::new();
        for item in items {
            let action = json!({
                "update": {
                    "_index": index,
                    "_id": item.key,
                    "routing": item.routing,
                }
            });
            let mut doc = json!({
                "script": {
                    "source": item.script_source,
                    "params": item.params,
                    "lang": "painless",
                },
                "scripted_upsert": item.scripted_upsert,
            });
            if let Some(upsert) = &item.upsert {
                doc["upsert"] = upsert.clone();
            }
            writeln!(body, "{action}").ok();
            writeln!(body, "{doc}").ok();
        }
        if items.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let response = self.send_bulk(body).await?;
        let failed = Self::count_bulk_failures(&response, true);
        let took_ms = response.get("took").and_then(|v| v.as_u64()).unwrap_or(0);
        self.record_took("bulk_update_script", took_ms);
        Ok(BulkOutcome { took_ms, attempted: items.len(), failed })
    }

    /// `Mget`: unfound keys are simply absent from the returned map.
    pub async fn mget<T: DeserializeOwned>(
        &self,
        index: &str,
        keys: &[MgetKey],
    ) -> IngestResult<HashMap<String, T>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let docs: Vec<Value> = keys
            .iter()
            .map(|k| json!({"_id": k.key, "routing": k.routing}))
            .collect();
        let url = format!("{}/{}/_mget", self.base_url, index);
        let body = json!({ "docs": docs });

        let response: Value = (|| async {
            let request = self.auth_header(self.client.post(&url)).json(&body);
            let response = request
                .send()
                .await
                .map_err(|e| IngestError::Transient(format!("mget request failed: {e}")))?;
            if let Some(err) = Self::classify_status(response.status()) {
                return Err(err);
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| IngestError::Decode(format!("mget response decode failed: {e}")))
        })
        .retry(retry_policy())
        .when(|e: &IngestError| e.is_retryable())
        .await?;

        let mut out = HashMap::new();
        if let Some(docs) = response.get("docs").and_then(|v| v.as_array()) {
            for doc in docs {
                let found = doc.get("found").and_then(|v| v.as_bool()).unwrap_or(false);
                if !found {
                    continue;
                }
                let Some(id) = doc.get("_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                if let Some(source) = doc.get("_source") {
                    if let Ok(value) = serde_json::from_value::<T>(source.clone()) {
                        out.insert(id.to_string(), value);
                    }
                }
            }
        }
        Ok(out)
    }

    /// `Search`: returns hits with `sort` echoed for `search_after` paging.
    pub async fn search(
        &self,
        index: &str,
        query: Value,
        size: usize,
        sort: Option<Value>,
        search_after: Option<Value>,
    ) -> IngestResult<SearchResponse> {
        let url = format!("{}/{}/_search", self.base_url, index);
        let mut body = json!({ "query": query, "size": size });
        if let Some(sort) = sort {
            body["sort"] = sort;
        }
        if let Some(search_after) = search_after {
            body["search_after"] = search_after;
        }

        let response: Value = (|| async {
            let request = self.auth_header(self.client.post(&url)).json(&body);
            let response = request
                .send()
                .await
                .map_err(|e| IngestError::Transient(format!("search request failed: {e}")))?;
            if let Some(err) = Self::classify_status(response.status()) {
                return Err(err);
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| IngestError::Decode(format!("search response decode failed: {e}")))
        })
        .retry(retry_policy())
        .when(|e: &IngestError| e.is_retryable())
        .await?;

        let parsed = parse_search_response(&response);
        self.record_took("search", parsed.took_ms);
        Ok(parsed)
    }

    /// Opens a scroll context over `query`; the caller must eventually
    /// call `clear_scroll` to release it server-side (spec §4.D).
    pub async fn scroll_open(
        &self,
        index: &str,
        query: Value,
        routing: Option<&str>,
        keepalive: &str,
    ) -> IngestResult<ScrollPage> {
        let mut url = format!("{}/{}/_search?scroll={}", self.base_url, index, keepalive);
        if let Some(routing) = routing {
            let _ = write!(url, "&routing={routing}");
        }
        let body = json!({ "query": query });

        let response: Value = (|| async {
            let request = self.auth_header(self.client.post(&url)).json(&body);
            let response = request
                .send()
                .await
                .map_err(|e| IngestError::Transient(format!("scroll open failed: {e}")))?;
            if let Some(err) = Self::classify_status(response.status()) {
                return Err(err);
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| IngestError::Decode(format!("scroll response decode failed: {e}")))
        })
        .retry(retry_policy())
        .when(|e: &IngestError| e.is_retryable())
        .await?;

        let hits = parse_search_response(&response).hits;
        let scroll_id = response
            .get("_scroll_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(ScrollPage { scroll_id, hits })
    }

    pub async fn scroll_next(&self, scroll_id: &str, keepalive: &str) -> IngestResult<ScrollPage> {
        let url = format!("{}/_search/scroll", self.base_url);
        let body = json!({ "scroll": keepalive, "scroll_id": scroll_id });

        let response: Value = (|| async {
            let request = self.auth_header(self.client.post(&url)).json(&body);
            let response = request
                .send()
                .await
                .map_err(|e| IngestError::Transient(format!("scroll next failed: {e}")))?;
            if let Some(err) = Self::classify_status(response.status()) {
                return Err(err);
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| IngestError::Decode(format!("scroll response decode failed: {e}")))
        })
        .retry(retry_policy())
        .when(|e: &IngestError| e.is_retryable())
        .await?;

        let hits = parse_search_response(&response).hits;
        let scroll_id = response
            .get("_scroll_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(ScrollPage { scroll_id, hits })
    }

    pub async fn clear_scroll(&self, scroll_id: &str) -> IngestResult<()> {
        let url = format!("{}/_search/scroll", self.base_url);
        let body = json!({ "scroll_id": [scroll_id] });
        let request = self.auth_header(self.client.delete(&url)).json(&body);
        let response = request
            .send()
            .await
            .map_err(|e| IngestError::Transient(format!("clear scroll failed: {e}")))?;
        match Self::classify_status(response.status()) {
            None | Some(IngestError::NotFound(_)) => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// `DeleteByQuery` with the fixed policy spec §4.D/§4.I requires:
    /// `conflicts=proceed`, synchronous, refreshed, bounded server timeout.
    pub async fn delete_by_query(
        &self,
        index: &str,
        query: Value,
        timeout: &str,
        dry_run: bool,
    ) -> IngestResult<DeleteByQueryOutcome> {
        if dry_run {
            let count = self.count(index, query).await?;
            return Ok(DeleteByQueryOutcome {
                deleted: count,
                version_conflicts: 0,
                took_ms: 0,
            });
        }

        let url = format!(
            "{}/{}/_delete_by_query?conflicts=proceed&wait_for_completion=true&refresh=true&timeout={}",
            self.base_url, index, timeout
        );
        let body = json!({ "query": query });

        let response: Value = (|| async {
            let request = self.auth_header(self.client.post(&url)).json(&body);
            let response = request
                .send()
                .await
                .map_err(|e| IngestError::Transient(format!("delete by query failed: {e}")))?;
            if let Some(err) = Self::classify_status(response.status()) {
                return Err(err);
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| IngestError::Decode(format!("delete-by-query response decode failed: {e}")))
        })
        .retry(retry_policy())
        .when(|e: &IngestError| e.is_retryable())
        .await?;

        let took_ms = response.get("took").and_then(|v| v.as_u64()).unwrap_or(0);
        self.record_took("delete_by_query", took_ms);
        Ok(DeleteByQueryOutcome {
            deleted: response.get("deleted").and_then(|v| v.as_u64()).unwrap_or(0),
            version_conflicts: response
                .get("version_conflicts")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            took_ms,
        })
    }

    async fn count(&self, index: &str, query: Value) -> IngestResult<u64> {
        let url = format!("{}/{}/_count", self.base_url, index);
        let body = json!({ "query": query });
        let request = self.auth_header(self.client.post(&url)).json(&body);
        let response = request
            .send()
            .await
            .map_err(|e| IngestError::Transient(format!("count request failed: {e}")))?;
        if let Some(err) = Self::classify_status(response.status()) {
            return Err(err);
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| IngestError::Decode(format!("count response decode failed: {e}")))?;
        Ok(value.get("count").and_then(|v| v.as_u64()).unwrap_or(0))
    }
}

fn parse_search_response(response: &Value) -> SearchResponse {
    let took_ms = response.get("took").and_then(|v| v.as_u64()).unwrap_or(0);
    let hits_obj = response.get("hits");
    let total = hits_obj
        .and_then(|h| h.get("total"))
        .and_then(|t| t.get("value").or(Some(t)))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let hits = hits_obj
        .and_then(|h| h.get("hits"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|hit| {
                    let id = hit.get("_id").and_then(|v| v.as_str())?.to_string();
                    let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                    let sort = hit.get("sort").cloned();
                    Some(Hit { id, source, sort })
                })
                .collect()
        })
        .unwrap_or_default();
    SearchResponse { took_ms, total, hits }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_bulk_failures_ignoring_404s() {
        let response = json!({
            "items": [
                {"update": {"status": 404, "error": {"type": "not_found"}}},
                {"update": {"status": 400, "error": {"type": "mapper_parsing_exception"}}},
                {"update": {"status": 200}},
            ]
        });
        assert_eq!(IndexerClient::count_bulk_failures(&response, true), 1);
    }

    #[test]
    fn counts_all_errors_when_404_not_tolerated() {
        let response = json!({
            "items": [
                {"index": {"status": 404, "error": {"type": "not_found"}}},
            ]
        });
        assert_eq!(IndexerClient::count_bulk_failures(&response, false), 1);
    }

    #[test]
    fn parses_search_response_hits_and_sort() {
        let response = json!({
            "took": 5,
            "hits": {
                "total": {"value": 2},
                "hits": [
                    {"_id": "a", "_source": {"x": 1}, "sort": [1]},
                    {"_id": "b", "_source": {"x": 2}, "sort": [2]},
                ]
            }
        });
        let parsed = parse_search_response(&response);
        assert_eq!(parsed.took_ms, 5);
        assert_eq!(parsed.total, 2);
        assert_eq!(parsed.hits.len(), 2);
        assert_eq!(parsed.hits[1].id, "b");
    }
}
