//! Like-count delta aggregator (spec §4.F): accumulates signed
//! increments per subject post, resolves each post's routing key
//! (routing cache, then a mget fallback for misses), and flushes one
//! bulk scripted-update per batch. A missing post at flush time is a
//! legitimate not-yet-indexed race — the delta is dropped with a debug
//! log rather than retried (spec §4.F, explicit non-goal).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::json;

use crate::error::IngestResult;
use crate::indexer::{IndexerClient, MgetKey, ScriptUpdate};
use crate::model::alias;
use crate::routing_cache::RoutingCache;

const SCRIPT_SOURCE: &str = "if (ctx._source.like_count == null) { ctx._source.like_count = 0; } ctx._source.like_count = ctx._source.like_count + params.increment";

#[derive(Deserialize)]
struct PostRoutingProbe {
    author_id: String,
}

pub struct LikeCountAggregator {
    indexer: Arc<IndexerClient>,
    cache: Arc<RoutingCache>,
    pending: Mutex<HashMap<String, i64>>,
}

impl LikeCountAggregator {
    pub fn new(indexer: Arc<IndexerClient>, cache: Arc<RoutingCache>) -> Self {
        Self {
            indexer,
            cache,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a `+1`/`-1` increment for `subject_uri`.
    pub fn add(&self, subject_uri: &str, delta: i64) {
        if subject_uri.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        *pending.entry(subject_uri.to_string()).or_insert(0) += delta;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Fold duplicates, resolve routing, and issue one batch of
    /// scripted updates. Subjects whose routing cannot be resolved
    /// (post not yet indexed) are dropped, not retried.
    pub async fn flush(&self) -> IngestResult<()> {
        let deltas: HashMap<String, i64> = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        if deltas.is_empty() {
            return Ok(());
        }

        let subjects: Vec<String> = deltas.keys().cloned().collect();
        let cached = self.cache.bulk_get(&subjects);

        let mut routing: HashMap<String, String> = HashMap::new();
        let mut misses = Vec::new();
        for (subject, hit) in subjects.iter().zip(cached.into_iter()) {
            match hit {
                Some(author_id) => {
                    routing.insert(subject.clone(), author_id);
                }
                None => misses.push(subject.clone()),
            }
        }

        let hit_rate = if subjects.is_empty() {
            0.0
        } else {
            (subjects.len() - misses.len()) as f64 / subjects.len() as f64
        };
        tracing::debug!(hit_rate, total = subjects.len(), misses = misses.len(), "like-count routing cache");

        if !misses.is_empty() {
            let keys: Vec<MgetKey> = misses
                .iter()
                .map(|uri| MgetKey {
                    key: uri.clone(),
                    routing: None,
                })
                .collect();
            let found = self
                .indexer
                .mget::<PostRoutingProbe>(alias::POSTS, &keys)
                .await?;
            let mut fresh = Vec::new();
            for (uri, probe) in found {
                fresh.push((uri.clone(), probe.author_id.clone()));
                routing.insert(uri, probe.author_id);
            }
            self.cache.bulk_put(fresh);
        }

        let mut items = Vec::new();
        let mut dropped = 0usize;
        for (subject, delta) in deltas {
            match routing.get(&subject) {
                Some(author_id) => items.push(ScriptUpdate {
                    key: subject,
                    routing: Some(author_id.clone()),
                    script_source: SCRIPT_SOURCE.to_string(),
                    params: json!({ "increment": delta }),
                    upsert: None,
                    scripted_upsert: false,
                }),
                None => {
                    tracing::debug!(subject, "post not yet indexed, dropping like-count delta");
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            tracing::debug!(dropped, "like-count deltas dropped for unresolved posts");
        }
        if items.is_empty() {
            return Ok(());
        }

        self.indexer.bulk_update_script(alias::POSTS, &items).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EsConfig;

    fn aggregator() -> LikeCountAggregator {
        let es = EsConfig {
            url: "https://localhost:9200".to_string(),
            api_key: String::new(),
            tls_skip_verify: true,
        };
        let indexer = Arc::new(IndexerClient::new(&es).unwrap());
        let cache = Arc::new(RoutingCache::new(100));
        LikeCountAggregator::new(indexer, cache)
    }

    #[test]
    fn folds_duplicate_increments_for_same_subject() {
        let agg = aggregator();
        agg.add("at://post1", 1);
        agg.add("at://post1", 1);
        agg.add("at://post1", -1);
        assert_eq!(agg.pending_len(), 1);
    }

    #[test]
    fn empty_subject_is_ignored() {
        let agg = aggregator();
        agg.add("", 1);
        assert_eq!(agg.pending_len(), 0);
    }

    #[tokio::test]
    async fn flush_with_empty_pending_is_a_no_op() {
        let agg = aggregator();
        agg.flush().await.unwrap();
    }
}
