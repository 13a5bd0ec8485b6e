//! Hashtag-per-hour aggregator (spec §4.F): coalesces `{tag, hour, +1}`
//! updates within a batch and issues bulk scripted upserts so a
//! first-seen `{tag, hour}` pair creates its counter document instead
//! of requiring a prior read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::codec::hashtag::HashtagUpdate;
use crate::error::IngestResult;
use crate::indexer::{IndexerClient, ScriptUpdate};
use crate::model::{alias, HashtagBucket};

const SCRIPT_SOURCE: &str = "ctx._source.count += params.increment";

pub struct HashtagAggregator {
    indexer: Arc<IndexerClient>,
    pending: Mutex<HashMap<(String, String), i64>>,
}

impl HashtagAggregator {
    pub fn new(indexer: Arc<IndexerClient>) -> Self {
        Self {
            indexer,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_all(&self, updates: Vec<HashtagUpdate>) {
        let mut pending = self.pending.lock().unwrap();
        for update in updates {
            *pending.entry((update.tag, update.hour)).or_insert(0) += 1;
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub async fn flush(&self) -> IngestResult<()> {
        let deltas: HashMap<(String, String), i64> = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        if deltas.is_empty() {
            return Ok(());
        }

        let items: Vec<ScriptUpdate> = deltas
            .into_iter()
            .map(|((tag, hour), count)| ScriptUpdate {
                key: HashtagBucket::doc_id(&tag, &hour),
                routing: None,
                script_source: SCRIPT_SOURCE.to_string(),
                params: json!({ "increment": count }),
                upsert: Some(json!({ "hashtag": tag, "hour": hour, "count": count })),
                scripted_upsert: true,
            })
            .collect();

        self.indexer.bulk_update_script(alias::HASHTAGS, &items).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EsConfig;

    fn aggregator() -> HashtagAggregator {
        let es = EsConfig {
            url: "https://localhost:9200".to_string(),
            api_key: String::new(),
            tls_skip_verify: true,
        };
        HashtagAggregator::new(Arc::new(IndexerClient::new(&es).unwrap()))
    }

    #[test]
    fn coalesces_by_tag_and_hour() {
        let agg = aggregator();
        agg.add_all(vec![
            HashtagUpdate { tag: "rust".to_string(), hour: "2024-01-01T00:00:00Z".to_string() },
            HashtagUpdate { tag: "rust".to_string(), hour: "2024-01-01T00:00:00Z".to_string() },
            HashtagUpdate { tag: "rust".to_string(), hour: "2024-01-01T01:00:00Z".to_string() },
        ]);
        assert_eq!(agg.pending_len(), 2);
    }

    #[tokio::test]
    async fn flush_with_empty_pending_is_a_no_op() {
        let agg = aggregator();
        agg.flush().await.unwrap();
    }
}
