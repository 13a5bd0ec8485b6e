//! Jetstream (WebSocket like-firehose) ingester (spec §4.G).
//!
//! Session state machine: `Disconnected -> Connecting -> Streaming ->
//! Draining -> Disconnected`. On start, the cursor is loaded and
//! clamped to `max_rewind_minutes`; on each reconnect the ingester
//! always resumes from the persisted cursor, never from the in-flight
//! buffer, so a dropped connection never double-applies a flushed
//! batch.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::aggregate::LikeCountAggregator;
use crate::codec::jetstream::decode;
use crate::config::JetstreamConfig;
use crate::cursor::{effective_resume, CursorStore};
use crate::error::{IngestError, IngestResult};
use crate::indexer::{DeleteItem, IndexerClient, MgetKey};
use crate::metrics::MetricsCollector;
use crate::model::{alias, IngestRecord, Like, LikeTombstone};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Streaming,
    Draining,
}

pub struct JetstreamIngester {
    config: JetstreamConfig,
    cursor: CursorStore,
    indexer: Arc<IndexerClient>,
    like_aggregator: Arc<LikeCountAggregator>,
    metrics: MetricsCollector,
    max_rewind_minutes: u64,
    flush_size: usize,
    flush_interval: Duration,
    dry_run: bool,
    state: Mutex<SessionState>,
}

struct PendingBatch {
    likes: Vec<Like>,
    like_deletes: Vec<(String, String)>, // (uri, author_id)
    max_time_us: i64,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            likes: Vec::new(),
            like_deletes: Vec::new(),
            max_time_us: 0,
        }
    }

    fn len(&self) -> usize {
        self.likes.len() + self.like_deletes.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JetstreamIngester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: JetstreamConfig,
        cursor: CursorStore,
        indexer: Arc<IndexerClient>,
        like_aggregator: Arc<LikeCountAggregator>,
        metrics: MetricsCollector,
        max_rewind_minutes: u64,
        flush_size: usize,
        flush_interval: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            config,
            cursor,
            indexer,
            like_aggregator,
            metrics,
            max_rewind_minutes,
            flush_size,
            flush_interval,
            dry_run,
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub async fn run(&self, cancel: CancellationToken) -> IngestResult<()> {
        let now_us = chrono::Utc::now().timestamp_micros();
        self.cursor.write_instance(now_us).await?;

        let mut backoff = Duration::from_millis(200);
        let max_backoff = Duration::from_secs(30);

        while !cancel.is_cancelled() {
            let persisted = self.cursor.load().await?.map(|c| c.last_time_us);
            let resume_us = effective_resume(persisted, now_us, self.max_rewind_minutes);

            self.set_state(SessionState::Connecting);
            match self.stream_once(resume_us, &cancel).await {
                Ok(()) => {
                    backoff = Duration::from_millis(200);
                }
                Err(err @ IngestError::Auth(_)) => {
                    tracing::error!(error = %err, "jetstream authentication failure, exiting");
                    self.set_state(SessionState::Disconnected);
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "jetstream session ended, backing off");
                    self.set_state(SessionState::Disconnected);
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = cancel.cancelled() => break,
                    }
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }
        self.set_state(SessionState::Disconnected);
        Ok(())
    }

    async fn stream_once(&self, resume_us: i64, cancel: &CancellationToken) -> IngestResult<()> {
        let url = format!("{}?cursor={}", self.config.url, resume_us);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| IngestError::Transient(format!("websocket connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();
        self.set_state(SessionState::Streaming);

        let mut batch = PendingBatch::new();
        let mut last_flush = Instant::now();
        let mut interval = tokio::time::interval(Duration::from_millis(100));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.set_state(SessionState::Draining);
                    self.flush(&mut batch).await?;
                    let _ = write.send(WsMessage::Close(None)).await;
                    self.set_state(SessionState::Disconnected);
                    return Ok(());
                }
                _ = interval.tick() => {
                    if !batch.is_empty() && last_flush.elapsed() >= self.flush_interval {
                        self.flush(&mut batch).await?;
                        last_flush = Instant::now();
                    }
                }
                frame = read.next() => {
                    let Some(frame) = frame else {
                        return Err(IngestError::Transient("websocket stream ended".to_string()));
                    };
                    let frame = frame.map_err(|e| IngestError::Transient(format!("websocket read error: {e}")))?;
                    let WsMessage::Text(text) = frame else { continue };

                    let Some(decoded) = decode(&text) else { continue };
                    batch.max_time_us = batch.max_time_us.max(decoded.time_us);
                    self.metrics.record("jetstream_frames_total", 1.0);

                    match decoded.record {
                        Some(IngestRecord::Like(like)) => {
                            self.like_aggregator.add(&like.subject_uri, 1);
                            batch.likes.push(*like);
                        }
                        Some(IngestRecord::LikeDelete { uri, author_id }) => {
                            batch.like_deletes.push((uri, author_id));
                        }
                        _ => {}
                    }

                    if batch.len() >= self.flush_size {
                        self.flush(&mut batch).await?;
                        last_flush = Instant::now();
                    }
                }
            }
        }
    }

    /// Flush order (spec §4.G): index likes, index like-tombstones,
    /// apply like-count deltas, then advance the cursor to the max
    /// `time_us` seen in the batch.
    async fn flush(&self, batch: &mut PendingBatch) -> IngestResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.dry_run {
            tracing::info!(likes = batch.likes.len(), deletes = batch.like_deletes.len(), "dry-run: would flush batch");
            *batch = PendingBatch::new();
            return Ok(());
        }

        let tombstones = self.resolve_like_tombstones(&batch.like_deletes).await;

        if !batch.likes.is_empty() {
            self.indexer.bulk_index(alias::LIKES, &batch.likes).await?;
        }
        if !tombstones.is_empty() {
            self.indexer.bulk_index(alias::LIKE_TOMBSTONES, &tombstones).await?;
        }
        if !batch.like_deletes.is_empty() {
            let delete_items: Vec<DeleteItem> = batch
                .like_deletes
                .iter()
                .map(|(uri, author_id)| DeleteItem { key: uri.clone(), routing: Some(author_id.clone()) })
                .collect();
            self.indexer.bulk_delete(alias::LIKES, &delete_items).await?;
        }

        self.like_aggregator.flush().await?;

        let max_time_us = batch.max_time_us;
        *batch = PendingBatch::new();
        self.cursor.update(max_time_us).await?;
        Ok(())
    }

    /// Best-effort subject-uri resolution for like deletes via mget;
    /// deletes with no resolvable prior document are dropped (spec §4.G).
    async fn resolve_like_tombstones(&self, deletes: &[(String, String)]) -> Vec<LikeTombstone> {
        if deletes.is_empty() {
            return Vec::new();
        }
        let keys: Vec<MgetKey> = deletes
            .iter()
            .map(|(uri, author_id)| MgetKey { key: uri.clone(), routing: Some(author_id.clone()) })
            .collect();
        let found = match self.indexer.mget::<Like>(alias::LIKES, &keys).await {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(error = %err, "mget for like tombstones failed, dropping resolution");
                return Vec::new();
            }
        };

        deletes
            .iter()
            .filter_map(|(uri, author_id)| {
                let prior = found.get(uri)?;
                self.like_aggregator.add(&prior.subject_uri, -1);
                Some(LikeTombstone {
                    uri: uri.clone(),
                    author_id: author_id.clone(),
                    subject_uri: prior.subject_uri.clone(),
                    deleted_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    indexed_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod flush_tests {
    use super::*;
    use httptest::{all_of, matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    use crate::config::EsConfig;
    use crate::routing_cache::RoutingCache;

    fn indexer_for(server: &Server) -> Arc<IndexerClient> {
        let es = EsConfig {
            url: server.url_str("").trim_end_matches('/').to_string(),
            api_key: String::new(),
            tls_skip_verify: true,
        };
        Arc::new(IndexerClient::new(&es).unwrap())
    }

    /// Spec §8 scenario: a like-delete whose prior document resolves
    /// via mget must tombstone and bulk_delete with `routing` set to
    /// the like's author_id on every outgoing write, never `None`.
    #[tokio::test]
    async fn flush_routes_like_delete_bulk_operations_by_author_id() {
        let server = Server::run();

        server.expect(
            Expectation::matching(request::method_path("POST", "/likes/_mget")).respond_with(
                json_encoded(json!({
                    "docs": [{
                        "_id": "at://did:plc:liker/app.bsky.feed.like/rkey1",
                        "found": true,
                        "_source": {
                            "_key": "at://did:plc:liker/app.bsky.feed.like/rkey1",
                            "author_id": "did:plc:liker",
                            "subject_uri": "at://did:plc:author/app.bsky.feed.post/p1",
                            "created_at": "2024-01-01T00:00:00Z",
                            "indexed_at": "2024-01-01T00:00:01Z"
                        }
                    }]
                })),
            ),
        );
        // The tombstone bulk-index write: matched loosely, routing isn't
        // asserted here since the per-tombstone document already carries
        // author_id as a field, not as the bulk action's routing.
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/_bulk"),
                request::body(matches("like_tombstones")),
            ])
            .respond_with(json_encoded(json!({ "took": 1, "errors": false, "items": [] }))),
        );
        // The live-document bulk delete: this is the request bug #1 was
        // about, so its routing is asserted directly in the matcher. If
        // the ingester ever regresses to `routing: None`, this
        // expectation stops matching and the mock server answers with an
        // unmatched-request error, which `bulk_delete` surfaces as an
        // `Err`, failing the `unwrap()` below.
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/_bulk"),
                request::body(matches(
                    r#"\{"delete":\{"_id":"at://did:plc:liker/app\.bsky\.feed\.like/rkey1","_index":"likes","routing":"did:plc:liker"\}\}"#
                )),
            ])
            .respond_with(json_encoded(json!({ "took": 1, "errors": false, "items": [] }))),
        );
        server.expect(
            Expectation::matching(request::method_path("POST", "/posts/_mget"))
                .respond_with(json_encoded(json!({ "docs": [] }))),
        );

        let indexer = indexer_for(&server);
        let cache = Arc::new(RoutingCache::new(10));
        let like_aggregator = Arc::new(LikeCountAggregator::new(indexer.clone(), cache));
        let metrics = MetricsCollector::new(0.0);
        let tmp = tempfile::tempdir().unwrap();
        let state_path = tmp.path().join("cursor.json");

        let ingester = JetstreamIngester::new(
            JetstreamConfig {
                url: "wss://jetstream.invalid/subscribe".to_string(),
                state_file: state_path.to_str().unwrap().to_string(),
            },
            CursorStore::open(state_path.to_str().unwrap()).unwrap(),
            indexer,
            like_aggregator,
            metrics,
            0,
            500,
            Duration::from_secs(1),
            false,
        );

        let mut batch = PendingBatch::new();
        batch
            .like_deletes
            .push(("at://did:plc:liker/app.bsky.feed.like/rkey1".to_string(), "did:plc:liker".to_string()));
        batch.max_time_us = 1000;

        ingester.flush(&mut batch).await.unwrap();

        // The delete's routing must have been the like's author_id, not
        // absent: assert against the raw request log httptest recorded.
        let requests = server.requests();
        let delete_request = requests
            .into_iter()
            .find(|r| String::from_utf8_lossy(r.body()).contains("\"delete\""))
            .expect("a bulk delete request was sent");
        let body = String::from_utf8_lossy(delete_request.body()).into_owned();
        assert!(body.contains("\"_index\":\"likes\""), "delete targets the likes alias: {body}");
        assert!(body.contains("\"routing\":\"did:plc:liker\""), "delete carries the author_id as routing: {body}");
    }
}
