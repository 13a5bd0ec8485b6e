//! Megastream (object-storage post-bundle) ingester (spec §4.H).
//!
//! Each poll lists bundles under a prefix, selects those newer than the
//! cursor and within the rewind window, and processes them oldest
//! first. A bundle is only as good as fully flushed: any unrecoverable
//! error aborts it without advancing the cursor, so the next poll
//! retries the same bundle from scratch.

use std::io::Read;
use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::{ObjectStore, path::Path as ObjectPath};
use tokio_util::sync::CancellationToken;

use crate::aggregate::{HashtagAggregator, LikeCountAggregator};
use crate::codec::{hashtag, megastream::{self, MegaRow}};
use crate::config::MegastreamConfig;
use crate::cursor::{effective_resume, CursorStore};
use crate::error::{IngestError, IngestResult};
use crate::indexer::{DeleteItem, IndexerClient, MgetKey};
use crate::model::{alias, IngestRecord, Like, LikeTombstone, Post, PostTombstone};

const BUNDLE_PREFIX: &str = "mega_jetstream_";
const BUNDLE_SUFFIX: &str = ".db.zip";

/// Parse `mega_jetstream_YYYYMMDD_HHMMSS.db.zip` (UTC) into microseconds.
/// A filename that doesn't match the pattern is not a fatal error: it
/// is logged and the entry is skipped (spec's filename-validation note).
fn bundle_timestamp_us(filename: &str) -> Option<i64> {
    let stem = filename.strip_prefix(BUNDLE_PREFIX)?.strip_suffix(BUNDLE_SUFFIX)?;
    let (date, time) = stem.split_once('_')?;
    if date.len() != 8 || time.len() != 6 {
        return None;
    }
    let formatted = format!(
        "{}-{}-{}T{}:{}:{}Z",
        &date[0..4],
        &date[4..6],
        &date[6..8],
        &time[0..2],
        &time[2..4],
        &time[4..6]
    );
    chrono::DateTime::parse_from_rfc3339(&formatted)
        .ok()
        .map(|dt| dt.timestamp_micros())
}

struct Bundle {
    path: ObjectPath,
    timestamp_us: i64,
}

pub struct MegastreamIngester {
    config: MegastreamConfig,
    cursor: CursorStore,
    indexer: Arc<IndexerClient>,
    like_aggregator: Arc<LikeCountAggregator>,
    hashtag_aggregator: Arc<HashtagAggregator>,
    store: Arc<dyn ObjectStore>,
    max_rewind_minutes: u64,
    flush_size: usize,
    dry_run: bool,
}

struct FlushBatches {
    posts: Vec<Post>,
    post_tombstones: Vec<PostTombstone>,
    post_deletes: Vec<DeleteItem>,
    like_tombstones: Vec<LikeTombstone>,
}

impl FlushBatches {
    fn new() -> Self {
        Self {
            posts: Vec::new(),
            post_tombstones: Vec::new(),
            post_deletes: Vec::new(),
            like_tombstones: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.posts.len() + self.post_tombstones.len() + self.post_deletes.len() + self.like_tombstones.len()
    }
}

impl MegastreamIngester {
    pub fn new(
        config: MegastreamConfig,
        cursor: CursorStore,
        indexer: Arc<IndexerClient>,
        like_aggregator: Arc<LikeCountAggregator>,
        hashtag_aggregator: Arc<HashtagAggregator>,
        max_rewind_minutes: u64,
        flush_size: usize,
        dry_run: bool,
    ) -> IngestResult<Self> {
        let store = AmazonS3Builder::new()
            .with_bucket_name(&config.s3_bucket)
            .with_region(&config.aws_region)
            .with_access_key_id(&config.aws_access_key)
            .with_secret_access_key(&config.aws_secret_key)
            .build()
            .map_err(|e| IngestError::ObjectStore(e.to_string()))?;

        Ok(Self {
            config,
            cursor,
            indexer,
            like_aggregator,
            hashtag_aggregator,
            store: Arc::new(store),
            max_rewind_minutes,
            flush_size,
            dry_run,
        })
    }

    pub async fn run(&self, cancel: CancellationToken) -> IngestResult<()> {
        let now_us = chrono::Utc::now().timestamp_micros();
        self.cursor.write_instance(now_us).await?;

        let mut interval = tokio::time::interval(self.config.spool_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(()) => {}
                        Err(err @ IngestError::Auth(_)) => {
                            tracing::error!(error = %err, "megastream authentication failure, exiting");
                            return Err(err);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "megastream poll failed, retrying next tick");
                        }
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> IngestResult<()> {
        let now_us = chrono::Utc::now().timestamp_micros();
        let persisted = self.cursor.load().await?.map(|c| c.last_time_us);
        let floor_us = effective_resume(persisted, now_us, self.max_rewind_minutes);

        let mut bundles = self.list_bundles(floor_us, now_us).await?;
        bundles.sort_by_key(|b| b.timestamp_us);

        for bundle in bundles {
            self.process_bundle(&bundle).await?;
        }
        Ok(())
    }

    async fn list_bundles(&self, floor_us: i64, now_us: i64) -> IngestResult<Vec<Bundle>> {
        use futures::StreamExt;

        let prefix = ObjectPath::from(self.config.s3_prefix.as_str());
        let mut stream = self.store.list(Some(&prefix));
        let mut bundles = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| IngestError::ObjectStore(e.to_string()))?;
            let filename = meta.location.filename().unwrap_or_default();
            let Some(ts) = bundle_timestamp_us(filename) else {
                tracing::warn!(filename, "bundle filename does not match expected pattern, skipping");
                continue;
            };
            if ts > floor_us && ts <= now_us {
                bundles.push(Bundle { path: meta.location, timestamp_us: ts });
            }
        }
        Ok(bundles)
    }

    async fn process_bundle(&self, bundle: &Bundle) -> IngestResult<()> {
        let bytes = self
            .store
            .get(&bundle.path)
            .await
            .map_err(|e| IngestError::ObjectStore(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| IngestError::ObjectStore(e.to_string()))?;

        let rows = Self::read_rows(&bytes)?;
        let mut batches = FlushBatches::new();

        for row in rows {
            let record = match megastream::decode(&row) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    tracing::debug!(at_uri = %row.at_uri, error = %err, "dropping unreadable megastream row");
                    continue;
                }
            };

            match record {
                IngestRecord::Post(post) => {
                    let hour_updates = hashtag::extract_updates(
                        &post.content,
                        &chrono::DateTime::parse_from_rfc3339(&post.created_at)
                            .map(|dt| dt.with_timezone(&chrono::Utc))
                            .unwrap_or_else(|_| chrono::Utc::now()),
                    );
                    self.hashtag_aggregator.add_all(hour_updates);
                    batches.posts.push(*post);
                }
                IngestRecord::PostDelete { uri, author_id, deleted_at } => {
                    batches.post_deletes.push(DeleteItem {
                        key: uri.clone(),
                        routing: Some(author_id.clone()),
                    });
                    batches.post_tombstones.push(PostTombstone {
                        uri,
                        author_id,
                        deleted_at: deleted_at.unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                        indexed_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    });
                }
                IngestRecord::AccountDeletion { author_id } => {
                    self.fan_out_account_deletion(&author_id, &mut batches).await?;
                }
                IngestRecord::AccountStatus { author_id, status } => {
                    tracing::info!(author_id, status, "account status change, no document mutation");
                }
                IngestRecord::Like(_) | IngestRecord::LikeDelete { .. } => {
                    tracing::warn!("unexpected like record from megastream decoder, ignoring");
                }
            }

            if batches.len() >= self.flush_size {
                self.flush_batches(&mut batches).await?;
            }
        }

        self.flush_batches(&mut batches).await?;
        self.hashtag_aggregator.flush().await?;
        self.like_aggregator.flush().await?;

        if !self.dry_run {
            self.cursor.update(bundle.timestamp_us).await?;
        }
        Ok(())
    }

    /// Page all posts and likes for a deleted account, emitting
    /// tombstones and like-count decrements for each (spec §4.H).
    async fn fan_out_account_deletion(&self, author_id: &str, batches: &mut FlushBatches) -> IngestResult<()> {
        use serde_json::json;

        let query = json!({ "term": { "author_id": author_id } });
        let mut page = self
            .indexer
            .scroll_open(alias::POSTS, query.clone(), Some(author_id), "1m")
            .await?;
        loop {
            for hit in &page.hits {
                batches.post_tombstones.push(PostTombstone {
                    uri: hit.id.clone(),
                    author_id: author_id.to_string(),
                    deleted_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    indexed_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                });
            }
            let Some(scroll_id) = page.scroll_id.clone() else { break };
            if page.hits.is_empty() {
                self.indexer.clear_scroll(&scroll_id).await.ok();
                break;
            }
            page = self.indexer.scroll_next(&scroll_id, "1m").await?;
        }

        let mut like_page = self
            .indexer
            .scroll_open(alias::LIKES, query, Some(author_id), "1m")
            .await?;
        loop {
            let keys: Vec<MgetKey> = like_page
                .hits
                .iter()
                .map(|h| MgetKey { key: h.id.clone(), routing: Some(author_id.to_string()) })
                .collect();
            let found = self.indexer.mget::<Like>(alias::LIKES, &keys).await.unwrap_or_default();
            for hit in &like_page.hits {
                if let Some(like) = found.get(&hit.id) {
                    self.like_aggregator.add(&like.subject_uri, -1);
                    batches.like_tombstones.push(LikeTombstone {
                        uri: hit.id.clone(),
                        author_id: author_id.to_string(),
                        subject_uri: like.subject_uri.clone(),
                        deleted_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                        indexed_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    });
                }
            }
            let Some(scroll_id) = like_page.scroll_id.clone() else { break };
            if like_page.hits.is_empty() {
                self.indexer.clear_scroll(&scroll_id).await.ok();
                break;
            }
            like_page = self.indexer.scroll_next(&scroll_id, "1m").await?;
        }

        let post_delete_items: Vec<DeleteItem> = batches
            .post_tombstones
            .iter()
            .filter(|t| t.author_id == author_id)
            .map(|t| DeleteItem { key: t.uri.clone(), routing: Some(author_id.to_string()) })
            .collect();
        if !post_delete_items.is_empty() && !self.dry_run {
            self.indexer.bulk_delete(alias::POSTS, &post_delete_items).await?;
        }

        let like_delete_items: Vec<DeleteItem> = batches
            .like_tombstones
            .iter()
            .filter(|t| t.author_id == author_id)
            .map(|t| DeleteItem { key: t.uri.clone(), routing: Some(author_id.to_string()) })
            .collect();
        if !like_delete_items.is_empty() && !self.dry_run {
            self.indexer.bulk_delete(alias::LIKES, &like_delete_items).await?;
        }
        Ok(())
    }

    async fn flush_batches(&self, batches: &mut FlushBatches) -> IngestResult<()> {
        if batches.len() == 0 {
            return Ok(());
        }
        if self.dry_run {
            tracing::info!(
                posts = batches.posts.len(),
                post_tombstones = batches.post_tombstones.len(),
                post_deletes = batches.post_deletes.len(),
                like_tombstones = batches.like_tombstones.len(),
                "dry-run: would flush bundle batch"
            );
            *batches = FlushBatches::new();
            return Ok(());
        }

        if !batches.posts.is_empty() {
            self.indexer.bulk_index(alias::POSTS, &batches.posts).await?;
        }
        if !batches.post_tombstones.is_empty() {
            self.indexer.bulk_index(alias::POST_TOMBSTONES, &batches.post_tombstones).await?;
        }
        if !batches.post_deletes.is_empty() {
            self.indexer.bulk_delete(alias::POSTS, &batches.post_deletes).await?;
        }
        if !batches.like_tombstones.is_empty() {
            self.indexer.bulk_index(alias::LIKE_TOMBSTONES, &batches.like_tombstones).await?;
        }
        *batches = FlushBatches::new();
        Ok(())
    }

    /// Reads the unzipped bundle's embedded row store. Each archive
    /// entry holds newline-delimited JSON objects shaped like
    /// `{at_uri, did, raw_post_json, inferences_json}`.
    fn read_rows(bytes: &bytes::Bytes) -> IngestResult<Vec<MegaRow>> {
        let cursor = std::io::Cursor::new(bytes.as_ref());
        let mut archive = zip::ZipArchive::new(cursor)
            .map_err(|e| IngestError::Decode(format!("failed to open bundle zip: {e}")))?;

        let mut rows = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| IngestError::Decode(format!("failed to read bundle entry: {e}")))?;
            let mut contents = String::new();
            entry
                .read_to_string(&mut contents)
                .map_err(|e| IngestError::Decode(format!("failed to decode bundle entry: {e}")))?;

            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawRow>(line) {
                    Ok(raw) => rows.push(MegaRow {
                        at_uri: raw.at_uri,
                        did: raw.did,
                        raw_post_json: raw.raw_post_json,
                        inferences_json: raw.inferences_json,
                    }),
                    Err(err) => {
                        tracing::debug!(error = %err, "skipping malformed bundle row");
                    }
                }
            }
        }
        Ok(rows)
    }
}

#[derive(serde::Deserialize)]
struct RawRow {
    at_uri: String,
    did: String,
    raw_post_json: String,
    #[serde(default)]
    inferences_json: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bundle_timestamp() {
        let ts = bundle_timestamp_us("mega_jetstream_20240101_123045.db.zip").unwrap();
        let expected = chrono::DateTime::parse_from_rfc3339("2024-01-01T12:30:45Z")
            .unwrap()
            .timestamp_micros();
        assert_eq!(ts, expected);
    }

    #[test]
    fn rejects_malformed_bundle_filename() {
        assert!(bundle_timestamp_us("not_a_bundle.zip").is_none());
        assert!(bundle_timestamp_us("mega_jetstream_bad.db.zip").is_none());
    }
}
