//! Cursor Store (component B, spec §4.B).
//!
//! Persists `{last_time_us, updated_at}` plus a `{started_at}` instance
//! marker, on local filesystem or an object-storage URL. Missing or
//! empty files are not errors: they mean "no cursor yet," and the
//! caller seeds from `now`. All writes are full-object overwrites
//! (spec §9 "object-storage cursor writes").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub last_time_us: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub started_at: i64,
}

/// Minimal byte-oriented object storage abstraction. Backed by
/// `object_store::ObjectStore` for everything except "does this exist,"
/// which we model as "get returns Ok(None)" rather than threading the
/// crate's `NotFound` error type through every caller.
#[async_trait::async_trait]
trait RawStore: Send + Sync {
    async fn get(&self, path: &str) -> IngestResult<Option<Vec<u8>>>;
    async fn put(&self, path: &str, bytes: Vec<u8>) -> IngestResult<()>;
}

struct LocalStore {
    root: PathBuf,
}

#[async_trait::async_trait]
impl RawStore for LocalStore {
    async fn get(&self, path: &str) -> IngestResult<Option<Vec<u8>>> {
        let full = self.root.join(path);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IngestError::Io(e)),
        }
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> IngestResult<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Full-object overwrite via a temp file + rename keeps readers
        // from observing a truncated file mid-write.
        let tmp = full.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &full).await?;
        Ok(())
    }
}

struct ObjectStoreBackedStore {
    store: Arc<dyn object_store::ObjectStore>,
}

#[async_trait::async_trait]
impl RawStore for ObjectStoreBackedStore {
    async fn get(&self, path: &str) -> IngestResult<Option<Vec<u8>>> {
        let path = object_store::path::Path::from(path);
        match self.store.get(&path).await {
            Ok(result) => {
                let bytes = result
                    .bytes()
                    .await
                    .map_err(|e| IngestError::ObjectStore(e.to_string()))?;
                Ok(Some(bytes.to_vec()))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(IngestError::ObjectStore(e.to_string())),
        }
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> IngestResult<()> {
        let path = object_store::path::Path::from(path);
        self.store
            .put(&path, bytes::Bytes::from(bytes).into())
            .await
            .map_err(|e| IngestError::ObjectStore(e.to_string()))?;
        Ok(())
    }
}

/// Derive the sibling instance-marker path from a `_state.json` cursor
/// path, per spec §4.B.
fn instance_path_for(state_path: &str) -> String {
    if let Some(stripped) = state_path.strip_suffix("_state.json") {
        format!("{stripped}_instance.json")
    } else {
        format!("{state_path}.instance")
    }
}

pub struct CursorStore {
    store: Arc<dyn RawStore>,
    state_path: String,
    instance_path: String,
    write_lock: RwLock<()>,
}

impl CursorStore {
    /// Open a cursor store rooted at `url`: a plain filesystem path, or
    /// `gs://bucket/object` for object storage (spec §6).
    pub fn open(url: &str) -> IngestResult<Self> {
        let (store, state_path): (Arc<dyn RawStore>, String) = if let Some(rest) =
            url.strip_prefix("gs://")
        {
            let mut parts = rest.splitn(2, '/');
            let bucket = parts.next().unwrap_or_default();
            let object = parts.next().unwrap_or_default();
            let gcs = object_store::gcp::GoogleCloudStorageBuilder::new()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| IngestError::ObjectStore(e.to_string()))?;
            (
                Arc::new(ObjectStoreBackedStore {
                    store: Arc::new(gcs),
                }),
                object.to_string(),
            )
        } else {
            let path = PathBuf::from(url);
            let (root, file) = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => (
                    parent.to_path_buf(),
                    path.file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                ),
                _ => (PathBuf::from("."), url.to_string()),
            };
            (Arc::new(LocalStore { root }), file)
        };

        let instance_path = instance_path_for(&state_path);

        Ok(Self {
            store,
            state_path,
            instance_path,
            write_lock: RwLock::new(()),
        })
    }

    /// Returns `None` when no cursor has been persisted yet, or the
    /// file is empty.
    pub async fn load(&self) -> IngestResult<Option<Cursor>> {
        let _guard = self.write_lock.read().await;
        match self.store.get(&self.state_path).await? {
            Some(bytes) if !bytes.is_empty() => {
                let cursor: Cursor = serde_json::from_slice(&bytes)?;
                Ok(Some(cursor))
            }
            _ => Ok(None),
        }
    }

    pub async fn update(&self, last_time_us: i64) -> IngestResult<()> {
        let _guard = self.write_lock.write().await;
        let cursor = Cursor {
            last_time_us,
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&cursor)?;
        self.store.put(&self.state_path, bytes).await
    }

    pub async fn write_instance(&self, started_at: i64) -> IngestResult<()> {
        let instance = Instance { started_at };
        let bytes = serde_json::to_vec(&instance)?;
        self.store.put(&self.instance_path, bytes).await
    }

    pub async fn read_instance(&self) -> IngestResult<Option<Instance>> {
        match self.store.get(&self.instance_path).await? {
            Some(bytes) if !bytes.is_empty() => Ok(Some(serde_json::from_slice(&bytes)?)),
            _ => Ok(None),
        }
    }
}

/// Compute the effective resume point: `max(persisted, now - max_rewind)`,
/// with `max_rewind_minutes == 0` meaning unlimited (spec §4.G, §8).
pub fn effective_resume(persisted: Option<i64>, now_us: i64, max_rewind_minutes: u64) -> i64 {
    let persisted = persisted.unwrap_or(now_us);
    if max_rewind_minutes == 0 {
        return persisted;
    }
    let floor = now_us - (max_rewind_minutes as i64) * 60 * 1_000_000;
    persisted.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_path_replaces_state_suffix() {
        assert_eq!(
            instance_path_for("jetstream_state.json"),
            "jetstream_instance.json"
        );
    }

    #[test]
    fn resume_uses_persisted_when_unlimited_rewind() {
        assert_eq!(effective_resume(Some(100), 1_000_000, 0), 100);
    }

    #[test]
    fn resume_caps_backward_jump() {
        let now_us = 10 * 60 * 1_000_000; // 10 minutes, in microseconds
        let persisted = Some(0i64);
        // max_rewind=1 minute: floor = now - 60s
        let resumed = effective_resume(persisted, now_us, 1);
        assert_eq!(resumed, now_us - 60_000_000);
    }

    #[test]
    fn resume_with_no_persisted_cursor_uses_now() {
        assert_eq!(effective_resume(None, 42, 0), 42);
    }

    #[tokio::test]
    async fn missing_cursor_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jetstream_state.json");
        let store = CursorStore::open(path.to_str().unwrap()).unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jetstream_state.json");
        let store = CursorStore::open(path.to_str().unwrap()).unwrap();
        store.update(12345).await.unwrap();
        let cursor = store.load().await.unwrap().unwrap();
        assert_eq!(cursor.last_time_us, 12345);
    }

    #[tokio::test]
    async fn instance_marker_round_trips_at_sibling_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jetstream_state.json");
        let store = CursorStore::open(path.to_str().unwrap()).unwrap();
        store.write_instance(999).await.unwrap();
        let instance = store.read_instance().await.unwrap().unwrap();
        assert_eq!(instance.started_at, 999);
        assert!(dir.path().join("jetstream_instance.json").exists());
    }
}
