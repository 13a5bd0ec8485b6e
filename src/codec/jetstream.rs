//! Jetstream (WebSocket like-firehose) event decoding (spec §4.C).

use serde::Deserialize;

use super::timestamp::normalize;
use crate::model::{IngestRecord, Like};

#[derive(Debug, Deserialize)]
struct RawEvent {
    did: String,
    time_us: i64,
    kind: String,
    commit: Option<RawCommit>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    operation: String,
    collection: String,
    rkey: String,
    record: Option<serde_json::Value>,
}

const LIKE_COLLECTION: &str = "app.bsky.feed.like";

/// Decoded jetstream frame, paired with the event's raw `time_us` so
/// the ingester can drive the cursor even when the record is `None`
/// (e.g. a non-like collection, still advances progress).
pub struct DecodedEvent {
    pub time_us: i64,
    pub record: Option<IngestRecord>,
}

/// Decode one jetstream frame. Returns `Ok(None)` for frames this
/// system ignores outright (malformed top-level JSON); otherwise
/// returns the event's `time_us` with an optional record.
pub fn decode(frame: &str) -> Option<DecodedEvent> {
    let event: RawEvent = match serde_json::from_str(frame) {
        Ok(e) => e,
        Err(err) => {
            tracing::debug!(error = %err, "failed to decode jetstream frame");
            return None;
        }
    };

    if event.kind != "commit" {
        return Some(DecodedEvent { time_us: event.time_us, record: None });
    }

    let Some(commit) = event.commit else {
        return Some(DecodedEvent { time_us: event.time_us, record: None });
    };

    if commit.collection != LIKE_COLLECTION {
        return Some(DecodedEvent { time_us: event.time_us, record: None });
    }

    let uri = format!("at://{}/{}/{}", event.did, commit.collection, commit.rkey);

    let record = match commit.operation.as_str() {
        "create" => {
            let Some(record_json) = commit.record else {
                return Some(DecodedEvent { time_us: event.time_us, record: None });
            };
            let subject_uri = record_json
                .get("subject")
                .and_then(|s| s.get("uri"))
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_string();
            let Some(created_at_raw) = record_json.get("createdAt").and_then(|c| c.as_str())
            else {
                tracing::debug!(uri, "like create missing createdAt, dropping");
                return Some(DecodedEvent { time_us: event.time_us, record: None });
            };
            let created_at = normalize(created_at_raw);
            if created_at.is_empty() {
                return Some(DecodedEvent { time_us: event.time_us, record: None });
            }
            Some(IngestRecord::Like(Box::new(Like {
                uri,
                author_id: event.did,
                subject_uri,
                created_at,
                indexed_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            })))
        }
        "delete" => Some(IngestRecord::LikeDelete {
            uri,
            author_id: event.did,
        }),
        _ => None,
    };

    Some(DecodedEvent { time_us: event.time_us, record })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_like_create() {
        let frame = r#"{
            "did": "did:plc:abc",
            "time_us": 1000,
            "kind": "commit",
            "commit": {
                "operation": "create",
                "collection": "app.bsky.feed.like",
                "rkey": "xyz",
                "record": {"subject": {"uri": "at://post-X"}, "createdAt": "2024-01-01T00:00:00Z"},
                "cid": "c1"
            }
        }"#;
        let decoded = decode(frame).unwrap();
        assert_eq!(decoded.time_us, 1000);
        match decoded.record.unwrap() {
            IngestRecord::Like(like) => {
                assert_eq!(like.uri, "at://did:plc:abc/app.bsky.feed.like/xyz");
                assert_eq!(like.subject_uri, "at://post-X");
                assert_eq!(like.author_id, "did:plc:abc");
            }
            _ => panic!("expected Like"),
        }
    }

    #[test]
    fn decodes_like_delete_without_subject() {
        let frame = r#"{
            "did": "did:plc:abc",
            "time_us": 2000,
            "kind": "commit",
            "commit": {
                "operation": "delete",
                "collection": "app.bsky.feed.like",
                "rkey": "xyz",
                "cid": "c1"
            }
        }"#;
        let decoded = decode(frame).unwrap();
        match decoded.record.unwrap() {
            IngestRecord::LikeDelete { uri, author_id } => {
                assert_eq!(uri, "at://did:plc:abc/app.bsky.feed.like/xyz");
                assert_eq!(author_id, "did:plc:abc");
            }
            _ => panic!("expected LikeDelete"),
        }
    }

    #[test]
    fn ignores_non_like_collection() {
        let frame = r#"{
            "did": "did:plc:abc",
            "time_us": 3000,
            "kind": "commit",
            "commit": {
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "xyz",
                "record": {},
                "cid": "c1"
            }
        }"#;
        let decoded = decode(frame).unwrap();
        assert!(decoded.record.is_none());
        assert_eq!(decoded.time_us, 3000);
    }

    #[test]
    fn drops_create_missing_created_at() {
        let frame = r#"{
            "did": "did:plc:abc",
            "time_us": 4000,
            "kind": "commit",
            "commit": {
                "operation": "create",
                "collection": "app.bsky.feed.like",
                "rkey": "xyz",
                "record": {"subject": {"uri": "at://post-X"}},
                "cid": "c1"
            }
        }"#;
        let decoded = decode(frame).unwrap();
        assert!(decoded.record.is_none());
    }

    #[test]
    fn ignores_non_commit_kind() {
        let frame = r#"{"did": "did:plc:abc", "time_us": 5000, "kind": "identity"}"#;
        let decoded = decode(frame).unwrap();
        assert!(decoded.record.is_none());
        assert_eq!(decoded.time_us, 5000);
    }

    #[test]
    fn malformed_json_is_dropped() {
        assert!(decode("not json").is_none());
    }
}
