//! Megastream (file-spooled post bundle) record decoding (spec §4.C).
//!
//! Each row in a source bundle carries `(at_uri, did, raw_post_json,
//! inferences_json)`. The raw post JSON's `message` field determines
//! the record kind; embeddings (if any) live in `inferences_json`
//! under model-specific keys and are decoded through the embedding
//! codec before being attached to the canonical `Post`.

use serde::Deserialize;
use std::collections::HashMap;

use super::embedding;
use super::timestamp::normalize;
use crate::error::IngestResult;
use crate::model::{IngestRecord, MediaItem, MediaType, Post};

/// One row read from an opened megastream bundle.
#[derive(Debug, Clone)]
pub struct MegaRow {
    pub at_uri: String,
    pub did: String,
    pub raw_post_json: String,
    pub inferences_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    message: RawMessage,
    #[serde(default)]
    hydrated_metadata: HydratedMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "lowercase")]
enum RawMessage {
    Account { account: RawAccount },
    Commit { commit: RawCommit },
    Identity,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    active: bool,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    operation: String,
    #[serde(default)]
    record: Option<RawRecord>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "createdAt")]
    created_at: Option<String>,
    #[serde(default)]
    embed: Option<RawEmbed>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEmbed {
    #[serde(default)]
    media: Vec<RawMediaItem>,
}

#[derive(Debug, Deserialize)]
struct RawMediaItem {
    id: String,
    #[serde(rename = "mediaType")]
    media_type: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
    size: u64,
    #[serde(default, rename = "aspectRatio")]
    aspect_ratio: Option<f64>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct HydratedMetadata {
    #[serde(default)]
    thread_root_uri: Option<String>,
    #[serde(default)]
    thread_parent_uri: Option<String>,
    #[serde(default)]
    quoted_post_uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Inferences {
    #[serde(default)]
    text_embeddings: HashMap<String, String>,
}

/// Source model key -> canonical storage key (spec §3, §4.C).
const MODEL_KEY_MAP: &[(&str, &str)] = &[
    ("all-MiniLM-L6-v2", "all_MiniLM_L6_v2"),
    ("all-MiniLM-L12-v2", "all_MiniLM_L12_v2"),
];

fn decode_embeddings(inferences_json: &str) -> HashMap<String, Vec<f32>> {
    let inferences: Inferences = match serde_json::from_str(inferences_json) {
        Ok(v) => v,
        Err(err) => {
            tracing::debug!(error = %err, "failed to parse inferences JSON");
            return HashMap::new();
        }
    };

    let mut embeddings = HashMap::new();
    for (source_key, canonical_key) in MODEL_KEY_MAP {
        if let Some(encoded) = inferences.text_embeddings.get(*source_key) {
            match embedding::decode(encoded) {
                Ok(vector) => {
                    embeddings.insert((*canonical_key).to_string(), vector);
                }
                Err(err) => {
                    tracing::warn!(model = source_key, error = %err, "failed to decode embedding");
                }
            }
        }
    }
    embeddings
}

fn media_type_from_str(s: &str) -> Option<MediaType> {
    match s {
        "image" => Some(MediaType::Image),
        "video" => Some(MediaType::Video),
        _ => None,
    }
}

/// Decode one megastream row into zero-or-one ingest records. Returns
/// `Ok(None)` for rows this system treats as no-ops (identity frames,
/// unrecognized message kinds, active accounts) without ever treating
/// a decode shortfall as fatal to the batch (spec §7).
pub fn decode(row: &MegaRow) -> IngestResult<Option<IngestRecord>> {
    let raw: RawPost = match serde_json::from_str(&row.raw_post_json) {
        Ok(v) => v,
        Err(err) => {
            tracing::debug!(at_uri = %row.at_uri, error = %err, "failed to decode megastream row");
            return Ok(None);
        }
    };

    match raw.message {
        RawMessage::Account { account } => {
            if account.active {
                return Ok(None);
            }
            let status = account.status.unwrap_or_else(|| "deactivated".to_string());
            if status == "deleted" {
                Ok(Some(IngestRecord::AccountDeletion {
                    author_id: row.did.clone(),
                }))
            } else {
                Ok(Some(IngestRecord::AccountStatus {
                    author_id: row.did.clone(),
                    status,
                }))
            }
        }
        RawMessage::Commit { commit } => match commit.operation.as_str() {
            "delete" => Ok(Some(IngestRecord::PostDelete {
                uri: row.at_uri.clone(),
                author_id: row.did.clone(),
                deleted_at: None,
            })),
            "create" => {
                let Some(record) = commit.record else {
                    return Ok(None);
                };
                let (Some(text), Some(created_at_raw)) = (record.text, record.created_at) else {
                    tracing::debug!(at_uri = %row.at_uri, "post create missing text/createdAt");
                    return Ok(None);
                };
                let created_at = normalize(&created_at_raw);
                if created_at.is_empty() {
                    return Ok(None);
                }

                let embeddings = row
                    .inferences_json
                    .as_deref()
                    .map(decode_embeddings)
                    .unwrap_or_default();

                let media = record
                    .embed
                    .map(|e| {
                        e.media
                            .into_iter()
                            .filter_map(|m| {
                                Some(MediaItem {
                                    media_type: media_type_from_str(&m.media_type)?,
                                    id: m.id,
                                    mime_type: m.mime_type,
                                    size: m.size,
                                    aspect_ratio: m.aspect_ratio,
                                    width: m.width,
                                    height: m.height,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                Ok(Some(IngestRecord::Post(Box::new(Post {
                    uri: row.at_uri.clone(),
                    author_id: row.did.clone(),
                    content: text,
                    created_at,
                    thread_root_uri: raw.hydrated_metadata.thread_root_uri,
                    thread_parent_uri: raw.hydrated_metadata.thread_parent_uri,
                    quoted_post_uri: raw.hydrated_metadata.quoted_post_uri,
                    embeddings,
                    indexed_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    like_count: 0,
                    media,
                }))))
            }
            _ => Ok(None),
        },
        RawMessage::Identity | RawMessage::Unknown => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(raw_post_json: &str, inferences_json: Option<&str>) -> MegaRow {
        MegaRow {
            at_uri: "at://did:plc:x/app.bsky.feed.post/1".to_string(),
            did: "did:plc:x".to_string(),
            raw_post_json: raw_post_json.to_string(),
            inferences_json: inferences_json.map(|s| s.to_string()),
        }
    }

    #[test]
    fn decodes_post_create() {
        let r = row(
            r#"{"message": {"kind": "commit", "commit": {"operation": "create", "record": {"text": "hello #rust", "createdAt": "2024-01-01T00:00:00Z"}}}}"#,
            None,
        );
        match decode(&r).unwrap().unwrap() {
            IngestRecord::Post(post) => {
                assert_eq!(post.content, "hello #rust");
                assert_eq!(post.created_at, "2024-01-01T00:00:00Z");
            }
            _ => panic!("expected Post"),
        }
    }

    #[test]
    fn decodes_post_delete() {
        let r = row(
            r#"{"message": {"kind": "commit", "commit": {"operation": "delete"}}}"#,
            None,
        );
        match decode(&r).unwrap().unwrap() {
            IngestRecord::PostDelete { uri, .. } => assert_eq!(uri, r.at_uri),
            _ => panic!("expected PostDelete"),
        }
    }

    #[test]
    fn decodes_account_deletion() {
        let r = row(
            r#"{"message": {"kind": "account", "account": {"active": false, "status": "deleted"}}}"#,
            None,
        );
        match decode(&r).unwrap().unwrap() {
            IngestRecord::AccountDeletion { author_id } => assert_eq!(author_id, "did:plc:x"),
            _ => panic!("expected AccountDeletion"),
        }
    }

    #[test]
    fn decodes_account_deactivation_as_status_only() {
        let r = row(
            r#"{"message": {"kind": "account", "account": {"active": false, "status": "deactivated"}}}"#,
            None,
        );
        match decode(&r).unwrap().unwrap() {
            IngestRecord::AccountStatus { status, .. } => assert_eq!(status, "deactivated"),
            _ => panic!("expected AccountStatus"),
        }
    }

    #[test]
    fn active_account_is_a_no_op() {
        let r = row(
            r#"{"message": {"kind": "account", "account": {"active": true}}}"#,
            None,
        );
        assert!(decode(&r).unwrap().is_none());
    }

    #[test]
    fn identity_frame_is_a_no_op() {
        let r = row(r#"{"message": {"kind": "identity"}}"#, None);
        assert!(decode(&r).unwrap().is_none());
    }

    #[test]
    fn decodes_embeddings_under_canonical_keys() {
        let encoded = embedding::encode(&[1.0, 2.0, 3.0]).unwrap();
        let inferences = format!(
            r#"{{"text_embeddings": {{"all-MiniLM-L6-v2": "{encoded}"}}}}"#
        );
        let r = row(
            r#"{"message": {"kind": "commit", "commit": {"operation": "create", "record": {"text": "hi", "createdAt": "2024-01-01T00:00:00Z"}}}}"#,
            Some(&inferences),
        );
        match decode(&r).unwrap().unwrap() {
            IngestRecord::Post(post) => {
                let vector = post.embeddings.get("all_MiniLM_L6_v2").unwrap();
                assert_eq!(vector, &vec![1.0, 2.0, 3.0]);
            }
            _ => panic!("expected Post"),
        }
    }

    #[test]
    fn malformed_row_is_dropped_not_fatal() {
        let r = row("not json", None);
        assert!(decode(&r).unwrap().is_none());
    }
}
