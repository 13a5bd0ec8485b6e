//! Exercises `IndexerClient` against a fake document-store HTTP server,
//! covering the bulk-index happy path, 404-tolerant scripted updates,
//! and retention's delete-by-query.

use httptest::{matchers::*, responders::*, Expectation, Server};
use serde_json::json;

use ge::config::EsConfig;
use ge::indexer::{IndexerClient, ScriptUpdate};
use ge::model::{HashtagBucket, Keyed};

fn es_config_for(server: &Server) -> EsConfig {
    EsConfig {
        url: server.url_str("").trim_end_matches('/').to_string(),
        api_key: "test-key".to_string(),
        tls_skip_verify: true,
    }
}

struct SimpleDoc {
    id: String,
}

impl Keyed for SimpleDoc {
    fn key(&self) -> &str {
        &self.id
    }
    fn routing(&self) -> Option<&str> {
        None
    }
}

impl serde::Serialize for SimpleDoc {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        json!({ "id": self.id }).serialize(s)
    }
}

#[tokio::test]
async fn bulk_index_reports_no_failures_on_clean_response() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/_bulk")).respond_with(
            json_encoded(json!({ "took": 7, "errors": false, "items": [{"index": {"status": 201}}] })),
        ),
    );

    let indexer = IndexerClient::new(&es_config_for(&server)).unwrap();
    let docs = vec![SimpleDoc { id: "at://post1".to_string() }];
    let outcome = indexer.bulk_index("posts", &docs).await.unwrap();

    assert_eq!(outcome.attempted, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.took_ms, 7);
}

#[tokio::test]
async fn bulk_index_drops_docs_with_empty_key_without_sending_them() {
    let server = Server::run();
    // No expectation registered: if a request were sent, the test would
    // fail with "no matching expectation".
    let indexer = IndexerClient::new(&es_config_for(&server)).unwrap();
    let docs = vec![SimpleDoc { id: String::new() }];
    let outcome = indexer.bulk_index("posts", &docs).await.unwrap();
    assert_eq!(outcome.attempted, 0);
}

#[tokio::test]
async fn bulk_update_script_tolerates_404_on_missing_post() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/_bulk")).respond_with(json_encoded(json!({
            "took": 3,
            "errors": true,
            "items": [{"update": {"status": 404, "error": {"type": "document_missing_exception"}}}]
        }))),
    );

    let indexer = IndexerClient::new(&es_config_for(&server)).unwrap();
    let items = vec![ScriptUpdate {
        key: "at://post-missing".to_string(),
        routing: Some("did:plc:abc".to_string()),
        script_source: "ctx._source.like_count += params.increment".to_string(),
        params: json!({ "increment": 1 }),
        upsert: None,
        scripted_upsert: false,
    }];
    let outcome = indexer.bulk_update_script("posts", &items).await.unwrap();
    assert_eq!(outcome.failed, 0, "404 on a like-count target is benign, not a failure");
}

#[tokio::test]
async fn hashtag_upsert_doc_id_matches_tag_and_hour() {
    assert_eq!(
        HashtagBucket::doc_id("rust", "2024-01-01T00:00:00Z"),
        "rust_2024-01-01T00:00:00Z"
    );
}

#[tokio::test]
async fn delete_by_query_dry_run_issues_count_not_delete() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/posts/_count"))
            .respond_with(json_encoded(json!({ "count": 42 }))),
    );

    let indexer = IndexerClient::new(&es_config_for(&server)).unwrap();
    let outcome = indexer
        .delete_by_query("posts", json!({ "match_all": {} }), "5m", true)
        .await
        .unwrap();
    assert_eq!(outcome.deleted, 42);
}

#[tokio::test]
async fn delete_by_query_live_run_hits_delete_by_query_endpoint() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/posts/_delete_by_query"))
            .respond_with(json_encoded(json!({ "deleted": 10, "version_conflicts": 1, "took": 120 }))),
    );

    let indexer = IndexerClient::new(&es_config_for(&server)).unwrap();
    let outcome = indexer
        .delete_by_query("posts", json!({ "match_all": {} }), "5m", false)
        .await
        .unwrap();
    assert_eq!(outcome.deleted, 10);
    assert_eq!(outcome.version_conflicts, 1);
}
