//! Retention job (spec §4.I): deletes documents older than a fixed
//! horizon per alias via delete-by-query. Dry-run issues a count
//! instead of a real delete, so an operator can preview the blast
//! radius before committing.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::error::IngestResult;
use crate::indexer::IndexerClient;

pub struct RetentionTarget {
    pub alias: String,
    pub date_field: String,
}

#[derive(Debug, Clone)]
pub struct RetentionReport {
    pub alias: String,
    pub deleted: u64,
    pub version_conflicts: u64,
    pub took_ms: u64,
}

pub struct RetentionJob {
    indexer: Arc<IndexerClient>,
    timeout: Duration,
}

impl RetentionJob {
    pub fn new(indexer: Arc<IndexerClient>, timeout: Duration) -> Self {
        Self { indexer, timeout }
    }

    pub async fn run(
        &self,
        targets: &[RetentionTarget],
        retention_hours: i64,
        dry_run: bool,
    ) -> IngestResult<Vec<RetentionReport>> {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(retention_hours);
        let cutoff_str = cutoff.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let timeout_str = format!("{}s", self.timeout.as_secs());

        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            let query = json!({
                "range": { target.date_field.as_str(): { "lt": cutoff_str } }
            });
            let outcome = self
                .indexer
                .delete_by_query(&target.alias, query, &timeout_str, dry_run)
                .await?;
            tracing::info!(
                alias = target.alias,
                deleted = outcome.deleted,
                conflicts = outcome.version_conflicts,
                dry_run,
                "retention pass complete"
            );
            reports.push(RetentionReport {
                alias: target.alias.clone(),
                deleted: outcome.deleted,
                version_conflicts: outcome.version_conflicts,
                took_ms: outcome.took_ms,
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EsConfig;

    #[tokio::test]
    async fn dry_run_uses_count_not_delete() {
        let es = EsConfig {
            url: "https://localhost:9200".to_string(),
            api_key: String::new(),
            tls_skip_verify: true,
        };
        let indexer = Arc::new(IndexerClient::new(&es).unwrap());
        let job = RetentionJob::new(indexer, Duration::from_secs(300));
        let targets = vec![RetentionTarget {
            alias: "posts".to_string(),
            date_field: "created_at".to_string(),
        }];
        // No live document store in unit tests; this only exercises
        // argument plumbing, so a connection failure is expected here
        // and not asserted on.
        let _ = job.run(&targets, 24, true).await;
    }
}
