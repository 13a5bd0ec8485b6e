//! Thin command wrapper around [`ge::jobs::retention::RetentionJob`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use ge::cli::ExpiryArgs;
use ge::config::Config;
use ge::indexer::IndexerClient;
use ge::jobs::retention::{RetentionJob, RetentionTarget};
use ge::logging;
use ge::metrics::{spawn_exporter, MetricsCollector, StdoutExporter};
use ge::model::alias;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ExpiryArgs::parse();
    let config = Config::from_env();
    logging::init(&config.git_sha, false, config.logging_enabled);

    let metrics = MetricsCollector::new(config.metrics.sampling_ratio);
    spawn_exporter(metrics.clone(), Arc::new(StdoutExporter), config.metrics.export_interval);
    let indexer = Arc::new(IndexerClient::new(&config.es)?.with_metrics(metrics));
    let job = RetentionJob::new(indexer, Duration::from_secs(300));

    let posts_likes = vec![
        RetentionTarget { alias: alias::POSTS.to_string(), date_field: "created_at".to_string() },
        RetentionTarget { alias: alias::LIKES.to_string(), date_field: "created_at".to_string() },
        RetentionTarget { alias: alias::POST_TOMBSTONES.to_string(), date_field: "deleted_at".to_string() },
        RetentionTarget { alias: alias::LIKE_TOMBSTONES.to_string(), date_field: "deleted_at".to_string() },
    ];
    let hashtags = vec![RetentionTarget { alias: alias::HASHTAGS.to_string(), date_field: "hour".to_string() }];

    let mut reports = job.run(&posts_likes, args.retention_hours, args.dry_run).await?;
    reports.extend(job.run(&hashtags, args.hashtag_retention_hours, args.dry_run).await?);

    for report in &reports {
        println!(
            "{}: deleted={} conflicts={} took_ms={}",
            report.alias, report.deleted, report.version_conflicts, report.took_ms
        );
    }
    Ok(())
}
