//! Thin command wrapper around [`ge::jobs::extract::ExtractJob`].

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use ge::cli::ExtractArgs;
use ge::config::Config;
use ge::cursor::CursorStore;
use ge::indexer::IndexerClient;
use ge::jobs::extract::ExtractJob;
use ge::logging;
use ge::metrics::{spawn_exporter, MetricsCollector, StdoutExporter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ExtractArgs::parse();
    let config = Config::from_env();
    logging::init(&config.git_sha, false, config.logging_enabled);

    let metrics = MetricsCollector::new(config.metrics.sampling_ratio);
    spawn_exporter(metrics.clone(), Arc::new(StdoutExporter), config.metrics.export_interval);
    let indexer = Arc::new(IndexerClient::new(&config.es)?.with_metrics(metrics));
    let job = ExtractJob::new(indexer, config.extract.clone())?;

    for index in &config.extract.indices {
        let state_path = format!("./state/extract_{index}_state.json");
        let cursor = CursorStore::open(&state_path)?;
        let report = job.run_window(index, &cursor, args.window_size_min).await?;
        println!(
            "{}: rows_written={} artifacts_written={}",
            report.index, report.rows_written, report.artifacts_written
        );
    }
    Ok(())
}
