//! Thin command wrapper around [`ge::ingest::megastream::MegastreamIngester`].

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use ge::aggregate::{HashtagAggregator, LikeCountAggregator};
use ge::cli::MegastreamArgs;
use ge::config::Config;
use ge::cursor::CursorStore;
use ge::health::{self, HealthState};
use ge::indexer::IndexerClient;
use ge::ingest::megastream::MegastreamIngester;
use ge::logging;
use ge::metrics::{spawn_exporter, MetricsCollector, StdoutExporter};
use ge::routing_cache::RoutingCache;

#[tokio::main]
async fn main() -> Result<()> {
    let args = MegastreamArgs::parse();
    let config = Config::from_env();
    logging::init(&config.git_sha, false, config.logging_enabled);

    let metrics = MetricsCollector::new(config.metrics.sampling_ratio);
    let indexer = Arc::new(IndexerClient::new(&config.es)?.with_metrics(metrics.clone()));
    let cache = Arc::new(RoutingCache::new(config.post_routing_cache_size));
    let like_aggregator = Arc::new(LikeCountAggregator::new(indexer.clone(), cache));
    let hashtag_aggregator = Arc::new(HashtagAggregator::new(indexer.clone()));
    spawn_exporter(metrics, Arc::new(StdoutExporter), config.metrics.export_interval);

    let cursor = CursorStore::open(&config.megastream.state_file)?;

    let health_state = HealthState::new();
    let cancel = CancellationToken::new();
    health::spawn(health_state.clone(), "0.0.0.0", (8080, 8099), cancel.clone()).await?;

    let ingester = Arc::new(MegastreamIngester::new(
        config.megastream.clone(),
        cursor,
        indexer,
        like_aggregator,
        hashtag_aggregator,
        args.max_rewind_minutes,
        args.flush_size,
        args.dry_run,
    )?);

    health_state.set_healthy(true);

    let run_handle = {
        let ingester = ingester.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ingester.run(cancel).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining");
    cancel.cancel();
    run_handle.await??;
    Ok(())
}
