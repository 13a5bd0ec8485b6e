//! Thin command wrapper around [`ge::ingest::jetstream::JetstreamIngester`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use ge::aggregate::LikeCountAggregator;
use ge::cli::JetstreamArgs;
use ge::config::Config;
use ge::cursor::CursorStore;
use ge::health::{self, HealthState};
use ge::indexer::IndexerClient;
use ge::ingest::jetstream::JetstreamIngester;
use ge::logging;
use ge::metrics::{spawn_exporter, MetricsCollector, StdoutExporter};
use ge::routing_cache::RoutingCache;

#[tokio::main]
async fn main() -> Result<()> {
    let args = JetstreamArgs::parse();
    let config = Config::from_env();
    logging::init(&config.git_sha, false, config.logging_enabled);

    let mut es_config = config.es.clone();
    es_config.tls_skip_verify = es_config.tls_skip_verify || args.skip_tls_verify;

    let metrics = MetricsCollector::new(config.metrics.sampling_ratio);
    let indexer = Arc::new(IndexerClient::new(&es_config)?.with_metrics(metrics.clone()));
    let cache = Arc::new(RoutingCache::new(config.post_routing_cache_size));
    let like_aggregator = Arc::new(LikeCountAggregator::new(indexer.clone(), cache));
    spawn_exporter(metrics.clone(), Arc::new(StdoutExporter), config.metrics.export_interval);

    let cursor = CursorStore::open(&config.jetstream.state_file)?;

    let health_state = HealthState::new();
    let cancel = CancellationToken::new();
    health::spawn(health_state.clone(), "0.0.0.0", (8080, 8099), cancel.clone()).await?;

    let ingester = JetstreamIngester::new(
        config.jetstream.clone(),
        cursor,
        indexer,
        like_aggregator,
        metrics,
        args.max_rewind_minutes,
        args.flush_size,
        Duration::from_secs(args.flush_interval_secs),
        args.dry_run,
    );

    health_state.set_healthy(true);

    let ingester = Arc::new(ingester);
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
