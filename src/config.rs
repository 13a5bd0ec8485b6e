//! Environment-variable configuration (spec §6), `GE_`-prefixed.
//!
//! Loaded once into a `Config` with sub-structs per concern, the way the
//! teacher's `Config::from_env()` builds `Features`/`Augmentation`/
//! `LoggingConfig` sub-structs — simplified here to env-over-defaults
//! only, since this system has no config file.

use std::time::Duration;

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("GE_{name}")).ok()
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env_var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// Document-store (indexing service) connection settings.
#[derive(Debug, Clone)]
pub struct EsConfig {
    pub url: String,
    pub api_key: String,
    pub tls_skip_verify: bool,
}

impl EsConfig {
    fn from_env() -> Self {
        Self {
            url: env_var("ELASTICSEARCH_URL")
                .unwrap_or_else(|| "https://localhost:9200".to_string()),
            api_key: env_var("ELASTICSEARCH_API_KEY").unwrap_or_default(),
            tls_skip_verify: env_bool("ELASTICSEARCH_TLS_SKIP_VERIFY", false),
        }
    }
}

/// Jetstream (WebSocket like-firehose) ingester settings.
#[derive(Debug, Clone)]
pub struct JetstreamConfig {
    pub url: String,
    pub state_file: String,
}

impl JetstreamConfig {
    fn from_env() -> Self {
        Self {
            url: env_var("JETSTREAM_URL")
                .unwrap_or_else(|| "wss://jetstream.example.invalid/subscribe".to_string()),
            state_file: env_var("JETSTREAM_STATE_FILE")
                .unwrap_or_else(|| "./state/jetstream_state.json".to_string()),
        }
    }
}

/// Megastream (file-spooling post bundle) ingester settings.
#[derive(Debug, Clone)]
pub struct MegastreamConfig {
    pub state_file: String,
    pub spool_interval: Duration,
    pub s3_bucket: String,
    pub s3_prefix: String,
    pub aws_region: String,
    pub aws_access_key: String,
    pub aws_secret_key: String,
}

impl MegastreamConfig {
    fn from_env() -> Self {
        Self {
            state_file: env_var("MEGASTREAM_STATE_FILE")
                .unwrap_or_else(|| "./state/megastream_state.json".to_string()),
            spool_interval: Duration::from_secs(env_parse("SPOOL_INTERVAL_SEC", 60)),
            s3_bucket: env_var("AWS_S3_BUCKET").unwrap_or_default(),
            s3_prefix: env_var("AWS_S3_PREFIX").unwrap_or_default(),
            aws_region: env_var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            aws_access_key: env_var("AWS_S3_ACCESS_KEY").unwrap_or_default(),
            aws_secret_key: env_var("AWS_S3_SECRET_KEY").unwrap_or_default(),
        }
    }
}

/// Metrics export settings (spec §4.A).
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub sampling_ratio: f64,
    pub export_interval: Duration,
    pub export_endpoint: Option<String>,
}

impl MetricsConfig {
    fn from_env() -> Self {
        Self {
            sampling_ratio: env_parse("METRIC_SAMPLING_RATIO", 0.0),
            export_interval: Duration::from_secs(env_parse("METRIC_EXPORT_INTERVAL_SEC", 60)),
            export_endpoint: env_var("METRIC_EXPORT_ENDPOINT"),
        }
    }
}

/// Extract job settings (spec §4.J).
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub fetch_size: usize,
    pub indices: Vec<String>,
    pub destination: String,
    pub max_records: usize,
}

impl ExtractConfig {
    fn from_env() -> Self {
        Self {
            fetch_size: env_parse("EXTRACT_FETCH_SIZE", 1000),
            indices: env_var("EXTRACT_INDICES")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| vec!["posts".to_string(), "likes".to_string()]),
            destination: env_var("PARQUET_DESTINATION").unwrap_or_else(|| "./extract".to_string()),
            max_records: env_parse("PARQUET_MAX_RECORDS", 1_000_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub es: EsConfig,
    pub jetstream: JetstreamConfig,
    pub megastream: MegastreamConfig,
    pub metrics: MetricsConfig,
    pub extract: ExtractConfig,
    pub git_sha: String,
    pub logging_enabled: bool,
    pub post_routing_cache_size: usize,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            es: EsConfig::from_env(),
            jetstream: JetstreamConfig::from_env(),
            megastream: MegastreamConfig::from_env(),
            metrics: MetricsConfig::from_env(),
            extract: ExtractConfig::from_env(),
            git_sha: env_var("GIT_SHA").unwrap_or_else(|| "unknown".to_string()),
            logging_enabled: env_bool("LOGGING_ENABLED", true),
            post_routing_cache_size: env_parse("POST_ROUTING_CACHE_SIZE", 500_000),
            environment: env_var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // Run in isolation of ambient GE_ vars set by the test harness/CI.
        let config = EsConfig::from_env();
        assert!(!config.url.is_empty());
    }

    #[test]
    fn extract_indices_split_on_comma() {
        std::env::set_var("GE_EXTRACT_INDICES", "posts, likes ,hashtags");
        let cfg = ExtractConfig::from_env();
        assert_eq!(cfg.indices, vec!["posts", "likes", "hashtags"]);
        std::env::remove_var("GE_EXTRACT_INDICES");
    }
}
