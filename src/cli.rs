//! Command-line flags (spec §6), one `clap::Parser` per binary since
//! the four entry points have non-overlapping flag sets rather than
//! shared subcommands.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "jetstream", about = "Like-firehose ingester")]
pub struct JetstreamArgs {
    /// Cap on how far back the cursor may resume, in minutes (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_rewind_minutes: u64,

    /// Decode and log without writing to the document store.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Accept invalid TLS certificates on the document-store connection.
    #[arg(long, default_value_t = false)]
    pub skip_tls_verify: bool,

    /// Records buffered before a flush is triggered.
    #[arg(long, default_value_t = 500)]
    pub flush_size: usize,

    /// Seconds between time-based flushes.
    #[arg(long, default_value_t = 1)]
    pub flush_interval_secs: u64,
}

#[derive(Parser, Debug)]
#[command(name = "megastream", about = "Post-bundle spooler ingester")]
pub struct MegastreamArgs {
    /// Cap on how far back the cursor may resume, in minutes (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_rewind_minutes: u64,

    /// Decode and log without writing to the document store.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Records buffered per index before a flush is triggered.
    #[arg(long, default_value_t = 500)]
    pub flush_size: usize,
}

#[derive(Parser, Debug)]
#[command(name = "expiry", about = "Retention delete-by-query job")]
pub struct ExpiryArgs {
    /// Retention horizon for posts/likes, in hours.
    #[arg(long, default_value_t = 720)]
    pub retention_hours: i64,

    /// Retention horizon for hashtag buckets, in hours.
    #[arg(long, default_value_t = 720)]
    pub hashtag_retention_hours: i64,

    /// Issue a count instead of actually deleting.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
#[command(name = "extract", about = "Columnar extract job")]
pub struct ExtractArgs {
    /// Window size per extract pass, in minutes.
    #[arg(long, default_value_t = 60)]
    pub window_size_min: i64,
}
