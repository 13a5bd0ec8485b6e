//! Stateful ingesters (spec §4.G, §4.H): the WebSocket like-firehose
//! consumer and the object-storage post-bundle spooler. Both drive the
//! same cursor/aggregator/indexer plumbing; only the transport and the
//! decoded record shapes differ.

pub mod jetstream;
pub mod megastream;
