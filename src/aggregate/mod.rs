//! Secondary-aggregate fan-out (spec §4.F): like-count deltas and
//! hashtag-per-hour counters, both folded within a batch and flushed
//! through the indexer's scripted-update path so counters never need
//! a client-side read-modify-write.

pub mod hashtag;
pub mod like_count;

pub use hashtag::HashtagAggregator;
pub use like_count::LikeCountAggregator;
