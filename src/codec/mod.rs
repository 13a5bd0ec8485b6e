//! Wire and storage codecs (spec §4.C): base85/zlib embedding packing,
//! timestamp normalization, hashtag extraction, and the two firehose
//! frame decoders.

pub mod base85;
pub mod embedding;
pub mod hashtag;
pub mod jetstream;
pub mod megastream;
pub mod timestamp;
