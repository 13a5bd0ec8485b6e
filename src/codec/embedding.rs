//! Embedding vector codec: base85 -> zlib -> little-endian float32s
//! (spec §4.C). Must be bit-exact in both directions, including NaN,
//! infinities, and signed zero (spec §8).

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

use super::base85;
use crate::error::{IngestError, IngestResult};

/// Decode a base85+zlib+LE-f32 string into a dense vector.
pub fn decode(input: &str) -> IngestResult<Vec<f32>> {
    let compressed = base85::decode(input)?;

    let mut decoder = ZlibDecoder::new(&compressed[..]);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| IngestError::Decode(format!("zlib inflate failed: {e}")))?;

    if raw.len() % 4 != 0 {
        return Err(IngestError::Decode(format!(
            "embedding byte length {} is not a multiple of 4",
            raw.len()
        )));
    }

    Ok(raw
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Encode a dense vector into base85+zlib+LE-f32 text. The zlib stream
/// just needs to be valid (any compression level round-trips the same
/// floats); the default level is used here.
pub fn encode(values: &[f32]) -> IngestResult<String> {
    let mut raw = Vec::with_capacity(values.len() * 4);
    for v in values {
        raw.extend_from_slice(&v.to_le_bytes());
    }

    let mut encoder = ZlibEncoder::new(&raw[..], Compression::default());
    let mut compressed = Vec::new();
    encoder
        .read_to_end(&mut compressed)
        .map_err(|e| IngestError::Decode(format!("zlib deflate failed: {e}")))?;

    Ok(base85::encode(&compressed))
}
