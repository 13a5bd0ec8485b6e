//! Base85 (RFC 1924 alphabet) codec, the outer layer of the embedding
//! codec (spec §4.C, §8).
//!
//! Decoding accepts `~`-padded input: the input is padded with `~` to a
//! multiple of 5 characters, each 5-char block decodes to 4 big-endian
//! bytes, and trailing padding bytes are discarded to match the
//! original (unpadded) byte length. Encoding is the exact reverse.

use crate::error::{IngestError, IngestResult};

pub const ALPHABET: &[u8; 85] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!#$%&()*+-;<=>?@^_`{|}~";

fn decode_table() -> [i8; 256] {
    let mut table = [-1i8; 256];
    for (i, &b) in ALPHABET.iter().enumerate() {
        table[b as usize] = i as i8;
    }
    table
}

/// Encode raw bytes into RFC1924 base85, the padded-and-stripped way
/// described in spec §4.C: the input is padded to a multiple of 4 bytes
/// with zero bytes before encoding, and the corresponding number of
/// trailing base85 digits is stripped from the output.
pub fn encode(data: &[u8]) -> String {
    let pad = (4 - data.len() % 4) % 4;
    let mut padded = data.to_vec();
    padded.resize(data.len() + pad, 0);

    let mut out = String::with_capacity(padded.len() / 4 * 5);
    for chunk in padded.chunks(4) {
        let value = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let mut digits = [0u8; 5];
        let mut v = value;
        for i in (0..5).rev() {
            digits[i] = ALPHABET[(v % 85) as usize];
            v /= 85;
        }
        out.push_str(std::str::from_utf8(&digits).unwrap());
    }

    let new_len = out.len() - pad;
    out.truncate(new_len);
    out
}

/// Decode RFC1924 base85 text back into raw bytes. The input is padded
/// with `~` to a multiple of 5 characters before decoding; the decoded
/// byte count is the padding-adjusted length implied by the unpadded
/// input length (spec §4.C).
pub fn decode(input: &str) -> IngestResult<Vec<u8>> {
    let table = decode_table();
    let original_len = input.len();
    let pad = (5 - original_len % 5) % 5;

    let mut padded: Vec<u8> = input.bytes().collect();
    padded.resize(original_len + pad, b'~');

    let mut out = Vec::with_capacity(padded.len() / 5 * 4);
    for chunk in padded.chunks(5) {
        let mut value: u32 = 0;
        for &c in chunk {
            let digit = table[c as usize];
            if digit < 0 {
                return Err(IngestError::Decode(format!(
                    "invalid base85 character: {:?}",
                    c as char
                )));
            }
            value = value
                .wrapping_mul(85)
                .wrapping_add(digit as u32);
        }
        out.extend_from_slice(&value.to_be_bytes());
    }

    let keep = out.len() - pad;
    out.truncate(keep);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_empty() {
        let encoded = encode(&[]);
        assert_eq!(encoded, "");
        assert_eq!(decode(&encoded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn round_trip_various_lengths() {
        for len in 0..=16 {
            let data: Vec<u8> = (0..len as u8).collect();
            let encoded = encode(&data);
            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded, data, "length {len} failed round trip");
        }
    }

    #[test]
    fn round_trip_lengths_one_through_five() {
        for len in 1..=5 {
            let data: Vec<u8> = vec![0xAB; len];
            let encoded = encode(&data);
            assert_eq!(decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn rejects_invalid_character() {
        assert!(decode("\u{1}\u{1}\u{1}\u{1}\u{1}").is_err());
    }

    #[test]
    fn alphabet_has_85_entries() {
        assert_eq!(ALPHABET.len(), 85);
    }
}
