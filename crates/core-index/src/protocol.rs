//! Bulk scan wire contract
//!
//! Byte encoding for the scan request/response exchanged with serving
//! adapters. A request carries the block hashes to look up; a response
//! carries (index, count) for the matched indices only. The core provides
//! the codec, not a server.

use crate::codec::{decode_string, decode_varint, encode_string, encode_varint};
use crate::error::{Error, Result};

/// Encode a bulk scan request: varint count, then one length-prefixed hash
/// per entry.
pub fn encode_request(hashes: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(hashes.len() as u64, &mut out);
    for hash in hashes {
        encode_string(hash, &mut out);
    }
    out
}

/// Decode a bulk scan request. The buffer must hold exactly one request.
pub fn decode_request(buf: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut pos = 0;
    let count = decode_varint(buf, &mut pos)? as usize;
    let mut hashes = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        hashes.push(decode_string(buf, &mut pos)?.to_vec());
    }
    if pos != buf.len() {
        return Err(Error::corrupt_data(
            "scan request decode did not consume buffer",
        ));
    }
    Ok(hashes)
}

/// Encode a bulk scan response: varint count, then varint(index) and
/// varint(count) per match.
pub fn encode_response(matches: &[(usize, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(matches.len() as u64, &mut out);
    for (index, count) in matches {
        encode_varint(*index as u64, &mut out);
        encode_varint(*count, &mut out);
    }
    out
}

/// Decode a bulk scan response. The buffer must hold exactly one response.
pub fn decode_response(buf: &[u8]) -> Result<Vec<(usize, u64)>> {
    let mut pos = 0;
    let count = decode_varint(buf, &mut pos)? as usize;
    let mut matches = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let index = decode_varint(buf, &mut pos)? as usize;
        let match_count = decode_varint(buf, &mut pos)?;
        matches.push((index, match_count));
    }
    if pos != buf.len() {
        return Err(Error::corrupt_data(
            "scan response decode did not consume buffer",
        ));
    }
    Ok(matches)
}
