//! Compress and decompress embedded shared-object blobs
//!
//! A packed artifact is `deflate(payload) || u64_le(payload.len())`. The
//! trailer is authoritative for the uncompressed length: decompression
//! allocates exactly that many bytes and fails on any disagreement.

use crate::errors::CodecError;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::io::{Read, Write};

/// Size of the little-endian length trailer appended to every blob
pub const TRAILER_SIZE: usize = 8;

// Upper bound on deflate's expansion ratio
const MAX_EXPANSION: u64 = 1032;

/// Compress a buffer and append the uncompressed-length trailer
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let capacity = data.len() / 2 + TRAILER_SIZE;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(capacity), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    let mut blob = encoder.finish().map_err(CodecError::Compress)?;
    blob.extend_from_slice(&(data.len() as u64).to_le_bytes());
    Ok(blob)
}

/// Recover the original buffer from a blob produced by [compress]
pub fn decompress(blob: &[u8]) -> Result<Vec<u8>, CodecError> {
    if blob.len() < TRAILER_SIZE {
        return Err(CodecError::TruncatedBlob);
    }
    let (payload, trailer) = blob.split_at(blob.len() - TRAILER_SIZE);
    let mut length = [0u8; TRAILER_SIZE];
    length.copy_from_slice(trailer);
    let expected = u64::from_le_bytes(length);

    // Deflate cannot expand past ~1032:1, so a trailer beyond that bound
    // is corruption; refusing it keeps the allocation honest
    if expected > payload.len() as u64 * MAX_EXPANSION {
        return Err(CodecError::ImplausibleTrailer {
            expected,
            payload: payload.len() as u64,
        });
    }

    let mut data = Vec::with_capacity(expected as usize);
    ZlibDecoder::new(payload)
        .read_to_end(&mut data)
        .map_err(CodecError::Decompress)?;
    if data.len() as u64 != expected {
        return Err(CodecError::LengthMismatch {
            expected,
            actual: data.len() as u64,
        });
    }
    Ok(data)
}
