//! Snapshot compression for wire transfer and storage
//!
//! Snapshots travel as deflate (zlib) streams. Decompression is capped so
//! a malformed or hostile peer cannot balloon memory.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{ConfigError, ConfigResult};

/// Upper bound on the decompressed size of a snapshot (64 MiB).
pub const MAX_SNAPSHOT_BYTES: u64 = 64 * 1024 * 1024;

/// Compress a textual snapshot for transport.
pub fn compress(text: &str) -> ConfigResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| ConfigError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| ConfigError::Compression(e.to_string()))
}

/// Decompress a snapshot received from a peer or read from storage.
pub fn decompress(data: &[u8]) -> ConfigResult<String> {
    let mut decoder = ZlibDecoder::new(data).take(MAX_SNAPSHOT_BYTES + 1);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| ConfigError::Compression(e.to_string()))?;
    if text.len() as u64 > MAX_SNAPSHOT_BYTES {
        return Err(ConfigError::Compression(format!(
            "snapshot exceeds {} bytes decompressed",
            MAX_SNAPSHOT_BYTES
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let text = "Resources\n{\n  SE1\n  {\n    Status = Active\n  }\n}\n";
        let compressed = compress(text).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), text);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decompress(b"definitely not zlib").is_err());
    }

    #[test]
    fn test_empty_round_trip() {
        let compressed = compress("").unwrap();
        assert_eq!(decompress(&compressed).unwrap(), "");
    }
}
