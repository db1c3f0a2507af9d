//! Payload encoder/decoder.

use crate::error::{CodecError, CodecResult};
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Serialized size (in bytes) above which payloads are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Marker prefix for compressed payloads.
pub const COMPRESSED_PREFIX: &str = "gz:";

/// Encodes values to storable strings, compressing large ones.
///
/// `decode(encode(x)) == x` holds for every JSON-representable `x`,
/// whether or not compression was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadCodec {
    threshold: usize,
}

impl PayloadCodec {
    /// Creates a codec with a custom compression threshold.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Returns the compression threshold in bytes.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Serializes `value` to JSON, compressing it if it exceeds the threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized or compressed.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<String> {
        let json =
            serde_json::to_string(value).map_err(|e| CodecError::encoding_failed(e.to_string()))?;

        if json.len() <= self.threshold {
            return Ok(json);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(json.as_bytes())
            .map_err(|e| CodecError::compression_failed(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CodecError::compression_failed(e.to_string()))?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);
        Ok(format!("{COMPRESSED_PREFIX}{encoded}"))
    }

    /// Decodes a string produced by [`PayloadCodec::encode`].
    ///
    /// Compressed and plain payloads are detected automatically, so a codec
    /// with any threshold can read payloads written with any other.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is corrupt or does not deserialize
    /// into `T`.
    pub fn decode<T: DeserializeOwned>(&self, payload: &str) -> CodecResult<T> {
        let json = match payload.strip_prefix(COMPRESSED_PREFIX) {
            Some(encoded) => Self::decompress(encoded)?,
            None => return Self::parse(payload),
        };
        Self::parse(&json)
    }

    /// Returns true if `payload` carries the compressed marker.
    pub fn is_compressed(payload: &str) -> bool {
        payload.starts_with(COMPRESSED_PREFIX)
    }

    fn decompress(encoded: &str) -> CodecResult<String> {
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CodecError::corrupt_payload(format!("invalid base64: {e}")))?;

        let mut json = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut json)
            .map_err(|e| CodecError::corrupt_payload(format!("invalid gzip stream: {e}")))?;
        Ok(json)
    }

    fn parse<T: DeserializeOwned>(json: &str) -> CodecResult<T> {
        serde_json::from_str(json).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD)
    }
}
