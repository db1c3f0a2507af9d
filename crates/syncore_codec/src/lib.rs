//! # Syncore Codec
//!
//! Threshold-compressed JSON payload codec for Syncore.
//!
//! Cached entity blobs are stored as strings. Small payloads are stored as
//! plain JSON; payloads whose serialized form exceeds the compression
//! threshold are gzip-compressed and base64-encoded behind a marker prefix.
//!
//! ## Format
//!
//! - `len(json) <= threshold`: the JSON text itself
//! - `len(json) > threshold`: `"gz:" + base64(gzip(json))`
//!
//! No JSON document starts with `g`, so the prefix can never be confused
//! with an uncompressed payload.
//!
//! ## Usage
//!
//! ```
//! use syncore_codec::PayloadCodec;
//! use serde_json::json;
//!
//! let codec = PayloadCodec::default();
//! let value = json!({"id": "c1", "title": "Intro"});
//!
//! let encoded = codec.encode(&value).unwrap();
//! let decoded: serde_json::Value = codec.decode(&encoded).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod payload;

pub use error::{CodecError, CodecResult};
pub use payload::{PayloadCodec, COMPRESSED_PREFIX, DEFAULT_COMPRESSION_THRESHOLD};
