//! Transfer header codec.
//!
//! # Wire Format
//!
//! ```text
//! +----------------+---------------------------+-----------------+
//! | len: u32 (BE)  | header: JSON, `len` bytes | payload bytes   |
//! +----------------+---------------------------+-----------------+
//! ```
//!
//! The header is `{num, total, fileLength, fileName, fileType, secKey, version}`.
//! `fileLength` is the payload size that follows.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, Result};

/// Header protocol version
pub const HEADER_VERSION: &str = "0.0.1";

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Upper bound on an encoded header we accept when reading
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Header sent ahead of a binary payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferHeader {
    /// Chunk number (always 0, single chunk)
    pub num: u32,
    /// Chunk count (always 1)
    pub total: u32,
    /// Payload length in bytes
    pub file_length: u64,
    /// Generated file name
    pub file_name: String,
    /// Declared file type (`png`, `jpg`)
    pub file_type: String,
    /// Session key issued by the device
    pub sec_key: String,
    /// Header version
    pub version: String,
}

impl TransferHeader {
    /// Header for a single-chunk upload with a generated file name
    pub fn for_upload(file_length: u64, file_type: &str, sec_key: &str) -> Self {
        Self {
            num: 0,
            total: 1,
            file_length,
            file_name: generated_file_name(),
            file_type: file_type.to_string(),
            sec_key: sec_key.to_string(),
            version: HEADER_VERSION.to_string(),
        }
    }

    /// Length-prefixed encoding
    pub fn encode(&self) -> Result<Bytes> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())
            .map_err(|_| RemoteError::Transfer("Transfer header too large".to_string()))?;

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + json.len());
        buf.put_u32(len);
        buf.put_slice(&json);
        Ok(buf.freeze())
    }

    /// Decode a length-prefixed header from the front of `bytes`.
    ///
    /// Returns the header and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < LENGTH_PREFIX_SIZE {
            return Err(RemoteError::Transfer(format!(
                "Header truncated: {} bytes, need at least {}",
                bytes.len(),
                LENGTH_PREFIX_SIZE
            )));
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&bytes[..LENGTH_PREFIX_SIZE]);
        let len = check_header_len(u32::from_be_bytes(prefix))?;

        let end = LENGTH_PREFIX_SIZE + len;
        if bytes.len() < end {
            return Err(RemoteError::Transfer(format!(
                "Header truncated: declared {} bytes, have {}",
                len,
                bytes.len() - LENGTH_PREFIX_SIZE
            )));
        }

        Ok((Self::from_json(&bytes[LENGTH_PREFIX_SIZE..end])?, end))
    }

    /// Parse the JSON body of a header (no length prefix)
    pub fn from_json(json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json)
            .map_err(|e| RemoteError::Transfer(format!("Invalid transfer header: {}", e)))
    }
}

/// Validate a declared header length
pub(crate) fn check_header_len(len: u32) -> Result<usize> {
    let len = len as usize;
    if len == 0 || len > MAX_HEADER_SIZE {
        return Err(RemoteError::Transfer(format!(
            "Invalid header length {}",
            len
        )));
    }
    Ok(len)
}

fn generated_file_name() -> String {
    format!(
        "{}_{}.bin",
        chrono::Local::now().format("%Y%m%d%H%M%S"),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}
