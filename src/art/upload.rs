//! Upload input validation.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{RemoteError, Result};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff";

/// Accepted image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG
    Png,
    /// JPEG
    Jpeg,
}

impl ImageFormat {
    /// Name the device expects in `file_type`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    /// MIME type for the REST fallback
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    /// Format implied by the leading bytes
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(PNG_MAGIC) {
            Some(Self::Png)
        } else if data.starts_with(JPEG_MAGIC) {
            Some(Self::Jpeg)
        } else {
            None
        }
    }
}

impl FromStr for ImageFormat {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            other => Err(RemoteError::InvalidUpload(format!(
                "unsupported file type '{}', expected png or jpg",
                other
            ))),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated image upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    data: Bytes,
    format: ImageFormat,
    matte: String,
    portrait_matte: String,
}

impl UploadRequest {
    /// Validate `data` against the declared `file_type` and `max_bytes`
    pub fn new(data: impl Into<Bytes>, file_type: &str, max_bytes: usize) -> Result<Self> {
        let data = data.into();
        let format: ImageFormat = file_type.parse()?;

        if data.is_empty() {
            return Err(RemoteError::InvalidUpload("image is empty".to_string()));
        }
        if data.len() > max_bytes {
            return Err(RemoteError::InvalidUpload(format!(
                "image is {} bytes, limit is {}",
                data.len(),
                max_bytes
            )));
        }
        match ImageFormat::sniff(&data) {
            Some(found) if found == format => {},
            Some(found) => {
                return Err(RemoteError::InvalidUpload(format!(
                    "declared {} but content is {}",
                    format, found
                )))
            },
            None => {
                return Err(RemoteError::InvalidUpload(format!(
                    "content is not a {} image",
                    format
                )))
            },
        }

        Ok(Self {
            data,
            format,
            matte: "none".to_string(),
            portrait_matte: "none".to_string(),
        })
    }

    /// Set the landscape matte
    pub fn with_matte(mut self, matte: impl Into<String>) -> Self {
        self.matte = matte.into();
        self
    }

    /// Set the portrait matte
    pub fn with_portrait_matte(mut self, matte: impl Into<String>) -> Self {
        self.portrait_matte = matte.into();
        self
    }

    /// Image bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Image format
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Landscape matte id
    pub fn matte(&self) -> &str {
        &self.matte
    }

    /// Portrait matte id
    pub fn portrait_matte(&self) -> &str {
        &self.portrait_matte
    }

    /// Payload size
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a validated request
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
