//! Art-mode application operations.
//!
//! Every operation is one correlator request on the application sub-channel.
//! Uploads and thumbnails additionally hand off to a [`BinaryTransfer`].
//!
//! # Upload Flow
//!
//! ```text
//! Client                                Device                 D2D peer
//!    |--- send_image {conn_info} ------->|                         |
//!    |<-- ready_to_use {ip,port,key} ----|                         |
//!    |                                   |                         |
//!    |   (expect image_added) ---------------------------------+   |
//!    |--- len | header | bytes ---------------------------------|-->|
//!    |<-- image_added {content_id} ------|                     |   |
//!    |   (resolved) <----------------------------------------- +   |
//! ```
//!
//! ## Requests
//!
//! | Operation         | Request               | Reply key              |
//! |-------------------|-----------------------|------------------------|
//! | `available`       | `get_content_list`    | `get_content_list`     |
//! | `current_artwork` | `get_current_artwork` | `get_current_artwork`  |
//! | `select_image`    | `select_image`        | `select_image`         |
//! | `delete_images`   | `delete_image_list`   | `delete_image_list`    |
//! | `artmode_status`  | `get_artmode_status`  | `get_artmode_status`   |
//! | `set_artmode`     | `set_artmode_status`  | `artmode_status`       |
//! | `upload`          | `send_image`          | `ready_to_use`, `image_added` |
//! | `thumbnail`       | `get_thumbnail`       | `ready_to_use`         |

mod upload;

pub use upload::{ImageFormat, UploadRequest};

use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};

use crate::correlator::ResponseCorrelator;
use crate::error::{RemoteError, Result};
use crate::transfer::{BinaryTransfer, ConnectionInfo, TransferHeader};

/// Reply to a transfer-prepare request
pub const READY_TO_USE: &str = "ready_to_use";
/// Completion event of an upload
pub const IMAGE_ADDED: &str = "image_added";

const IMAGE_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Content identifier and metadata of one stored artwork
pub type ArtItem = Value;

/// Art-mode operations bound to one correlator
#[derive(Debug, Clone)]
pub struct ArtClient {
    correlator: ResponseCorrelator,
    request_timeout: Duration,
    transfer_timeout: Duration,
}

impl ArtClient {
    /// Create a client
    pub fn new(
        correlator: ResponseCorrelator,
        request_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            correlator,
            request_timeout,
            transfer_timeout,
        }
    }

    /// Stored artworks, optionally filtered by category (e.g. `MY-C0002`)
    pub async fn available(&self, category: Option<&str>) -> Result<Vec<ArtItem>> {
        let reply = self
            .request(
                "get_content_list",
                json!({"request": "get_content_list", "category": category}),
            )
            .await?;

        let items = embedded_json(&reply, "content_list")?;
        let items = match items {
            Value::Array(items) => items,
            other => {
                return Err(RemoteError::Protocol(format!(
                    "content_list is not an array: {}",
                    other
                )))
            },
        };

        Ok(match category {
            Some(category) => items
                .into_iter()
                .filter(|item| item.get("category_id").and_then(Value::as_str) == Some(category))
                .collect(),
            None => items,
        })
    }

    /// Artwork currently on screen
    pub async fn current_artwork(&self) -> Result<ArtItem> {
        self.request(
            "get_current_artwork",
            json!({"request": "get_current_artwork"}),
        )
        .await
    }

    /// Select a stored artwork; `show` switches to it immediately
    pub async fn select_image(&self, content_id: &str, show: bool) -> Result<()> {
        self.request(
            "select_image",
            json!({
                "request": "select_image",
                "content_id": content_id,
                "category_id": Value::Null,
                "show": show,
            }),
        )
        .await
        .map(|_| ())
    }

    /// Delete artworks; returns the ids the device reports as deleted
    pub async fn delete_images(&self, content_ids: &[String]) -> Result<Vec<String>> {
        let list: Vec<Value> = content_ids
            .iter()
            .map(|id| json!({"content_id": id}))
            .collect();
        let reply = self
            .request(
                "delete_image_list",
                json!({"request": "delete_image_list", "content_id_list": list}),
            )
            .await?;

        let deleted = match embedded_json(&reply, "content_id_list") {
            Ok(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.get("content_id").and_then(Value::as_str))
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        Ok(deleted)
    }

    /// Whether art mode is on
    pub async fn artmode_status(&self) -> Result<bool> {
        let reply = self
            .request(
                "get_artmode_status",
                json!({"request": "get_artmode_status"}),
            )
            .await?;
        parse_on_off(&reply)
    }

    /// Switch art mode; resolves when the device confirms the new status
    pub async fn set_artmode(&self, on: bool) -> Result<bool> {
        let value = if on { "on" } else { "off" };
        let reply = self
            .request(
                "artmode_status",
                json!({"request": "set_artmode_status", "value": value}),
            )
            .await?;
        parse_on_off(&reply)
    }

    /// Upload an image over D2D; returns the new content id.
    ///
    /// A peer requiring TLS yields [`RemoteError::Unsupported`].
    pub async fn upload(&self, upload: &UploadRequest) -> Result<String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let request = json!({
            "request": "send_image",
            "file_type": upload.format().as_str(),
            "request_id": request_id,
            "id": request_id,
            "conn_info": d2d_conn_info(&request_id),
            "image_date": chrono::Local::now().format(IMAGE_DATE_FORMAT).to_string(),
            "matte_id": upload.matte(),
            "portrait_matte_id": upload.portrait_matte(),
            "file_size": upload.len(),
        });

        let ready = self.request(READY_TO_USE, request).await?;
        let info = ConnectionInfo::from_reply(&ready)?;
        if info.secured {
            return Err(RemoteError::Unsupported(
                "D2D peer requires a secured transfer".to_string(),
            ));
        }

        let header =
            TransferHeader::for_upload(upload.len() as u64, upload.format().as_str(), &info.key);

        // Registered before streaming so the completion cannot be missed
        let completion = self.correlator.expect(
            IMAGE_ADDED,
            Some("send_image".to_string()),
            self.transfer_timeout,
        );
        let completion = completion.wait();
        tokio::pin!(completion);

        tracing::info!(
            "Uploading {} byte {} image to {}",
            upload.len(),
            upload.format(),
            info.addr()
        );

        let reply = tokio::select! {
            sent = BinaryTransfer::upload(&info, &header, upload.data(), self.transfer_timeout) => {
                sent?;
                completion.await?
            },
            early = &mut completion => early?,
        };

        reply
            .get("content_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Protocol("image_added without content_id".to_string()))
    }

    /// Download the thumbnail of a stored artwork over D2D
    pub async fn thumbnail(&self, content_id: &str) -> Result<Bytes> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let ready = self
            .request(
                READY_TO_USE,
                json!({
                    "request": "get_thumbnail",
                    "content_id": content_id,
                    "id": request_id,
                    "conn_info": d2d_conn_info(&request_id),
                }),
            )
            .await?;

        let info = ConnectionInfo::from_reply(&ready)?;
        if info.secured {
            return Err(RemoteError::Unsupported(
                "D2D peer requires a secured transfer".to_string(),
            ));
        }

        let (header, payload) = BinaryTransfer::download(&info, self.transfer_timeout).await?;
        tracing::debug!("Thumbnail {} ({}) received", header.file_name, header.file_type);
        Ok(payload)
    }

    async fn request(&self, kind: &str, payload: Value) -> Result<Value> {
        self.correlator
            .perform_request(kind, payload, self.request_timeout)
            .await
    }
}

fn d2d_conn_info(request_id: &str) -> Value {
    json!({
        "d2d_mode": "socket",
        "connection_id": rand_connection_id(),
        "id": request_id,
    })
}

fn rand_connection_id() -> u32 {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// A reply member the device sends either inline or JSON-encoded as a string
fn embedded_json(reply: &Value, field: &str) -> Result<Value> {
    match reply.get(field) {
        Some(Value::String(text)) => Ok(serde_json::from_str(text)?),
        Some(value) => Ok(value.clone()),
        None => Err(RemoteError::Protocol(format!("reply is missing {}", field))),
    }
}

fn parse_on_off(reply: &Value) -> Result<bool> {
    match reply.get("value").and_then(Value::as_str) {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        other => Err(RemoteError::Protocol(format!(
            "unexpected art mode value {:?}",
            other
        ))),
    }
}
