//! REST upload fallback.
//!
//! Used by the session when the D2D path is disabled or reports
//! [`RemoteError::Unsupported`](crate::error::RemoteError::Unsupported).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::Value;

use crate::art::UploadRequest;
use crate::error::{RemoteError, Result};

/// Alternative upload path the session can fall back to
pub trait UploadFallback: Send + Sync {
    /// Upload and return the new content id
    fn upload<'a>(
        &'a self,
        upload: &'a UploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Name for logs
    fn name(&self) -> &'static str;
}

/// `multipart/form-data` upload to the device's HTTP API
#[derive(Debug, Clone)]
pub struct RestUploader {
    client: reqwest::Client,
    url: String,
}

impl RestUploader {
    /// Uploader posting to `http://{host}:{port}{path}`
    pub fn new(host: &str, port: u16, path: &str, timeout: Duration) -> Result<Self> {
        Self::with_url(format!("http://{}:{}{}", host, port, path), timeout)
    }

    /// Uploader posting to an explicit URL. Device certificates are self-signed,
    /// so certificate validation is off.
    pub fn with_url(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, upload: &UploadRequest) -> Result<String> {
        let format = upload.format();
        let file = Part::bytes(upload.data().to_vec())
            .file_name(format!("upload.{}", format.as_str()))
            .mime_str(format.mime())?;
        let form = Form::new()
            .part("file", file)
            .text("file_type", format.as_str())
            .text("matte_id", upload.matte().to_string());

        tracing::info!("Uploading {} bytes via REST to {}", upload.len(), self.url);

        let response = self.client.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Network(format!(
                "REST upload failed with {}: {}",
                status, body
            )));
        }

        let body: Value = response.json().await?;
        body.get("content_id")
            .or_else(|| body.get("contentId"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Protocol("REST upload reply without content_id".to_string()))
    }
}

impl UploadFallback for RestUploader {
    fn upload<'a>(
        &'a self,
        upload: &'a UploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.post(upload))
    }

    fn name(&self) -> &'static str {
        "REST"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn png() -> UploadRequest {
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend_from_slice(&[0u8; 16]);
        UploadRequest::new(data, "png", 1024).unwrap()
    }

    /// One-shot HTTP server returning `body`; yields the raw request
    async fn serve_once(status: &'static str, body: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || String::from_utf8_lossy(&request).contains("--\r\n") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (port, handle)
    }

    #[test]
    fn test_url_shape() {
        let uploader =
            RestUploader::new("10.0.0.5", 8001, "/api/v2/art/upload", Duration::from_secs(5)).unwrap();
        assert_eq!(uploader.url(), "http://10.0.0.5:8001/api/v2/art/upload");
        assert_eq!(uploader.name(), "REST");
    }

    #[tokio::test]
    async fn test_multipart_upload_returns_content_id() {
        let (port, server) = serve_once("200 OK", r#"{"content_id":"MY_F0042"}"#).await;
        let uploader = RestUploader::new("127.0.0.1", port, "/upload", Duration::from_secs(5)).unwrap();

        let id = uploader.upload(&png()).await.unwrap();
        assert_eq!(id, "MY_F0042");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /upload"));
        assert!(request.contains("multipart/form-data"));
        assert!(request.contains("name=\"file_type\""));
        assert!(request.contains("name=\"matte_id\""));
    }

    #[tokio::test]
    async fn test_http_error_surfaces_as_network_error() {
        let (port, _server) = serve_once("500 Internal Server Error", r#"{"error":"x"}"#).await;
        let uploader = RestUploader::new("127.0.0.1", port, "/upload", Duration::from_secs(5)).unwrap();

        assert!(matches!(
            uploader.upload(&png()).await,
            Err(RemoteError::Network(_))
        ));
    }
}
