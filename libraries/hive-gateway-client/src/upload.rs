//! File upload through the gateway.

use crate::client::GatewayClient;
use crate::error::{ApiError, Result};
use crate::interceptor::{FilePart, RequestBody};
use crate::types::{ProgressCallback, RequestOptions, UploadProgress};
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Multipart field the file is sent under.
const FILE_FIELD: &str = "file";

impl GatewayClient {
    /// Upload a file as multipart form data.
    ///
    /// # Arguments
    /// * `path` - API path the form is posted to
    /// * `file` - Local file to send
    /// * `on_progress` - Called as chunks of the file are handed to the transport
    ///
    /// # Returns
    /// The decoded response body.
    pub async fn upload_file<T: DeserializeOwned>(
        &self,
        path: &str,
        file: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<T> {
        let part = file_part(file, on_progress)
            .await
            .map_err(|e| self.surface(e))?;

        debug!(
            file = %file.display(),
            size = part.len,
            mime = %part.mime_type,
            "Uploading file"
        );

        let file_name = part.file_name.clone();
        let size = part.len;
        let result = self
            .request(
                Method::POST,
                path,
                RequestBody::File(part),
                RequestOptions::default(),
            )
            .await;

        if result.is_ok() {
            info!(file = %file_name, size, "File uploaded");
        }
        result
    }
}

async fn file_part(path: &Path, on_progress: Option<ProgressCallback>) -> Result<FilePart> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| ApiError::unknown(format!("File not found: {} ({})", path.display(), e)))?;

    if !metadata.is_file() {
        return Err(ApiError::unknown(format!(
            "Not a regular file: {}",
            path.display()
        )));
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    Ok(FilePart {
        path: path.to_path_buf(),
        file_name,
        mime_type: mime_type_for_file(path),
        len: metadata.len(),
        on_progress,
    })
}

/// Build the multipart form for one attempt, streaming the file from disk.
pub(crate) async fn multipart_form(part: &FilePart) -> Result<Form> {
    let file = File::open(&part.path).await.map_err(|e| {
        ApiError::unknown(format!("Failed to open {}: {}", part.path.display(), e))
    })?;

    let total = part.len;
    let file_name = part.file_name.clone();
    let callback = part.on_progress.clone();

    if let Some(callback) = &callback {
        callback(UploadProgress {
            file_name: file_name.clone(),
            bytes_sent: 0,
            bytes_total: total,
        });
    }

    let mut sent: u64 = 0;
    let stream = ReaderStream::new(file).map(move |chunk| {
        if let (Ok(bytes), Some(callback)) = (&chunk, &callback) {
            sent += bytes.len() as u64;
            callback(UploadProgress {
                file_name: file_name.clone(),
                bytes_sent: sent,
                bytes_total: total,
            });
        }
        chunk
    });

    let file_part = Part::stream_with_length(Body::wrap_stream(stream), total)
        .file_name(part.file_name.clone())
        .mime_str(&part.mime_type)
        .map_err(|e| ApiError::unknown(format!("Invalid content type: {}", e)))?;

    Ok(Form::new().part(FILE_FIELD, file_part))
}

/// Guess the content type from the file extension.
fn mime_type_for_file(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
