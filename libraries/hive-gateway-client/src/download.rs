//! File download through the gateway.

use crate::classifier::classify_transport;
use crate::client::GatewayClient;
use crate::error::{ApiError, Result};
use crate::interceptor::RequestBody;
use crate::types::RequestOptions;
use futures_util::StreamExt;
use reqwest::{Method, Response};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File name used when the caller does not suggest one.
pub const DEFAULT_DOWNLOAD_NAME: &str = "download";

impl GatewayClient {
    /// Download a binary response into the configured download directory.
    ///
    /// # Arguments
    /// * `path` - API path of the file
    /// * `suggested_filename` - Name to save under; only its final component is used
    ///
    /// # Returns
    /// The path the file was saved to.
    pub async fn download_file(
        &self,
        path: &str,
        suggested_filename: Option<&str>,
    ) -> Result<PathBuf> {
        let dest = download_target(&self.config().download_dir, suggested_filename);
        self.download_to(path, &dest, RequestOptions::default())
            .await?;
        Ok(dest)
    }

    /// Download a binary response to an explicit destination.
    ///
    /// Returns the number of bytes written. A partially written file is
    /// removed if the transfer fails; a cancelled transfer may leave one behind.
    pub async fn download_to(
        &self,
        path: &str,
        dest: &Path,
        options: RequestOptions,
    ) -> Result<u64> {
        debug!(path = %path, dest = %dest.display(), "Downloading file");

        let request = self.describe(Method::GET, path, RequestBody::Empty, &options)?;
        let result = self
            .cancellable(options.cancellation, async {
                let response = self.dispatch(request).await?;
                save_body(response, dest)
                    .await
                    .map_err(|e| self.surface(e))
            })
            .await;

        if let Ok(size) = result {
            info!(dest = %dest.display(), size, "File downloaded");
        }
        result
    }
}

async fn save_body(response: Response, dest: &Path) -> Result<u64> {
    let file = create_file(dest).await?;
    match write_body(response, file, dest).await {
        Ok(written) => Ok(written),
        Err(e) => {
            if tokio::fs::remove_file(dest).await.is_ok() {
                debug!(dest = %dest.display(), "Removed partial download");
            }
            Err(e)
        }
    }
}

async fn create_file(dest: &Path) -> Result<File> {
    let io_error =
        |e: std::io::Error| ApiError::unknown(format!("Failed to save {}: {}", dest.display(), e));

    // Create parent directories if needed
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    File::create(dest).await.map_err(io_error)
}

async fn write_body(response: Response, mut file: File, dest: &Path) -> Result<u64> {
    let io_error =
        |e: std::io::Error| ApiError::unknown(format!("Failed to save {}: {}", dest.display(), e));
    let mut written: u64 = 0;

    // Stream the response body
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify_transport(&e))?;
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_error)?;
    Ok(written)
}

/// Resolve where a download is saved, keeping only the file name component
/// of the suggestion.
fn download_target(dir: &Path, suggested_filename: Option<&str>) -> PathBuf {
    let name = suggested_filename
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(DEFAULT_DOWNLOAD_NAME);
    dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_target_defaults() {
        let dir = Path::new("/tmp/out");
        assert_eq!(download_target(dir, None), dir.join("download"));
        assert_eq!(download_target(dir, Some("")), dir.join("download"));
        assert_eq!(download_target(dir, Some("..")), dir.join("download"));
    }

    #[test]
    fn test_download_target_strips_directories() {
        let dir = Path::new("/tmp/out");
        assert_eq!(
            download_target(dir, Some("report.csv")),
            dir.join("report.csv")
        );
        assert_eq!(
            download_target(dir, Some("../../etc/passwd")),
            dir.join("passwd")
        );
    }
}
