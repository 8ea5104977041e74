// src/fetch.rs

use crate::error::{PipelineError, Result};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Downloads source documents with a bounded timeout.
pub struct DocumentFetcher {
    client: Client,
    timeout_secs: u64,
}

impl DocumentFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    /// GET `uri`; a non-2xx status or a timeout fails the whole document.
    pub async fn download(&self, uri: &str) -> Result<Vec<u8>> {
        info!(uri = %uri, "Downloading file");

        let response = self.client.get(uri).send().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::Timeout {
                    what: uri.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                PipelineError::Download(format!("{uri}: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Download(format!("{uri}: HTTP {status}")));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::Timeout {
                    what: uri.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                PipelineError::Download(format!("{uri}: {e}"))
            }
        })?;

        info!(bytes = bytes.len(), "Downloaded file");
        Ok(bytes.to_vec())
    }

    /// Download an http(s) URI, or read a local path for one-shot runs.
    pub async fn load(&self, source: &str) -> Result<Vec<u8>> {
        if is_remote(source) {
            self.download(source).await
        } else {
            info!(path = %source, "Reading local file");
            Ok(tokio::fs::read(Path::new(source)).await?)
        }
    }
}

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
