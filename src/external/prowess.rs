use std::io::{Cursor, Read};
use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ProwessConfig;
use crate::external::vendor_source::{FetchError, VendorPayload, VendorSource};

const DATA_ENTRY: &str = "1.json";

/// CMIE Prowess batch API. A batch file is submitted, then polled by token
/// until the result arrives as a ZIP archive.
pub struct ProwessClient {
    client: reqwest::Client,
    config: ProwessConfig,
}

#[derive(Debug, Deserialize)]
struct SendBatchResponse {
    token: Option<String>,
    message: Option<String>,
    errdesc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchStatus {
    message: Option<String>,
    errdesc: Option<String>,
}

impl ProwessClient {
    pub fn new(config: ProwessConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn send_batch(&self) -> Result<String, FetchError> {
        let batch_path = &self.config.batch_file;
        let batch = tokio::fs::read(batch_path).await.map_err(|e| {
            FetchError::BadResponse(format!("batch file {} unreadable: {}", batch_path.display(), e))
        })?;

        let file_name = batch_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("batch.bt")
            .to_string();

        let form = Form::new()
            .text("apikey", self.config.api_key.clone())
            .text("format", "json")
            .part("batchfile", Part::bytes(batch).file_name(file_name));

        let resp = self
            .client
            .post(format!("{}/sendbatch", self.config.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::BadResponse(format!("sendbatch returned HTTP {}", status)));
        }

        let body: SendBatchResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        body.token.filter(|t| !t.is_empty()).ok_or_else(|| {
            let reason = body
                .errdesc
                .or(body.message)
                .unwrap_or_else(|| "no token in sendbatch response".to_string());
            FetchError::BadResponse(reason)
        })
    }

    async fn get_batch(&self, token: &str) -> Result<(Option<String>, Vec<u8>), FetchError> {
        let resp = self
            .client
            .post(format!("{}/getbatch", self.config.base_url))
            .form(&[("apikey", self.config.api_key.as_str()), ("token", token)])
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::BadResponse(format!("getbatch returned HTTP {}", status)));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok((content_type, bytes.to_vec()))
    }

    fn max_attempts(&self) -> u32 {
        let poll = self.config.poll_interval.as_secs().max(1);
        ((self.config.max_wait.as_secs() / poll) as u32).max(1)
    }
}

/// Decide whether a getbatch response carries the finished archive rather
/// than a JSON status message.
pub fn is_zip_response(content_type: Option<&str>, body: &[u8]) -> bool {
    if body.starts_with(b"PK") {
        return true;
    }
    let content_type = content_type.unwrap_or_default().to_lowercase();
    if content_type.contains("application/zip") || content_type.contains("application/octet-stream") {
        return true;
    }
    let first = body.iter().find(|b| !b.is_ascii_whitespace());
    if matches!(first, Some(b'{') | Some(b'[')) {
        return false;
    }
    if content_type.contains("json") || content_type.contains("text") {
        return false;
    }
    !body.is_empty()
}

/// Pull the data file out of a Prowess result archive.
pub fn extract_data_file(archive_bytes: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| FetchError::Parse(format!("invalid archive: {}", e)))?;

    let entry_name = if archive.file_names().any(|n| entry_matches(n, DATA_ENTRY)) {
        archive
            .file_names()
            .find(|n| entry_matches(n, DATA_ENTRY))
            .map(str::to_string)
    } else {
        archive
            .file_names()
            .find(|n| n.to_lowercase().ends_with(".json"))
            .map(str::to_string)
    }
    .ok_or_else(|| FetchError::Parse("archive contains no JSON data file".into()))?;

    let mut file = archive
        .by_name(&entry_name)
        .map_err(|e| FetchError::Parse(e.to_string()))?;
    let mut contents = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

fn entry_matches(name: &str, expected: &str) -> bool {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n == expected)
        .unwrap_or(false)
}

#[async_trait]
impl VendorSource for ProwessClient {
    async fn fetch(&self) -> Result<VendorPayload, FetchError> {
        info!("📤 Sending batch {} to Prowess", self.config.batch_file.display());
        let token = self.send_batch().await?;
        info!("✅ Received batch token {}", token);

        let max_attempts = self.max_attempts();
        for attempt in 1..=max_attempts {
            info!("[{}/{}] Checking getbatch for token {}", attempt, max_attempts, token);

            match self.get_batch(&token).await {
                Ok((content_type, body)) if is_zip_response(content_type.as_deref(), &body) => {
                    info!("📥 Archive received for token {} ({} bytes)", token, body.len());
                    let data = extract_data_file(&body)?;
                    return VendorPayload::from_json(token, data);
                }
                Ok((_, body)) => {
                    let status = serde_json::from_slice::<BatchStatus>(&body)
                        .ok()
                        .and_then(|s| s.message.or(s.errdesc))
                        .unwrap_or_else(|| String::from_utf8_lossy(&body).chars().take(200).collect());
                    info!("Batch {} not ready: {}", token, status);
                }
                Err(e) => {
                    warn!("⚠️ getbatch request failed for {}: {}", token, e);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        Err(FetchError::Timeout {
            token,
            waited_secs: self.config.max_wait.as_secs(),
        })
    }
}
