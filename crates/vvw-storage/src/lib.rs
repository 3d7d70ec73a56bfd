//! Run artifact storage + rate-limited HTTP fetch utilities for VVW.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;
use vvw_core::DiagnosticStatus;

pub use reqwest::Url;

pub const CRATE_NAME: &str = "vvw-storage";

#[derive(Debug, Clone, Serialize)]
pub struct StoredArtifact {
    pub name: String,
    pub sha256: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
}

/// Per-run output directory writer.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn artifact_relative_path(&self, run_label: &str, name: &str) -> PathBuf {
        PathBuf::from(run_label).join(name)
    }

    /// Write one artifact via temp file + rename so readers never see a partial file.
    pub async fn write_artifact(
        &self,
        run_label: &str,
        name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let relative_path = self.artifact_relative_path(run_label, name);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating output directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp artifact {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredArtifact {
            name: name.to_string(),
            sha256: Self::sha256_hex(bytes),
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
        })
    }
}

/// Maps a non-success HTTP status onto the diagnostic vocabulary.
pub fn classify_status(status: StatusCode) -> DiagnosticStatus {
    match status {
        StatusCode::TOO_MANY_REQUESTS => DiagnosticStatus::RateLimited,
        StatusCode::FORBIDDEN => DiagnosticStatus::Forbidden,
        other => DiagnosticStatus::Http(other.as_u16()),
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Minimum gap between successive calls to one source family.
    pub default_delay: Duration,
    pub source_delays: HashMap<String, Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            default_delay: Duration::from_millis(1000),
            source_delays: HashMap::new(),
        }
    }
}

impl HttpClientConfig {
    pub fn with_source_delay(mut self, source: &str, delay: Duration) -> Self {
        self.source_delays.insert(source.to_string(), delay);
        self
    }

    pub fn delay_for(&self, source: &str) -> Duration {
        self.source_delays
            .get(source)
            .copied()
            .unwrap_or(self.default_delay)
    }
}

/// Serializes calls for one source family and remembers when the last one finished.
#[derive(Debug, Default)]
struct SourceLane {
    last_call: Mutex<Option<Instant>>,
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: HttpClientConfig,
    lanes: Mutex<HashMap<String, Arc<SourceLane>>>,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn diagnostic_status(&self) -> DiagnosticStatus {
        match self {
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(DiagnosticStatus::Http(*status)),
            FetchError::Request(_) | FetchError::Decode { .. } => DiagnosticStatus::RequestFailed,
        }
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            config,
            lanes: Mutex::new(HashMap::new()),
        })
    }

    async fn lane(&self, source: &str) -> Arc<SourceLane> {
        let mut map = self.lanes.lock().await;
        map.entry(source.to_string())
            .or_insert_with(|| Arc::new(SourceLane::default()))
            .clone()
    }

    /// One GET, one outstanding call per source, paced by the configured delay.
    pub async fn fetch_bytes(&self, source: &str, url: &Url) -> Result<FetchedResponse, FetchError> {
        let lane = self.lane(source).await;
        let mut last_call = lane.last_call.lock().await;

        if let Some(previous) = *last_call {
            let wait = self.config.delay_for(source).saturating_sub(previous.elapsed());
            if !wait.is_zero() {
                debug!(source, wait_ms = wait.as_millis() as u64, "pacing request");
                tokio::time::sleep(wait).await;
            }
        }

        let span = info_span!("http_fetch", source, url = %url);
        let result = self.send(url).instrument(span).await;
        *last_call = Some(Instant::now());
        result
    }

    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        source: &str,
        url: &Url,
    ) -> Result<T, FetchError> {
        let response = self.fetch_bytes(source, url).await?;
        serde_json::from_slice(&response.body).map_err(|source| FetchError::Decode {
            url: response.final_url,
            source,
        })
    }

    async fn send(&self, url: &Url) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}
