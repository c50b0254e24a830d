//! External collaborators that produce one batch per call
//!
//! Fetchers only talk to the outside world (HTTP endpoints and auxiliary
//! scripts) and shape the responses into record types. Retrying, validation,
//! hashing and persistence all live in the pipeline.

pub mod bifrost;
pub mod hydration;
pub mod hydration_price;
pub mod stellaswap;

pub use bifrost::BifrostFetcher;
pub use hydration::HydrationFetcher;
pub use hydration_price::HydrationPriceFetcher;
pub use stellaswap::StellaswapFetcher;

use crate::records::BatchPayload;
use crate::source::SourceKind;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug)]
pub enum FetchError {
    Http(reqwest::Error),
    Status { url: String, status: u16 },
    Decode(String),
    Script { command: String, message: String },
    Timeout(String),
    Io(std::io::Error),
}

impl FetchError {
    /// Network trouble, 5xx/429 responses and script hiccups are retried;
    /// malformed payloads are not
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Script { .. } | FetchError::Timeout(_) | FetchError::Io(_) => true,
            FetchError::Decode(_) => false,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Http(e) => write!(f, "HTTP error: {}", e),
            FetchError::Status { url, status } => write!(f, "{} returned status {}", url, status),
            FetchError::Decode(msg) => write!(f, "Unexpected response shape: {}", msg),
            FetchError::Script { command, message } => write!(f, "`{}` failed: {}", command, message),
            FetchError::Timeout(what) => write!(f, "Timed out: {}", what),
            FetchError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(err)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

/// Produces one batch for a single source
#[async_trait]
pub trait Fetcher: Send {
    type Batch: BatchPayload;

    fn source(&self) -> SourceKind;

    async fn fetch(&mut self) -> Result<Self::Batch, FetchError>;
}

pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("yieldfold/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

pub(crate) async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value, FetchError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(response.json::<Value>().await?)
}

/// Run a shell command and return its stdout
///
/// Non-zero exit status and exceeding `timeout_secs` are both errors. The
/// child is killed if the timeout fires.
pub async fn run_script(command: &str, timeout_secs: u64) -> Result<String, FetchError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).kill_on_drop(true);

    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
        Ok(result) => result?,
        Err(_) => return Err(FetchError::Timeout(command.to_string())),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FetchError::Script {
            command: command.to_string(),
            message: format!("{} ({})", output.status, stderr.trim()),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| FetchError::Decode(e.to_string()))
}

/// Scripts may log before printing their JSON; take the last JSON line
pub(crate) fn last_json_line(stdout: &str) -> Result<Value, FetchError> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{') || line.starts_with('['))
        .find_map(|line| serde_json::from_str::<Value>(line).ok())
        .ok_or_else(|| FetchError::Decode("script printed no JSON".to_string()))
}

/// Entry of the Hydration asset list file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssetEntry {
    #[serde(alias = "ID")]
    pub id: u32,
    #[serde(alias = "Symbol")]
    pub symbol: String,
}

pub fn load_assets(path: &str) -> Result<Vec<AssetEntry>, FetchError> {
    let raw = std::fs::read_to_string(path)?;
    let assets: Vec<AssetEntry> = serde_json::from_str(&raw)?;
    Ok(assets)
}
