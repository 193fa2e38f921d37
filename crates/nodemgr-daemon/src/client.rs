//! Zenoh client for the daemon API
//!
//! Sends JSON queries to a daemon's machine-scoped key expressions and maps
//! error replies back into [`ClientError::Remote`] with their [`ErrorKind`].

use crate::api::{
    routes, ChangedFilesResponse, ContentResponse, ErrorKind, ErrorResponse, HealthResponse,
    IncludesResponse, ListResponse, LoadedResponse, PackagesResponse, ReloadResponse,
    UnloadResponse,
};
use crate::file_service::{FileContent, FileEntry};
use crate::include_resolver::{IncludeQuery, IncludeRecord};
use crate::launch_loader::{LaunchDescriptor, LoadOutcome, LoadRequest, MtimeReport};
use crate::zenoh_api::api_keys;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use zenoh::bytes::ZBytes;
use zenoh::query::QueryTarget;
use zenoh::Session;

/// Default reply timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("No reply received for {0}")]
    NoReply(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{message}")]
    Remote {
        kind: ErrorKind,
        code: u16,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Failure category reported by the daemon, if the daemon answered
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<ErrorResponse> for ClientError {
    fn from(response: ErrorResponse) -> Self {
        ClientError::Remote {
            kind: response.kind,
            code: response.code,
            message: response.error,
        }
    }
}

/// Client for one daemon, addressed by machine id
pub struct DaemonClient {
    session: Arc<Session>,
    machine_id: String,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(session: Arc<Session>, machine_id: impl Into<String>) -> Self {
        Self {
            session,
            machine_id: machine_id.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Open a client-mode session to `endpoint` and address `machine_id`
    pub async fn connect(endpoint: &str, machine_id: impl Into<String>) -> Result<Self> {
        let mut config = zenoh::Config::default();
        config.insert_json5("mode", "\"client\"").ok();
        config
            .insert_json5("connect/endpoints", &format!("[\"{}\"]", endpoint))
            .ok();
        config
            .insert_json5("scouting/multicast/enabled", "false")
            .ok();

        let session = zenoh::open(config).await?;
        Ok(Self::new(Arc::new(session), machine_id))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.query(routes::HEALTH, None).await
    }

    pub async fn list_path(&self, path: &str) -> Result<Vec<FileEntry>> {
        let response: ListResponse = self
            .query(routes::FILES_LIST, Some(serde_json::json!({ "path": path })))
            .await?;
        Ok(response.entries)
    }

    pub async fn get_file_content(&self, path: &str) -> Result<FileContent> {
        let response: ContentResponse = self
            .query(routes::FILES_CONTENT, Some(serde_json::json!({ "path": path })))
            .await?;
        let bytes = hex::decode(&response.content_hex)
            .map_err(|e| ClientError::InvalidResponse(format!("content_hex: {}", e)))?;
        Ok(FileContent {
            size: response.size,
            modified_ms: response.modified_ms,
            bytes,
        })
    }

    pub async fn list_packages(&self) -> Result<IndexMap<String, String>> {
        let response: PackagesResponse = self.query(routes::FILES_PACKAGES, None).await?;
        Ok(response.packages)
    }

    pub async fn changed_files(&self, files: &IndexMap<String, i64>) -> Result<IndexMap<String, i64>> {
        let response: ChangedFilesResponse = self
            .query(routes::FILES_CHANGED, Some(serde_json::json!({ "files": files })))
            .await?;
        Ok(response.changed)
    }

    pub async fn resolve_includes(&self, path: &str, query: &IncludeQuery) -> Result<Vec<IncludeRecord>> {
        let body = serde_json::json!({
            "path": path,
            "recursive": query.recursive,
            "unique": query.unique,
            "include_pattern": query.include_pattern,
        });
        let response: IncludesResponse = self.query(routes::LAUNCH_INCLUDES, Some(body)).await?;
        Ok(response.includes)
    }

    pub async fn load(&self, request: &LoadRequest) -> Result<LoadOutcome> {
        let body = serde_json::to_value(request)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        self.query(routes::LAUNCH_LOAD, Some(body)).await
    }

    pub async fn reload(&self, path: &str) -> Result<(String, Vec<String>)> {
        let response: ReloadResponse = self
            .query(routes::LAUNCH_RELOAD, Some(serde_json::json!({ "path": path })))
            .await?;
        Ok((response.resolved_path, response.argv))
    }

    pub async fn unload(&self, path: &str) -> Result<bool> {
        let response: UnloadResponse = self
            .query(routes::LAUNCH_UNLOAD, Some(serde_json::json!({ "path": path })))
            .await?;
        Ok(response.removed)
    }

    pub async fn loaded(&self) -> Result<Vec<LaunchDescriptor>> {
        let response: LoadedResponse = self.query(routes::LAUNCH_LOADED, None).await?;
        Ok(response.launches)
    }

    pub async fn mtimes(&self, path: &str) -> Result<MtimeReport> {
        self.query(routes::LAUNCH_MTIMES, Some(serde_json::json!({ "path": path })))
            .await
    }

    /// Query one route and decode the first successful reply
    async fn query<T: DeserializeOwned>(
        &self,
        route: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let key = api_keys::route_key(&self.machine_id, route);
        let payload = body.map(|b| b.to_string()).unwrap_or_default();

        let replies = self
            .session
            .get(&key)
            .payload(ZBytes::from(payload))
            .target(QueryTarget::BestMatching)
            .timeout(self.timeout)
            .await?;

        let start = Instant::now();
        while start.elapsed() < self.timeout {
            let wait = remaining(self.timeout, start);
            match tokio::time::timeout(wait, replies.recv_async()).await {
                Ok(Ok(reply)) => {
                    if let Ok(sample) = reply.result() {
                        let bytes = sample.payload().to_bytes();
                        return decode_reply(&bytes);
                    }
                }
                Ok(Err(_)) | Err(_) => break,
            }
        }

        Err(ClientError::NoReply(key))
    }
}

/// Time left of `timeout` since `start`, zero once it has passed
fn remaining(timeout: Duration, start: Instant) -> Duration {
    timeout.saturating_sub(start.elapsed())
}

/// Decode a reply body, turning error replies into [`ClientError::Remote`]
pub fn decode_reply<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

    if value.get("error").is_some() && value.get("kind").is_some() {
        let response: ErrorResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        return Err(response.into());
    }

    serde_json::from_value(value).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}
