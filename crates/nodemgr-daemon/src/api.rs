//! JSON request dispatch
//!
//! Transport-independent handling of API routes. The Zenoh adapter strips the
//! key expression prefix and hands the remaining route plus the raw payload
//! to [`ApiHandler::handle`], which always produces a JSON reply.
//!
//! | Route | Request | Response |
//! |-------|---------|----------|
//! | `health` | - | `{"status":"ok"}` |
//! | `files/list` | `{"path"}` | `{"entries":[..]}` |
//! | `files/content` | `{"path"}` | `{"size","modified_ms","content_hex"}` |
//! | `files/packages` | - | `{"packages":{name:dir}}` |
//! | `files/changed` | `{"files":{path:ms}}` | `{"changed":{path:ms}}` |
//! | `launch/includes` | `{"path","recursive","unique","include_pattern"}` | `{"includes":[..]}` |
//! | `launch/load` | `{"package","name","path","arguments","request_arguments"}` | tagged `status` |
//! | `launch/reload` | `{"path"}` | `{"resolved_path","argv"}` |
//! | `launch/unload` | `{"path"}` | `{"removed"}` |
//! | `launch/loaded` | - | `{"launches":[..]}` |
//! | `launch/mtimes` | `{"path"}` | `{"path","modified_ms","included"}` |

use crate::file_service::{FileEntry, FileService, FileServiceError};
use crate::include_resolver::{IncludeError, IncludeQuery, IncludeRecord, IncludeResolver};
use crate::launch_loader::{LaunchDescriptor, LaunchLoader, LoadError, LoadRequest};
use indexmap::IndexMap;
use nodemgr_launch::{LaunchFileError, SubstitutionError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Route names relative to the API prefix
pub mod routes {
    pub const HEALTH: &str = "health";
    pub const FILES_LIST: &str = "files/list";
    pub const FILES_CONTENT: &str = "files/content";
    pub const FILES_PACKAGES: &str = "files/packages";
    pub const FILES_CHANGED: &str = "files/changed";
    pub const LAUNCH_INCLUDES: &str = "launch/includes";
    pub const LAUNCH_LOAD: &str = "launch/load";
    pub const LAUNCH_RELOAD: &str = "launch/reload";
    pub const LAUNCH_UNLOAD: &str = "launch/unload";
    pub const LAUNCH_LOADED: &str = "launch/loaded";
    pub const LAUNCH_MTIMES: &str = "launch/mtimes";

    /// Every route served by the daemon
    pub const ALL: &[&str] = &[
        HEALTH,
        FILES_LIST,
        FILES_CONTENT,
        FILES_PACKAGES,
        FILES_CHANGED,
        LAUNCH_INCLUDES,
        LAUNCH_LOAD,
        LAUNCH_RELOAD,
        LAUNCH_UNLOAD,
        LAUNCH_LOADED,
        LAUNCH_MTIMES,
    ];
}

/// Machine-readable failure category carried in every error reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PackageNotFound,
    EnvironmentVariableNotFound,
    AlreadyOpen,
    ResourceNotFound,
    InvalidPattern,
    Parse,
    BadRequest,
    UnknownEndpoint,
    Internal,
}

impl ErrorKind {
    /// HTTP-like status code for the kind
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::NotFound
            | ErrorKind::PackageNotFound
            | ErrorKind::EnvironmentVariableNotFound
            | ErrorKind::ResourceNotFound
            | ErrorKind::UnknownEndpoint => 404,
            ErrorKind::AlreadyOpen => 409,
            ErrorKind::InvalidPattern | ErrorKind::BadRequest => 400,
            ErrorKind::Parse => 422,
            ErrorKind::Internal => 500,
        }
    }
}

/// JSON error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    pub code: u16,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Files(#[from] FileServiceError),

    #[error(transparent)]
    Include(#[from] IncludeError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::UnknownEndpoint(_) => ErrorKind::UnknownEndpoint,
            ApiError::BadRequest(_) => ErrorKind::BadRequest,
            ApiError::Files(FileServiceError::NotFound(_)) => ErrorKind::NotFound,
            ApiError::Files(FileServiceError::Io { .. }) => ErrorKind::Internal,
            ApiError::Include(IncludeError::NotFound(_)) => ErrorKind::NotFound,
            ApiError::Include(IncludeError::InvalidPattern(_)) => ErrorKind::InvalidPattern,
            ApiError::Load(e) => load_error_kind(e),
            ApiError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> u16 {
        self.kind().code()
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
            code: self.code(),
        }
    }
}

fn load_error_kind(error: &LoadError) -> ErrorKind {
    match error {
        LoadError::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
        LoadError::AlreadyOpen(_) => ErrorKind::AlreadyOpen,
        LoadError::LaunchFile(LaunchFileError::Io { .. }) => ErrorKind::ResourceNotFound,
        LoadError::LaunchFile(_) => ErrorKind::Parse,
        LoadError::Substitution(e) => substitution_error_kind(e),
        LoadError::Include(IncludeError::NotFound(_)) => ErrorKind::ResourceNotFound,
        LoadError::Include(IncludeError::InvalidPattern(_)) => ErrorKind::InvalidPattern,
        LoadError::Internal(_) => ErrorKind::Internal,
    }
}

fn substitution_error_kind(error: &SubstitutionError) -> ErrorKind {
    match error {
        SubstitutionError::PackageNotFound(_) => ErrorKind::PackageNotFound,
        SubstitutionError::EnvironmentVariableNotFound(_) => {
            ErrorKind::EnvironmentVariableNotFound
        }
        SubstitutionError::UndefinedArg(_) => ErrorKind::BadRequest,
        _ => ErrorKind::Parse,
    }
}

/// Request carrying a single path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathRequest {
    #[serde(default)]
    pub path: String,
}

/// JSON request for changed files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangedFilesRequest {
    #[serde(default)]
    pub files: IndexMap<String, i64>,
}

/// JSON request for include resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludesRequest {
    #[serde(default)]
    pub path: String,
    #[serde(flatten)]
    pub query: IncludeQuery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    pub entries: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentResponse {
    pub size: u64,
    pub modified_ms: i64,
    /// Hex-encoded file bytes
    pub content_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagesResponse {
    pub packages: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFilesResponse {
    pub changed: IndexMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludesResponse {
    pub includes: Vec<IncludeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub resolved_path: String,
    pub argv: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnloadResponse {
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedResponse {
    pub launches: Vec<LaunchDescriptor>,
}

/// Routes API requests to the daemon services
#[derive(Clone)]
pub struct ApiHandler {
    files: Arc<FileService>,
    resolver: IncludeResolver,
    loader: Arc<LaunchLoader>,
}

impl ApiHandler {
    pub fn new(files: Arc<FileService>, loader: Arc<LaunchLoader>) -> Self {
        Self {
            resolver: IncludeResolver::new(files.clone()),
            files,
            loader,
        }
    }

    /// Shared launch loader
    pub fn loader(&self) -> &Arc<LaunchLoader> {
        &self.loader
    }

    /// Handle a request and serialize the reply, success or failure.
    pub async fn handle(&self, route: &str, payload: Option<&[u8]>) -> String {
        let reply = match self.dispatch(route, payload).await {
            Ok(value) => serde_json::to_string(&value),
            Err(e) => {
                log::debug!("API {} failed: {}", route, e);
                serde_json::to_string(&e.to_response())
            }
        };

        reply.unwrap_or_else(|e| {
            format!(
                r#"{{"error":"Failed to serialize: {}","kind":"internal","code":500}}"#,
                e
            )
        })
    }

    /// Route a request to the owning service.
    pub async fn dispatch(
        &self,
        route: &str,
        payload: Option<&[u8]>,
    ) -> Result<serde_json::Value> {
        log::debug!("Dispatching API route: {}", route);

        match route {
            routes::HEALTH => to_value(HealthResponse {
                status: "ok".to_string(),
            }),

            routes::FILES_LIST => {
                let request: PathRequest = parse_payload(payload)?;
                let files = self.files.clone();
                let entries = self
                    .blocking(move || files.list_path(&request.path))
                    .await??;
                to_value(ListResponse { entries })
            }

            routes::FILES_CONTENT => {
                let request: PathRequest = parse_payload(payload)?;
                let files = self.files.clone();
                let content = self
                    .blocking(move || files.get_file_content(&request.path))
                    .await??;
                to_value(ContentResponse {
                    size: content.size,
                    modified_ms: content.modified_ms,
                    content_hex: hex::encode(&content.bytes),
                })
            }

            routes::FILES_PACKAGES => {
                let files = self.files.clone();
                let packages = self.blocking(move || files.list_packages()).await?;
                to_value(PackagesResponse { packages })
            }

            routes::FILES_CHANGED => {
                let request: ChangedFilesRequest = parse_payload(payload)?;
                let files = self.files.clone();
                let changed = self
                    .blocking(move || files.changed_files(&request.files))
                    .await?;
                to_value(ChangedFilesResponse { changed })
            }

            routes::LAUNCH_INCLUDES => {
                let request: IncludesRequest = parse_payload(payload)?;
                let resolver = self.resolver.clone();
                let includes = self
                    .blocking(move || resolver.resolve_includes(&request.path, &request.query))
                    .await??;
                to_value(IncludesResponse { includes })
            }

            routes::LAUNCH_LOAD => {
                let request: LoadRequest = parse_payload(payload)?;
                let outcome = self.loader.load(request).await?;
                to_value(outcome)
            }

            routes::LAUNCH_RELOAD => {
                let request: PathRequest = parse_payload(payload)?;
                let (resolved_path, argv) = self.loader.reload(&request.path).await?;
                to_value(ReloadResponse {
                    resolved_path,
                    argv,
                })
            }

            routes::LAUNCH_UNLOAD => {
                let request: PathRequest = parse_payload(payload)?;
                let removed = self.loader.unload(&request.path).await;
                to_value(UnloadResponse { removed })
            }

            routes::LAUNCH_LOADED => to_value(LoadedResponse {
                launches: self.loader.loaded().await,
            }),

            routes::LAUNCH_MTIMES => {
                let request: PathRequest = parse_payload(payload)?;
                let report = self.loader.mtimes(&request.path).await?;
                to_value(report)
            }

            _ => Err(ApiError::UnknownEndpoint(route.to_string())),
        }
    }

    /// Run filesystem work off the async workers
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| ApiError::Internal(format!("Blocking task failed: {}", e)))
    }
}

/// Deserialize a JSON payload; a missing or empty payload means `{}`
fn parse_payload<T: DeserializeOwned>(payload: Option<&[u8]>) -> Result<T> {
    let bytes = match payload {
        Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => bytes,
        _ => b"{}".as_slice(),
    };
    serde_json::from_slice(bytes).map_err(|e| ApiError::BadRequest(format!("Failed to parse JSON: {}", e)))
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(format!("Failed to serialize: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodemgr_launch::PackagePath;

    fn handler(roots: Vec<std::path::PathBuf>) -> ApiHandler {
        let files = Arc::new(FileService::new(Arc::new(PackagePath::new(roots))));
        let loader = Arc::new(LaunchLoader::new(files.clone()));
        ApiHandler::new(files, loader)
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::EnvironmentVariableNotFound).unwrap();
        assert_eq!(json, r#""environment_variable_not_found""#);
        assert_eq!(ErrorKind::AlreadyOpen.code(), 409);
        assert_eq!(ErrorKind::UnknownEndpoint.code(), 404);
    }

    #[test]
    fn test_error_kinds_are_distinct_per_failure() {
        let cases = vec![
            (
                ApiError::Files(FileServiceError::NotFound("x".into())),
                ErrorKind::NotFound,
            ),
            (
                ApiError::Load(LoadError::AlreadyOpen("x".into())),
                ErrorKind::AlreadyOpen,
            ),
            (
                ApiError::Load(LoadError::ResourceNotFound("x".into())),
                ErrorKind::ResourceNotFound,
            ),
            (
                ApiError::Load(LoadError::Substitution(SubstitutionError::PackageNotFound(
                    "p".into(),
                ))),
                ErrorKind::PackageNotFound,
            ),
            (
                ApiError::Load(LoadError::LaunchFile(LaunchFileError::Parse("bad".into()))),
                ErrorKind::Parse,
            ),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind, "{}", error);
        }
    }

    #[tokio::test]
    async fn test_health() {
        let api = handler(vec![]);
        let reply = api.handle(routes::HEALTH, None).await;
        assert_eq!(reply, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let api = handler(vec![]);
        let reply = api.handle("files/nope", None).await;
        let error: ErrorResponse = serde_json::from_str(&reply).unwrap();
        assert_eq!(error.kind, ErrorKind::UnknownEndpoint);
        assert_eq!(error.code, 404);
    }

    #[tokio::test]
    async fn test_bad_payload() {
        let api = handler(vec![]);
        let reply = api
            .handle(routes::FILES_LIST, Some(b"{not json".as_slice()))
            .await;
        let error: ErrorResponse = serde_json::from_str(&reply).unwrap();
        assert_eq!(error.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_content_is_hex_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.launch");
        std::fs::write(&path, b"<launch/>\n").unwrap();

        let api = handler(vec![]);
        let payload = serde_json::json!({ "path": path.display().to_string() }).to_string();
        let value = api
            .dispatch(routes::FILES_CONTENT, Some(payload.as_bytes()))
            .await
            .unwrap();
        let content: ContentResponse = serde_json::from_value(value).unwrap();

        assert_eq!(content.size, 10);
        assert_eq!(hex::decode(content.content_hex).unwrap(), b"<launch/>\n");
    }

    #[tokio::test]
    async fn test_unload_of_unknown_path() {
        let api = handler(vec![]);
        let value = api
            .dispatch(routes::LAUNCH_UNLOAD, Some(br#"{"path":"/nowhere.launch"}"#.as_slice()))
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({ "removed": false }));
    }

    #[tokio::test]
    async fn test_empty_loaded_list() {
        let api = handler(vec![]);
        let value = api.dispatch(routes::LAUNCH_LOADED, None).await.unwrap();
        assert_eq!(value, serde_json::json!({ "launches": [] }));
    }
}
