//! Launch loader with open-document tracking
//!
//! Turns a load request into a loaded launch description. A request that
//! cannot be completed unambiguously returns a selection outcome carrying the
//! choices the caller must pick from before resubmitting:
//!
//! 1. `path` empty and several files named `name` in `package`
//!    -> [`LoadOutcome::NeedsFileChoice`]
//! 2. `request_arguments` set and declared arguments missing from the request
//!    -> [`LoadOutcome::NeedsArgumentChoice`]
//! 3. the resolved document is already open -> [`LoadError::AlreadyOpen`]

use crate::file_service::FileService;
use crate::include_resolver::{IncludeError, IncludeQuery, IncludeResolver};
use indexmap::IndexMap;
use nodemgr_launch::config::normalize;
use nodemgr_launch::{
    argv, LaunchFile, LaunchFileError, SubstitutionContext, SubstitutionError,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Launch file already open: {0}")]
    AlreadyOpen(String),

    #[error(transparent)]
    LaunchFile(#[from] LaunchFileError),

    #[error("Substitution failed: {0}")]
    Substitution(#[from] SubstitutionError),

    #[error(transparent)]
    Include(#[from] IncludeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// A currently open launch description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDescriptor {
    pub resolved_path: String,
    /// Package containing the document, if any
    pub package: Option<String>,
    /// Resolved argument values in declaration order
    pub arguments: IndexMap<String, String>,
    /// `name:=value` process arguments
    pub argv: Vec<String>,
    /// Fully qualified names of the enabled nodes
    pub nodes: Vec<String>,
    pub loaded_at_ms: i64,
}

/// Load request as sent by clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadRequest {
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub arguments: IndexMap<String, String>,
    #[serde(default)]
    pub request_arguments: bool,
}

/// Result of a load round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded {
        resolved_path: String,
        argv: Vec<String>,
    },
    /// Resubmit with one of `choices` as the path
    #[serde(rename = "file_selection_required")]
    NeedsFileChoice { choices: Vec<String> },
    /// Resubmit with `request_arguments = false` and the arguments filled in
    #[serde(rename = "argument_selection_required")]
    NeedsArgumentChoice { choices: IndexMap<String, String> },
}

/// Modification times of an open document and everything it includes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtimeReport {
    pub path: String,
    pub modified_ms: i64,
    pub included: IndexMap<String, i64>,
}

/// Owns the set of open launch descriptions
pub struct LaunchLoader {
    disk: LoaderDisk,
    /// Open documents keyed by resolved path, in load order
    open: RwLock<IndexMap<String, LaunchDescriptor>>,
}

impl LaunchLoader {
    pub fn new(files: Arc<FileService>) -> Self {
        Self {
            disk: LoaderDisk {
                resolver: IncludeResolver::new(files.clone()),
                files,
            },
            open: RwLock::new(IndexMap::new()),
        }
    }

    /// Run one round of the load protocol.
    pub async fn load(&self, request: LoadRequest) -> Result<LoadOutcome> {
        let disk = self.disk.clone();
        let (launch_file, request) = match self
            .blocking(move || disk.locate(&request).map(|located| (located, request)))
            .await??
        {
            (Located::Choice(outcome), _) => return Ok(outcome),
            (Located::File(launch_file), request) => (launch_file, request),
        };

        let resolved_path = launch_file.path.display().to_string();
        if self.open.read().await.contains_key(&resolved_path) {
            return Err(LoadError::AlreadyOpen(resolved_path));
        }

        let disk = self.disk.clone();
        let descriptor = self
            .blocking(move || disk.build_descriptor(&launch_file, &request.arguments))
            .await??;
        let argv = descriptor.argv.clone();

        // Re-check under the write lock; a concurrent load may have won
        let mut open = self.open.write().await;
        if open.contains_key(&resolved_path) {
            return Err(LoadError::AlreadyOpen(resolved_path));
        }
        open.insert(resolved_path.clone(), descriptor);
        drop(open);

        log::info!("Loaded launch file {}", resolved_path);
        Ok(LoadOutcome::Loaded {
            resolved_path,
            argv,
        })
    }

    /// Re-read an open document from disk.
    ///
    /// Previously resolved values are kept for arguments the document still
    /// declares; new declarations take their defaults. The write lock is held
    /// for the whole rebuild.
    pub async fn reload(&self, path: &str) -> Result<(String, Vec<String>)> {
        let resolved = self.disk.resolve_key(path)?;
        let resolved_path = resolved.display().to_string();

        let mut open = self.open.write().await;
        let previous = open
            .get(&resolved_path)
            .map(|descriptor| descriptor.arguments.clone())
            .ok_or_else(|| LoadError::ResourceNotFound(resolved_path.clone()))?;

        let disk = self.disk.clone();
        let descriptor = self
            .blocking(move || -> Result<LaunchDescriptor> {
                let launch_file = LaunchFile::from_file(&resolved)?;
                let supplied: IndexMap<String, String> = previous
                    .into_iter()
                    .filter(|(name, _)| {
                        launch_file
                            .args
                            .get(name)
                            .map(|arg| arg.is_requestable())
                            .unwrap_or(false)
                    })
                    .collect();
                disk.build_descriptor(&launch_file, &supplied)
            })
            .await??;
        let argv = descriptor.argv.clone();

        open.insert(resolved_path.clone(), descriptor);
        drop(open);

        log::info!("Reloaded launch file {}", resolved_path);
        Ok((resolved_path, argv))
    }

    /// Close a document. Returns whether it was open.
    pub async fn unload(&self, path: &str) -> bool {
        let Ok(resolved) = self.disk.resolve_key(path) else {
            return false;
        };
        let resolved_path = resolved.display().to_string();

        let removed = self.open.write().await.shift_remove(&resolved_path).is_some();
        if removed {
            log::info!("Unloaded launch file {}", resolved_path);
        } else {
            log::debug!("Unload of {}: not open", resolved_path);
        }
        removed
    }

    /// Open documents in load order
    pub async fn loaded(&self) -> Vec<LaunchDescriptor> {
        self.open.read().await.values().cloned().collect()
    }

    /// Get a single open document
    pub async fn get(&self, path: &str) -> Option<LaunchDescriptor> {
        let resolved = self.disk.resolve_key(path).ok()?;
        self.open
            .read()
            .await
            .get(&resolved.display().to_string())
            .cloned()
    }

    /// Modification times of an open document and all its includes
    pub async fn mtimes(&self, path: &str) -> Result<MtimeReport> {
        let resolved = self.disk.resolve_key(path)?;
        let resolved_path = resolved.display().to_string();
        if !self.open.read().await.contains_key(&resolved_path) {
            return Err(LoadError::ResourceNotFound(resolved_path));
        }

        let disk = self.disk.clone();
        self.blocking(move || disk.mtimes(&resolved)).await?
    }

    /// Run filesystem work off the async workers
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| LoadError::Internal(format!("Blocking task failed: {}", e)))
    }
}

/// Where a request points once the package lookup is done
enum Located {
    Choice(LoadOutcome),
    File(LaunchFile),
}

/// Filesystem side of the loader, run on the blocking pool
#[derive(Debug, Clone)]
struct LoaderDisk {
    files: Arc<FileService>,
    resolver: IncludeResolver,
}

impl LoaderDisk {
    /// Resolve the request to one parsed document or a selection outcome
    fn locate(&self, request: &LoadRequest) -> Result<Located> {
        let path = if request.path.trim().is_empty() {
            let mut candidates = self.find_candidates(&request.package, &request.name)?;
            match candidates.len() {
                0 => {
                    return Err(LoadError::ResourceNotFound(format!(
                        "no launch file '{}' in package '{}'",
                        request.name, request.package
                    )))
                }
                1 => candidates.remove(0),
                _ => {
                    log::info!(
                        "{} candidates for '{}' in '{}', asking for a choice",
                        candidates.len(),
                        request.name,
                        request.package
                    );
                    return Ok(Located::Choice(LoadOutcome::NeedsFileChoice {
                        choices: candidates
                            .into_iter()
                            .map(|p| p.display().to_string())
                            .collect(),
                    }));
                }
            }
        } else {
            self.resolve_path(&request.path)?
        };

        let launch_file = LaunchFile::from_file(&path)?;

        if request.request_arguments {
            let requestable = launch_file.requestable_args();
            if requestable
                .keys()
                .any(|name| !request.arguments.contains_key(name))
            {
                let choices = requestable
                    .into_iter()
                    .map(|(name, default)| {
                        let value = request.arguments.get(&name).cloned().unwrap_or(default);
                        (name, value)
                    })
                    .collect();
                return Ok(Located::Choice(LoadOutcome::NeedsArgumentChoice { choices }));
            }
        }

        Ok(Located::File(launch_file))
    }

    fn build_descriptor(
        &self,
        launch_file: &LaunchFile,
        supplied: &IndexMap<String, String>,
    ) -> Result<LaunchDescriptor> {
        let ctx = self.base_context().with_current_file(&launch_file.path);
        let arguments = launch_file.resolve_args(supplied, &ctx)?;
        let nodes = launch_file.node_names(&ctx.clone().with_args(
            arguments
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ));

        Ok(LaunchDescriptor {
            resolved_path: launch_file.path.display().to_string(),
            package: self
                .files
                .locator()
                .package_of(&launch_file.path)
                .map(|p| p.name),
            argv: argv(&arguments),
            arguments,
            nodes,
            loaded_at_ms: chrono::Utc::now().timestamp_millis(),
        })
    }

    fn mtimes(&self, resolved: &Path) -> Result<MtimeReport> {
        let resolved_path = resolved.display().to_string();
        let query = IncludeQuery {
            recursive: true,
            unique: true,
            include_pattern: Vec::new(),
        };
        let includes = self.resolver.resolve_includes(&resolved_path, &query)?;

        let included = includes
            .into_iter()
            .filter(|record| record.exists)
            .map(|record| {
                let mtime = self
                    .files
                    .modified_ms(Path::new(&record.target_path))
                    .unwrap_or(0);
                (record.target_path, mtime)
            })
            .collect();

        Ok(MtimeReport {
            modified_ms: self.files.modified_ms(resolved).unwrap_or(0),
            path: resolved_path,
            included,
        })
    }

    /// Files named `name` inside `package` as absolute normalized paths, sorted
    fn find_candidates(&self, package: &str, name: &str) -> Result<Vec<PathBuf>> {
        if package.is_empty() || name.is_empty() {
            return Err(LoadError::ResourceNotFound(
                "either a path or a package and name are required".to_string(),
            ));
        }

        let dir = self
            .files
            .locator()
            .find_package(package)
            .map_err(|e| LoadError::ResourceNotFound(e.to_string()))?;

        let mut candidates: Vec<PathBuf> = WalkDir::new(&dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && entry.path().ends_with(name))
            .map(|entry| absolute(entry.path()))
            .collect();

        candidates.sort();
        candidates.dedup();
        Ok(candidates)
    }

    /// Interpret `path` and require an existing file
    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let resolved = self.base_context().interpret(path)?;
        if !self.files.is_file(&resolved) {
            return Err(LoadError::ResourceNotFound(resolved.display().to_string()));
        }
        Ok(resolved)
    }

    /// Interpret `path` into an open-document key; the file need not exist
    fn resolve_key(&self, path: &str) -> Result<PathBuf> {
        self.base_context()
            .interpret(path)
            .map_err(|_| LoadError::ResourceNotFound(path.to_string()))
    }

    fn base_context(&self) -> SubstitutionContext {
        SubstitutionContext::new().with_locator(self.files.locator().clone())
    }
}

/// Anchor `path` at the working directory and normalize it the same way
/// [`SubstitutionContext::interpret`] does
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    std::env::current_dir()
        .map(|cwd| normalize(&cwd.join(path)))
        .unwrap_or_else(|_| normalize(path))
}
