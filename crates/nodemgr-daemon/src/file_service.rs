//! Remote filesystem view
//!
//! Directory listing and file content retrieval for remote clients. The
//! empty path lists the configured package search roots.

use indexmap::IndexMap;
use nodemgr_launch::PackageLocator;
use serde::{Deserialize, Serialize};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileServiceError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FileServiceError>;

/// Kind of a listed filesystem object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    /// Directory recognised as a package root
    Package,
    Symlink,
}

/// One filesystem object as seen remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub kind: FileKind,
    /// Size in bytes, 0 for directories
    pub size: u64,
    /// Modification time in milliseconds since epoch, 0 if unknown
    pub modified_ms: i64,
}

/// File bytes with the metadata observed at read time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub size: u64,
    pub modified_ms: i64,
    pub bytes: Vec<u8>,
}

/// Filesystem access for remote clients and the include resolver
#[derive(Debug, Clone)]
pub struct FileService {
    locator: Arc<dyn PackageLocator>,
}

impl FileService {
    pub fn new(locator: Arc<dyn PackageLocator>) -> Self {
        Self { locator }
    }

    /// Package locator backing the root listing
    pub fn locator(&self) -> &Arc<dyn PackageLocator> {
        &self.locator
    }

    /// List the entries of `path`, or the search roots when `path` is empty.
    ///
    /// A non-directory lists as a single entry for itself.
    pub fn list_path(&self, path: &str) -> Result<Vec<FileEntry>> {
        if path.is_empty() {
            return Ok(self.list_roots());
        }

        let dir = Path::new(path);
        let metadata =
            fs::metadata(dir).map_err(|_| FileServiceError::NotFound(path.to_string()))?;

        if !metadata.is_dir() {
            return Ok(vec![self.entry_for(dir)?]);
        }

        let read_dir = fs::read_dir(dir).map_err(|e| FileServiceError::Io {
            path: path.to_string(),
            source: e,
        })?;

        let mut entries = Vec::new();
        for entry in read_dir.flatten() {
            match self.entry_for(&entry.path()) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::debug!("Skipping entry in {}: {}", path, e),
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        log::debug!("list_path {}: {} entries", path, entries.len());
        Ok(entries)
    }

    /// One entry per configured root, in configuration order
    fn list_roots(&self) -> Vec<FileEntry> {
        self.locator
            .search_roots()
            .into_iter()
            .map(|root| {
                let kind = if self.locator.is_package_root(&root) {
                    FileKind::Package
                } else {
                    FileKind::Directory
                };
                let modified_ms = fs::metadata(&root)
                    .map(|m| modified_ms(&m))
                    .unwrap_or(0);
                FileEntry {
                    path: root.display().to_string(),
                    kind,
                    size: 0,
                    modified_ms,
                }
            })
            .collect()
    }

    fn entry_for(&self, path: &Path) -> Result<FileEntry> {
        let link_meta = fs::symlink_metadata(path)
            .map_err(|_| FileServiceError::NotFound(path.display().to_string()))?;

        if link_meta.file_type().is_symlink() {
            // Size and mtime of the target when the link resolves
            let target = fs::metadata(path).ok();
            return Ok(FileEntry {
                path: path.display().to_string(),
                kind: FileKind::Symlink,
                size: target.as_ref().filter(|m| m.is_file()).map(|m| m.len()).unwrap_or(0),
                modified_ms: target.as_ref().map(modified_ms).unwrap_or(0),
            });
        }

        let (kind, size) = if link_meta.is_dir() {
            if self.locator.is_package_root(path) {
                (FileKind::Package, 0)
            } else {
                (FileKind::Directory, 0)
            }
        } else {
            (FileKind::File, link_meta.len())
        };

        Ok(FileEntry {
            path: path.display().to_string(),
            kind,
            size,
            modified_ms: modified_ms(&link_meta),
        })
    }

    /// Read a regular file completely.
    pub fn get_file_content(&self, path: &str) -> Result<FileContent> {
        let metadata =
            fs::metadata(path).map_err(|_| FileServiceError::NotFound(path.to_string()))?;
        if !metadata.is_file() {
            return Err(FileServiceError::NotFound(path.to_string()));
        }

        let bytes = fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FileServiceError::NotFound(path.to_string()),
            _ => FileServiceError::Io {
                path: path.to_string(),
                source: e,
            },
        })?;

        Ok(FileContent {
            size: bytes.len() as u64,
            modified_ms: modified_ms(&metadata),
            bytes,
        })
    }

    /// Whether `path` is a regular file readable through this service
    pub fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Document text with invalid UTF-8 replaced
    pub fn read_text(&self, path: &Path) -> Result<String> {
        let content = self.get_file_content(&path.display().to_string())?;
        Ok(String::from_utf8_lossy(&content.bytes).into_owned())
    }

    /// Modification time of `path`, if it exists
    pub fn modified_ms(&self, path: &Path) -> Option<i64> {
        fs::metadata(path).ok().map(|m| modified_ms(&m))
    }

    /// All packages under the search roots, name to directory
    pub fn list_packages(&self) -> IndexMap<String, String> {
        self.locator
            .packages()
            .into_iter()
            .map(|p| (p.name, p.path.display().to_string()))
            .collect()
    }

    /// Files whose modification time differs from the one given.
    ///
    /// Missing files are reported with a time of 0.
    pub fn changed_files(&self, files: &IndexMap<String, i64>) -> IndexMap<String, i64> {
        files
            .iter()
            .filter_map(|(path, known_ms)| {
                let current = self.modified_ms(&PathBuf::from(path)).unwrap_or(0);
                (current != *known_ms).then(|| (path.clone(), current))
            })
            .collect()
    }
}

fn modified_ms(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
