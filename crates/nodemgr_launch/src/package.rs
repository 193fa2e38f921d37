//! Package discovery over a list of search roots
//!
//! A package is a directory carrying a `package.xml` manifest. Search roots
//! come from configuration (by default `ROS_PACKAGE_PATH`).

use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Manifest file marking a package root
pub const PACKAGE_MANIFEST: &str = "package.xml";

/// Marker files that exclude a directory tree from discovery
const IGNORE_MARKERS: &[&str] = &["CATKIN_IGNORE", "COLCON_IGNORE", "AMENT_IGNORE"];

/// A package found under one of the search roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    /// Package root directory (the one holding `package.xml`)
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackageError {
    #[error("Package not found: {0}")]
    PackageNotFound(String),
}

/// Maps package names to directories.
pub trait PackageLocator: Send + Sync + fmt::Debug {
    /// Directory of the named package
    fn find_package(&self, name: &str) -> Result<PathBuf, PackageError>;

    /// Configured search roots, in priority order
    fn search_roots(&self) -> Vec<PathBuf>;

    /// All packages visible through the search roots
    fn packages(&self) -> Vec<Package>;

    /// Whether `dir` is a package root
    fn is_package_root(&self, dir: &Path) -> bool {
        dir.join(PACKAGE_MANIFEST).is_file()
    }

    /// The innermost package containing `path`, if any
    fn package_of(&self, path: &Path) -> Option<Package> {
        path.ancestors()
            .find(|dir| self.is_package_root(dir))
            .map(|dir| Package {
                name: package_name(dir),
                path: dir.to_path_buf(),
            })
    }
}

/// Package locator backed by a colon-separated package path.
#[derive(Debug, Clone, Default)]
pub struct PackagePath {
    roots: Vec<PathBuf>,
}

impl PackagePath {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Creates a locator from `ROS_PACKAGE_PATH`; empty when unset.
    pub fn from_env() -> Self {
        Self::from_path(&std::env::var("ROS_PACKAGE_PATH").unwrap_or_default())
    }

    /// Creates a locator from a colon-separated root list.
    pub fn from_path(path: &str) -> Self {
        let roots = path
            .split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        Self { roots }
    }

    /// Walk every root, calling `visit` per package until it returns false.
    fn discover(&self, mut visit: impl FnMut(Package) -> bool) {
        for root in &self.roots {
            let mut walker = WalkDir::new(root).follow_links(true).into_iter();
            while let Some(entry) = walker.next() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                        continue;
                    }
                };
                if !entry.file_type().is_dir() {
                    continue;
                }

                let dir = entry.path();
                if entry.depth() > 0 && (is_hidden(dir) || is_ignored(dir)) {
                    walker.skip_current_dir();
                    continue;
                }

                if self.is_package_root(dir) {
                    let package = Package {
                        name: package_name(dir),
                        path: dir.to_path_buf(),
                    };
                    if !visit(package) {
                        return;
                    }
                    // Packages do not nest
                    walker.skip_current_dir();
                }
            }
        }
    }
}

impl PackageLocator for PackagePath {
    fn find_package(&self, name: &str) -> Result<PathBuf, PackageError> {
        let mut found = None;
        self.discover(|package| {
            if package.name == name {
                found = Some(package.path);
                false
            } else {
                true
            }
        });
        found.ok_or_else(|| PackageError::PackageNotFound(name.to_string()))
    }

    fn search_roots(&self) -> Vec<PathBuf> {
        self.roots.clone()
    }

    /// Earlier roots take priority for duplicate package names.
    fn packages(&self) -> Vec<Package> {
        let mut packages: Vec<Package> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        self.discover(|package| {
            if seen.insert(package.name.clone()) {
                packages.push(package);
            }
            true
        });
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        packages
    }
}

/// Name from the manifest's `<name>` element, else the directory name.
fn package_name(dir: &Path) -> String {
    let from_manifest = std::fs::read_to_string(dir.join(PACKAGE_MANIFEST))
        .ok()
        .and_then(|content| {
            let doc = roxmltree::Document::parse(&content).ok()?;
            let name = doc
                .root_element()
                .children()
                .find(|n| n.has_tag_name("name"))?
                .text()?
                .trim()
                .to_string();
            (!name.is_empty()).then_some(name)
        });

    from_manifest.unwrap_or_else(|| {
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

fn is_hidden(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn is_ignored(dir: &Path) -> bool {
    IGNORE_MARKERS.iter().any(|marker| dir.join(marker).exists())
}
