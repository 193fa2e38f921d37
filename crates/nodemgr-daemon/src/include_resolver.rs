//! Include graph resolution
//!
//! Expands the include directives of a launch description into a report of
//! [`IncludeRecord`]s. Two shapes are produced:
//!
//! - `unique = false`: one record per directive; with `recursive` each
//!   record's `nested` holds the target's own includes.
//! - `unique = true`: a flat list of distinct targets, breadth first, so the
//!   direct includes of the document come first in document order.
//!
//! A target already on the recursion stack is reported as a leaf.

use crate::file_service::FileService;
use nodemgr_launch::{IncludeScanner, LaunchFile, SubstitutionContext};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IncludeError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Invalid include pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, IncludeError>;

/// One include directive found in a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeRecord {
    /// 1-based line of the directive in its parent document
    pub line_number: usize,
    /// Resolved absolute path, or the raw reference if it could not be resolved
    pub target_path: String,
    pub exists: bool,
    #[serde(default)]
    pub nested: Vec<IncludeRecord>,
}

impl IncludeRecord {
    /// Number of records in the forest, nested ones included
    pub fn count_all(records: &[IncludeRecord]) -> usize {
        records
            .iter()
            .map(|r| 1 + Self::count_all(&r.nested))
            .sum()
    }
}

/// Traversal options for [`IncludeResolver::resolve_includes`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeQuery {
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub unique: bool,
    /// Regular expressions replacing the default directive patterns
    #[serde(default)]
    pub include_pattern: Vec<String>,
}

/// A directive with its target interpreted
#[derive(Debug)]
struct Child {
    line_number: usize,
    target_path: String,
    /// Interpreted path when it names an existing file
    resolved: Option<PathBuf>,
}

impl Child {
    fn exists(&self) -> bool {
        self.resolved.is_some()
    }

    fn into_record(self, nested: Vec<IncludeRecord>) -> IncludeRecord {
        IncludeRecord {
            line_number: self.line_number,
            target_path: self.target_path,
            exists: self.resolved.is_some(),
            nested,
        }
    }
}

/// Resolves include graphs through the file service
#[derive(Debug, Clone)]
pub struct IncludeResolver {
    files: Arc<FileService>,
}

impl IncludeResolver {
    pub fn new(files: Arc<FileService>) -> Self {
        Self { files }
    }

    /// Resolve the includes of the document at `path`.
    ///
    /// Fails only when `path` itself is missing or a pattern does not compile;
    /// missing targets are reported with `exists = false`.
    pub fn resolve_includes(&self, path: &str, query: &IncludeQuery) -> Result<Vec<IncludeRecord>> {
        let scanner = IncludeScanner::new(&query.include_pattern)?;

        let root = self
            .base_context()
            .interpret(path)
            .map_err(|_| IncludeError::NotFound(path.to_string()))?;
        if !self.files.is_file(&root) {
            return Err(IncludeError::NotFound(path.to_string()));
        }

        let records = if query.unique {
            self.expand_unique(&root, query.recursive, &scanner)
        } else {
            let mut stack = HashSet::from([root.clone()]);
            self.expand_tree(&root, query.recursive, &scanner, &mut stack)
        };

        log::debug!(
            "Resolved {} includes of {} (recursive={}, unique={})",
            IncludeRecord::count_all(&records),
            root.display(),
            query.recursive,
            query.unique
        );
        Ok(records)
    }

    /// One record per directive, nesting preserved when recursive
    fn expand_tree(
        &self,
        doc: &Path,
        recursive: bool,
        scanner: &IncludeScanner,
        stack: &mut HashSet<PathBuf>,
    ) -> Vec<IncludeRecord> {
        let mut records = Vec::new();

        for child in self.children(doc, scanner) {
            let mut nested = Vec::new();
            if recursive {
                if let Some(target) = child.resolved.clone() {
                    if stack.insert(target.clone()) {
                        nested = self.expand_tree(&target, recursive, scanner, stack);
                        stack.remove(&target);
                    } else {
                        log::debug!("Include cycle at {}, not descending", target.display());
                    }
                }
            }
            records.push(child.into_record(nested));
        }

        records
    }

    /// Distinct targets, breadth first
    fn expand_unique(&self, root: &Path, recursive: bool, scanner: &IncludeScanner) -> Vec<IncludeRecord> {
        let mut records = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::from([root.to_path_buf()]);

        while let Some(doc) = queue.pop_front() {
            for child in self.children(&doc, scanner) {
                if !seen.insert(child.target_path.clone()) {
                    continue;
                }
                if recursive && child.exists() {
                    if let Some(target) = child.resolved.as_ref().filter(|t| t.as_path() != root) {
                        queue.push_back(target.clone());
                    }
                }
                records.push(child.into_record(Vec::new()));
            }
        }

        records
    }

    /// Direct includes of `doc` in document order
    fn children(&self, doc: &Path, scanner: &IncludeScanner) -> Vec<Child> {
        let content = match self.files.read_text(doc) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Cannot read {} for include scan: {}", doc.display(), e);
                return Vec::new();
            }
        };

        let ctx = self.document_context(doc, &content);

        scanner
            .scan(&content)
            .into_iter()
            .map(|directive| match ctx.interpret(&directive.raw) {
                Ok(target) => {
                    let exists = self.files.is_file(&target);
                    Child {
                        line_number: directive.line_number,
                        target_path: target.display().to_string(),
                        resolved: exists.then_some(target),
                    }
                }
                Err(e) => {
                    log::debug!(
                        "{}:{}: cannot resolve '{}': {}",
                        doc.display(),
                        directive.line_number,
                        directive.raw,
                        e
                    );
                    Child {
                        line_number: directive.line_number,
                        target_path: directive.raw,
                        resolved: None,
                    }
                }
            })
            .collect()
    }

    /// Substitution context for references inside `doc`.
    ///
    /// `$(arg ..)` references resolve against the document's own declared
    /// values and defaults where those resolve.
    fn document_context(&self, doc: &Path, content: &str) -> SubstitutionContext {
        let mut ctx = self.base_context().with_current_file(doc);

        if let Ok(launch_file) = LaunchFile::from_xml(doc, content) {
            for arg in launch_file.args.values() {
                let Some(raw) = arg.value.as_ref().or(arg.default.as_ref()) else {
                    continue;
                };
                if let Ok(value) = ctx.substitute(raw) {
                    ctx.args.insert(arg.name.clone(), value);
                }
            }
        }

        ctx
    }

    fn base_context(&self) -> SubstitutionContext {
        SubstitutionContext::new().with_locator(self.files.locator().clone())
    }
}

