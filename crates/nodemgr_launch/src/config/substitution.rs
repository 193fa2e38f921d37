//! Substitution engine for $(find), $(env), $(optenv), $(arg), $(dirname) patterns

use crate::package::PackageLocator;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Regex for matching substitution patterns: $(type value)
static SUBSTITUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\((\w+)\s+([^)]+)\)|\$\((\w+)\)").unwrap());

/// Regex for package URLs: package://name/rest or pkg://name/rest
static PACKAGE_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:package|pkg)://([^/]+)(/.*)?$").unwrap());

/// Substitution context containing all available variables
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    /// Launch file arguments
    pub args: HashMap<String, String>,
    /// Additional environment variables, checked before the process environment
    pub env: HashMap<String, String>,
    /// Resolves `$(find pkg)` and package URLs
    pub locator: Option<Arc<dyn PackageLocator>>,
    /// Document being interpreted; anchors `$(dirname)` and relative paths
    pub current_file: Option<PathBuf>,
}

impl SubstitutionContext {
    /// Create a new substitution context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Add multiple arguments
    pub fn with_args(mut self, args: HashMap<String, String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Use a package locator for `$(find)` lookups
    pub fn with_locator(mut self, locator: Arc<dyn PackageLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Set the document the substituted strings come from
    pub fn with_current_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.current_file = Some(path.into());
        self
    }

    /// Directory of the current document, if one is set
    pub fn current_dir(&self) -> Option<&Path> {
        self.current_file.as_deref().and_then(Path::parent)
    }

    /// Expand a raw path string into an absolute, lexically normalized path.
    ///
    /// Substitutes all tokens, expands `package://` URLs, and anchors relative
    /// results at the current document's directory (or the working directory
    /// when there is no current document).
    pub fn interpret(&self, raw_path: &str) -> Result<PathBuf, SubstitutionError> {
        let substituted = self.substitute(raw_path.trim())?;

        let expanded = match PACKAGE_URL_PATTERN.captures(&substituted) {
            Some(caps) => {
                let package = &caps[1];
                let dir = self.find_package(package)?;
                let rest = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                dir.join(rest.trim_start_matches('/'))
            }
            None => PathBuf::from(substituted),
        };

        let absolute = if expanded.is_absolute() {
            expanded
        } else if let Some(dir) = self.current_dir() {
            dir.join(expanded)
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&expanded))
                .unwrap_or(expanded)
        };

        Ok(normalize(&absolute))
    }

    /// Substitute all patterns in a string
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut result = input.to_string();
        let mut last_result = String::new();

        // Iterate until no more substitutions are made (handles nested substitutions)
        let max_iterations = 10;
        let mut iterations = 0;

        while result != last_result && iterations < max_iterations {
            last_result = result.clone();
            result = self.substitute_once(&result)?;
            iterations += 1;
        }

        if iterations >= max_iterations && result.contains("$(") {
            return Err(SubstitutionError::MaxIterationsExceeded(input.to_string()));
        }

        Ok(result)
    }

    /// Perform a single pass of substitution
    fn substitute_once(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut error: Option<SubstitutionError> = None;

        let result = SUBSTITUTION_PATTERN.replace_all(input, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }

            match self.resolve_capture(caps) {
                Ok(value) => value,
                Err(e) => {
                    error = Some(e);
                    String::new()
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        Ok(result.into_owned())
    }

    /// Resolve a single capture group
    fn resolve_capture(&self, caps: &Captures) -> Result<String, SubstitutionError> {
        // Pattern 1: $(type value) - e.g., $(find my_pkg)
        if let (Some(subst_type), Some(value)) = (caps.get(1), caps.get(2)) {
            return self.resolve_typed(subst_type.as_str(), value.as_str().trim());
        }

        // Pattern 2: $(type) - e.g., $(dirname)
        if let Some(subst_type) = caps.get(3) {
            return self.resolve_typed(subst_type.as_str(), "");
        }

        Err(SubstitutionError::InvalidPattern(
            caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
        ))
    }

    /// Resolve a typed substitution
    fn resolve_typed(&self, subst_type: &str, value: &str) -> Result<String, SubstitutionError> {
        match subst_type {
            "find" => self
                .find_package(value)
                .map(|dir| dir.to_string_lossy().into_owned()),
            "arg" => self.resolve_arg(value),
            "env" => self.resolve_env(value),
            "optenv" => Ok(self.resolve_optenv(value)),
            "dirname" => self
                .current_dir()
                .map(|dir| dir.to_string_lossy().into_owned())
                .ok_or(SubstitutionError::NoCurrentDocument),
            _ => Err(SubstitutionError::UnknownType(subst_type.to_string())),
        }
    }

    fn find_package(&self, name: &str) -> Result<PathBuf, SubstitutionError> {
        let locator = self
            .locator
            .as_ref()
            .ok_or_else(|| SubstitutionError::PackageNotFound(name.to_string()))?;
        locator
            .find_package(name)
            .map_err(|_| SubstitutionError::PackageNotFound(name.to_string()))
    }

    /// Resolve an argument reference
    fn resolve_arg(&self, name: &str) -> Result<String, SubstitutionError> {
        self.args
            .get(name)
            .cloned()
            .ok_or_else(|| SubstitutionError::UndefinedArg(name.to_string()))
    }

    /// Resolve an environment variable reference
    fn resolve_env(&self, name: &str) -> Result<String, SubstitutionError> {
        // First check our local env overrides
        if let Some(value) = self.env.get(name) {
            return Ok(value.clone());
        }

        // Then check system environment
        std::env::var(name)
            .map_err(|_| SubstitutionError::EnvironmentVariableNotFound(name.to_string()))
    }

    /// `$(optenv VAR default words)`: falls back to the (possibly empty) default
    fn resolve_optenv(&self, value: &str) -> String {
        let (name, default) = match value.split_once(char::is_whitespace) {
            Some((name, default)) => (name, default.trim()),
            None => (value, ""),
        };
        self.resolve_env(name)
            .unwrap_or_else(|_| default.to_string())
    }
}

/// Remove `.` and resolve `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Errors that can occur during substitution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Undefined argument: {0}")]
    UndefinedArg(String),

    #[error("Environment variable not found: {0}")]
    EnvironmentVariableNotFound(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("$(dirname) used without a current document")]
    NoCurrentDocument,

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),

    #[error("Maximum substitution iterations exceeded for: {0}")]
    MaxIterationsExceeded(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackagePath;

    fn package_tree() -> (tempfile::TempDir, Arc<dyn PackageLocator>) {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("robot_bringup");
        std::fs::create_dir_all(pkg.join("launch")).unwrap();
        std::fs::write(
            pkg.join("package.xml"),
            "<package><name>robot_bringup</name></package>",
        )
        .unwrap();
        let locator: Arc<dyn PackageLocator> =
            Arc::new(PackagePath::new(vec![dir.path().to_path_buf()]));
        (dir, locator)
    }

    #[test]
    fn test_arg_substitution() {
        let ctx = SubstitutionContext::new().with_arg("config", "my_config.yaml");

        let result = ctx.substitute("$(arg config)").unwrap();
        assert_eq!(result, "my_config.yaml");
    }

    #[test]
    fn test_env_substitution() {
        let ctx = SubstitutionContext::new().with_env("MY_VAR", "my_value");

        let result = ctx.substitute("$(env MY_VAR)").unwrap();
        assert_eq!(result, "my_value");
    }

    #[test]
    fn test_env_missing_is_error() {
        let ctx = SubstitutionContext::new();

        let result = ctx.substitute("$(env NODEMGR_SURELY_UNSET_VARIABLE)");
        assert_eq!(
            result,
            Err(SubstitutionError::EnvironmentVariableNotFound(
                "NODEMGR_SURELY_UNSET_VARIABLE".to_string()
            ))
        );
    }

    #[test]
    fn test_optenv_falls_back_to_default() {
        let ctx = SubstitutionContext::new();

        let result = ctx
            .substitute("$(optenv NODEMGR_SURELY_UNSET_VARIABLE fallback value)")
            .unwrap();
        assert_eq!(result, "fallback value");

        let ctx = ctx.with_env("ROBOT", "r2");
        assert_eq!(ctx.substitute("$(optenv ROBOT)").unwrap(), "r2");
    }

    #[test]
    fn test_find_substitution() {
        let (dir, locator) = package_tree();
        let ctx = SubstitutionContext::new().with_locator(locator);

        let result = ctx
            .interpret("$(find robot_bringup)/launch/robot.launch")
            .unwrap();
        assert_eq!(
            result,
            dir.path().join("robot_bringup/launch/robot.launch")
        );
    }

    #[test]
    fn test_find_unknown_package() {
        let (_dir, locator) = package_tree();
        let ctx = SubstitutionContext::new().with_locator(locator);

        let result = ctx.interpret("$(find no_such_pkg)/a.launch");
        assert_eq!(
            result,
            Err(SubstitutionError::PackageNotFound("no_such_pkg".to_string()))
        );
    }

    #[test]
    fn test_package_url() {
        let (dir, locator) = package_tree();
        let ctx = SubstitutionContext::new().with_locator(locator);

        let result = ctx.interpret("package://robot_bringup/urdf/robot.urdf").unwrap();
        assert_eq!(result, dir.path().join("robot_bringup/urdf/robot.urdf"));
    }

    #[test]
    fn test_relative_path_anchored_at_current_file() {
        let ctx = SubstitutionContext::new().with_current_file("/opt/pkg/launch/main.launch");

        assert_eq!(
            ctx.interpret("../config/params.yaml").unwrap(),
            PathBuf::from("/opt/pkg/config/params.yaml")
        );
        assert_eq!(
            ctx.interpret("$(dirname)/sub.launch").unwrap(),
            PathBuf::from("/opt/pkg/launch/sub.launch")
        );
    }

    #[test]
    fn test_dirname_without_document() {
        let ctx = SubstitutionContext::new();
        assert_eq!(
            ctx.substitute("$(dirname)/x"),
            Err(SubstitutionError::NoCurrentDocument)
        );
    }

    #[test]
    fn test_undefined_arg_error() {
        let ctx = SubstitutionContext::new();

        let result = ctx.substitute("$(arg undefined)");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_type() {
        let ctx = SubstitutionContext::new();
        assert_eq!(
            ctx.substitute("$(eval 1 + 1)"),
            Err(SubstitutionError::UnknownType("eval".to_string()))
        );
    }

    #[test]
    fn test_nested_substitution() {
        let ctx = SubstitutionContext::new()
            .with_arg("outer", "$(arg inner)")
            .with_arg("inner", "resolved");

        let result = ctx.substitute("$(arg outer)").unwrap();
        assert_eq!(result, "resolved");
    }

    #[test]
    fn test_self_referencing_arg_is_bounded() {
        let ctx = SubstitutionContext::new().with_arg("loop", "x$(arg loop)");

        let result = ctx.substitute("$(arg loop)");
        assert!(matches!(
            result,
            Err(SubstitutionError::MaxIterationsExceeded(_))
        ));
    }

    #[test]
    fn test_no_substitution_needed() {
        let ctx = SubstitutionContext::new();

        let result = ctx.substitute("plain string").unwrap();
        assert_eq!(result, "plain string");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/a/b/./c/../d")),
            PathBuf::from("/a/b/d")
        );
    }
}
