//! Line-oriented scanning for include directives
//!
//! Directives are found with regular expressions rather than an XML parse so
//! that every reference keeps the line it appears on, including references in
//! attributes of elements other than `<include>` (`textfile=`, `binfile=`,
//! `$(find ..)` inside defaults). Text inside XML comments is ignored.

use regex::Regex;
use std::sync::LazyLock;

/// Patterns recognised when the caller does not supply any.
///
/// A pattern's first capture group is the referenced path; patterns without
/// groups use the whole match.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    r#"\$\(find [^)]+\)(?:[^\s"'<>$]|\$\([^)]*\))*"#,
    r#"\bfile\s*=\s*"([^"]+)""#,
    r#"\btextfile\s*=\s*"([^"]+)""#,
    r#"\bbinfile\s*=\s*"([^"]+)""#,
    r#""\s*((?:package|pkg)://[^"\s]+)\s*""#,
];

static DEFAULT_SCANNER: LazyLock<IncludeScanner> = LazyLock::new(|| IncludeScanner {
    patterns: DEFAULT_INCLUDE_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect(),
});

/// One include reference found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    /// 1-based line of the reference
    pub line_number: usize,
    /// 0-based byte column, orders references sharing a line
    pub column: usize,
    /// Referenced path before substitution
    pub raw: String,
}

/// Compiled set of include patterns
#[derive(Debug, Clone)]
pub struct IncludeScanner {
    patterns: Vec<Regex>,
}

impl IncludeScanner {
    /// Compile `patterns`; an empty list selects [`DEFAULT_INCLUDE_PATTERNS`].
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        if patterns.is_empty() {
            return Ok(Self::default_patterns());
        }
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Scanner with the built-in patterns
    pub fn default_patterns() -> Self {
        DEFAULT_SCANNER.clone()
    }

    /// Find all directives in document order.
    ///
    /// The same raw reference matched by several patterns on one line is
    /// reported once.
    pub fn scan(&self, content: &str) -> Vec<IncludeDirective> {
        let mut directives = Vec::new();
        let mut in_comment = false;

        for (index, line) in content.lines().enumerate() {
            let visible = mask_comments(line, &mut in_comment);
            let mut found: Vec<(usize, String)> = Vec::new();

            for pattern in &self.patterns {
                for caps in pattern.captures_iter(&visible) {
                    let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
                        continue;
                    };
                    let raw = m.as_str().trim();
                    if raw.is_empty() {
                        continue;
                    }
                    found.push((m.start(), raw.to_string()));
                }
            }

            found.sort_by_key(|(column, _)| *column);
            let mut seen_on_line = std::collections::HashSet::new();
            for (column, raw) in found {
                if seen_on_line.insert(raw.clone()) {
                    directives.push(IncludeDirective {
                        line_number: index + 1,
                        column,
                        raw,
                    });
                }
            }
        }

        directives
    }
}

/// Replace comment text with spaces, keeping byte columns intact.
fn mask_comments(line: &str, in_comment: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    loop {
        if *in_comment {
            match rest.find("-->") {
                Some(end) => {
                    out.extend(std::iter::repeat(' ').take(end + 3));
                    rest = &rest[end + 3..];
                    *in_comment = false;
                }
                None => {
                    out.extend(std::iter::repeat(' ').take(rest.len()));
                    return out;
                }
            }
        } else {
            match rest.find("<!--") {
                Some(start) => {
                    out.push_str(&rest[..start]);
                    out.extend(std::iter::repeat(' ').take(4));
                    rest = &rest[start + 4..];
                    *in_comment = true;
                }
                None => {
                    out.push_str(rest);
                    return out;
                }
            }
        }
    }
}
