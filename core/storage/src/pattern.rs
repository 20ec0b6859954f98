//! Glob matching and listing options.
//!
//! Patterns are matched against the path of an entry relative to the listing
//! root (no leading slash). `*` stays inside one segment, `**` spans any
//! number of segments and `{a,b}` alternation is expanded before compiling.

use glob::{MatchOptions, Pattern};
use std::fmt;
use std::sync::Arc;

use filestorage_common::{Error, Result, StoragePath};

use crate::backend::{EntryKind, ObjectInfo};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Upper bound on alternatives produced by brace expansion.
const MAX_ALTERNATIVES: usize = 256;

/// A compiled glob pattern with alternation support.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    alternatives: Vec<Pattern>,
}

impl GlobPattern {
    /// Compile `pattern`.
    ///
    /// # Errors
    /// - `INVALID_PARAMS` for malformed globs or unbalanced braces
    pub fn new(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim_start_matches('/');
        let expanded = expand_braces(&trimmed.to_lowercase())?;
        let alternatives = expanded
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    Error::invalid_params(format!("invalid pattern '{}': {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: pattern.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a path relative to the listing root.
    pub fn matches(&self, relative: &str) -> bool {
        let relative = relative.trim_start_matches('/');
        self.alternatives
            .iter()
            .any(|p| p.matches_with(relative, MATCH_OPTIONS))
    }
}

/// Expand `{a,b}` groups, nested groups included.
fn expand_braces(pattern: &str) -> Result<Vec<String>> {
    let Some(open) = pattern.find('{') else {
        if pattern.contains('}') {
            return Err(Error::invalid_params(format!(
                "unbalanced '}}' in pattern '{}'",
                pattern
            )));
        }
        return Ok(vec![pattern.to_string()]);
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (idx, ch) in pattern[open..].char_indices() {
        let idx = open + idx;
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(idx),
            _ => {}
        }
    }
    let close = close.ok_or_else(|| {
        Error::invalid_params(format!("unbalanced '{{' in pattern '{}'", pattern))
    })?;

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    let mut expanded = Vec::new();
    for window in bounds.windows(2) {
        let option = &pattern[window[0] + 1..window[1]];
        for tail in expand_braces(&format!("{}{}{}", prefix, option, suffix))? {
            expanded.push(tail);
            if expanded.len() > MAX_ALTERNATIVES {
                return Err(Error::invalid_params(format!(
                    "pattern '{}' expands to too many alternatives",
                    pattern
                )));
            }
        }
    }
    Ok(expanded)
}

/// Veto callback applied after pattern matching: `(entry, parent, kind)`.
pub type EntryFilter = Arc<dyn Fn(&ObjectInfo, &StoragePath, EntryKind) -> bool + Send + Sync>;

/// Options for listing files or directories.
#[derive(Clone, Default)]
pub struct ListOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Glob applied to the path relative to the listing root.
    pub pattern: Option<String>,
    pub filter: Option<EntryFilter>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ObjectInfo, &StoragePath, EntryKind) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub(crate) fn compile(&self) -> Result<Option<GlobPattern>> {
        self.pattern.as_deref().map(GlobPattern::new).transpose()
    }
}

impl fmt::Debug for ListOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListOptions")
            .field("recursive", &self.recursive)
            .field("pattern", &self.pattern)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Result of a listing.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub entries: Vec<T>,
}

impl<T> Listing<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> IntoIterator for Listing<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
