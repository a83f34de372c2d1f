//! Decide which tree entries count as source and which category they fall in.
//!
//! Paths are repository-relative and use `/` separators, as stored in git
//! trees. All comparisons are case-insensitive.

use glob::{MatchOptions, Pattern};

use crate::error::LoctrailError;
use crate::Result;

use super::policy::ClassificationPolicy;

/// Category key used to bucket line counts (normally a lowercase extension).
pub type CategoryKey = String;

/// Classifier built from a [`ClassificationPolicy`].
#[derive(Debug, Clone)]
pub struct FileClassifier {
    directories: Vec<String>,
    file_names: Vec<String>,
    file_suffixes: Vec<String>,
    file_fragments: Vec<String>,
    path_fragments: Vec<String>,
    exclude: Vec<Pattern>,
    countable: Vec<String>,
}

impl FileClassifier {
    /// Compile a policy. Fails if one of its glob patterns is invalid.
    pub fn new(policy: &ClassificationPolicy) -> Result<Self> {
        let exclude = policy
            .exclude_globs
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| LoctrailError::InvalidGlob {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            directories: policy
                .ignored_directories
                .iter()
                .map(|d| framed(d))
                .collect(),
            file_names: lowered(&policy.ignored_file_names),
            file_suffixes: lowered(&policy.ignored_file_suffixes),
            file_fragments: lowered(&policy.ignored_file_fragments),
            path_fragments: lowered(&policy.ignored_path_fragments),
            exclude,
            countable: lowered(&policy.countable_categories),
        })
    }

    /// Whether a directory (and everything below it) is excluded.
    ///
    /// Patterns match whole path components, anywhere in the path:
    /// `wwwroot/lib` matches `web/wwwroot/lib` but not `web/wwwroot/library`.
    pub fn should_ignore_directory(&self, path: &str) -> bool {
        let path = framed(path);
        self.directories
            .iter()
            .any(|pattern| path.contains(pattern.as_str()))
    }

    /// Whether a file is excluded by name or path rules.
    pub fn should_ignore_file(&self, name: &str, path: &str) -> bool {
        let name = name.to_lowercase();

        if self.file_names.iter().any(|n| *n == name) {
            return true;
        }
        if self.file_suffixes.iter().any(|s| name.ends_with(s.as_str())) {
            return true;
        }
        if self
            .file_fragments
            .iter()
            .any(|f| name.contains(f.as_str()))
        {
            return true;
        }

        let rooted = format!("/{}", path.trim_start_matches('/').to_lowercase());
        if self
            .path_fragments
            .iter()
            .any(|f| rooted.contains(f.as_str()))
        {
            return true;
        }

        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };
        self.exclude
            .iter()
            .any(|pattern| pattern.matches_with(path, options))
    }

    /// Category key for a file name.
    ///
    /// The lowercase extension (`Lib.RS` → `rs`); a name without an extension
    /// is its own category (`Makefile` → `makefile`). Dotfiles such as
    /// `.gitignore` have no category.
    pub fn category_of(&self, name: &str) -> Option<CategoryKey> {
        category_of(name)
    }

    /// The file's category if it passes every ignore rule and is in the
    /// countable allow-list.
    pub fn countable_category(&self, name: &str, path: &str) -> Option<CategoryKey> {
        if self.should_ignore_file(name, path) {
            return None;
        }
        let category = category_of(name)?;
        if self.countable.iter().any(|c| *c == category) {
            Some(category)
        } else {
            None
        }
    }
}

/// Category key for a file name (see [`FileClassifier::category_of`]).
pub fn category_of(name: &str) -> Option<CategoryKey> {
    let name = name.rsplit('/').next().unwrap_or(name);
    match name.rfind('.') {
        Some(0) => None,
        Some(idx) if idx + 1 < name.len() => Some(name[idx + 1..].to_lowercase()),
        Some(_) => None,
        None if name.is_empty() => None,
        None => Some(name.to_lowercase()),
    }
}

fn framed(path: &str) -> String {
    format!("/{}/", path.trim_matches('/').to_lowercase())
}

fn lowered(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}
