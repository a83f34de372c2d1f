//! Classification policy: the data behind the file classifier.
//!
//! Every rule here is plain data. The built-in rule set is returned by
//! [`ClassificationPolicy::default`] and can be replaced or extended from a
//! configuration file.

use serde::{Deserialize, Serialize};

/// Current policy format version.
pub const POLICY_VERSION: u32 = 1;

/// Rules deciding which paths count as source and how they are bucketed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationPolicy {
    pub version: u32,
    /// Directory path fragments (`node_modules`, `wwwroot/lib`, ...)
    pub ignored_directories: Vec<String>,
    /// Exact file names
    pub ignored_file_names: Vec<String>,
    /// File name suffixes
    pub ignored_file_suffixes: Vec<String>,
    /// File name substrings
    pub ignored_file_fragments: Vec<String>,
    /// Substrings of the full relative path
    pub ignored_path_fragments: Vec<String>,
    /// Extra glob patterns matched against the relative path
    pub exclude_globs: Vec<String>,
    /// Category keys whose lines are counted
    pub countable_categories: Vec<String>,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            version: POLICY_VERSION,
            ignored_directories: strings(&[
                // version control
                ".git",
                ".svn",
                ".hg",
                // build output
                "bin",
                "obj",
                "target",
                "build",
                "dist",
                "out",
                "coverage",
                "__pycache__",
                ".next",
                // dependency caches
                "node_modules",
                "packages",
                "vendor",
                "bower_components",
                ".nuget",
                ".venv",
                "venv",
                ".gradle",
                // IDE state
                ".vs",
                ".vscode",
                ".idea",
                // vendored web assets
                "wwwroot/lib",
                "wwwroot/libs",
                "static/vendor",
            ]),
            ignored_file_names: strings(&[
                "package.json",
                "package-lock.json",
                "yarn.lock",
                "pnpm-lock.yaml",
                "cargo.lock",
                "composer.lock",
                "gemfile.lock",
                "poetry.lock",
                "go.sum",
                "packages.config",
                "project.assets.json",
            ]),
            ignored_file_suffixes: strings(&[
                ".dll",
                ".exe",
                ".pdb",
                ".so",
                ".dylib",
                ".class",
                ".o",
                ".g.cs",
                ".g.i.cs",
                ".designer.cs",
                ".generated.cs",
                ".min.js",
                ".min.css",
                ".map",
                ".user",
                ".suo",
                ".woff",
                ".woff2",
                ".ttf",
                ".eot",
                ".otf",
                ".resx",
            ]),
            ignored_file_fragments: strings(&[
                ".generated.",
                "assemblyinfo",
                "jquery",
                "bootstrap",
                "modernizr",
            ]),
            ignored_path_fragments: strings(&["/migrations/"]),
            exclude_globs: Vec::new(),
            countable_categories: strings(&[
                "rs", "c", "h", "cc", "cpp", "hpp", "cs", "java", "kt", "go", "py", "rb", "php",
                "js", "jsx", "ts", "tsx", "swift", "scala", "sh", "sql", "html", "css", "scss",
                "vue", "svelte", "xml", "yaml", "yml", "toml",
            ]),
        }
    }
}

impl ClassificationPolicy {
    /// A policy with no ignore rules, counting the given categories.
    pub fn permissive(categories: &[&str]) -> Self {
        Self {
            version: POLICY_VERSION,
            ignored_directories: Vec::new(),
            ignored_file_names: Vec::new(),
            ignored_file_suffixes: Vec::new(),
            ignored_file_fragments: Vec::new(),
            ignored_path_fragments: Vec::new(),
            exclude_globs: Vec::new(),
            countable_categories: strings(categories),
        }
    }

    /// Replace the countable category allow-list.
    pub fn with_categories(mut self, categories: &[&str]) -> Self {
        self.countable_categories = strings(categories);
        self
    }

    /// Add a glob exclusion.
    pub fn exclude(mut self, pattern: &str) -> Self {
        self.exclude_globs.push(pattern.to_string());
        self
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
