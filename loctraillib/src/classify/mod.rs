//! File classification: decide what counts as source.
//!
//! Ignore rules keep "lines of code" meaningful by excluding build output,
//! vendored dependencies, generated files, and editor state. The rules are a
//! [`ClassificationPolicy`] value handed to [`FileClassifier::new`], so they
//! can be versioned and loaded from configuration.
//!
//! ## Example
//!
//! ```rust
//! use loctraillib::classify::{ClassificationPolicy, FileClassifier};
//!
//! let classifier = FileClassifier::new(&ClassificationPolicy::default()).unwrap();
//! assert!(classifier.should_ignore_directory("web/node_modules"));
//! assert_eq!(classifier.countable_category("lib.rs", "src/lib.rs"), Some("rs".to_string()));
//! ```

pub mod classifier;
pub mod policy;

pub use classifier::{category_of, CategoryKey, FileClassifier};
pub use policy::{ClassificationPolicy, POLICY_VERSION};
