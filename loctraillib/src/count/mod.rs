//! Line counting: per-category strategies and blob decoding.
//!
//! A [`CounterSet`] maps category keys to [`LineCounter`] strategies and falls
//! back to [`PlainCounter`] for anything unregistered.

pub mod strategy;

use std::collections::HashMap;
use std::sync::Arc;

pub use strategy::{CommentAwareCounter, LineCounter, PlainCounter};

/// Bytes inspected when sniffing for binary content.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Category → strategy registry with a default fallback.
#[derive(Debug, Clone)]
pub struct CounterSet {
    counters: HashMap<String, Arc<dyn LineCounter>>,
    fallback: Arc<dyn LineCounter>,
}

impl Default for CounterSet {
    fn default() -> Self {
        Self {
            counters: HashMap::new(),
            fallback: Arc::new(PlainCounter),
        }
    }
}

impl CounterSet {
    /// Only the plain counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Comment-aware counters for common languages.
    pub fn standard() -> Self {
        let c_style: Arc<dyn LineCounter> = Arc::new(CommentAwareCounter::c_style());
        let hash: Arc<dyn LineCounter> = Arc::new(CommentAwareCounter::hash());
        let markup: Arc<dyn LineCounter> = Arc::new(CommentAwareCounter::markup());

        let mut set = Self::new();
        for ext in [
            "rs", "c", "h", "cc", "cpp", "hpp", "cs", "java", "kt", "go", "js", "jsx", "ts",
            "tsx", "swift", "scala", "php", "scss",
        ] {
            set = set.register_shared(ext, c_style.clone());
        }
        for ext in ["py", "rb", "sh", "yaml", "yml", "toml"] {
            set = set.register_shared(ext, hash.clone());
        }
        for ext in ["html", "xml", "vue", "svelte"] {
            set = set.register_shared(ext, markup.clone());
        }
        set.register("css", CommentAwareCounter::block_only())
            .register("sql", CommentAwareCounter::sql())
    }

    /// Register a strategy for a category.
    pub fn register(self, category: &str, counter: impl LineCounter + 'static) -> Self {
        self.register_shared(category, Arc::new(counter))
    }

    fn register_shared(mut self, category: &str, counter: Arc<dyn LineCounter>) -> Self {
        self.counters.insert(category.to_lowercase(), counter);
        self
    }

    /// Strategy for a category, or the fallback.
    pub fn counter_for(&self, category: &str) -> &dyn LineCounter {
        self.counters
            .get(category)
            .map(|c| c.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    /// Count a blob's bytes with the strategy for `category`.
    ///
    /// Binary content counts as zero lines.
    pub fn count_blob(&self, category: &str, data: &[u8]) -> u64 {
        if is_binary(data) {
            return 0;
        }
        let text = String::from_utf8_lossy(data);
        self.counter_for(category).count(&text)
    }
}

/// Whether content looks binary (a NUL byte near the start).
pub fn is_binary(data: &[u8]) -> bool {
    data[..data.len().min(BINARY_SNIFF_LEN)].contains(&0)
}
