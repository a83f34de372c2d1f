//! Line counting strategies.
//!
//! The default strategy counts every non-blank line. Comment-aware strategies
//! additionally drop lines that contain nothing but comments, tracking block
//! comments across lines.

/// Counts the lines of one file's content.
pub trait LineCounter: Send + Sync + std::fmt::Debug {
    fn count(&self, content: &str) -> u64;
}

/// Counts lines that are non-blank after trimming.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCounter;

impl LineCounter for PlainCounter {
    fn count(&self, content: &str) -> u64 {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count() as u64
    }
}

/// Counts lines carrying at least one character outside comments.
///
/// Comment markers inside double-quoted strings are not treated as comments.
/// Strings are assumed to end on the line they start on.
#[derive(Debug, Clone)]
pub struct CommentAwareCounter {
    line_markers: Vec<String>,
    block: Option<(String, String)>,
    quoted_strings: bool,
}

impl CommentAwareCounter {
    pub fn new(line_markers: &[&str], block: Option<(&str, &str)>) -> Self {
        Self {
            line_markers: line_markers.iter().map(|m| m.to_string()).collect(),
            block: block.map(|(open, close)| (open.to_string(), close.to_string())),
            quoted_strings: true,
        }
    }

    /// `//` and `/* */` (C, C#, Java, JavaScript, Rust, Go, ...)
    pub fn c_style() -> Self {
        Self::new(&["//"], Some(("/*", "*/")))
    }

    /// `#` line comments (shell, Python, Ruby, YAML, TOML)
    pub fn hash() -> Self {
        Self::new(&["#"], None)
    }

    /// `/* */` only (CSS)
    pub fn block_only() -> Self {
        Self::new(&[], Some(("/*", "*/")))
    }

    /// `<!-- -->` (HTML, XML)
    pub fn markup() -> Self {
        Self {
            quoted_strings: false,
            ..Self::new(&[], Some(("<!--", "-->")))
        }
    }

    /// `--` and `/* */`
    pub fn sql() -> Self {
        Self::new(&["--"], Some(("/*", "*/")))
    }

    fn starts_line_comment(&self, rest: &str) -> bool {
        self.line_markers.iter().any(|m| rest.starts_with(m.as_str()))
    }
}

impl LineCounter for CommentAwareCounter {
    fn count(&self, content: &str) -> u64 {
        let mut in_block = false;
        let mut count = 0;

        for line in content.lines() {
            let mut has_code = false;
            let mut in_string = false;
            let mut i = 0;

            while i < line.len() {
                let rest = &line[i..];
                let Some(ch) = rest.chars().next() else {
                    break;
                };

                if in_block {
                    if let Some((_, close)) = &self.block {
                        if rest.starts_with(close.as_str()) {
                            in_block = false;
                            i += close.len();
                            continue;
                        }
                    }
                    i += ch.len_utf8();
                    continue;
                }

                if in_string {
                    has_code = true;
                    if ch == '\\' {
                        i += ch.len_utf8();
                        if let Some(escaped) = line[i..].chars().next() {
                            i += escaped.len_utf8();
                        }
                        continue;
                    }
                    if ch == '"' {
                        in_string = false;
                    }
                    i += ch.len_utf8();
                    continue;
                }

                if ch.is_whitespace() {
                    i += ch.len_utf8();
                    continue;
                }
                if self.starts_line_comment(rest) {
                    break;
                }
                if let Some((open, _)) = &self.block {
                    if rest.starts_with(open.as_str()) {
                        in_block = true;
                        i += open.len();
                        continue;
                    }
                }
                if ch == '"' && self.quoted_strings {
                    in_string = true;
                }
                has_code = true;
                i += ch.len_utf8();
            }

            if has_code {
                count += 1;
            }
        }

        count
    }
}
