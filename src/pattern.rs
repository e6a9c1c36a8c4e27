// src/pattern.rs
//! Word expansion: pattern templates and bracket ranges.
//!
//! Templates come from a pattern file, one per line, each containing the [`PLACEHOLDER`]
//! token. Every template yields one derived word per source word, in file order.
//!
//! Bracket ranges (`foo-[1-5]`) are a separate mechanism used by the range word source.
//! They never apply to the output of template substitution.

use crate::error::{ErrorContext, Result};
use log::warn;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub const PLACEHOLDER: &str = "{WORD}";

#[derive(Debug, Clone, Default)]
pub struct PatternExpander {
    templates: Vec<String>,
}

impl PatternExpander {
    pub fn new(templates: Vec<String>) -> Self {
        Self { templates }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read pattern file {}", path.display()))?;

        let mut templates = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !line.contains(PLACEHOLDER) {
                warn!("pattern {:?} has no {} placeholder", line, PLACEHOLDER);
            }
            templates.push(line.to_string());
        }

        Ok(Self::new(templates))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn expand(&self, word: &str) -> Vec<String> {
        self.templates
            .iter()
            .map(|template| template.replace(PLACEHOLDER, word))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Range(u64, u64),
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(\d+)-(\d+)\]|\.|[\w/\-]+").expect("range token regex is valid")
    })
}

/// Splits a word into literal and range tokens. Characters outside the grammar are dropped.
fn tokenize(word: &str) -> Vec<Token> {
    token_regex()
        .captures_iter(word)
        .map(|cap| match (cap.get(1), cap.get(2)) {
            (Some(start), Some(end)) => match (start.as_str().parse(), end.as_str().parse()) {
                (Ok(start), Ok(end)) => Token::Range(start, end),
                _ => Token::Literal(cap[0].to_string()),
            },
            _ => Token::Literal(cap[0].to_string()),
        })
        .collect()
}

/// Lazy Cartesian expansion of the `[start-end]` tokens of one word.
///
/// Holds one counter per range token and yields words in left-to-right order, the
/// rightmost range varying fastest. A word without a range token is yielded unchanged.
/// A range whose start is greater than its end contributes no values, so the whole
/// expansion is empty.
#[derive(Debug, Clone)]
pub struct RangeWords {
    tokens: Vec<Token>,
    bounds: Vec<(u64, u64)>,
    current: Vec<u64>,
    exhausted: bool,
}

impl RangeWords {
    pub fn new(word: &str) -> Self {
        let tokens = tokenize(word);
        let bounds: Vec<(u64, u64)> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Range(start, end) => Some((*start, *end)),
                Token::Literal(_) => None,
            })
            .collect();

        if bounds.is_empty() {
            return Self {
                tokens: vec![Token::Literal(word.to_string())],
                bounds,
                current: Vec::new(),
                exhausted: false,
            };
        }

        Self {
            exhausted: bounds.iter().any(|(start, end)| start > end),
            current: bounds.iter().map(|(start, _)| *start).collect(),
            tokens,
            bounds,
        }
    }

    /// Number of words in the full expansion, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        if self.bounds.iter().any(|(start, end)| start > end) {
            return 0;
        }
        self.bounds
            .iter()
            .try_fold(1u64, |acc, (start, end)| {
                (end - start).checked_add(1).and_then(|size| acc.checked_mul(size))
            })
            .unwrap_or(u64::MAX)
    }

    /// Moves `n` words forward without rendering the skipped ones.
    pub fn advance_by(&mut self, n: u64) {
        if self.exhausted || n == 0 {
            return;
        }

        let mut carry = n as u128;
        for (value, (start, end)) in self.current.iter_mut().zip(&self.bounds).rev() {
            let size = (*end - *start) as u128 + 1;
            let position = (*value - *start) as u128 + carry;
            *value = *start + (position % size) as u64;
            carry = position / size;
            if carry == 0 {
                return;
            }
        }
        self.exhausted = true;
    }

    fn render(&self) -> String {
        let mut word = String::new();
        let mut values = self.current.iter();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => word.push_str(text),
                Token::Range(..) => {
                    if let Some(value) = values.next() {
                        word.push_str(&value.to_string());
                    }
                }
            }
        }
        word
    }
}

impl Iterator for RangeWords {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.exhausted {
            return None;
        }
        let word = self.render();
        self.advance_by(1);
        Some(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_templates_in_order() {
        let expander = PatternExpander::new(vec![
            "{WORD}-v2".to_string(),
            "api/{WORD}".to_string(),
            "{WORD}.old".to_string(),
        ]);

        assert_eq!(
            expander.expand("admin"),
            vec!["admin-v2", "api/admin", "admin.old"]
        );
        assert_eq!(expander.expand("admin"), expander.expand("admin"));
    }

    #[test]
    fn test_expand_without_templates() {
        assert!(PatternExpander::default().expand("admin").is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{WORD}}.bak").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  old-{{WORD}}  ").unwrap();

        let expander = PatternExpander::load(file.path()).await.unwrap();
        assert_eq!(expander.len(), 2);
        assert_eq!(expander.expand("x"), vec!["x.bak", "old-x"]);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = PatternExpander::load(Path::new("/nonexistent/patterns.txt")).await;
        assert!(result.is_err());
    }

    fn expand_ranges(word: &str) -> Vec<String> {
        RangeWords::new(word).collect()
    }

    #[test]
    fn test_range_cartesian_product() {
        assert_eq!(RangeWords::new("foo-[1-5]-[12-13]").total(), 10);
        let words = expand_ranges("foo-[1-5]-[12-13]");
        assert_eq!(words.len(), 10);
        assert_eq!(words[0], "foo-1-12");
        assert_eq!(words[1], "foo-1-13");
        assert_eq!(words[9], "foo-5-13");
    }

    #[test]
    fn test_degenerate_range_yields_nothing() {
        assert!(expand_ranges("foo-[5-1]").is_empty());
        assert!(expand_ranges("[1-3].[5-1]").is_empty());
        assert_eq!(RangeWords::new("[1-3].[5-1]").total(), 0);
    }

    #[test]
    fn test_huge_range_yields_first_word_without_expanding() {
        let mut words = RangeWords::new("host-[0-99999999999]");
        assert_eq!(words.total(), 100_000_000_000);
        assert_eq!(words.next().as_deref(), Some("host-0"));
        assert_eq!(words.next().as_deref(), Some("host-1"));

        let full = RangeWords::new("[0-18446744073709551615]-[0-1]");
        assert_eq!(full.total(), u64::MAX);
    }

    #[test]
    fn test_advance_by_carries_across_ranges() {
        let mut words = RangeWords::new("a[1-3]b[1-2]");
        words.advance_by(3);
        assert_eq!(words.collect::<Vec<_>>(), vec!["a2b2", "a3b1", "a3b2"]);

        let mut words = RangeWords::new("a[1-3]b[1-2]");
        words.advance_by(6);
        assert!(words.next().is_none());

        let mut plain = RangeWords::new("plain");
        plain.advance_by(1);
        assert!(plain.next().is_none());
    }

    #[test]
    fn test_no_range_returns_word() {
        assert_eq!(expand_ranges("plain.word"), vec!["plain.word"]);
        assert_eq!(expand_ranges("we!rd"), vec!["we!rd"]);
        assert_eq!(RangeWords::new("we!rd").total(), 1);
    }

    #[test]
    fn test_range_with_dots_and_paths() {
        assert_eq!(
            expand_ranges("api/v[1-2].json"),
            vec!["api/v1.json", "api/v2.json"]
        );
    }
}
