// src/wordlist.rs
use crate::error::Result;
use crate::pattern::RangeWords;
use crate::types::{BusterError, GlobalOptions, WordSource};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// True for lines the producer never turns into probe words.
pub fn is_skippable(word: &str) -> bool {
    word.is_empty() || word.starts_with('#')
}

/// A word source plus the number of leading lines to skip.
#[derive(Debug, Clone)]
pub struct Wordlist {
    source: WordSource,
    offset: u64,
}

impl Wordlist {
    pub fn new(source: WordSource, offset: u64) -> Result<Self> {
        if offset > 0 && source == WordSource::Stdin {
            return Err(BusterError::ConfigError(
                "a wordlist offset cannot be used when reading words from stdin".to_string(),
            ));
        }
        Ok(Self { source, offset })
    }

    pub fn from_options(options: &GlobalOptions) -> Result<Self> {
        Self::new(options.words.clone(), options.offset)
    }

    pub fn source(&self) -> &WordSource {
        &self.source
    }

    /// Opens the source positioned right after the first `offset` lines.
    pub async fn open(&self) -> Result<WordReader> {
        match &self.source {
            WordSource::File(path) => {
                let file = open_file(path).await?;
                if self.offset > 0 {
                    let total = count_lines(path).await?;
                    check_offset(self.offset, total)?;
                }

                let mut reader = WordReader::from_reader(Box::new(BufReader::new(file)));
                for _ in 0..self.offset {
                    reader.next_word().await?;
                }
                Ok(reader)
            }
            WordSource::Stdin => Ok(WordReader::from_reader(Box::new(BufReader::new(
                tokio::io::stdin(),
            )))),
            WordSource::Range(expr) => {
                let mut words = RangeWords::new(expr);
                if self.offset > 0 {
                    check_offset(self.offset, words.total())?;
                    words.advance_by(self.offset);
                }
                Ok(WordReader::from_range(words))
            }
        }
    }

    /// Sums `weigh` over every word the run will dispatch. `None` when the source cannot
    /// be read twice (stdin).
    pub async fn estimate<F>(&self, mut weigh: F) -> Result<Option<u64>>
    where
        F: FnMut(&str) -> u64,
    {
        match &self.source {
            WordSource::Stdin => return Ok(None),
            WordSource::Range(expr) => return Ok(Some(self.estimate_range(expr, weigh))),
            WordSource::File(_) => {}
        }

        let mut reader = self.open().await?;
        let mut total = 0u64;
        while let Some(word) = reader.next_word().await? {
            if !is_skippable(&word) {
                total += weigh(&word);
            }
        }
        Ok(Some(total))
    }

    /// Range words share one shape, so the first word's weight stands for all of them.
    fn estimate_range<F>(&self, expr: &str, mut weigh: F) -> u64
    where
        F: FnMut(&str) -> u64,
    {
        let mut words = RangeWords::new(expr);
        let remaining = words.total().saturating_sub(self.offset);
        words.advance_by(self.offset);
        match words.next() {
            Some(first) if !is_skippable(&first) => remaining.saturating_mul(weigh(&first)),
            _ => 0,
        }
    }
}

fn check_offset(offset: u64, total: u64) -> Result<()> {
    if offset >= total {
        return Err(BusterError::ConfigError(format!(
            "wordlist offset {} is out of range, the wordlist has {} lines",
            offset, total
        )));
    }
    Ok(())
}

async fn open_file(path: &Path) -> Result<File> {
    File::open(path).await.map_err(|e| {
        BusterError::WordlistError(format!("failed to open {}: {}", path.display(), e))
    })
}

/// Counts lines, including a final line without a trailing newline.
pub async fn count_lines(path: &Path) -> Result<u64> {
    let file = open_file(path).await?;
    let mut reader = WordReader::from_reader(Box::new(BufReader::new(file)));
    let mut count = 0;
    while reader.next_word().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

enum Inner {
    Lines {
        reader: Box<dyn AsyncBufRead + Unpin + Send>,
        buf: Vec<u8>,
    },
    Range(RangeWords),
}

/// Lazy sequence of trimmed lines. Blank and comment lines are passed through; the
/// consumer decides what to skip.
pub struct WordReader {
    inner: Inner,
}

impl WordReader {
    pub fn from_reader(reader: Box<dyn AsyncBufRead + Unpin + Send>) -> Self {
        Self {
            inner: Inner::Lines {
                reader,
                buf: Vec::with_capacity(256),
            },
        }
    }

    pub fn from_range(words: RangeWords) -> Self {
        Self {
            inner: Inner::Range(words),
        }
    }

    pub async fn next_word(&mut self) -> Result<Option<String>> {
        match &mut self.inner {
            Inner::Lines { reader, buf } => {
                buf.clear();
                let read = reader.read_until(b'\n', buf).await.map_err(|e| {
                    BusterError::WordlistError(format!("failed to read word: {}", e))
                })?;
                if read == 0 {
                    return Ok(None);
                }
                Ok(Some(String::from_utf8_lossy(buf).trim().to_string()))
            }
            Inner::Range(words) => Ok(words.next()),
        }
    }
}
