// src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Where the words of a run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordSource {
    File(PathBuf),
    Stdin,
    /// A single expression such as `host-[1-20]`, expanded through its bracket ranges.
    Range(String),
}

impl WordSource {
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            WordSource::Stdin
        } else {
            WordSource::File(PathBuf::from(arg))
        }
    }
}

impl fmt::Display for WordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordSource::File(path) => write!(f, "{}", path.display()),
            WordSource::Stdin => write!(f, "stdin"),
            WordSource::Range(expr) => write!(f, "range {}", expr),
        }
    }
}

/// Options shared by every mode. Built once before a run and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub threads: usize,
    pub words: WordSource,
    pub offset: u64,
    pub delay: Option<Duration>,
    pub pattern_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub verbose: bool,
    pub quiet: bool,
    pub no_progress: bool,
    pub no_error: bool,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            threads: 10,
            words: WordSource::Stdin,
            offset: 0,
            delay: None,
            pattern_file: None,
            output_file: None,
            verbose: false,
            quiet: false,
            no_progress: false,
            no_error: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Transport settings for the HTTP based modes.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub url: String,
    pub method: String,
    pub headers: Vec<Header>,
    pub cookies: Option<String>,
    pub user_agent: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub proxy: Option<String>,
    pub timeout: Duration,
    pub no_tls_validation: bool,
    pub follow_redirect: bool,
    pub retry_on_timeout: bool,
    pub retry_attempts: u32,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".to_string(),
            headers: Vec::new(),
            cookies: None,
            user_agent: format!("rustbuster/{}", env!("CARGO_PKG_VERSION")),
            username: None,
            password: None,
            proxy: None,
            timeout: Duration::from_secs(10),
            no_tls_validation: false,
            follow_redirect: false,
            retry_on_timeout: false,
            retry_attempts: 3,
        }
    }
}

/// Outcome carried by every probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultStatus {
    Found,
    /// Only emitted in verbose mode.
    Missed,
}

impl ResultStatus {
    pub fn from_found(found: bool) -> Self {
        if found {
            ResultStatus::Found
        } else {
            ResultStatus::Missed
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, ResultStatus::Found)
    }
}

/// A non-fatal failure tied to the word that caused it.
#[derive(Debug, Error)]
#[error("error on word {word}: {error}")]
pub struct ProbeError {
    pub word: String,
    #[source]
    pub error: BusterError,
}

impl ProbeError {
    pub fn new(word: impl Into<String>, error: BusterError) -> Self {
        Self {
            word: word.into(),
            error,
        }
    }
}

#[derive(Debug, Error)]
pub enum BusterError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Wordlist error: {0}")]
    WordlistError(String),

    #[error("Wildcard detected: {0}")]
    WildcardError(String),

    #[error("Connection error: {0}")]
    ConnectError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Invalid URL {url:?}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Resolution error: {0}")]
    ResolutionError(String),

    #[error("TFTP error: {0}")]
    TftpError(String),

    #[error("Output error: {0}")]
    OutputError(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl BusterError {
    /// Transport timeouts are the only failures worth another attempt.
    pub fn is_timeout(&self) -> bool {
        match self {
            BusterError::Timeout(_) => true,
            BusterError::HttpError(e) => e.is_timeout(),
            _ => false,
        }
    }
}
