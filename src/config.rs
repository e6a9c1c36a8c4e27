// src/config.rs
use crate::error::{ErrorContext, Result};
use crate::types::{BusterError, GlobalOptions, WordSource};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

pub const PROXY_ENV: &str = "RUSTBUSTER_PROXY";
pub const USER_AGENT_ENV: &str = "RUSTBUSTER_USER_AGENT";

/// Defaults read from the `--config` TOML file. Command line values win.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub threads: Option<usize>,
    pub delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    /// `Name: value` entries sent with every HTTP request.
    pub headers: Vec<String>,
    pub resolver: Option<String>,
}

/// Loads the optional file and applies environment overrides on top.
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    let mut config = match path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            parse_config(&contents)?
        }
        None => FileConfig::default(),
    };

    apply_env_overrides(&mut config, |key| env::var(key).ok());
    Ok(config)
}

pub fn parse_config(contents: &str) -> Result<FileConfig> {
    toml::from_str(contents).with_context(|| "Failed to parse config file".to_string())
}

/// Environment values replace file values for proxy and user agent.
pub fn apply_env_overrides<F>(config: &mut FileConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(proxy) = lookup(PROXY_ENV).filter(|v| !v.trim().is_empty()) {
        config.proxy = Some(proxy);
    }
    if let Some(agent) = lookup(USER_AGENT_ENV).filter(|v| !v.trim().is_empty()) {
        config.user_agent = Some(agent);
    }
}

/// Rejects global option combinations that can never run.
pub fn validate_global(options: &GlobalOptions) -> Result<()> {
    if options.threads == 0 {
        return Err(BusterError::ConfigError(
            "threads must be greater than 0".to_string(),
        ));
    }
    if options.offset > 0 && options.words == WordSource::Stdin {
        return Err(BusterError::ConfigError(
            "a wordlist offset cannot be used when reading words from stdin".to_string(),
        ));
    }
    match &options.words {
        WordSource::File(path) if path.as_os_str().is_empty() => Err(BusterError::ConfigError(
            "wordlist path is empty".to_string(),
        )),
        WordSource::Range(expr) if expr.trim().is_empty() => Err(BusterError::ConfigError(
            "range expression is empty".to_string(),
        )),
        _ => Ok(()),
    }
}
