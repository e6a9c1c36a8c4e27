// src/lib.rs
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod pattern;
pub mod plugins;
pub mod progress;
pub mod resolver;
pub mod session;
pub mod tftp;
pub mod types;
pub mod utils;
pub mod wordlist;

pub use cli::Args;
pub use engine::{Engine, EngineChannels, EngineState};
pub use plugins::{create_plugin, Plugin, PluginConfig, ProbeResult, ResultSink};
pub use types::{BusterError, GlobalOptions, HttpOptions, ProbeError, ResultStatus, WordSource};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
