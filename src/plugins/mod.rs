// src/plugins/mod.rs
use crate::error::Result;
use crate::types::{BusterError, GlobalOptions, ProbeError, ResultStatus};
use async_trait::async_trait;
use log::debug;
use std::fmt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

mod bucket;
mod dir;
mod dns;
mod fuzz;
mod tftp;
mod vhost;

pub use bucket::{BucketOptions, BucketPlugin, BucketResult, Provider};
pub use dir::{DirOptions, DirPlugin, DirResult};
pub use dns::{DnsOptions, DnsPlugin, DnsResult};
pub use fuzz::{FuzzOptions, FuzzPlugin, FuzzResult, FUZZ_KEYWORD};
pub use tftp::{TftpOptions, TftpPlugin, TftpResult};
pub use vhost::{VhostOptions, VhostPlugin, VhostResult};

/// One probe strategy driven by the engine.
///
/// `pre_run` is the only method with mutable access; once it returns the plugin is shared
/// read-only between all workers.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// One-time calibration before any word is dispatched.
    async fn pre_run(&mut self) -> Result<()>;

    /// Extra words derived from a source word. Must be deterministic: it is called once
    /// for progress estimation and once for dispatch.
    fn additional_words(&self, _word: &str) -> Vec<String> {
        Vec::new()
    }

    async fn process_word(&self, word: &str, sink: &ResultSink) -> Result<()>;

    fn config_string(&self) -> String;
}

/// Result of a single probe, keyed by mode.
#[derive(Debug, Clone)]
pub enum ProbeResult {
    Dir(DirResult),
    Dns(DnsResult),
    Vhost(VhostResult),
    Fuzz(FuzzResult),
    Bucket(BucketResult),
    Tftp(TftpResult),
}

impl ProbeResult {
    pub fn status(&self) -> ResultStatus {
        match self {
            ProbeResult::Dir(r) => r.status,
            ProbeResult::Dns(r) => r.status,
            ProbeResult::Vhost(r) => r.status,
            ProbeResult::Fuzz(r) => r.status,
            ProbeResult::Bucket(r) => r.status,
            ProbeResult::Tftp(r) => r.status,
        }
    }

    /// The path, host, bucket or file name the result is about.
    pub fn entity(&self) -> &str {
        match self {
            ProbeResult::Dir(r) => &r.path,
            ProbeResult::Dns(r) => &r.subdomain,
            ProbeResult::Vhost(r) => &r.host,
            ProbeResult::Fuzz(r) => &r.word,
            ProbeResult::Bucket(r) => &r.bucket,
            ProbeResult::Tftp(r) => &r.file,
        }
    }

    /// Display line for the result. Pure: rendering twice yields the same text.
    pub fn render(&self) -> Result<String> {
        let mut line = String::new();
        match self {
            ProbeResult::Dir(r) => r.write_line(&mut line),
            ProbeResult::Dns(r) => r.write_line(&mut line),
            ProbeResult::Vhost(r) => r.write_line(&mut line),
            ProbeResult::Fuzz(r) => r.write_line(&mut line),
            ProbeResult::Bucket(r) => r.write_line(&mut line),
            ProbeResult::Tftp(r) => r.write_line(&mut line),
        }
        .map_err(|e| BusterError::OutputError(format!("failed to render result: {}", e)))?;
        Ok(line)
    }
}

macro_rules! impl_from_result {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ProbeResult {
                fn from(result: $ty) -> Self {
                    ProbeResult::$variant(result)
                }
            }
        )*
    };
}

impl_from_result!(
    Dir => DirResult,
    Dns => DnsResult,
    Vhost => VhostResult,
    Fuzz => FuzzResult,
    Bucket => BucketResult,
    Tftp => TftpResult,
);

/// Sending half of the result and error channels, cloned into every worker.
#[derive(Clone)]
pub struct ResultSink {
    results: UnboundedSender<ProbeResult>,
    errors: UnboundedSender<ProbeError>,
}

impl ResultSink {
    pub fn channel() -> (
        Self,
        UnboundedReceiver<ProbeResult>,
        UnboundedReceiver<ProbeError>,
    ) {
        let (results, results_rx) = unbounded_channel();
        let (errors, errors_rx) = unbounded_channel();
        (Self { results, errors }, results_rx, errors_rx)
    }

    pub fn emit(&self, result: impl Into<ProbeResult>) {
        if self.results.send(result.into()).is_err() {
            debug!("result receiver dropped, discarding result");
        }
    }

    pub fn error(&self, error: ProbeError) {
        if self.errors.send(error).is_err() {
            debug!("error receiver dropped, discarding error");
        }
    }
}

/// Mode selected on the command line together with its options.
#[derive(Debug, Clone)]
pub enum PluginConfig {
    Dir(DirOptions),
    Dns(DnsOptions),
    Vhost(VhostOptions),
    Fuzz(FuzzOptions),
    Bucket(BucketOptions),
    Tftp(TftpOptions),
}

pub fn create_plugin(config: PluginConfig, global: &GlobalOptions) -> Result<Box<dyn Plugin>> {
    let plugin: Box<dyn Plugin> = match config {
        PluginConfig::Dir(options) => Box::new(DirPlugin::new(global, options)?),
        PluginConfig::Dns(options) => Box::new(DnsPlugin::new(global, options)?),
        PluginConfig::Vhost(options) => Box::new(VhostPlugin::new(global, options)?),
        PluginConfig::Fuzz(options) => Box::new(FuzzPlugin::new(global, options)?),
        PluginConfig::Bucket(options) => Box::new(BucketPlugin::new(global, options)?),
        PluginConfig::Tftp(options) => Box::new(TftpPlugin::new(global, options)?),
    };
    Ok(plugin)
}

/// Appends one `[+] Key:  value` line of a configuration listing.
pub(crate) fn config_line(out: &mut String, key: &str, value: impl fmt::Display) {
    use std::fmt::Write;
    let label = format!("[+] {}:", key);
    let _ = writeln!(out, "{:<26}{}", label, value);
}

/// `Found: ` or `Missed: ` prefix used by the verbose renderings.
pub(crate) fn status_prefix(status: ResultStatus) -> &'static str {
    if status.is_found() {
        "Found: "
    } else {
        "Missed: "
    }
}
