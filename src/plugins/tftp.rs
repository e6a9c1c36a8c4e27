// src/plugins/tftp.rs
use super::{config_line, status_prefix, Plugin, ResultSink};
use crate::error::Result;
use crate::tftp::TftpClient;
use crate::types::{GlobalOptions, ResultStatus};
use async_trait::async_trait;
use log::debug;
use std::fmt::{self, Write};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TftpOptions {
    /// `host[:port]`, port 69 when omitted.
    pub server: String,
    pub timeout: Duration,
}

impl Default for TftpOptions {
    fn default() -> Self {
        Self {
            server: String::new(),
            timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TftpResult {
    pub file: String,
    pub size: Option<u64>,
    pub status: ResultStatus,
    pub verbose: bool,
}

impl TftpResult {
    pub(crate) fn write_line(&self, out: &mut String) -> fmt::Result {
        if self.verbose {
            out.push_str(status_prefix(self.status));
        }
        out.push_str(&self.file);
        if let Some(size) = self.size {
            write!(out, " [{}]", size)?;
        }
        Ok(())
    }
}

pub struct TftpPlugin {
    options: TftpOptions,
    client: Option<TftpClient>,
    verbose: bool,
}

impl TftpPlugin {
    pub fn new(global: &GlobalOptions, options: TftpOptions) -> Result<Self> {
        Ok(Self {
            options,
            client: None,
            verbose: global.verbose,
        })
    }
}

#[async_trait]
impl Plugin for TftpPlugin {
    fn name(&self) -> &str {
        "TFTP enumeration"
    }

    async fn pre_run(&mut self) -> Result<()> {
        self.client = Some(TftpClient::new(&self.options.server, self.options.timeout)?);
        Ok(())
    }

    async fn process_word(&self, word: &str, sink: &ResultSink) -> Result<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };

        let result = match client.probe(word).await {
            Ok(size) => TftpResult {
                file: word.to_string(),
                size,
                status: ResultStatus::Found,
                verbose: self.verbose,
            },
            Err(e) => {
                debug!("tftp {}: {}", word, e);
                if !self.verbose {
                    return Ok(());
                }
                TftpResult {
                    file: word.to_string(),
                    size: None,
                    status: ResultStatus::Missed,
                    verbose: true,
                }
            }
        };

        sink.emit(result);
        Ok(())
    }

    fn config_string(&self) -> String {
        let mut out = String::new();
        let server = self
            .client
            .as_ref()
            .map_or(self.options.server.as_str(), |c| c.address());
        config_line(&mut out, "Server", server);
        config_line(&mut out, "Timeout", format!("{:?}", self.options.timeout));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tftp::tests::spawn_stub_server;

    async fn ready_plugin(server: String, verbose: bool) -> TftpPlugin {
        let global = GlobalOptions {
            verbose,
            ..GlobalOptions::default()
        };
        let mut plugin = TftpPlugin::new(
            &global,
            TftpOptions {
                server,
                timeout: Duration::from_secs(2),
            },
        )
        .unwrap();
        plugin.pre_run().await.unwrap();
        plugin
    }

    #[tokio::test]
    async fn test_pre_run_only_validates_server() {
        let mut plugin = TftpPlugin::new(
            &GlobalOptions::default(),
            TftpOptions {
                server: "unreachable.invalid".to_string(),
                ..TftpOptions::default()
            },
        )
        .unwrap();
        plugin.pre_run().await.unwrap();
        assert!(plugin.config_string().contains("unreachable.invalid:69"));

        let mut empty = TftpPlugin::new(&GlobalOptions::default(), TftpOptions::default()).unwrap();
        assert!(empty.pre_run().await.is_err());
    }

    #[tokio::test]
    async fn test_found_files_report_size() {
        let addr = spawn_stub_server().await;
        let plugin = ready_plugin(addr.to_string(), false).await;

        let (sink, mut results, mut errors) = ResultSink::channel();
        plugin.process_word("sized.bin", &sink).await.unwrap();
        plugin.process_word("small.txt", &sink).await.unwrap();
        plugin.process_word("missing.txt", &sink).await.unwrap();
        drop(sink);

        let mut rendered = Vec::new();
        while let Some(result) = results.recv().await {
            rendered.push(result.render().unwrap());
        }
        rendered.sort();
        assert_eq!(rendered, vec!["sized.bin [4096]", "small.txt [5]"]);
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_verbose_reports_missing_files() {
        let addr = spawn_stub_server().await;
        let plugin = ready_plugin(addr.to_string(), true).await;

        let (sink, mut results, _errors) = ResultSink::channel();
        plugin.process_word("missing.txt", &sink).await.unwrap();
        drop(sink);

        let result = results.recv().await.unwrap();
        assert_eq!(result.render().unwrap(), "Missed: missing.txt");
    }
}
