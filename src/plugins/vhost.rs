// src/plugins/vhost.rs
use super::{config_line, status_prefix, Plugin, ResultSink};
use crate::error::Result;
use crate::session::{parse_url, HttpResponse, RequestParts, Session};
use crate::types::{BusterError, GlobalOptions, HttpOptions, ResultStatus};
use crate::utils::{join_set, random_token};
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeSet;
use std::fmt::{self, Write};

#[derive(Debug, Clone, Default)]
pub struct VhostOptions {
    pub http: HttpOptions,
    /// Probe `word.domain` instead of the bare word.
    pub append_domain: bool,
    /// Defaults to the host of the target url.
    pub domain: Option<String>,
    pub exclude_length: BTreeSet<u64>,
}

#[derive(Debug, Clone)]
pub struct VhostResult {
    pub host: String,
    pub status_code: u16,
    pub size: u64,
    pub status: ResultStatus,
}

impl VhostResult {
    pub(crate) fn write_line(&self, out: &mut String) -> fmt::Result {
        write!(
            out,
            "{}{} Status: {} [Size: {}]",
            status_prefix(self.status),
            self.host,
            self.status_code,
            self.size
        )
    }
}

/// Response bodies captured during calibration.
#[derive(Debug, Clone, Default)]
struct Baseline {
    normal: Vec<u8>,
    unknown_host: Vec<u8>,
}

impl Baseline {
    fn matches(&self, body: &[u8]) -> bool {
        body == self.normal.as_slice() || body == self.unknown_host.as_slice()
    }
}

pub struct VhostPlugin {
    options: VhostOptions,
    domain: String,
    session: Session,
    verbose: bool,
    baseline: Baseline,
}

impl VhostPlugin {
    pub fn new(global: &GlobalOptions, options: VhostOptions) -> Result<Self> {
        if options.http.url.is_empty() {
            return Err(BusterError::ConfigError("url is required".to_string()));
        }
        let url = parse_url(&options.http.url)
            .map_err(|e| BusterError::ConfigError(format!("invalid url: {}", e)))?;

        let domain = match options.domain.as_deref().map(str::trim) {
            Some(domain) if !domain.is_empty() => domain.trim_end_matches('.').to_string(),
            _ => url
                .host_str()
                .map(|h| h.to_string())
                .ok_or_else(|| BusterError::ConfigError("url has no host".to_string()))?,
        };

        let session = Session::new(&options.http)?;

        Ok(Self {
            options,
            domain,
            session,
            verbose: global.verbose,
            baseline: Baseline::default(),
        })
    }

    fn host_for(&self, word: &str) -> String {
        if self.options.append_domain {
            format!("{}.{}", word, self.domain)
        } else {
            word.to_string()
        }
    }

    async fn fetch(&self, host: Option<&str>) -> Result<HttpResponse> {
        let parts = RequestParts {
            host,
            read_body: true,
            ..RequestParts::default()
        };
        self.session.request(&self.options.http.url, &parts).await
    }
}

#[async_trait]
impl Plugin for VhostPlugin {
    fn name(&self) -> &str {
        "VHOST enumeration"
    }

    async fn pre_run(&mut self) -> Result<()> {
        let connect_error = |e: BusterError| {
            BusterError::ConnectError(format!(
                "unable to connect to {}: {}",
                self.options.http.url, e
            ))
        };

        let normal = self.fetch(None).await.map_err(connect_error)?;
        let unknown = format!("{}.{}", random_token(16), self.domain);
        let unknown_response = self.fetch(Some(&unknown)).await.map_err(connect_error)?;

        debug!(
            "vhost baselines: default {} bytes, {} {} bytes",
            normal.size, unknown, unknown_response.size
        );

        self.baseline = Baseline {
            normal: normal.body.unwrap_or_default(),
            unknown_host: unknown_response.body.unwrap_or_default(),
        };
        Ok(())
    }

    async fn process_word(&self, word: &str, sink: &ResultSink) -> Result<()> {
        let host = self.host_for(word);
        let response = self.fetch(Some(&host)).await?;
        let body = response.body.as_deref().unwrap_or_default();

        let found = !self.baseline.matches(body)
            && !self.options.exclude_length.contains(&response.size);

        if found || self.verbose {
            sink.emit(VhostResult {
                host,
                status_code: response.status,
                size: response.size,
                status: ResultStatus::from_found(found),
            });
        }
        Ok(())
    }

    fn config_string(&self) -> String {
        let o = &self.options;
        let mut out = String::new();
        config_line(&mut out, "Url", &o.http.url);
        config_line(&mut out, "Method", &o.http.method);
        if o.append_domain {
            config_line(&mut out, "Append Domain", &self.domain);
        }
        if !o.exclude_length.is_empty() {
            config_line(&mut out, "Exclude Length", join_set(&o.exclude_length));
        }
        if let Some(proxy) = &o.http.proxy {
            config_line(&mut out, "Proxy", proxy);
        }
        config_line(&mut out, "User Agent", &o.http.user_agent);
        config_line(&mut out, "Timeout", format!("{:?}", o.http.timeout));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    /// The default host serves "default page"; unknown hosts serve `unknown_host_body`.
    async fn stub_server(unknown_host_body: &str) -> (mockito::ServerGuard, Vec<mockito::Mock>) {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = Vec::new();
        mocks.push(
            server
                .mock("GET", "/")
                .match_header("host", Matcher::Regex(r"^127\.0\.0\.1".to_string()))
                .with_status(200)
                .with_body("default page")
                .create_async()
                .await,
        );
        mocks.push(
            server
                .mock("GET", "/")
                .match_header("host", Matcher::Regex(r"^[a-z0-9]{16}\.example\.com$".to_string()))
                .with_status(200)
                .with_body(unknown_host_body)
                .create_async()
                .await,
        );
        mocks.push(
            server
                .mock("GET", "/")
                .match_header("host", "admin.example.com")
                .with_status(200)
                .with_body("admin panel")
                .create_async()
                .await,
        );
        mocks.push(
            server
                .mock("GET", "/")
                .match_header("host", "same.example.com")
                .with_status(302)
                .with_body("default page")
                .create_async()
                .await,
        );
        mocks.push(
            server
                .mock("GET", "/")
                .match_header("host", "ghost.example.com")
                .with_status(200)
                .with_body(unknown_host_body)
                .create_async()
                .await,
        );
        (server, mocks)
    }

    fn plugin(url: &str, global: &GlobalOptions) -> VhostPlugin {
        VhostPlugin::new(
            global,
            VhostOptions {
                http: HttpOptions {
                    url: format!("{}/", url),
                    ..HttpOptions::default()
                },
                append_domain: true,
                domain: Some("example.com".to_string()),
                ..VhostOptions::default()
            },
        )
        .unwrap()
    }

    async fn probe(plugin: &VhostPlugin, word: &str) -> Vec<crate::plugins::ProbeResult> {
        let (sink, mut results, _errors) = ResultSink::channel();
        plugin.process_word(word, &sink).await.unwrap();
        drop(sink);
        let mut collected = Vec::new();
        while let Some(result) = results.recv().await {
            collected.push(result);
        }
        collected
    }

    #[tokio::test]
    async fn test_body_differing_from_baselines_is_found() {
        let (server, _mocks) = stub_server("default page").await;
        let mut plugin = plugin(&server.url(), &GlobalOptions::default());
        plugin.pre_run().await.unwrap();

        let found = probe(&plugin, "admin").await;
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].render().unwrap(),
            "Found: admin.example.com Status: 200 [Size: 11]"
        );
    }

    #[tokio::test]
    async fn test_baseline_body_with_other_status_is_not_found() {
        let (server, _mocks) = stub_server("default page").await;
        let global = GlobalOptions {
            verbose: true,
            ..GlobalOptions::default()
        };
        let mut plugin = plugin(&server.url(), &global);
        plugin.pre_run().await.unwrap();

        let missed = probe(&plugin, "same").await;
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].status(), ResultStatus::Missed);
        assert_eq!(
            missed[0].render().unwrap(),
            "Missed: same.example.com Status: 302 [Size: 12]"
        );
    }

    #[tokio::test]
    async fn test_each_baseline_filters_on_its_own() {
        let (server, _mocks) = stub_server("no such vhost").await;
        let mut plugin = plugin(&server.url(), &GlobalOptions::default());
        plugin.pre_run().await.unwrap();

        // Matches only the unknown-host baseline.
        assert!(probe(&plugin, "ghost").await.is_empty());
        // Matches only the default-host baseline.
        assert!(probe(&plugin, "same").await.is_empty());
        assert_eq!(probe(&plugin, "admin").await.len(), 1);

        let global = GlobalOptions {
            verbose: true,
            ..GlobalOptions::default()
        };
        let mut verbose = self::plugin(&server.url(), &global);
        verbose.pre_run().await.unwrap();
        let missed = probe(&verbose, "ghost").await;
        assert_eq!(missed.len(), 1);
        assert_eq!(
            missed[0].render().unwrap(),
            "Missed: ghost.example.com Status: 200 [Size: 13]"
        );
    }

    #[tokio::test]
    async fn test_excluded_length_is_not_found() {
        let (server, _mocks) = stub_server("default page").await;
        let mut plugin = VhostPlugin::new(
            &GlobalOptions::default(),
            VhostOptions {
                http: HttpOptions {
                    url: server.url(),
                    ..HttpOptions::default()
                },
                append_domain: true,
                domain: Some("example.com".to_string()),
                exclude_length: BTreeSet::from([11]),
            },
        )
        .unwrap();
        plugin.pre_run().await.unwrap();

        assert!(probe(&plugin, "admin").await.is_empty());
    }

    #[test]
    fn test_domain_defaults_to_url_host() {
        let plugin = VhostPlugin::new(
            &GlobalOptions::default(),
            VhostOptions {
                http: HttpOptions {
                    url: "http://target.example.org:8080/".to_string(),
                    ..HttpOptions::default()
                },
                append_domain: true,
                ..VhostOptions::default()
            },
        )
        .unwrap();
        assert_eq!(plugin.host_for("dev"), "dev.target.example.org");
    }

    #[test]
    fn test_bare_word_without_append_domain() {
        let plugin = VhostPlugin::new(
            &GlobalOptions::default(),
            VhostOptions {
                http: HttpOptions {
                    url: "http://10.0.0.1/".to_string(),
                    ..HttpOptions::default()
                },
                ..VhostOptions::default()
            },
        )
        .unwrap();
        assert_eq!(plugin.host_for("intranet.corp"), "intranet.corp");
    }

    #[tokio::test]
    async fn test_unreachable_target_is_connect_error() {
        let mut plugin = plugin("http://127.0.0.1:1", &GlobalOptions::default());
        assert!(matches!(
            plugin.pre_run().await,
            Err(BusterError::ConnectError(_))
        ));
    }
}
