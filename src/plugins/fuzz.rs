// src/plugins/fuzz.rs
use super::{config_line, status_prefix, Plugin, ResultSink};
use crate::error::Result;
use crate::session::{RequestParts, Session};
use crate::types::{BusterError, GlobalOptions, Header, HttpOptions, ResultStatus};
use crate::utils::join_set;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt::{self, Write};

/// Marker replaced by the current word.
pub const FUZZ_KEYWORD: &str = "FUZZ";

#[derive(Debug, Clone, Default)]
pub struct FuzzOptions {
    pub http: HttpOptions,
    pub request_body: Option<String>,
    pub exclude_status: BTreeSet<u16>,
    pub exclude_length: BTreeSet<u64>,
}

#[derive(Debug, Clone)]
pub struct FuzzResult {
    pub word: String,
    pub url: String,
    pub status_code: u16,
    pub size: u64,
    pub status: ResultStatus,
}

impl FuzzResult {
    pub(crate) fn write_line(&self, out: &mut String) -> fmt::Result {
        write!(
            out,
            "{}[Status={}] [Length={}] {}",
            status_prefix(self.status),
            self.status_code,
            self.size,
            self.url
        )
    }
}

pub struct FuzzPlugin {
    options: FuzzOptions,
    session: Session,
    verbose: bool,
}

impl FuzzPlugin {
    pub fn new(global: &GlobalOptions, options: FuzzOptions) -> Result<Self> {
        if options.http.url.is_empty() {
            return Err(BusterError::ConfigError("url is required".to_string()));
        }
        if !has_keyword(&options) {
            return Err(BusterError::ConfigError(format!(
                "please provide the {} keyword in the url, a header, the request body or the credentials",
                FUZZ_KEYWORD
            )));
        }

        let session = Session::new(&options.http)?;
        Ok(Self {
            options,
            session,
            verbose: global.verbose,
        })
    }

    fn is_found(&self, status: u16, size: u64) -> bool {
        !self.options.exclude_status.contains(&status)
            && !self.options.exclude_length.contains(&size)
    }
}

fn has_keyword(options: &FuzzOptions) -> bool {
    let http = &options.http;
    http.url.contains(FUZZ_KEYWORD)
        || http
            .headers
            .iter()
            .any(|h| h.name.contains(FUZZ_KEYWORD) || h.value.contains(FUZZ_KEYWORD))
        || options
            .request_body
            .as_deref()
            .is_some_and(|b| b.contains(FUZZ_KEYWORD))
        || http
            .username
            .as_deref()
            .is_some_and(|u| u.contains(FUZZ_KEYWORD))
        || http
            .password
            .as_deref()
            .is_some_and(|p| p.contains(FUZZ_KEYWORD))
}

fn substitute(template: &str, word: &str) -> String {
    template.replace(FUZZ_KEYWORD, word)
}

#[async_trait]
impl Plugin for FuzzPlugin {
    fn name(&self) -> &str {
        "fuzzing"
    }

    async fn pre_run(&mut self) -> Result<()> {
        Ok(())
    }

    async fn process_word(&self, word: &str, sink: &ResultSink) -> Result<()> {
        let http = &self.options.http;
        let url = substitute(&http.url, word);

        let headers: Vec<Header> = http
            .headers
            .iter()
            .map(|h| Header {
                name: substitute(&h.name, word),
                value: substitute(&h.value, word),
            })
            .collect();

        let credentials = http.username.as_deref().map(|user| {
            (
                substitute(user, word),
                substitute(http.password.as_deref().unwrap_or_default(), word),
            )
        });

        let parts = RequestParts {
            headers: Some(&headers),
            body: self
                .options
                .request_body
                .as_deref()
                .map(|b| substitute(b, word)),
            credentials: credentials
                .as_ref()
                .map(|(user, pass)| (user.as_str(), pass.as_str())),
            ..RequestParts::default()
        };

        let response = self.session.request(&url, &parts).await?;
        let found = self.is_found(response.status, response.size);

        if found || self.verbose {
            sink.emit(FuzzResult {
                word: word.to_string(),
                url,
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
        if !o.exclude_status.is_empty() {
            config_line(&mut out, "Excluded Status codes", join_set(&o.exclude_status));
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
