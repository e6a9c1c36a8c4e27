// src/plugins/dir.rs
use super::{config_line, status_prefix, Plugin, ResultSink};
use crate::error::Result;
use crate::session::{parse_url, RequestParts, Session};
use crate::types::{BusterError, GlobalOptions, HttpOptions, ResultStatus};
use crate::utils::{join_set, random_token};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::fmt::{self, Write};

const BACKUP_SUFFIXES: &[&str] = &[".bak", ".bak2", ".old", ".1", "~"];

#[derive(Debug, Clone)]
pub struct DirOptions {
    pub http: HttpOptions,
    pub status_codes: BTreeSet<u16>,
    pub status_codes_blacklist: BTreeSet<u16>,
    pub extensions: Vec<String>,
    pub add_slash: bool,
    pub discover_backup: bool,
    pub exclude_length: BTreeSet<u64>,
    pub expanded: bool,
    pub no_status: bool,
    pub hide_length: bool,
    pub force_wildcard: bool,
}

impl Default for DirOptions {
    fn default() -> Self {
        Self {
            http: HttpOptions::default(),
            status_codes: BTreeSet::new(),
            status_codes_blacklist: BTreeSet::from([404]),
            extensions: Vec::new(),
            add_slash: false,
            discover_backup: false,
            exclude_length: BTreeSet::new(),
            expanded: false,
            no_status: false,
            hide_length: false,
            force_wildcard: false,
        }
    }
}

/// Accept/deny classification. A non-empty deny list wins and flips the polarity.
pub fn status_matches(accept: &BTreeSet<u16>, deny: &BTreeSet<u16>, status: u16) -> bool {
    if !deny.is_empty() {
        !deny.contains(&status)
    } else if !accept.is_empty() {
        accept.contains(&status)
    } else {
        true
    }
}

#[derive(Debug, Clone)]
pub struct DirResult {
    pub path: String,
    pub url: String,
    pub status_code: u16,
    pub size: u64,
    pub location: Option<String>,
    pub status: ResultStatus,
    pub expanded: bool,
    pub no_status: bool,
    pub hide_length: bool,
    pub verbose: bool,
}

impl DirResult {
    pub(crate) fn write_line(&self, out: &mut String) -> fmt::Result {
        if self.verbose {
            out.push_str(status_prefix(self.status));
        }
        let entity = if self.expanded { &self.url } else { &self.path };
        write!(out, "{:<20}", entity)?;
        if !self.no_status {
            write!(out, " (Status: {})", self.status_code)?;
        }
        if !self.hide_length {
            write!(out, " [Size: {}]", self.size)?;
        }
        if let Some(location) = &self.location {
            write!(out, " [--> {}]", location)?;
        }
        Ok(())
    }
}

pub struct DirPlugin {
    options: DirOptions,
    base_url: String,
    session: Session,
    verbose: bool,
    wildcard: bool,
}

impl DirPlugin {
    pub fn new(global: &GlobalOptions, mut options: DirOptions) -> Result<Self> {
        if options.http.url.is_empty() {
            return Err(BusterError::ConfigError("url is required".to_string()));
        }
        parse_url(&options.http.url)
            .map_err(|e| BusterError::ConfigError(format!("invalid url: {}", e)))?;

        let mut base_url = options.http.url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        options.extensions = options
            .extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty())
            .collect();

        let session = Session::new(&options.http)?;

        Ok(Self {
            options,
            base_url,
            session,
            verbose: global.verbose,
            wildcard: false,
        })
    }

    /// True when calibration found a wildcard and the operator forced the run anyway.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    fn suffix(&self) -> &'static str {
        if self.options.add_slash {
            "/"
        } else {
            ""
        }
    }

    fn is_found(&self, status: u16, size: u64) -> bool {
        status_matches(
            &self.options.status_codes,
            &self.options.status_codes_blacklist,
            status,
        ) && !self.options.exclude_length.contains(&size)
    }
}

/// `dir/name` -> `dir/.name.swp`
fn swap_file(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, name)) => format!("{}/.{}.swp", dir, name),
        None => format!(".{}.swp", path),
    }
}

#[async_trait]
impl Plugin for DirPlugin {
    fn name(&self) -> &str {
        "directory enumeration"
    }

    async fn pre_run(&mut self) -> Result<()> {
        self.session
            .request(&self.base_url, &RequestParts::default())
            .await
            .map_err(|e| {
                BusterError::ConnectError(format!("unable to connect to {}: {}", self.base_url, e))
            })?;

        let url = format!("{}{}{}", self.base_url, random_token(32), self.suffix());
        let response = self
            .session
            .request(&url, &RequestParts::default())
            .await
            .map_err(|e| {
                BusterError::ConnectError(format!("unable to connect to {}: {}", self.base_url, e))
            })?;

        if self.options.exclude_length.contains(&response.size) {
            debug!(
                "wildcard response length {} is excluded, ignoring {} => {}",
                response.size, url, response.status
            );
            return Ok(());
        }

        if status_matches(
            &self.options.status_codes,
            &self.options.status_codes_blacklist,
            response.status,
        ) {
            if !self.options.force_wildcard {
                return Err(BusterError::WildcardError(format!(
                    "the server returns a status code that matches the provided options for \
                     non existing urls. {} => {} (Length: {}). Exclude the response length \
                     with --exclude-length, adjust the status codes, or use --force-wildcard \
                     to continue anyway",
                    url, response.status, response.size
                )));
            }
            warn!(
                "wildcard response {} => {} (Length: {}), continuing because it was forced",
                url, response.status, response.size
            );
            self.wildcard = true;
        }

        Ok(())
    }

    fn additional_words(&self, word: &str) -> Vec<String> {
        let with_extensions: Vec<String> = self
            .options
            .extensions
            .iter()
            .map(|ext| format!("{}.{}", word, ext))
            .collect();

        let mut words = with_extensions.clone();
        if self.options.discover_backup {
            for base in std::iter::once(word.to_string()).chain(with_extensions) {
                for suffix in BACKUP_SUFFIXES {
                    words.push(format!("{}{}", base, suffix));
                }
                words.push(swap_file(&base));
            }
        }
        words
    }

    async fn process_word(&self, word: &str, sink: &ResultSink) -> Result<()> {
        let path = format!("{}{}", word, self.suffix());
        let url = format!("{}{}", self.base_url, path);

        let response = self.session.request(&url, &RequestParts::default()).await?;
        let found = self.is_found(response.status, response.size);

        if found || self.verbose {
            sink.emit(DirResult {
                path: format!("/{}", path),
                url,
                status_code: response.status,
                size: response.size,
                location: response.location,
                status: ResultStatus::from_found(found),
                expanded: self.options.expanded,
                no_status: self.options.no_status,
                hide_length: self.options.hide_length,
                verbose: self.verbose,
            });
        }

        Ok(())
    }

    fn config_string(&self) -> String {
        let o = &self.options;
        let mut out = String::new();
        config_line(&mut out, "Url", &self.base_url);
        config_line(&mut out, "Method", &o.http.method);
        if !o.status_codes_blacklist.is_empty() {
            config_line(&mut out, "Negative Status codes", join_set(&o.status_codes_blacklist));
        } else if !o.status_codes.is_empty() {
            config_line(&mut out, "Status codes", join_set(&o.status_codes));
        }
        if !o.exclude_length.is_empty() {
            config_line(&mut out, "Exclude Length", join_set(&o.exclude_length));
        }
        if let Some(proxy) = &o.http.proxy {
            config_line(&mut out, "Proxy", proxy);
        }
        if o.http.cookies.is_some() {
            config_line(&mut out, "Cookies", "set");
        }
        config_line(&mut out, "User Agent", &o.http.user_agent);
        if o.http.username.is_some() {
            config_line(&mut out, "Auth User", o.http.username.as_deref().unwrap_or_default());
        }
        if !o.extensions.is_empty() {
            config_line(&mut out, "Extensions", o.extensions.join(","));
        }
        if o.discover_backup {
            config_line(&mut out, "Discover Backup", "true");
        }
        if o.add_slash {
            config_line(&mut out, "Add Slash", "true");
        }
        if o.expanded {
            config_line(&mut out, "Expanded", "true");
        }
        if o.http.follow_redirect {
            config_line(&mut out, "Follow Redirect", "true");
        }
        if o.force_wildcard {
            config_line(&mut out, "Force Wildcard", "true");
        }
        config_line(&mut out, "Timeout", format!("{:?}", o.http.timeout));
        out
    }
}
