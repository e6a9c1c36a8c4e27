// src/cli.rs
use crate::config::FileConfig;
use crate::error::Result;
use crate::plugins::{
    BucketOptions, DirOptions, DnsOptions, FuzzOptions, PluginConfig, Provider, TftpOptions,
    VhostOptions,
};
use crate::types::{GlobalOptions, HttpOptions, WordSource};
use crate::utils::{parse_duration, parse_header, parse_lengths, parse_status_codes};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rustbuster",
    version,
    about = "Concurrent wordlist enumeration of directories, DNS names, virtual hosts, buckets and TFTP files",
    long_about = "rustbuster drives a wordlist against a target with a fixed pool of workers.\nEach mode calibrates against the target first so catch-all answers do not turn into false positives."
)]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Number of concurrent workers [default: 10]
    #[arg(short = 't', long = "threads", global = true)]
    pub threads: Option<usize>,

    /// Wordlist file, `-` reads from stdin
    #[arg(short = 'w', long = "wordlist", global = true, value_name = "FILE")]
    pub wordlist: Option<String>,

    /// Expand a single range expression such as `host-[1-20]` instead of reading a wordlist
    #[arg(long = "range", global = true, value_name = "EXPR", conflicts_with = "wordlist")]
    pub range: Option<String>,

    /// Resume after this many wordlist lines
    #[arg(long = "wordlist-offset", global = true, default_value_t = 0)]
    pub wordlist_offset: u64,

    /// Delay each worker between requests (e.g. 500ms, 1s)
    #[arg(long = "delay", global = true, value_parser = parse_duration)]
    pub delay: Option<Duration>,

    /// File of patterns, `{WORD}` is replaced by every word
    #[arg(short = 'p', long = "pattern", global = true, value_name = "FILE")]
    pub pattern: Option<PathBuf>,

    /// Append results to this file
    #[arg(short = 'o', long = "output", global = true, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Also report misses
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Only print results
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    #[arg(short = 'z', long = "no-progress", global = true)]
    pub no_progress: bool,

    /// Do not print per-word errors
    #[arg(long = "no-error", global = true)]
    pub no_error: bool,

    /// TOML configuration file
    #[arg(long = "config", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Mode {
    /// Directory and file enumeration
    Dir(DirArgs),
    /// DNS subdomain enumeration
    Dns(DnsArgs),
    /// Virtual host enumeration
    Vhost(VhostArgs),
    /// Fuzz the FUZZ keyword in url, headers, body or credentials
    Fuzz(FuzzArgs),
    /// Amazon S3 bucket enumeration
    S3(BucketArgs),
    /// Google Cloud Storage bucket enumeration
    Gcs(BucketArgs),
    /// TFTP file enumeration
    Tftp(TftpArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct HttpArgs {
    /// Target url
    #[arg(short = 'u', long = "url")]
    pub url: String,

    #[arg(short = 'm', long = "method", default_value = "GET")]
    pub method: String,

    /// Extra header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    #[arg(short = 'c', long = "cookies")]
    pub cookies: Option<String>,

    #[arg(short = 'a', long = "useragent")]
    pub user_agent: Option<String>,

    #[arg(short = 'U', long = "username")]
    pub username: Option<String>,

    #[arg(short = 'P', long = "password")]
    pub password: Option<String>,

    #[arg(long = "proxy")]
    pub proxy: Option<String>,

    /// Request timeout in seconds [default: 10]
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Skip TLS certificate verification
    #[arg(short = 'k', long = "no-tls-validation")]
    pub no_tls_validation: bool,

    #[arg(short = 'r', long = "follow-redirect")]
    pub follow_redirect: bool,

    /// Retry requests that time out
    #[arg(long = "retry")]
    pub retry: bool,

    #[arg(long = "retry-attempts", default_value_t = 3)]
    pub retry_attempts: u32,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DirArgs {
    #[command(flatten)]
    pub http: HttpArgs,

    /// Positive status codes, e.g. `200,204,301-308`
    #[arg(short = 's', long = "status-codes")]
    pub status_codes: Option<String>,

    /// Negative status codes, overrides --status-codes [default: 404]
    #[arg(short = 'b', long = "status-codes-blacklist")]
    pub status_codes_blacklist: Option<String>,

    /// File extensions to append, comma separated
    #[arg(short = 'x', long = "extensions", value_delimiter = ',')]
    pub extensions: Vec<String>,

    #[arg(short = 'f', long = "add-slash")]
    pub add_slash: bool,

    /// Also probe backup and swap files of every word
    #[arg(short = 'd', long = "discover-backup")]
    pub discover_backup: bool,

    #[arg(long = "exclude-length")]
    pub exclude_length: Option<String>,

    /// Print full urls
    #[arg(short = 'e', long = "expanded")]
    pub expanded: bool,

    #[arg(short = 'n', long = "no-status")]
    pub no_status: bool,

    #[arg(long = "hide-length")]
    pub hide_length: bool,

    /// Continue when the server answers every path
    #[arg(long = "force-wildcard")]
    pub force_wildcard: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DnsArgs {
    #[arg(short = 'd', long = "domain")]
    pub domain: String,

    #[arg(short = 'i', long = "show-ips")]
    pub show_ips: bool,

    #[arg(long = "show-cname")]
    pub show_cname: bool,

    /// Nameserver, `ip` or `ip:port`
    #[arg(short = 'r', long = "resolver")]
    pub resolver: Option<String>,

    /// Lookup timeout, e.g. 1s
    #[arg(long = "timeout", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Do not append the root dot to lookups
    #[arg(long = "no-fqdn")]
    pub no_fqdn: bool,

    /// Continue when a wildcard record is found
    #[arg(long = "wildcard")]
    pub wildcard: bool,

    /// Retry lookups that time out
    #[arg(long = "retry")]
    pub retry: bool,

    #[arg(long = "retry-attempts", default_value_t = 3)]
    pub retry_attempts: u32,
}

#[derive(clap::Args, Debug, Clone)]
pub struct VhostArgs {
    #[command(flatten)]
    pub http: HttpArgs,

    /// Probe `word.domain` instead of the bare word
    #[arg(long = "append-domain")]
    pub append_domain: bool,

    /// Domain for appended and calibration hosts [default: url host]
    #[arg(long = "domain")]
    pub domain: Option<String>,

    #[arg(long = "exclude-length")]
    pub exclude_length: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct FuzzArgs {
    #[command(flatten)]
    pub http: HttpArgs,

    /// Request body, may contain FUZZ
    #[arg(short = 'B', long = "body")]
    pub body: Option<String>,

    #[arg(short = 'b', long = "exclude-status")]
    pub exclude_status: Option<String>,

    #[arg(long = "exclude-length")]
    pub exclude_length: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct BucketArgs {
    /// Objects to list per bucket
    #[arg(short = 'm', long = "max-files", default_value_t = 5)]
    pub max_files: usize,

    #[arg(short = 's', long = "show-files")]
    pub show_files: bool,

    /// Custom endpoint, addressed path-style
    #[arg(long = "endpoint")]
    pub endpoint: Option<String>,

    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    #[arg(long = "proxy")]
    pub proxy: Option<String>,

    #[arg(short = 'a', long = "useragent")]
    pub user_agent: Option<String>,

    #[arg(short = 'k', long = "no-tls-validation")]
    pub no_tls_validation: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct TftpArgs {
    /// `host[:port]`
    #[arg(short = 's', long = "server")]
    pub server: String,

    #[arg(long = "timeout", value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

impl Args {
    /// Merges the command line over the file configuration.
    pub fn into_options(self, file: &FileConfig) -> Result<(GlobalOptions, PluginConfig)> {
        let global = self.global.to_options(file);
        let config = match self.mode {
            Mode::Dir(args) => PluginConfig::Dir(args.into_options(file)?),
            Mode::Dns(args) => PluginConfig::Dns(args.into_options(file)),
            Mode::Vhost(args) => PluginConfig::Vhost(args.into_options(file)?),
            Mode::Fuzz(args) => PluginConfig::Fuzz(args.into_options(file)?),
            Mode::S3(args) => PluginConfig::Bucket(args.into_options(Provider::S3, file)),
            Mode::Gcs(args) => PluginConfig::Bucket(args.into_options(Provider::Gcs, file)),
            Mode::Tftp(args) => PluginConfig::Tftp(args.into_options()),
        };
        Ok((global, config))
    }

    /// True when words will be read from stdin.
    pub fn use_stdin(&self) -> bool {
        self.global.range.is_none() && self.global.wordlist.as_deref().map_or(true, |w| w == "-")
    }
}

impl GlobalArgs {
    fn to_options(&self, file: &FileConfig) -> GlobalOptions {
        let words = match (&self.range, &self.wordlist) {
            (Some(expr), _) => WordSource::Range(expr.clone()),
            (None, Some(path)) => WordSource::from_arg(path),
            (None, None) => WordSource::Stdin,
        };

        GlobalOptions {
            threads: self.threads.or(file.threads).unwrap_or(10),
            words,
            offset: self.wordlist_offset,
            delay: self
                .delay
                .or_else(|| file.delay_ms.map(Duration::from_millis)),
            pattern_file: self.pattern.clone(),
            output_file: self.output.clone(),
            verbose: self.verbose,
            quiet: self.quiet,
            no_progress: self.no_progress,
            no_error: self.no_error,
        }
    }
}

impl HttpArgs {
    fn into_options(self, file: &FileConfig) -> Result<HttpOptions> {
        let defaults = HttpOptions::default();
        let headers = file
            .headers
            .iter()
            .chain(self.headers.iter())
            .map(|raw| parse_header(raw))
            .collect::<Result<Vec<_>>>()?;

        Ok(HttpOptions {
            url: self.url,
            method: self.method,
            headers,
            cookies: self.cookies,
            user_agent: self
                .user_agent
                .or_else(|| file.user_agent.clone())
                .unwrap_or(defaults.user_agent),
            username: self.username,
            password: self.password,
            proxy: self.proxy.or_else(|| file.proxy.clone()),
            timeout: timeout_or(self.timeout, file, defaults.timeout),
            no_tls_validation: self.no_tls_validation,
            follow_redirect: self.follow_redirect,
            retry_on_timeout: self.retry,
            retry_attempts: self.retry_attempts,
        })
    }
}

fn timeout_or(secs: Option<u64>, file: &FileConfig, default: Duration) -> Duration {
    secs.or(file.timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn lengths(raw: Option<&str>) -> Result<BTreeSet<u64>> {
    raw.map(parse_lengths).transpose().map(Option::unwrap_or_default)
}

impl DirArgs {
    fn into_options(self, file: &FileConfig) -> Result<DirOptions> {
        let status_codes = self
            .status_codes
            .as_deref()
            .map(parse_status_codes)
            .transpose()?
            .unwrap_or_default();

        // An explicit accept list drops the default 404 deny list.
        let status_codes_blacklist = match self.status_codes_blacklist.as_deref() {
            Some(raw) => parse_status_codes(raw)?,
            None if !status_codes.is_empty() => BTreeSet::new(),
            None => BTreeSet::from([404]),
        };

        Ok(DirOptions {
            http: self.http.into_options(file)?,
            status_codes,
            status_codes_blacklist,
            extensions: self.extensions,
            add_slash: self.add_slash,
            discover_backup: self.discover_backup,
            exclude_length: lengths(self.exclude_length.as_deref())?,
            expanded: self.expanded,
            no_status: self.no_status,
            hide_length: self.hide_length,
            force_wildcard: self.force_wildcard,
        })
    }
}

impl DnsArgs {
    fn into_options(self, file: &FileConfig) -> DnsOptions {
        let defaults = DnsOptions::default();
        DnsOptions {
            domain: self.domain,
            show_ips: self.show_ips,
            show_cname: self.show_cname,
            resolver: self.resolver.or_else(|| file.resolver.clone()),
            timeout: self
                .timeout
                .or_else(|| file.timeout_secs.map(Duration::from_secs))
                .unwrap_or(defaults.timeout),
            no_fqdn: self.no_fqdn,
            force_wildcard: self.wildcard,
            retry_on_timeout: self.retry,
            retry_attempts: self.retry_attempts,
        }
    }
}

impl VhostArgs {
    fn into_options(self, file: &FileConfig) -> Result<VhostOptions> {
        Ok(VhostOptions {
            exclude_length: lengths(self.exclude_length.as_deref())?,
            http: self.http.into_options(file)?,
            append_domain: self.append_domain,
            domain: self.domain,
        })
    }
}

impl FuzzArgs {
    fn into_options(self, file: &FileConfig) -> Result<FuzzOptions> {
        Ok(FuzzOptions {
            exclude_status: self
                .exclude_status
                .as_deref()
                .map(parse_status_codes)
                .transpose()?
                .unwrap_or_default(),
            exclude_length: lengths(self.exclude_length.as_deref())?,
            http: self.http.into_options(file)?,
            request_body: self.body,
        })
    }
}

impl BucketArgs {
    fn into_options(self, provider: Provider, file: &FileConfig) -> BucketOptions {
        let defaults = HttpOptions::default();
        BucketOptions {
            provider,
            http: HttpOptions {
                user_agent: self
                    .user_agent
                    .or_else(|| file.user_agent.clone())
                    .unwrap_or(defaults.user_agent.clone()),
                proxy: self.proxy.or_else(|| file.proxy.clone()),
                timeout: timeout_or(self.timeout, file, defaults.timeout),
                no_tls_validation: self.no_tls_validation,
                ..defaults
            },
            max_files: self.max_files,
            show_files: self.show_files,
            endpoint: self.endpoint,
        }
    }
}

impl TftpArgs {
    fn into_options(self) -> TftpOptions {
        let defaults = TftpOptions::default();
        TftpOptions {
            server: self.server,
            timeout: self.timeout.unwrap_or(defaults.timeout),
        }
    }
}
