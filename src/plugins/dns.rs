// src/plugins/dns.rs
use super::{config_line, status_prefix, Plugin, ResultSink};
use crate::error::Result;
use crate::resolver::{Lookup, Resolver};
use crate::session::RetryPolicy;
use crate::types::{BusterError, GlobalOptions, ResultStatus};
use crate::utils::{is_valid_domain, random_token};
use async_trait::async_trait;
use log::warn;
use std::collections::BTreeSet;
use std::fmt::{self, Write};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DnsOptions {
    pub domain: String,
    pub show_ips: bool,
    pub show_cname: bool,
    /// Custom nameserver, `ip` or `ip:port`.
    pub resolver: Option<String>,
    pub timeout: Duration,
    pub no_fqdn: bool,
    pub force_wildcard: bool,
    pub retry_on_timeout: bool,
    pub retry_attempts: u32,
}

impl Default for DnsOptions {
    fn default() -> Self {
        Self {
            domain: String::new(),
            show_ips: false,
            show_cname: false,
            resolver: None,
            timeout: Duration::from_secs(1),
            no_fqdn: false,
            force_wildcard: false,
            retry_on_timeout: false,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DnsResult {
    pub subdomain: String,
    pub ips: Vec<IpAddr>,
    pub cname: Option<String>,
    pub status: ResultStatus,
    pub show_ips: bool,
    pub show_cname: bool,
}

impl DnsResult {
    pub(crate) fn write_line(&self, out: &mut String) -> fmt::Result {
        out.push_str(status_prefix(self.status));
        out.push_str(&self.subdomain);
        if self.show_ips && !self.ips.is_empty() {
            let ips: Vec<String> = self.ips.iter().map(|ip| ip.to_string()).collect();
            write!(out, " [{}]", ips.join(","))?;
        }
        if self.show_cname {
            if let Some(cname) = &self.cname {
                write!(out, " [CNAME: {}]", cname)?;
            }
        }
        Ok(())
    }
}

/// True when some resolved address lies outside the wildcard set.
pub fn escapes_wildcard(wildcard: &BTreeSet<IpAddr>, ips: &[IpAddr]) -> bool {
    ips.iter().any(|ip| !wildcard.contains(ip))
}

pub struct DnsPlugin {
    options: DnsOptions,
    domain: String,
    lookup: Arc<dyn Lookup>,
    retry: RetryPolicy,
    verbose: bool,
    wildcard_ips: Option<BTreeSet<IpAddr>>,
}

impl DnsPlugin {
    pub fn new(global: &GlobalOptions, options: DnsOptions) -> Result<Self> {
        let resolver = Resolver::new(options.resolver.as_deref(), options.timeout)?;
        Self::with_lookup(global, options, Arc::new(resolver))
    }

    pub fn with_lookup(
        global: &GlobalOptions,
        options: DnsOptions,
        lookup: Arc<dyn Lookup>,
    ) -> Result<Self> {
        let domain = options.domain.trim().trim_end_matches('.').to_lowercase();
        if domain.is_empty() {
            return Err(BusterError::ConfigError("domain is required".to_string()));
        }
        if !is_valid_domain(&domain) {
            return Err(BusterError::ConfigError(format!(
                "invalid domain {:?}",
                options.domain
            )));
        }

        let retry = if options.retry_on_timeout {
            RetryPolicy::new(options.retry_attempts)
        } else {
            RetryPolicy::none()
        };

        Ok(Self {
            options,
            domain,
            lookup,
            retry,
            verbose: global.verbose,
            wildcard_ips: None,
        })
    }

    pub fn wildcard_ips(&self) -> Option<&BTreeSet<IpAddr>> {
        self.wildcard_ips.as_ref()
    }

    fn query_name(&self, name: &str) -> String {
        if self.options.no_fqdn {
            name.to_string()
        } else {
            format!("{}.", name)
        }
    }

    async fn resolve(&self, name: &str) -> Result<Vec<IpAddr>> {
        let query = self.query_name(name);
        self.retry.run(|| self.lookup.lookup_ip(&query)).await
    }
}

#[async_trait]
impl Plugin for DnsPlugin {
    fn name(&self) -> &str {
        "DNS enumeration"
    }

    async fn pre_run(&mut self) -> Result<()> {
        let probe = format!("{}.{}", random_token(16), self.domain);
        let ips = self
            .resolve(&probe)
            .await
            .map_err(|e| BusterError::ConnectError(format!("DNS calibration failed: {}", e)))?;

        if !ips.is_empty() {
            let wildcard: BTreeSet<IpAddr> = ips.into_iter().collect();
            let listed: Vec<String> = wildcard.iter().map(|ip| ip.to_string()).collect();
            if !self.options.force_wildcard {
                return Err(BusterError::WildcardError(format!(
                    "the DNS server returned the same IP for every domain. IP address(es) \
                     returned: {}. To force processing of wildcard DNS, use --wildcard",
                    listed.join(", ")
                )));
            }
            warn!(
                "wildcard DNS found. IP address(es): {}, results resolving only to them are hidden",
                listed.join(", ")
            );
            self.wildcard_ips = Some(wildcard);
        }

        match self.resolve(&self.domain).await {
            Ok(ips) if !ips.is_empty() => {}
            Ok(_) => warn!("unable to validate base domain: {}", self.domain),
            Err(e) => warn!("unable to validate base domain: {} ({})", self.domain, e),
        }

        Ok(())
    }

    async fn process_word(&self, word: &str, sink: &ResultSink) -> Result<()> {
        let subdomain = format!("{}.{}", word, self.domain);
        let mut ips = self.resolve(&subdomain).await?;
        ips.sort();
        ips.dedup();

        let found = !ips.is_empty()
            && self
                .wildcard_ips
                .as_ref()
                .map_or(true, |wildcard| escapes_wildcard(wildcard, &ips));

        if !found && !self.verbose {
            return Ok(());
        }

        let cname = if found && self.options.show_cname {
            self.lookup
                .lookup_cname(&self.query_name(&subdomain))
                .await
                .ok()
                .flatten()
        } else {
            None
        };

        sink.emit(DnsResult {
            subdomain,
            ips,
            cname,
            status: ResultStatus::from_found(found),
            show_ips: self.options.show_ips,
            show_cname: self.options.show_cname,
        });
        Ok(())
    }

    fn config_string(&self) -> String {
        let o = &self.options;
        let mut out = String::new();
        config_line(&mut out, "Domain", &self.domain);
        if let Some(resolver) = &o.resolver {
            config_line(&mut out, "Resolver", resolver);
        }
        if o.show_ips {
            config_line(&mut out, "Show IPs", "true");
        }
        if o.show_cname {
            config_line(&mut out, "Show CNAME", "true");
        }
        if o.no_fqdn {
            config_line(&mut out, "No FQDN", "true");
        }
        if o.force_wildcard {
            config_line(&mut out, "Wildcard forced", "true");
        }
        config_line(&mut out, "Timeout", format!("{:?}", o.timeout));
        if o.retry_on_timeout {
            config_line(&mut out, "Retry attempts", o.retry_attempts.to_string());
        }
        out
    }
}
