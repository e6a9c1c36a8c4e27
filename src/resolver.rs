// src/resolver.rs
use crate::error::Result;
use crate::types::BusterError;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use trust_dns_resolver::config::{
    LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig as DnsResolverConfig,
    ResolverOpts,
};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::rr::RecordType;
use trust_dns_resolver::TokioAsyncResolver;

/// Host lookups needed by the DNS mode.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// Addresses of `host`; empty when the name does not exist.
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>>;

    async fn lookup_cname(&self, host: &str) -> Result<Option<String>>;
}

pub struct Resolver {
    resolver: TokioAsyncResolver,
}

impl Resolver {
    /// Uses the system configuration unless a nameserver (`ip` or `ip:port`) is given.
    pub fn new(nameserver: Option<&str>, timeout: Duration) -> Result<Self> {
        let (config, mut opts) = match nameserver {
            Some(ns) => {
                let socket_addr = parse_nameserver(ns)?;
                let mut config = DnsResolverConfig::new();
                config.add_name_server(NameServerConfig::new(socket_addr, Protocol::Udp));
                config.add_name_server(NameServerConfig::new(socket_addr, Protocol::Tcp));
                (config, ResolverOpts::default())
            }
            None => trust_dns_resolver::system_conf::read_system_conf().map_err(|e| {
                BusterError::ResolutionError(format!("Failed to read system resolver: {}", e))
            })?,
        };

        opts.timeout = timeout;
        opts.attempts = 2;
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

        Ok(Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        })
    }
}

#[async_trait]
impl Lookup for Resolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) => not_found_or(e, host, Vec::new()),
        }
    }

    async fn lookup_cname(&self, host: &str) -> Result<Option<String>> {
        match self.resolver.lookup(host, RecordType::CNAME).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter(|record| record.record_type() == RecordType::CNAME)
                .find_map(|record| record.data().map(|data| data.to_string()))),
            Err(e) => not_found_or(e, host, None),
        }
    }
}

fn not_found_or<T>(error: ResolveError, host: &str, empty: T) -> Result<T> {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => Ok(empty),
        ResolveErrorKind::Timeout => Err(BusterError::Timeout(format!(
            "DNS lookup of {} timed out",
            host
        ))),
        _ => Err(BusterError::ResolutionError(format!(
            "Failed to resolve {}: {}",
            host, error
        ))),
    }
}

pub fn parse_nameserver(input: &str) -> Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    input
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|e| {
            BusterError::ConfigError(format!("Invalid nameserver address {}: {}", input, e))
        })
}
