// src/plugins/bucket.rs
//! Cloud storage bucket enumeration for Amazon S3 and Google Cloud Storage.

use super::{config_line, status_prefix, Plugin, ResultSink};
use crate::error::Result;
use crate::session::{parse_url, RequestParts, Session};
use crate::types::{BusterError, GlobalOptions, HttpOptions, ResultStatus};
use async_trait::async_trait;
use log::debug;
use regex::Regex;
use serde::Deserialize;
use std::fmt::{self, Write};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    S3,
    Gcs,
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Provider::S3 => "S3",
            Provider::Gcs => "GCS",
        }
    }

    /// Checks the provider naming rules. Invalid names are never requested.
    pub fn is_valid_bucket_name(&self, name: &str) -> bool {
        match self {
            // 3-63 chars, lowercase, digits, dots and hyphens
            Provider::S3 => {
                static RE: OnceLock<Regex> = OnceLock::new();
                let re = RE.get_or_init(|| {
                    Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$")
                        .expect("S3 bucket regex is valid")
                });
                re.is_match(name) && !name.contains("..")
            }
            // 3-222 chars, underscores allowed except at either end
            Provider::Gcs => {
                static RE: OnceLock<Regex> = OnceLock::new();
                let re = RE.get_or_init(|| {
                    Regex::new(r"^[a-z0-9][a-z0-9._\-]{1,220}[a-z0-9]$")
                        .expect("GCS bucket regex is valid")
                });
                re.is_match(name) && !name.contains("..")
            }
        }
    }

    fn listing_url(&self, endpoint: Option<&str>, bucket: &str, max_files: usize) -> String {
        match (self, endpoint) {
            (Provider::S3, None) => {
                format!("https://{}.s3.amazonaws.com/?max-keys={}", bucket, max_files)
            }
            (Provider::S3, Some(endpoint)) => format!(
                "{}/{}/?max-keys={}",
                endpoint.trim_end_matches('/'),
                bucket,
                max_files
            ),
            (Provider::Gcs, endpoint) => format!(
                "{}/storage/v1/b/{}/o?maxResults={}",
                endpoint
                    .unwrap_or("https://storage.googleapis.com")
                    .trim_end_matches('/'),
                bucket,
                max_files
            ),
        }
    }

    /// Summarises a response body: the object listing for a 200, the provider error otherwise.
    fn describe(&self, status: u16, body: &[u8]) -> Result<String> {
        let text = String::from_utf8_lossy(body);
        match (self, status) {
            (Provider::S3, 200) => {
                let listing: S3Listing = quick_xml::de::from_str(&text)
                    .map_err(|e| parse_error("S3 bucket listing", e))?;
                let objects = listing
                    .contents
                    .iter()
                    .map(|o| (o.key.as_str(), o.size.to_string()));
                Ok(listing_summary(objects, listing.is_truncated))
            }
            (Provider::S3, _) => {
                let error: S3Error = quick_xml::de::from_str(&text)
                    .map_err(|e| parse_error("S3 error response", e))?;
                Ok(format!("Error: {}: {}", error.code, error.message))
            }
            (Provider::Gcs, 200) => {
                let listing: GcsListing = serde_json::from_str(&text)
                    .map_err(|e| parse_error("GCS bucket listing", e))?;
                let objects = listing
                    .items
                    .iter()
                    .map(|o| (o.name.as_str(), o.size.clone()));
                Ok(listing_summary(objects, listing.next_page_token.is_some()))
            }
            (Provider::Gcs, _) => {
                let error: GcsErrorBody = serde_json::from_str(&text)
                    .map_err(|e| parse_error("GCS error response", e))?;
                Ok(format!("Error: {}", error.error.message))
            }
        }
    }
}

fn parse_error(what: &str, error: impl fmt::Display) -> BusterError {
    BusterError::ParseError(format!("could not parse {}: {}", what, error))
}

fn listing_summary<'a>(objects: impl Iterator<Item = (&'a str, String)>, truncated: bool) -> String {
    let mut files: Vec<String> = objects
        .map(|(name, size)| format!("{} ({}b)", name, size))
        .collect();
    if files.is_empty() {
        return "Bucket Listing enabled: (empty)".to_string();
    }
    if truncated {
        files.push("...".to_string());
    }
    format!("Bucket Listing enabled: {}", files.join(", "))
}

#[derive(Debug, Deserialize)]
struct S3Listing {
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "Contents", default)]
    contents: Vec<S3Object>,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size", default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct S3Error {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GcsListing {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsObject {
    name: String,
    // GCS reports sizes as decimal strings
    #[serde(default)]
    size: String,
}

#[derive(Debug, Deserialize)]
struct GcsErrorBody {
    error: GcsError,
}

#[derive(Debug, Deserialize)]
struct GcsError {
    message: String,
}

#[derive(Debug, Clone)]
pub struct BucketOptions {
    pub provider: Provider,
    /// Only transport settings are used; the url is derived per bucket.
    pub http: HttpOptions,
    pub max_files: usize,
    pub show_files: bool,
    /// S3 compatible or emulator endpoint, addressed path-style.
    pub endpoint: Option<String>,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            provider: Provider::S3,
            http: HttpOptions::default(),
            max_files: 5,
            show_files: false,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BucketResult {
    pub bucket: String,
    pub url: String,
    pub status_code: u16,
    pub extra: Option<String>,
    pub status: ResultStatus,
    pub verbose: bool,
}

impl BucketResult {
    pub(crate) fn write_line(&self, out: &mut String) -> fmt::Result {
        if self.verbose {
            out.push_str(status_prefix(self.status));
        }
        out.push_str(&self.url);
        if self.verbose {
            write!(out, " (Status: {})", self.status_code)?;
        }
        if let Some(extra) = &self.extra {
            write!(out, " [{}]", extra)?;
        }
        Ok(())
    }
}

pub struct BucketPlugin {
    options: BucketOptions,
    session: Session,
    verbose: bool,
}

impl BucketPlugin {
    pub fn new(global: &GlobalOptions, options: BucketOptions) -> Result<Self> {
        if options.max_files == 0 {
            return Err(BusterError::ConfigError(
                "max files must be greater than zero".to_string(),
            ));
        }
        if let Some(endpoint) = &options.endpoint {
            parse_url(endpoint)
                .map_err(|e| BusterError::ConfigError(format!("invalid endpoint: {}", e)))?;
        }

        let session = Session::new(&options.http)?;
        Ok(Self {
            options,
            session,
            verbose: global.verbose,
        })
    }

    fn wants_details(&self) -> bool {
        self.verbose || self.options.show_files
    }
}

#[async_trait]
impl Plugin for BucketPlugin {
    fn name(&self) -> &str {
        match self.options.provider {
            Provider::S3 => "S3 bucket enumeration",
            Provider::Gcs => "GCS bucket enumeration",
        }
    }

    async fn pre_run(&mut self) -> Result<()> {
        Ok(())
    }

    async fn process_word(&self, word: &str, sink: &ResultSink) -> Result<()> {
        let provider = self.options.provider;
        if !provider.is_valid_bucket_name(word) {
            debug!("skipping invalid {} bucket name {:?}", provider.label(), word);
            return Ok(());
        }

        let url = provider.listing_url(self.options.endpoint.as_deref(), word, self.options.max_files);
        let parts = RequestParts {
            read_body: self.wants_details(),
            ..RequestParts::default()
        };
        let response = self.session.request(&url, &parts).await?;

        let found = !matches!(response.status, 401 | 403 | 404);
        if !found && !self.verbose {
            return Ok(());
        }

        let mut result = BucketResult {
            bucket: word.to_string(),
            url,
            status_code: response.status,
            extra: None,
            status: ResultStatus::from_found(found),
            verbose: self.verbose,
        };

        if found && self.wants_details() {
            if let Some(body) = &response.body {
                match provider.describe(response.status, body) {
                    Ok(extra) => result.extra = Some(extra),
                    Err(e) => {
                        sink.emit(result);
                        return Err(e);
                    }
                }
            }
        }

        sink.emit(result);
        Ok(())
    }

    fn config_string(&self) -> String {
        let o = &self.options;
        let mut out = String::new();
        config_line(&mut out, "Provider", o.provider.label());
        if let Some(endpoint) = &o.endpoint {
            config_line(&mut out, "Endpoint", endpoint);
        }
        config_line(&mut out, "Maximum files to list", o.max_files);
        if o.show_files {
            config_line(&mut out, "Show Files", "true");
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

    fn plugin(provider: Provider, endpoint: &str, show_files: bool) -> BucketPlugin {
        BucketPlugin::new(
            &GlobalOptions::default(),
            BucketOptions {
                provider,
                endpoint: Some(endpoint.to_string()),
                show_files,
                ..BucketOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_s3_bucket_names() {
        let s3 = Provider::S3;
        assert!(s3.is_valid_bucket_name("my-bucket.logs"));
        assert!(s3.is_valid_bucket_name("abc"));
        assert!(!s3.is_valid_bucket_name("ab"));
        assert!(!s3.is_valid_bucket_name(&"a".repeat(64)));
        assert!(!s3.is_valid_bucket_name("-bucket"));
        assert!(!s3.is_valid_bucket_name("bucket."));
        assert!(!s3.is_valid_bucket_name("my_bucket"));
        assert!(!s3.is_valid_bucket_name("My-Bucket"));
        assert!(!s3.is_valid_bucket_name("a..b"));
    }

    #[test]
    fn test_gcs_bucket_names() {
        let gcs = Provider::Gcs;
        assert!(gcs.is_valid_bucket_name("my_bucket"));
        assert!(gcs.is_valid_bucket_name(&"a".repeat(100)));
        assert!(!gcs.is_valid_bucket_name("_bucket"));
        assert!(!gcs.is_valid_bucket_name("bucket_"));
        assert!(!gcs.is_valid_bucket_name(&"a".repeat(223)));
        assert!(!gcs.is_valid_bucket_name("bad bucket"));
    }

    #[test]
    fn test_listing_urls() {
        assert_eq!(
            Provider::S3.listing_url(None, "logs", 5),
            "https://logs.s3.amazonaws.com/?max-keys=5"
        );
        assert_eq!(
            Provider::S3.listing_url(Some("http://localhost:9000/"), "logs", 5),
            "http://localhost:9000/logs/?max-keys=5"
        );
        assert_eq!(
            Provider::Gcs.listing_url(None, "logs", 3),
            "https://storage.googleapis.com/storage/v1/b/logs/o?maxResults=3"
        );
    }

    #[test]
    fn test_describe_s3_bodies() {
        let listing = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>logs</Name>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>a.txt</Key><Size>12</Size></Contents>
  <Contents><Key>b.txt</Key><Size>3</Size></Contents>
</ListBucketResult>"#;
        assert_eq!(
            Provider::S3.describe(200, listing).unwrap(),
            "Bucket Listing enabled: a.txt (12b), b.txt (3b), ..."
        );

        let error = br#"<Error><Code>PermanentRedirect</Code><Message>Use the other endpoint</Message></Error>"#;
        assert_eq!(
            Provider::S3.describe(301, error).unwrap(),
            "Error: PermanentRedirect: Use the other endpoint"
        );
    }

    #[test]
    fn test_describe_gcs_bodies() {
        let listing = br#"{"kind":"storage#objects","items":[{"name":"dump.sql","size":"2048"}]}"#;
        assert_eq!(
            Provider::Gcs.describe(200, listing).unwrap(),
            "Bucket Listing enabled: dump.sql (2048b)"
        );
        assert_eq!(
            Provider::Gcs.describe(200, br#"{"kind":"storage#objects"}"#).unwrap(),
            "Bucket Listing enabled: (empty)"
        );
        assert!(matches!(
            Provider::Gcs.describe(200, b"not json"),
            Err(BusterError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let mut server = mockito::Server::new_async().await;
        let _open = server
            .mock("GET", "/open-bucket/")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .create_async()
            .await;
        let _denied = server
            .mock("GET", "/private-bucket/")
            .match_query(mockito::Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let plugin = plugin(Provider::S3, &server.url(), false);
        let (sink, mut results, _errors) = ResultSink::channel();
        plugin.process_word("open-bucket", &sink).await.unwrap();
        plugin.process_word("private-bucket", &sink).await.unwrap();
        plugin.process_word("Invalid_Name", &sink).await.unwrap();
        drop(sink);

        let result = results.recv().await.unwrap();
        assert_eq!(result.entity(), "open-bucket");
        assert_eq!(
            result.render().unwrap(),
            format!("{}/open-bucket/?max-keys=5", server.url())
        );
        assert!(results.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_listing_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _listing = server
            .mock("GET", "/storage/v1/b/backups/o")
            .match_query(mockito::Matcher::UrlEncoded(
                "maxResults".to_string(),
                "5".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"items":[{"name":"db.tar.gz","size":"99"}]}"#)
            .create_async()
            .await;

        let plugin = plugin(Provider::Gcs, &server.url(), true);
        let (sink, mut results, _errors) = ResultSink::channel();
        plugin.process_word("backups", &sink).await.unwrap();
        drop(sink);

        let rendered = results.recv().await.unwrap().render().unwrap();
        assert!(rendered.ends_with("[Bucket Listing enabled: db.tar.gz (99b)]"));
    }

    #[tokio::test]
    async fn test_parse_failure_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _broken = server
            .mock("GET", "/storage/v1/b/broken/o")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let plugin = plugin(Provider::Gcs, &server.url(), true);
        let (sink, mut results, _errors) = ResultSink::channel();
        let outcome = plugin.process_word("broken", &sink).await;
        drop(sink);

        assert!(matches!(outcome, Err(BusterError::ParseError(_))));
        assert!(results.recv().await.unwrap().status().is_found());
    }
}
