// src/session.rs
use crate::error::Result;
use crate::types::{BusterError, Header, HttpOptions};
use log::debug;
use reqwest::header::{COOKIE, HOST, LOCATION};
use reqwest::{redirect, Client, Method};
use std::future::Future;
use std::time::Duration;
use url::Url;

/// Bounded retries on transport timeouts. Every other error is returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn from_options(options: &HttpOptions) -> Self {
        if options.retry_on_timeout {
            Self::new(options.retry_attempts)
        } else {
            Self::none()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn should_retry(&self, attempt: u32, error: &BusterError) -> bool {
        attempt < self.max_attempts && error.is_timeout()
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt, &e) => {
                    debug!("attempt {}/{} timed out: {}", attempt, self.max_attempts, e);
                    // Exponential backoff
                    let delay = Duration::from_millis(100 * 2u64.pow((attempt - 1).min(6)));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Per-request overrides on top of the session defaults.
#[derive(Debug, Default)]
pub struct RequestParts<'a> {
    pub host: Option<&'a str>,
    /// Replaces the session headers when set.
    pub headers: Option<&'a [Header]>,
    pub body: Option<String>,
    pub credentials: Option<(&'a str, &'a str)>,
    pub read_body: bool,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub size: u64,
    pub body: Option<Vec<u8>>,
    pub location: Option<String>,
}

#[derive(Clone)]
pub struct Session {
    client: Client,
    method: Method,
    headers: Vec<Header>,
    cookies: Option<String>,
    credentials: Option<(String, String)>,
    retry: RetryPolicy,
}

impl Session {
    pub fn new(options: &HttpOptions) -> Result<Self> {
        let method = Method::from_bytes(options.method.to_uppercase().as_bytes())
            .map_err(|e| BusterError::ConfigError(format!("Invalid HTTP method: {}", e)))?;

        let redirect_policy = if options.follow_redirect {
            redirect::Policy::limited(10)
        } else {
            redirect::Policy::none()
        };

        let mut client_builder = Client::builder()
            .timeout(options.timeout)
            .user_agent(&options.user_agent)
            .gzip(true)
            .deflate(true)
            .redirect(redirect_policy)
            .danger_accept_invalid_certs(options.no_tls_validation)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100);

        if let Some(proxy_url) = &options.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| BusterError::ConfigError(format!("Invalid proxy URL: {}", e)))?;
            client_builder = client_builder.proxy(proxy);
        }

        let client = client_builder.build().map_err(|e| {
            BusterError::ConfigError(format!("Failed to build HTTP client: {}", e))
        })?;

        let credentials = options.username.as_ref().map(|user| {
            (
                user.clone(),
                options.password.clone().unwrap_or_default(),
            )
        });

        Ok(Session {
            client,
            method,
            headers: options.headers.clone(),
            cookies: options.cookies.clone(),
            credentials,
            retry: RetryPolicy::from_options(options),
        })
    }

    pub async fn request(&self, url: &str, parts: &RequestParts<'_>) -> Result<HttpResponse> {
        let url = parse_url(url)?;
        self.retry.run(|| self.send(url.clone(), parts)).await
    }

    async fn send(&self, url: Url, parts: &RequestParts<'_>) -> Result<HttpResponse> {
        let mut request = self.client.request(self.method.clone(), url);

        for header in parts.headers.unwrap_or(self.headers.as_slice()) {
            request = request.header(header.name.as_str(), header.value.as_str());
        }
        if let Some(cookies) = &self.cookies {
            request = request.header(COOKIE, cookies.as_str());
        }
        if let Some(host) = parts.host {
            request = request.header(HOST, host);
        }

        let credentials = parts.credentials.or_else(|| {
            self.credentials
                .as_ref()
                .map(|(user, pass)| (user.as_str(), pass.as_str()))
        });
        if let Some((user, pass)) = credentials {
            request = request.basic_auth(user, Some(pass));
        }

        if let Some(body) = &parts.body {
            request = request.body(body.clone());
        }

        let response = request.send().await?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        match response.content_length() {
            Some(length) if !parts.read_body => Ok(HttpResponse {
                status,
                size: length,
                body: None,
                location,
            }),
            _ => {
                let bytes = response.bytes().await?;
                Ok(HttpResponse {
                    status,
                    size: bytes.len() as u64,
                    body: parts.read_body.then(|| bytes.to_vec()),
                    location,
                })
            }
        }
    }
}

/// Parses a URL built from a word. Control characters are rejected rather than encoded.
pub fn parse_url(raw: &str) -> Result<Url> {
    if let Some(c) = raw.chars().find(|c| c.is_control()) {
        return Err(BusterError::InvalidUrl {
            url: raw.to_string(),
            message: format!("invalid control character {:?}", c),
        });
    }

    Url::parse(raw).map_err(|e| BusterError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })
}
