use std::str::FromStr;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, PROXY_AUTHORIZATION,
    RETRY_AFTER, USER_AGENT,
};
use reqwest::{Method, StatusCode, Url};

use crate::body::{RequestBody, multipart_form};
use crate::cancel::Cancel;
use crate::error::TransportError;

pub const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    #[default]
    Bearer,
    Basic,
}

impl FromStr for AuthScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bearer" => Ok(AuthScheme::Bearer),
            "basic" => Ok(AuthScheme::Basic),
            other => Err(anyhow!("invalid --auth {other:?} (expected bearer or basic)")),
        }
    }
}

/// Set `Authorization` for `token`. Basic auth sends the token as the
/// username with an empty password.
pub fn apply_auth(headers: &mut HeaderMap, token: &str, scheme: AuthScheme) -> Result<()> {
    let raw = match scheme {
        AuthScheme::Bearer => format!("Bearer {token}"),
        AuthScheme::Basic => format!("Basic {}", STANDARD.encode(format!("{token}:"))),
    };
    let mut value = HeaderValue::from_str(&raw).context("invalid token")?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub retry_non_idempotent: bool,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_non_idempotent: false,
            user_agent: crate::user_agent(),
        }
    }
}

/// A fully built request. The body is rebuilt from `body` on every attempt,
/// so retries send it again from the start.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

pub struct ApiClient {
    client: Client,
    user_agent: HeaderValue,
    retry_non_idempotent: bool,
}

impl ApiClient {
    pub fn new(opts: ClientOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(opts.timeout)
            .build()
            .context("build http client")?;
        let user_agent = HeaderValue::from_str(&opts.user_agent).context("invalid user agent")?;
        Ok(Self {
            client,
            user_agent,
            retry_non_idempotent: opts.retry_non_idempotent,
        })
    }

    /// Send with up to [`MAX_ATTEMPTS`] attempts. Only completed responses
    /// with status 429 or 5xx are retried; a network failure returns at once.
    pub fn send(&self, request: &ApiRequest, cancel: &Cancel) -> Result<ApiResponse, TransportError> {
        let mut headers = request.headers.clone();
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.user_agent.clone());
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }
        log_request(request, &headers);

        let mut attempt = 1;
        loop {
            let mut builder = self
                .client
                .request(request.method.clone(), request.url.clone())
                .headers(headers.clone());
            builder = match &request.body {
                Some(RequestBody::Bytes { bytes, .. }) => builder.body(bytes.clone()),
                Some(RequestBody::Multipart(parts)) => builder.multipart(multipart_form(parts)),
                None => builder,
            };

            let resp = builder.send().map_err(TransportError::Network)?;
            let status = resp.status();
            let resp_headers = resp.headers().clone();
            let body = resp
                .bytes()
                .map_err(TransportError::ResponseRead)?
                .to_vec();
            log_response(status, &resp_headers, &body);

            if attempt < MAX_ATTEMPTS
                && should_retry(status, &request.method, self.retry_non_idempotent)
            {
                let delay = retry_backoff(&resp_headers, attempt);
                log::debug!(
                    "retrying {} {} after {:?} (status {}, attempt {}/{})",
                    request.method,
                    request.url,
                    delay,
                    status.as_u16(),
                    attempt,
                    MAX_ATTEMPTS
                );
                cancel.sleep(delay)?;
                attempt += 1;
                continue;
            }

            return Ok(ApiResponse {
                status,
                headers: resp_headers,
                body,
            });
        }
    }
}

pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

pub fn should_retry(status: StatusCode, method: &Method, retry_non_idempotent: bool) -> bool {
    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    retryable && (is_idempotent(method) || retry_non_idempotent)
}

/// Honour `Retry-After` (seconds or HTTP date), else exponential backoff.
pub fn retry_backoff(headers: &HeaderMap, attempt: u32) -> Duration {
    if let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs);
        }
        if let Ok(at) = httpdate::parse_http_date(value) {
            if let Ok(wait) = at.duration_since(SystemTime::now()) {
                if !wait.is_zero() {
                    return wait;
                }
            }
        }
    }
    exponential_backoff(attempt)
}

/// 200ms × 2^(attempt−1), capped at 5s, with ±50% jitter.
fn exponential_backoff(attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    let delay = BASE_BACKOFF
        .checked_mul(factor)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF);

    let millis = delay.as_millis() as i64;
    let jitter = rand::thread_rng().gen_range(0..millis) - millis / 2;
    Duration::from_millis((millis + jitter) as u64)
}

fn log_request(request: &ApiRequest, headers: &HeaderMap) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    log::debug!("> {} {}", request.method, request.url);
    for (name, value) in headers {
        let shown = if name == AUTHORIZATION || name == PROXY_AUTHORIZATION {
            "<redacted>"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        log::debug!("> {}: {}", name, shown);
    }
    match &request.body {
        Some(RequestBody::Bytes { bytes, .. }) if !bytes.is_empty() => {
            log::trace!(">\n{}", String::from_utf8_lossy(bytes));
        }
        Some(RequestBody::Multipart(parts)) => {
            log::trace!("> multipart body ({} parts)", parts.len());
        }
        _ => {}
    }
}

fn log_response(status: StatusCode, headers: &HeaderMap, body: &[u8]) {
    log::debug!("< {}", status);
    if let Some(ct) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        log::debug!("< Content-Type: {}", ct);
    }
    log::debug!("< Content-Length: {}", body.len());
    if !body.is_empty() {
        log::trace!("<\n{}", String::from_utf8_lossy(body));
    }
}
