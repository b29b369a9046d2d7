use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Retry policy for transient cluster failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            sleep: Duration::from_secs(60),
        }
    }
}

/// How a response status feeds the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transient {
    Throttled,
    ServerError,
}

pub fn classify_status(status: StatusCode) -> Option<Transient> {
    if status == StatusCode::SERVICE_UNAVAILABLE {
        Some(Transient::Throttled)
    } else if status.is_server_error() {
        Some(Transient::ServerError)
    } else {
        None
    }
}

/// Raw cluster reply. Status codes other than 503/5xx are passed through
/// for the caller to interpret.
#[derive(Debug, Clone)]
pub struct EsResponse {
    pub status: StatusCode,
    pub body: String,
}

impl EsResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).with_context(|| {
            format!(
                "unparseable cluster response status={} body_sample={}",
                self.status,
                truncate_body_snippet(&self.body, 500)
            )
        })
    }

    /// `{"acknowledged": true}` style replies.
    pub fn acknowledged(&self) -> bool {
        self.is_success()
            && self
                .json::<Value>()
                .ok()
                .and_then(|v| v.get("acknowledged").and_then(Value::as_bool))
                .unwrap_or(false)
    }

    pub fn snippet(&self) -> String {
        truncate_body_snippet(&self.body, 500)
    }
}

#[derive(Clone)]
pub struct EsHttp {
    client: Client,
    base_url: Arc<str>,
    user: Arc<str>,
    pass: Arc<str>,
    retry: RetryPolicy,
}

impl EsHttp {
    pub fn new(
        base_url: impl Into<Arc<str>>,
        user: impl Into<Arc<str>>,
        pass: impl Into<Arc<str>>,
        connect_timeout: Duration,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            user: user.into(),
            pass: pass.into(),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, self.url(path));
        if self.user.is_empty() {
            req
        } else {
            req.basic_auth(&*self.user, Some(&*self.pass))
        }
    }

    /// Issue one call, retrying throttling, server errors and transport
    /// failures. Running out of attempts is fatal for the run.
    pub async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<EsResponse> {
        let attempts = self.retry.attempts.max(1);
        let mut last_err = String::new();

        for attempt in 1..=attempts {
            let mut req = self.request(method.clone(), path);
            if let Some(body) = body {
                req = req.json(body);
            }
            debug!("es request {} {}", method, path);

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    match classify_status(status) {
                        None => return Ok(EsResponse { status, body: text }),
                        Some(kind) => {
                            last_err = format!(
                                "{:?} status={} body_sample={}",
                                kind,
                                status,
                                truncate_body_snippet(&text, 500)
                            );
                        }
                    }
                }
                Err(err) => last_err = format!("transport error: {err}"),
            }

            if attempt < attempts {
                warn!(
                    "es {} {} failed ({}), tries left {}, sleeping {:?}",
                    method,
                    path,
                    last_err,
                    attempts - attempt,
                    self.retry.sleep
                );
                tokio::time::sleep(self.retry.sleep).await;
            }
        }

        error!("es {} {} retries exhausted: {}", method, path, last_err);
        anyhow::bail!(
            "{} {} failed after {} attempts: {}",
            method,
            path,
            attempts,
            last_err
        );
    }

    pub async fn get(&self, path: &str) -> Result<EsResponse> {
        self.send(Method::GET, path, None).await
    }

    pub async fn delete(&self, path: &str) -> Result<EsResponse> {
        self.send(Method::DELETE, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<EsResponse> {
        self.send(Method::POST, path, body).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<EsResponse> {
        self.send(Method::PUT, path, Some(body)).await
    }

    /// GET that must succeed and parse; anything else is fatal.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        context: &'static str,
    ) -> Result<T> {
        let resp = self.get(path).await.context(context)?;
        if !resp.is_success() {
            anyhow::bail!(
                "{} status={} body_sample={}",
                context,
                resp.status,
                resp.snippet()
            );
        }
        resp.json().context(context)
    }
}

fn normalize_base_url(base_url: impl Into<Arc<str>>) -> Arc<str> {
    let base_url: Arc<str> = base_url.into();
    if base_url.ends_with('/') {
        Arc::<str>::from(base_url.trim_end_matches('/').to_string())
    } else {
        base_url
    }
}

fn truncate_body_snippet(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
