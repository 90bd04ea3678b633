//! Session-aware HTTP client with cookie handling and a bounded retry/backoff state machine.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

pub const STORE_ORIGIN: &str = "https://store.steampowered.com";
pub const STORE_DOMAIN: &str = "store.steampowered.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: u16) -> RetryDisposition {
    match StatusCode::from_u16(status) {
        Ok(code) if code.is_server_error() || code == StatusCode::TOO_MANY_REQUESTS => {
            RetryDisposition::Retryable
        }
        _ => RetryDisposition::NonRetryable,
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// Transition out of attempt `attempt` (zero-based) given what the transport returned.
    pub fn after_attempt(
        &self,
        attempt: usize,
        url: &str,
        outcome: Result<HttpResponse, TransportError>,
    ) -> AttemptState {
        let can_retry = attempt < self.max_retries;
        match outcome {
            Ok(resp) if classify_status(resp.status) == RetryDisposition::Retryable => {
                if can_retry {
                    AttemptState::Waiting {
                        attempt,
                        delay: self.delay_for_attempt(attempt),
                    }
                } else {
                    AttemptState::Exhausted(NetworkError::HttpStatus {
                        status: resp.status,
                        url: resp.final_url,
                        attempts: attempt + 1,
                    })
                }
            }
            Ok(resp) => AttemptState::Succeeded(resp),
            Err(err) if err.disposition == RetryDisposition::Retryable && can_retry => {
                AttemptState::Waiting {
                    attempt,
                    delay: self.delay_for_attempt(attempt),
                }
            }
            Err(err) => AttemptState::Exhausted(NetworkError::Transport {
                url: url.to_string(),
                attempts: attempt + 1,
                message: err.message,
            }),
        }
    }
}

/// Where a single logical request stands inside the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Ready { attempt: usize },
    Waiting { attempt: usize, delay: Duration },
    Succeeded(HttpResponse),
    Exhausted(NetworkError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(final_url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::with_status(200, final_url, body)
    }

    pub fn with_status(status: u16, final_url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            final_url: final_url.into(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure of one transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub disposition: RetryDisposition,
    pub message: String,
}

impl TransportError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            disposition: RetryDisposition::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            disposition: RetryDisposition::NonRetryable,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            disposition: classify_reqwest_error(&err),
            message: err.to_string(),
        }
    }
}

/// Failure of a logical request once retries are spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("request to {url} failed after {attempts} attempt(s): {message}")]
    Transport {
        url: String,
        attempts: usize,
        message: String,
    },
    #[error("http status {status} for {url} after {attempts} attempt(s)")]
    HttpStatus {
        status: u16,
        url: String,
        attempts: usize,
    },
}

/// One raw attempt against the network. The session client layers retries and cookies on top.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError>;

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError>;

    /// Attach a cookie for the storefront domain to every later request.
    fn set_cookie(&self, name: &str, value: &str);
}

/// Operator-supplied storefront cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub session_id: Option<String>,
    pub login_secure: Option<String>,
    pub parental: Option<String>,
    pub language: Option<String>,
    pub timezone_offset: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Both the session id and the login token are required for authenticated requests.
    pub fn is_authenticated(&self) -> bool {
        self.session_id.is_some() && self.login_secure.is_some()
    }

    /// Cookies to install, empty in anonymous mode.
    pub fn cookie_pairs(&self) -> Vec<(&'static str, String)> {
        let (Some(session_id), Some(login_secure)) = (&self.session_id, &self.login_secure) else {
            return Vec::new();
        };
        let mut pairs = vec![
            ("sessionid", session_id.clone()),
            ("steamLoginSecure", login_secure.clone()),
            ("wants_mature_content", "1".to_string()),
        ];
        if let Some(parental) = &self.parental {
            pairs.push(("steamparental", parental.clone()));
        }
        if let Some(language) = &self.language {
            pairs.push(("Steam_Language", language.clone()));
        }
        if let Some(offset) = &self.timezone_offset {
            pairs.push(("timezoneOffset", offset.clone()));
        }
        pairs
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// `reqwest`-backed transport sharing one cookie jar across all requests.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    jar: Arc<Jar>,
    origin: Url,
}

impl ReqwestTransport {
    pub fn new(config: &HttpClientConfig) -> anyhow::Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .cookie_provider(Arc::clone(&jar))
            .build()
            .context("building reqwest client")?;
        let origin = Url::parse(STORE_ORIGIN).context("parsing storefront origin")?;
        Ok(Self {
            client,
            jar,
            origin,
        })
    }

    async fn read(resp: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.text().await?;
        Ok(HttpResponse {
            status,
            final_url,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        let resp = self.client.get(url).query(query).send().await?;
        Self::read(resp).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let resp = self.client.post(url).form(form).send().await?;
        Self::read(resp).await
    }

    fn set_cookie(&self, name: &str, value: &str) {
        let cookie = format!("{name}={value}; Domain={STORE_DOMAIN}; Path=/");
        self.jar.add_cookie_str(&cookie, &self.origin);
    }
}

#[derive(Debug, Clone, Copy)]
enum Request<'a> {
    Get {
        url: &'a str,
        query: &'a [(&'a str, &'a str)],
    },
    Form {
        url: &'a str,
        form: &'a [(&'a str, &'a str)],
    },
}

impl Request<'_> {
    fn url(&self) -> &str {
        match self {
            Request::Get { url, .. } | Request::Form { url, .. } => *url,
        }
    }
}

/// The storefront session: cookies, user agent and retry policy around a [`Transport`].
#[derive(Debug)]
pub struct SessionClient<T: Transport = ReqwestTransport> {
    transport: T,
    backoff: BackoffPolicy,
    configured_session_id: Option<String>,
    generated_session_id: OnceLock<String>,
}

impl SessionClient<ReqwestTransport> {
    pub fn from_config(config: &HttpClientConfig, credentials: &Credentials) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(transport, credentials, config.backoff))
    }
}

impl<T: Transport> SessionClient<T> {
    pub fn new(transport: T, credentials: &Credentials, backoff: BackoffPolicy) -> Self {
        if credentials.is_authenticated() {
            for (name, value) in credentials.cookie_pairs() {
                transport.set_cookie(name, &value);
            }
            info!("storefront authentication cookies loaded");
        } else {
            warn!("session id or login token not configured; running without authentication");
        }
        Self {
            transport,
            backoff,
            configured_session_id: credentials
                .is_authenticated()
                .then(|| credentials.session_id.clone())
                .flatten(),
            generated_session_id: OnceLock::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_authenticated(&self) -> bool {
        self.configured_session_id.is_some()
    }

    /// Session id for form posts. Anonymous sessions mint one on first use and install it as a cookie.
    pub fn session_id(&self) -> String {
        if let Some(id) = &self.configured_session_id {
            return id.clone();
        }
        self.generated_session_id
            .get_or_init(|| {
                let id = uuid::Uuid::new_v4().simple().to_string()[..24].to_string();
                self.transport.set_cookie("sessionid", &id);
                id
            })
            .clone()
    }

    pub fn set_cookie(&self, name: &str, value: &str) {
        self.transport.set_cookie(name, value);
    }

    pub async fn fetch(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<HttpResponse, NetworkError> {
        self.send(Request::Get { url, query: params })
            .instrument(info_span!("http_fetch", url, method = "GET"))
            .await
    }

    pub async fn submit_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, NetworkError> {
        self.send(Request::Form { url, form })
            .instrument(info_span!("http_fetch", url, method = "POST"))
            .await
    }

    async fn send(&self, request: Request<'_>) -> Result<HttpResponse, NetworkError> {
        let mut state = AttemptState::Ready { attempt: 0 };
        loop {
            state = match state {
                AttemptState::Ready { attempt } => {
                    let outcome = match request {
                        Request::Get { url, query } => self.transport.get(url, query).await,
                        Request::Form { url, form } => self.transport.post_form(url, form).await,
                    };
                    self.backoff.after_attempt(attempt, request.url(), outcome)
                }
                AttemptState::Waiting { attempt, delay } => {
                    debug!(attempt, ?delay, "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                    AttemptState::Ready {
                        attempt: attempt + 1,
                    }
                }
                AttemptState::Succeeded(resp) => return Ok(resp),
                AttemptState::Exhausted(err) => {
                    warn!(error = %err, "giving up on request");
                    return Err(err);
                }
            };
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
}

type Reply = Result<HttpResponse, TransportError>;

/// In-memory transport replaying canned replies per method and URL; used for offline tests.
///
/// Replies queued for the same route are consumed in order and the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
    cookies: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(self, url: &str, reply: Reply) -> Self {
        self.push(Method::Get, url, reply);
        self
    }

    pub fn on_post(self, url: &str, reply: Reply) -> Self {
        self.push(Method::Post, url, reply);
        self
    }

    pub fn push(&self, method: Method, url: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes
            .entry((method, url.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.method == method && c.url == url)
            .count()
    }

    pub fn cookies(&self) -> Vec<(String, String)> {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies()
            .into_iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    fn reply(&self, method: Method, url: &str, params: &[(&str, &str)]) -> Reply {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                method,
                url: url.to_string(),
                params: params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(queue) = routes.get_mut(&(method, url.to_string())) else {
            return Err(TransportError::fatal(format!(
                "no scripted reply for {method:?} {url}"
            )));
        };
        if queue.len() > 1 {
            queue
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::fatal("empty script")))
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportError::fatal("empty script")))
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        self.reply(Method::Get, url, query)
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        self.reply(Method::Post, url, form)
    }

    fn set_cookie(&self, name: &str, value: &str) {
        self.cookies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.to_string(), value.to_string()));
    }
}
