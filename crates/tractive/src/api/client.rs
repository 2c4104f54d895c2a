//! Low-level authenticated REST client.
//!
//! Owns the shared HTTP connection pool, the credential cache, and the
//! 429 retry loop. Higher-level resource wrappers and the push channel all
//! route their calls through [`ApiClient`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::api::credentials::Credentials;
use crate::api::request::{ApiBase, ApiRequest, ApiResponse};
use crate::api::retry::RetryPolicy;
use crate::error::{Result, TractiveError};

/// Default primary REST root.
pub const DEFAULT_API_URL: &str = "https://graph.tractive.com/4/";
/// Default secondary ("aps") REST root.
pub const DEFAULT_APS_API_URL: &str = "https://aps-api.tractive.com/api/1/";
/// Default push channel endpoint.
pub const DEFAULT_CHANNEL_URL: &str = "https://channel.tractive.com/3/channel";
/// Client identifier expected by the vendor.
pub const DEFAULT_CLIENT_ID: &str = "625e533dc3c3b41c28a669f0";
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const TOKEN_URI: &str = "auth/token";

/// Configuration for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Primary REST root. Must end with a trailing slash.
    pub api_url: String,
    /// Secondary REST root for health endpoints. Must end with a trailing
    /// slash.
    pub aps_api_url: String,
    /// Push channel endpoint.
    pub channel_url: String,
    /// Value of the `x-tractive-client` header.
    pub client_id: String,
    /// Per-request timeout for normal REST calls. The channel request is
    /// exempt; its liveness is enforced by the channel watchdog instead.
    pub timeout: Duration,
    /// TCP connect timeout applied to every connection.
    pub connect_timeout: Duration,
    /// Retry policy for 429 responses.
    pub retry: RetryPolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            aps_api_url: DEFAULT_APS_API_URL.to_string(),
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

struct Inner {
    http: reqwest::Client,
    api_url: Url,
    aps_api_url: Url,
    channel_url: Url,
    config: ApiConfig,
    login: String,
    password: String,
    // Held across the token refresh so concurrent callers coalesce into a
    // single network round-trip.
    credentials: Mutex<Option<Credentials>>,
}

/// Authenticated REST client with transparent token refresh and 429 retry.
///
/// Cheap to clone; all clones share the connection pool and credential
/// cache.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    /// Build a client for the given account.
    ///
    /// No network traffic happens here; the first request (or an explicit
    /// [`authenticate`](Self::authenticate)) performs the token exchange.
    pub fn new<S: Into<String>>(login: S, password: S, config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Self::with_http_client(login, password, config, http)
    }

    /// Build a client around an existing `reqwest::Client`.
    ///
    /// The pool is shared as-is; only `connect_timeout` from `config` is
    /// ignored since pool construction already happened.
    pub fn with_http_client<S: Into<String>>(
        login: S,
        password: S,
        config: ApiConfig,
        http: reqwest::Client,
    ) -> Result<Self> {
        let api_url = Url::parse(&config.api_url)?;
        let aps_api_url = Url::parse(&config.aps_api_url)?;
        let channel_url = Url::parse(&config.channel_url)?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                api_url,
                aps_api_url,
                channel_url,
                login: login.into(),
                password: password.into(),
                credentials: Mutex::new(None),
                config,
            }),
        })
    }

    /// Headers sent on every request, authenticated or not.
    fn base_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-tractive-client"),
            header_value(&self.inner.config.client_id)?,
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        Ok(headers)
    }

    /// Authenticate, returning cached credentials when they are still fresh.
    ///
    /// Returns `Ok(None)` when the token endpoint answers 2xx with a
    /// non-JSON body; the cache is left untouched in that case.
    pub async fn authenticate(&self) -> Result<Option<Credentials>> {
        let mut cached = self.inner.credentials.lock().await;
        if let Some(creds) = cached.as_ref() {
            if !creds.is_stale() {
                return Ok(Some(creds.clone()));
            }
            debug!(user_id = %creds.user_id, "cached token inside refresh margin, re-authenticating");
        }

        let url = self.inner.api_url.join(TOKEN_URI)?;
        let body = json!({
            "platform_email": self.inner.login,
            "platform_token": self.inner.password,
            "grant_type": "tractive",
        });

        let response = self
            .inner
            .http
            .post(url)
            .headers(self.base_headers()?)
            .timeout(self.inner.config.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(%status, "token endpoint rejected credentials");
                return Err(TractiveError::Unauthorized);
            }
            s if !s.is_success() => {
                return Err(TractiveError::request(format!(
                    "token endpoint returned {s}"
                )));
            }
            _ => {}
        }

        if !is_json(&response) {
            debug!("token endpoint returned a non-JSON body, leaving cache untouched");
            return Ok(None);
        }

        let payload: Value = response.json().await?;
        let creds = parse_credentials(&payload)?;
        debug!(user_id = %creds.user_id, expires_at = creds.expires_at, "authenticated");
        *cached = Some(creds.clone());
        Ok(Some(creds))
    }

    /// Full header set for an authenticated call: base headers plus the
    /// user id and bearer token.
    pub async fn auth_headers(&self) -> Result<HeaderMap> {
        let creds = self.authenticate().await?.ok_or_else(|| {
            TractiveError::request("token endpoint returned no usable credentials")
        })?;
        let mut headers = self.base_headers()?;
        for (key, value) in creds.auth_header_pairs() {
            headers.insert(HeaderName::from_static(key), header_value(&value)?);
        }
        Ok(headers)
    }

    /// The authenticated user's id, authenticating first if needed.
    pub async fn user_id(&self) -> Result<String> {
        let creds = self.authenticate().await?.ok_or_else(|| {
            TractiveError::request("token endpoint returned no usable credentials")
        })?;
        Ok(creds.user_id)
    }

    /// Execute `request` with authentication and 429 retry.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse> {
        let root = match request.base {
            ApiBase::Graph => &self.inner.api_url,
            ApiBase::Aps => &self.inner.aps_api_url,
        };
        let url = request.url(root)?;
        let retry = &self.inner.config.retry;

        let mut attempt: u32 = 1;
        loop {
            // Headers are rebuilt per attempt so a token refreshed between
            // retries is picked up.
            let headers = self.auth_headers().await?;
            let mut builder = self
                .inner
                .http
                .request(request.method.clone(), url.clone())
                .headers(headers)
                .timeout(self.inner.config.timeout);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt <= retry.max_retries() {
                    let delay = retry.delay_for_attempt(attempt);
                    debug!(%url, attempt, ?delay, "rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                warn!(%url, attempt, "rate limit retries exhausted");
                return Err(TractiveError::request("Request limit exceeded"));
            }

            return match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    Err(TractiveError::Unauthorized)
                }
                StatusCode::NOT_FOUND => Err(TractiveError::NotFound),
                s if !s.is_success() => {
                    Err(TractiveError::request(format!("{} returned {s}", url.path())))
                }
                _ => {
                    if is_json(&response) {
                        Ok(ApiResponse::Json(response.json().await?))
                    } else {
                        Ok(ApiResponse::Raw(response.bytes().await?.to_vec()))
                    }
                }
            };
        }
    }

    /// Shared connection pool, for the push channel's streaming request.
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Push channel endpoint.
    pub(crate) fn channel_url(&self) -> &Url {
        &self.inner.channel_url
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_url", &self.inner.api_url.as_str())
            .field("login", &self.inner.login)
            .finish_non_exhaustive()
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| TractiveError::request(format!("invalid header value: {err}")))
}

fn is_json(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

fn parse_credentials(payload: &Value) -> Result<Credentials> {
    let field = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                TractiveError::request(format!("token response missing `{key}`"))
            })
    };
    let expires_at = payload
        .get("expires_at")
        .and_then(Value::as_i64)
        .ok_or_else(|| TractiveError::request("token response missing `expires_at`"))?;
    Ok(Credentials {
        user_id: field("user_id")?,
        access_token: field("access_token")?,
        expires_at,
    })
}
