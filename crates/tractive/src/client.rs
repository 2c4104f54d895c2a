//! High-level entry point.
//!
//! [`Tractive`] wires the authenticated REST client, the resource handles,
//! and the push channel together behind one facade.

use std::time::Duration;

use serde_json::Value;

use crate::api::{ApiClient, ApiConfig, ApiRequest, Credentials, RetryPolicy};
use crate::channel::{Channel, ChannelConfig};
use crate::error::{Result, TractiveError};
use crate::trackable_object::TrackableObject;
use crate::tracker::Tracker;

/// Asynchronous client for the Tractive REST API and push channel.
///
/// ```no_run
/// # async fn run() -> tractive::Result<()> {
/// let client = tractive::Tractive::builder()
///     .login("pet@example.com")
///     .password("hunter2")
///     .build()?;
///
/// for tracker in client.trackers().await? {
///     println!("{}", tracker.id());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Tractive {
    api: ApiClient,
}

impl Tractive {
    /// Client with default endpoints and timeouts.
    pub fn new<S: Into<String>>(login: S, password: S) -> Result<Self> {
        Self::builder().login(login).password(password).build()
    }

    /// Start building a customized client.
    #[must_use]
    pub fn builder() -> TractiveBuilder {
        TractiveBuilder::default()
    }

    /// Authenticate eagerly. Optional; every call authenticates on demand.
    pub async fn authenticate(&self) -> Result<Option<Credentials>> {
        self.api.authenticate().await
    }

    /// All trackers registered to the authenticated user.
    pub async fn trackers(&self) -> Result<Vec<Tracker>> {
        let user_id = self.api.user_id().await?;
        let listing = self
            .api
            .request(ApiRequest::get(format!("user/{user_id}/trackers")))
            .await?
            .into_json()?;
        let ids = ids_of(&listing)?;
        Ok(ids.into_iter().map(|id| Tracker::new(self.api.clone(), id)).collect())
    }

    /// Handle for a tracker by id, without a listing round-trip.
    #[must_use]
    pub fn tracker<S: Into<String>>(&self, tracker_id: S) -> Tracker {
        Tracker::new(self.api.clone(), tracker_id.into())
    }

    /// All trackable objects (pets) of the authenticated user.
    pub async fn trackable_objects(&self) -> Result<Vec<TrackableObject>> {
        let user_id = self.api.user_id().await?;
        let listing = self
            .api
            .request(ApiRequest::get(format!("user/{user_id}/trackable_objects")))
            .await?
            .into_json()?;
        let ids = ids_of(&listing)?;
        Ok(ids.into_iter().map(|id| TrackableObject::new(self.api.clone(), id)).collect())
    }

    /// Handle for a trackable object by id, without a listing round-trip.
    #[must_use]
    pub fn trackable_object<S: Into<String>>(&self, trackable_id: S) -> TrackableObject {
        TrackableObject::new(self.api.clone(), trackable_id.into())
    }

    /// Open the push channel for real-time events.
    #[must_use]
    pub fn events(&self) -> Channel {
        self.events_with_config(ChannelConfig::default())
    }

    /// Open the push channel with custom liveness timing.
    #[must_use]
    pub fn events_with_config(&self, config: ChannelConfig) -> Channel {
        Channel::open(self.api.clone(), config)
    }
}

/// The `_id` fields of a listing response, in listing order.
fn ids_of(listing: &Value) -> Result<Vec<String>> {
    let items = listing
        .as_array()
        .ok_or_else(|| TractiveError::request("expected a JSON array listing"))?;
    items
        .iter()
        .map(|item| {
            item.get("_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| TractiveError::request("listing entry without an `_id`"))
        })
        .collect()
}

/// Builder for [`Tractive`].
#[derive(Debug, Default)]
pub struct TractiveBuilder {
    login: Option<String>,
    password: Option<String>,
    config: ApiConfig,
    http_client: Option<reqwest::Client>,
}

impl TractiveBuilder {
    /// Account email address.
    #[must_use]
    pub fn login<S: Into<String>>(mut self, login: S) -> Self {
        self.login = Some(login.into());
        self
    }

    /// Account password.
    #[must_use]
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Override the `x-tractive-client` identifier.
    #[must_use]
    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Per-request timeout for REST calls.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Retry policy for rate-limited requests.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Override the primary REST root. Must end with a trailing slash.
    #[must_use]
    pub fn api_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_url = url.into();
        self
    }

    /// Override the secondary REST root. Must end with a trailing slash.
    #[must_use]
    pub fn aps_api_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.aps_api_url = url.into();
        self
    }

    /// Override the push channel endpoint.
    #[must_use]
    pub fn channel_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.channel_url = url.into();
        self
    }

    /// Use an existing `reqwest::Client` instead of building one.
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http_client = Some(http);
        self
    }

    /// Build the client.
    ///
    /// Fails when login or password is missing, or an endpoint override is
    /// not a valid URL.
    pub fn build(self) -> Result<Tractive> {
        let login = self
            .login
            .ok_or_else(|| TractiveError::request("builder is missing a login"))?;
        let password = self
            .password
            .ok_or_else(|| TractiveError::request("builder is missing a password"))?;
        let api = match self.http_client {
            Some(http) => ApiClient::with_http_client(login, password, self.config, http)?,
            None => ApiClient::new(login, password, self.config)?,
        };
        Ok(Tractive { api })
    }
}
