//! Request description and response payloads for the REST surface.

use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::error::{Result, TractiveError};

/// Which REST root a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiBase {
    /// The primary graph API root.
    #[default]
    Graph,
    /// The secondary ("aps") API root, used by health endpoints.
    Aps,
}

/// Description of a single REST call: relative uri, method, query params,
/// optional JSON body, and target root.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) uri: String,
    pub(crate) method: Method,
    pub(crate) params: Vec<(String, String)>,
    pub(crate) body: Option<Value>,
    pub(crate) base: ApiBase,
}

impl ApiRequest {
    /// GET request for `uri` relative to the graph root.
    pub fn get<S: Into<String>>(uri: S) -> Self {
        Self::new(Method::GET, uri)
    }

    /// POST request for `uri` relative to the graph root.
    pub fn post<S: Into<String>>(uri: S) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Request with an explicit method.
    pub fn new<S: Into<String>>(method: Method, uri: S) -> Self {
        Self { uri: uri.into(), method, params: Vec::new(), body: None, base: ApiBase::default() }
    }

    /// Append a query parameter.
    #[must_use]
    pub fn param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Target the secondary REST root instead of the primary one.
    #[must_use]
    pub fn base(mut self, base: ApiBase) -> Self {
        self.base = base;
        self
    }

    /// Resolve the full URL against `root`, including query parameters.
    pub(crate) fn url(&self, root: &Url) -> Result<Url> {
        let mut url = root.join(&self.uri)?;
        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

/// Response payload of a REST call: parsed JSON when the vendor says so,
/// raw bytes otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse {
    /// `application/json` body, parsed.
    Json(Value),
    /// Any other body, returned verbatim.
    Raw(Vec<u8>),
}

impl ApiResponse {
    /// Extract the JSON value, failing if the vendor returned a non-JSON
    /// body where JSON was expected.
    pub fn into_json(self) -> Result<Value> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Raw(bytes) => Err(TractiveError::request(format!(
                "expected JSON response, got {} raw bytes",
                bytes.len()
            ))),
        }
    }

    /// Extract the raw bytes, failing on a JSON body.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Raw(bytes) => Ok(bytes),
            Self::Json(_) => {
                Err(TractiveError::request("expected raw response, got JSON".to_string()))
            }
        }
    }
}
