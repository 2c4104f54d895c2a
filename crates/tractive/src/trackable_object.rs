//! Trackable object (pet) resource.

use serde_json::Value;

use crate::api::{ApiBase, ApiClient, ApiRequest};
use crate::error::Result;

/// Handle for a trackable object, usually a pet wearing a tracker.
#[derive(Debug, Clone)]
pub struct TrackableObject {
    api: ApiClient,
    id: String,
}

impl TrackableObject {
    pub(crate) fn new(api: ApiClient, id: String) -> Self {
        Self { api, id }
    }

    /// The trackable object id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Trackable object details, including the linked tracker id.
    pub async fn details(&self) -> Result<Value> {
        self.api
            .request(ApiRequest::get(format!("trackable_object/{}", self.id)))
            .await?
            .into_json()
    }

    /// Health overview (activity, sleep, rest and related metrics).
    ///
    /// Served from the secondary REST root.
    pub async fn health_overview(&self) -> Result<Value> {
        self.api
            .request(ApiRequest::get(format!("pet/{}/health/overview", self.id)).base(ApiBase::Aps))
            .await?
            .into_json()
    }
}
