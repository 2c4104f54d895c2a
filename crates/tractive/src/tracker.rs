//! Tracker device resource.

use serde_json::Value;

use crate::api::{ApiClient, ApiRequest};
use crate::error::Result;

/// Handle for a single tracker device.
///
/// Holds no device state beyond the id; every accessor performs a REST call.
#[derive(Debug, Clone)]
pub struct Tracker {
    api: ApiClient,
    id: String,
}

impl Tracker {
    pub(crate) fn new(api: ApiClient, id: String) -> Self {
        Self { api, id }
    }

    /// The tracker id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tracker details.
    pub async fn details(&self) -> Result<Value> {
        self.request(ApiRequest::get(format!("tracker/{}", self.id))).await
    }

    /// Hardware report (battery level, firmware, ...).
    pub async fn hw_info(&self) -> Result<Value> {
        self.request(ApiRequest::get(format!("device_hw_report/{}/", self.id))).await
    }

    /// Latest position report.
    pub async fn pos_report(&self) -> Result<Value> {
        self.request(ApiRequest::get(format!("device_pos_report/{}", self.id))).await
    }

    /// Position history between `time_from` and `time_to` (epoch seconds),
    /// in the given vendor format (for example `json_segments`).
    pub async fn positions(&self, time_from: i64, time_to: i64, format: &str) -> Result<Value> {
        let request = ApiRequest::get(format!("tracker/{}/positions", self.id))
            .param("time_from", time_from.to_string())
            .param("time_to", time_to.to_string())
            .param("format", format);
        self.request(request).await
    }

    /// Switch the on-device buzzer on or off.
    pub async fn set_buzzer_active(&self, active: bool) -> Result<Value> {
        self.command("buzzer_control", active).await
    }

    /// Switch the on-device LED on or off.
    pub async fn set_led_active(&self, active: bool) -> Result<Value> {
        self.command("led_control", active).await
    }

    /// Switch live tracking mode on or off.
    pub async fn set_live_tracking_active(&self, active: bool) -> Result<Value> {
        self.command("live_tracking", active).await
    }

    async fn command(&self, name: &str, active: bool) -> Result<Value> {
        let action = if active { "on" } else { "off" };
        self.request(ApiRequest::get(format!("tracker/{}/command/{name}/{action}", self.id)))
            .await
    }

    async fn request(&self, request: ApiRequest) -> Result<Value> {
        self.api.request(request).await?.into_json()
    }
}
