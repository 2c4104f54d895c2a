//! Authenticated REST plumbing: client, credentials, request builder, and
//! the rate-limit retry policy.

pub mod client;
pub mod credentials;
pub mod request;
pub mod retry;

pub use client::{
    ApiClient, ApiConfig, DEFAULT_API_URL, DEFAULT_APS_API_URL, DEFAULT_CHANNEL_URL,
    DEFAULT_CLIENT_ID, DEFAULT_TIMEOUT,
};
pub use credentials::{Credentials, FRESHNESS_MARGIN_SECS};
pub use request::{ApiBase, ApiRequest, ApiResponse};
pub use retry::RetryPolicy;
