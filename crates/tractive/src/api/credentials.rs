//! Authenticated session credentials and derived request headers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Seconds before expiry at which cached credentials are considered stale
/// and refreshed on the next authentication.
pub const FRESHNESS_MARGIN_SECS: i64 = 3600;

/// Authenticated session bundle returned by the token endpoint.
///
/// Owned exclusively by the API client's credential cache. Never mutated in
/// place; a refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Tractive user id, sent as `x-tractive-user` on every call.
    pub user_id: String,
    /// Bearer token for the `authorization` header.
    pub access_token: String,
    /// Absolute expiry as epoch seconds.
    pub expires_at: i64,
}

impl Credentials {
    /// Whether the token expires within `margin_secs` from now.
    #[must_use]
    pub fn expires_within(&self, margin_secs: i64) -> bool {
        self.expires_at - Utc::now().timestamp() < margin_secs
    }

    /// Whether the token is inside the refresh margin.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.expires_within(FRESHNESS_MARGIN_SECS)
    }

    /// The per-user header pairs derived from these credentials. Recomputed
    /// whenever credentials are replaced; never cached independently.
    #[must_use]
    pub fn auth_header_pairs(&self) -> [(&'static str, String); 2] {
        [
            ("x-tractive-user", self.user_id.clone()),
            ("authorization", format!("Bearer {}", self.access_token)),
        ]
    }
}
