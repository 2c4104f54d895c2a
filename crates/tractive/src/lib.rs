//! Asynchronous client for the Tractive pet-tracker REST API and its
//! real-time push channel.
//!
//! The crate has three layers:
//!
//! - [`api`]: the authenticated request pipeline (token cache and refresh,
//!   rate-limit retry, JSON/raw response handling);
//! - [`Tracker`] and [`TrackableObject`]: thin handles over the REST
//!   resources;
//! - [`Channel`]: the resilient event stream with its reader and liveness
//!   watchdog tasks.
//!
//! Most users only need [`Tractive`]:
//!
//! ```no_run
//! # async fn run() -> tractive::Result<()> {
//! let client = tractive::Tractive::new("pet@example.com", "hunter2")?;
//! let mut channel = client.events();
//! while let Ok(event) = channel.next_event().await {
//!     println!("{event}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod client;
pub mod error;
pub mod trackable_object;
pub mod tracker;

pub use channel::{Channel, ChannelConfig};
pub use client::{Tractive, TractiveBuilder};
pub use error::{Result, TractiveError};
pub use trackable_object::TrackableObject;
pub use tracker::Tracker;
