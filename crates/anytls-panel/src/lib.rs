//! Control-plane integration.
//!
//! Everything the server exchanges with the subscription panel lives here:
//! the typed HTTP client with its retry policy, the per-user traffic
//! accounting that feeds the push cycle, the liveness tracker behind device
//! limits, and node status sampling.

mod alive;
mod client;
mod error;
mod retry;
mod status;
mod traffic;
mod types;

pub use alive::AliveTracker;
pub use client::Client;
pub use error::PanelError;
pub use status::StatusSampler;
pub use traffic::TrafficCounter;
pub use types::{BaseConfig, NodeConfig, NodeStatus, ResourceUsage, User, padding_scheme_to_bytes};
