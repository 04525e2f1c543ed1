//! anytls server library.
//!
//! Exposes the server implementation for integration tests and embedding.

mod ban;
pub mod cli;
mod conn;
mod error;
mod fallback;
mod handler;
mod outbound;
mod server;
mod speed;
mod state;
mod sync;
mod tls;
mod util;

pub use ban::FailureLimiter;
pub use conn::TrafficStream;
pub use error::ServerError;
pub use fallback::Fallback;
pub use server::Server;
pub use speed::{SpeedBucket, SpeedLimiter};
pub use tokio_util::sync::CancellationToken;
