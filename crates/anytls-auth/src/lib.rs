//! User authentication for the anytls server.
//!
//! The credential on the wire is the raw SHA-256 digest of the user's uuid.
//! Lookups happen on every accepted connection, so the table is an
//! atomically swapped immutable generation: readers never lock, the sync
//! loop publishes whole replacements.

mod hash;
mod table;

pub use hash::secret_hash;
pub use table::{UserManager, UserRecord};
