//! Atomically-replaced user table.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use anytls_panel::User;

use crate::hash::secret_hash;

/// One user, immutable once its generation is published.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub uuid: String,
    /// Speed cap in Mbps, 0 = no cap.
    pub speed_limit: i64,
    /// Device cap, 0 = no cap.
    pub device_limit: i64,
    pub secret_hash: [u8; 32],
}

/// One complete table generation: both indexes point at the same records.
#[derive(Debug, Default)]
struct UserTable {
    by_hash: HashMap<[u8; 32], Arc<UserRecord>>,
    by_id: HashMap<i64, Arc<UserRecord>>,
}

/// Holds the active generation and swaps in replacements.
///
/// `authenticate` runs on the per-connection hot path and must not
/// serialise; readers pin a generation through `ArcSwap` without taking a
/// lock. Generations are never mutated after publication.
#[derive(Debug, Default)]
pub struct UserManager {
    table: ArcSwap<UserTable>,
}

impl UserManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the record whose stored hash equals `hash`.
    ///
    /// Requires exactly 32 bytes; anything else misses.
    pub fn authenticate(&self, hash: &[u8]) -> Option<Arc<UserRecord>> {
        let hash: &[u8; 32] = hash.try_into().ok()?;
        self.table.load().by_hash.get(hash).cloned()
    }

    /// Build and publish a new generation from a fetched user list.
    ///
    /// Hashes are unique within a generation; on a collision the last user
    /// wins, same as the panel's own ordering.
    pub fn update(&self, users: &[User]) {
        let mut by_hash = HashMap::with_capacity(users.len());
        let mut by_id = HashMap::with_capacity(users.len());

        for user in users {
            let record = Arc::new(UserRecord {
                id: user.id,
                uuid: user.uuid.clone(),
                speed_limit: user.speed_limit(),
                device_limit: user.device_limit(),
                secret_hash: secret_hash(&user.uuid),
            });
            by_hash.insert(record.secret_hash, record.clone());
            by_id.insert(record.id, record);
        }

        self.table.store(Arc::new(UserTable { by_hash, by_id }));
    }

    /// Look up a user by id in the current generation.
    pub fn get(&self, id: i64) -> Option<Arc<UserRecord>> {
        self.table.load().by_id.get(&id).cloned()
    }

    /// Number of users in the current generation.
    pub fn len(&self) -> usize {
        self.table.load().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
