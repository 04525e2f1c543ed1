//! Per-user traffic accumulator with destructive snapshots.
//!
//! `add` is called on every read and write of every connection, so the mutex
//! only guards the cell lookup; the accumulation itself is an atomic add.
//! `snapshot` swaps counters to zero and hands the previous values to the
//! push cycle; a failed push merges them back so nothing is lost.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
struct Cell {
    upload: AtomicU64,
    download: AtomicU64,
}

/// Thread-safe per-user upload/download totals. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct TrafficCounter {
    cells: Arc<Mutex<HashMap<i64, Arc<Cell>>>>,
}

/// On-disk carry-over format: `{"timestamp": secs, "data": {"<uid>": [up, down]}}`.
#[derive(Serialize, Deserialize)]
struct PersistedTraffic {
    timestamp: u64,
    data: HashMap<String, [u64; 2]>,
}

impl TrafficCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate traffic for a user.
    pub fn add(&self, user_id: i64, upload: u64, download: u64) {
        let cell = {
            let mut cells = self.cells.lock();
            cells.entry(user_id).or_default().clone()
        };
        cell.upload.fetch_add(upload, Ordering::Relaxed);
        cell.download.fetch_add(download, Ordering::Relaxed);
    }

    /// Take all accumulated traffic, resetting the counters.
    ///
    /// Cells whose previous values were both zero are omitted. Cells that
    /// are still zero after the scan are deleted; an increment that lands
    /// between the swap and the scan keeps its cell alive for the next
    /// snapshot.
    pub fn snapshot(&self) -> HashMap<i64, [u64; 2]> {
        let mut cells = self.cells.lock();

        let mut snapshot = HashMap::new();
        for (&user_id, cell) in cells.iter() {
            let up = cell.upload.swap(0, Ordering::AcqRel);
            let down = cell.download.swap(0, Ordering::AcqRel);
            if up > 0 || down > 0 {
                snapshot.insert(user_id, [up, down]);
            }
        }

        cells.retain(|_, cell| {
            cell.upload.load(Ordering::Acquire) != 0 || cell.download.load(Ordering::Acquire) != 0
        });

        snapshot
    }

    /// Merge a snapshot back, e.g. after a failed push.
    pub fn merge(&self, data: &HashMap<i64, [u64; 2]>) {
        for (&user_id, &[up, down]) in data {
            self.add(user_id, up, down);
        }
    }

    /// Persist the currently-accumulated (not yet snapshotted) traffic.
    ///
    /// With nothing to persist the file is deleted instead; an empty
    /// carry-over file is never written.
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();

        let data: HashMap<String, [u64; 2]> = {
            let cells = self.cells.lock();
            cells
                .iter()
                .filter_map(|(uid, cell)| {
                    let up = cell.upload.load(Ordering::Acquire);
                    let down = cell.download.load(Ordering::Acquire);
                    (up > 0 || down > 0).then(|| (uid.to_string(), [up, down]))
                })
                .collect()
        };

        if data.is_empty() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            return Ok(());
        }

        let doc = PersistedTraffic {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            data,
        };
        let body = serde_json::to_vec_pretty(&doc)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        // Write then rename so a crash never truncates the carry-over.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)
    }

    /// Merge persisted traffic back in. An absent file is not an error;
    /// entries with non-integer keys are skipped.
    pub fn load(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let body = match std::fs::read(path.as_ref()) {
            Ok(body) => body,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };

        let doc: PersistedTraffic = serde_json::from_slice(&body)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        for (uid, [up, down]) in doc.data {
            if let Ok(user_id) = uid.parse::<i64>() {
                self.add(user_id, up, down);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_user() {
        let counter = TrafficCounter::new();
        counter.add(1, 100, 200);
        counter.add(2, 50, 75);
        counter.add(1, 100, 100);

        let snap = counter.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[&1], [200, 300]);
        assert_eq!(snap[&2], [50, 75]);
    }

    #[test]
    fn snapshot_clears() {
        let counter = TrafficCounter::new();
        counter.add(1, 10, 20);
        let _ = counter.snapshot();
        assert!(counter.snapshot().is_empty());
    }

    #[test]
    fn all_zero_cells_are_omitted() {
        let counter = TrafficCounter::new();
        counter.add(1, 0, 0);
        counter.add(2, 1, 0);
        let snap = counter.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[&2], [1, 0]);
    }

    #[test]
    fn merge_restores_failed_push() {
        let counter = TrafficCounter::new();
        counter.add(1, 1024, 2048);
        counter.add(2, 0, 512);

        let snap = counter.snapshot();
        counter.merge(&snap);

        let again = counter.snapshot();
        assert_eq!(again[&1], [1024, 2048]);
        assert_eq!(again[&2], [0, 512]);
    }

    #[test]
    fn clones_share_state() {
        let a = TrafficCounter::new();
        let b = a.clone();
        a.add(7, 10, 0);
        b.add(7, 30, 5);
        let snap = a.snapshot();
        assert_eq!(snap[&7], [40, 5]);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let counter = TrafficCounter::new();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.add(1, 1, 2);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(counter.snapshot()[&1], [4000, 8000]);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.json");

        let counter = TrafficCounter::new();
        counter.add(1, 111, 222);
        counter.add(9, 0, 5);
        counter.save(&path).unwrap();

        let restored = TrafficCounter::new();
        restored.load(&path).unwrap();
        let snap = restored.snapshot();
        assert_eq!(snap[&1], [111, 222]);
        assert_eq!(snap[&9], [0, 5]);
    }

    #[test]
    fn empty_save_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.json");

        let counter = TrafficCounter::new();
        counter.add(1, 5, 5);
        counter.save(&path).unwrap();
        assert!(path.exists());

        let _ = counter.snapshot();
        counter.save(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn load_missing_file_is_ok() {
        let counter = TrafficCounter::new();
        counter.load("/nonexistent/anytls-traffic.json").unwrap();
        assert!(counter.snapshot().is_empty());
    }

    #[test]
    fn load_skips_non_integer_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.json");
        std::fs::write(
            &path,
            r#"{"timestamp": 1700000000, "data": {"1": [2, 3], "bogus": [9, 9]}}"#,
        )
        .unwrap();

        let counter = TrafficCounter::new();
        counter.load(&path).unwrap();
        let snap = counter.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[&1], [2, 3]);
    }
}
