use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

use crate::ordering::ChunkOrdering;
use crate::{ChunkResult, ChunkStore};

/// Ordering engine for session folders.
///
/// A folder only ever holds the contiguous run `base, base + 1, ...`: the
/// first chunk creates the folder and every later chunk must carry the index
/// equal to the number of chunks already stored (relative to `base`).
#[derive(Clone)]
pub struct ChunkSequencer {
    store: ChunkStore,
}

impl ChunkSequencer {
    pub fn new(store: ChunkStore) -> Self {
        Self { store }
    }

    /// Whether `index` may be appended to `folder`.
    ///
    /// An absent folder is created when `index == base`; failing to create it
    /// is returned as an error rather than a rejection.
    #[instrument(skip(self), fields(folder = %folder))]
    pub async fn check_ordering(&self, folder: &str, index: i64, base: i64) -> ChunkResult<bool> {
        if !self.store.folder_exists(folder).await? {
            if index != base {
                debug!(index, base, "rejecting chunk for a session that has not started");
                return Ok(false);
            }
            self.store.make_folder(folder).await?;
            debug!("session folder created");
            return Ok(true);
        }

        let count = self.store.count(folder).await?;
        let accepted = ChunkOrdering::is_next(count, index, base);
        if !accepted {
            debug!(index, base, count, "chunk out of order");
        }
        Ok(accepted)
    }
}

/// In-process mutual exclusion per session folder
#[derive(Clone, Default)]
pub struct FolderLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FolderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `folder`; released when the guard drops
    pub async fn lock(&self, folder: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(folder.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a finished session if nobody holds or awaits it
    pub fn forget(&self, folder: &str) {
        self.locks
            .remove_if(folder, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of folders with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
