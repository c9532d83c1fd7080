use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use crate::error::StorageError;

/// Default number of lock stripes.
pub const DEFAULT_STRIPES: usize = 64;

/// Striped per-document locks.
///
/// Each document id hashes to one stripe, so puts to the same id are
/// serialized while puts to most other ids proceed in parallel. Memory
/// stays bounded no matter how many ids are seen.
pub(crate) struct LockArena {
    stripes: Vec<Mutex<()>>,
}

impl LockArena {
    pub(crate) fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes }
    }

    pub(crate) fn lock(&self, id: &str) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.stripes[self.stripe_of(id)]
            .lock()
            .map_err(|_| StorageError::LockPoisoned)
    }

    fn stripe_of(&self, id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}
