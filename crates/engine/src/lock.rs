use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use profiledb_core::ProfileId;

/// One mutex per profile, so at most one unit of work touches a profile's
/// files and cache record at a time within this process.
#[derive(Default)]
pub struct ProfileLocks {
    locks: Mutex<HashMap<ProfileId, Arc<Mutex<()>>>>,
}

impl ProfileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the profile's lock. Not reentrant.
    pub fn with_profile<R>(&self, profile_id: ProfileId, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(profile_id).or_default())
        };
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Drops the lock entry of a removed profile.
    pub fn forget(&self, profile_id: ProfileId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&profile_id);
    }
}
