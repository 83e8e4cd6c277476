use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use profiledb_core::ProfileId;
use profiledb_storage::{HostFiles, ProfileMetadata, SqliteQueryLayer};

use crate::location::FileAccess;
use crate::lock::ProfileLocks;

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 8;

fn default_max_conflict_retries() -> u32 {
    DEFAULT_MAX_CONFLICT_RETRIES
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Home of managed profile databases.
    pub data_dir: PathBuf,
    /// Home of the local mirrors of external profiles.
    pub cache_dir: PathBuf,
    /// How many times a write is re-run after the external file changed
    /// underneath it before giving up.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

impl EngineConfig {
    pub fn new(root: &Path) -> Self {
        Self {
            data_dir: root.join("profiles"),
            cache_dir: root.join("cache"),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn managed_path(&self, profile_id: ProfileId) -> PathBuf {
        self.data_dir.join(format!("{profile_id}.db"))
    }

    pub fn cache_path(&self, profile_id: ProfileId) -> PathBuf {
        self.cache_dir.join(format!("{profile_id}.cache.db"))
    }
}

/// Everything the stores need, built once and shared.
pub struct DbContext {
    config: EngineConfig,
    query: SqliteQueryLayer,
    files: FileAccess,
    metadata: Arc<dyn ProfileMetadata>,
    locks: ProfileLocks,
}

impl DbContext {
    pub fn new(
        config: EngineConfig,
        query: SqliteQueryLayer,
        host: Arc<dyn HostFiles>,
        metadata: Arc<dyn ProfileMetadata>,
    ) -> Self {
        Self {
            config,
            query,
            files: FileAccess::new(host),
            metadata,
            locks: ProfileLocks::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn query(&self) -> &SqliteQueryLayer {
        &self.query
    }

    pub fn files(&self) -> &FileAccess {
        &self.files
    }

    pub fn metadata(&self) -> &dyn ProfileMetadata {
        self.metadata.as_ref()
    }

    pub fn locks(&self) -> &ProfileLocks {
        &self.locks
    }
}
