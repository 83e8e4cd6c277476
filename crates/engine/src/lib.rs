pub mod context;
pub mod error;
pub mod external;
pub mod location;
pub mod lock;
pub mod managed;
pub mod profile;
pub mod transaction;
pub mod transfer;

pub use context::{DEFAULT_MAX_CONFLICT_RETRIES, DbContext, EngineConfig};
pub use error::{DbError, ErrorClass, FileError, FileOp, OpenFailureReason};
pub use external::ExternalProfileDb;
pub use location::FileAccess;
pub use lock::ProfileLocks;
pub use managed::ManagedProfileDb;
pub use profile::ProfileDb;
pub use transaction::Transaction;
pub use transfer::{MoveToExternalError, move_to_external, move_to_managed};
