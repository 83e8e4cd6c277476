pub mod documents;
pub mod error;
pub mod metadata;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use documents::LocalDocuments;
pub use error::{HostError, StorageError};
pub use metadata::SqliteMetadataStore;
pub use sqlite::{SqliteHandle, SqliteQueryLayer};
pub use traits::*;
