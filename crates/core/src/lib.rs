pub mod error;
pub mod ids;
pub mod location;
pub mod time;

pub use error::CoreError;
pub use ids::*;
pub use location::{DocumentUri, ExternalRef, Permissions, StorageLocation};
pub use time::ModifiedAt;
