pub mod documents;
pub mod metadata;
pub mod profiles;

pub use documents::{FakeDocuments, Fault};
pub use metadata::FlakyMetadata;
pub use profiles::{TEST_MIGRATIONS, TestProfiles, add_title, journal_beside, titles};
