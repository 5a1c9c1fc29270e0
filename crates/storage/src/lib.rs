pub mod binary;
pub mod error;
pub mod location;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use binary::BinaryStore;
pub use error::{LocationError, StorageError};
pub use location::{DirectoryLocation, StorageLocation, remove_backing_files};
pub use sqlite::SqliteStore;
pub use traits::*;
