pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;
pub use traits::*;
