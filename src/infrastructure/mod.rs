// Infrastructure - database pools, caching and the host collaborators
pub mod database;              // Connection pools and schema
pub mod cache;                 // LRU cache wrapper
pub mod page_store;            // Versioned page storage interface
pub mod sqlite_page_store;     // SQLite page storage
pub mod users;                 // User identity resolution

pub use cache::Cache;
pub use database::{Database, ReadConsistency};
pub use page_store::{main_slot, EditFlags, PageStore, Revision, SlotContent, WriteOutcome, MAIN_SLOT};
pub use sqlite_page_store::SqlitePageStore;
pub use users::{SqliteUserDirectory, UserDirectory};
