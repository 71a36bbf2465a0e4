//! Task store implementations: SQLite (durable) and in-memory.

mod memory;
mod schema;
mod sqlite;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;
