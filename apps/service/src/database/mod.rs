/// Storage for endpoints and their observation history
///
/// The libsql implementation is the durable one; `MemoryDatabase` backs
/// ephemeral runs and tests through the same trait.
pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;

pub use memory::MemoryDatabase;
pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
