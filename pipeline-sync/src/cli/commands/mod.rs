pub mod history;
pub mod source;
pub mod sync;

use anyhow::Result;

use crate::config::Config;
use crate::config::repository::{self, SqliteStore};

/// Open the configured database, creating and migrating it on first use
pub(crate) async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = repository::open_pool(&config.database_path()).await?;
    Ok(SqliteStore::new(pool))
}
