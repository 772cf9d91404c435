//! Throwaway SQLite databases backed by temporary directories

use anyhow::Result;
use finance_etl::database::DatabaseManager;
use tempfile::TempDir;

/// A database file that is deleted with the value
pub struct TestDatabase {
    pub manager: DatabaseManager,
    pub path: String,
    _dir: TempDir,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        Self::named("test.db").await
    }

    /// Separate files in separate directories, e.g. source and destination of a migration
    pub async fn named(file_name: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(file_name).to_string_lossy().to_string();
        let manager = DatabaseManager::new(&path).await?;
        Ok(Self {
            manager,
            path,
            _dir: dir,
        })
    }
}
