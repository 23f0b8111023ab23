use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::warn;

const DB_FILE: &str = "offerlens.db";

/// A small SQLite file holding named JSON blobs. Each blob is replaced
/// whole on write; there is no incremental format.
pub struct Database {
    conn: Connection,
    path: PathBuf,
    recovered: Option<String>,
}

impl Database {
    /// Opens the archive in `data_dir`. A file that is not a usable SQLite
    /// database is moved aside and replaced by a fresh one; the reason is
    /// kept in `recovered`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let path = data_dir.join(DB_FILE);

        match Self::open_at(path.clone()) {
            Ok(db) => Ok(db),
            Err(e) if path.exists() => {
                let aside = data_dir.join(format!("{}.corrupt-{}", DB_FILE, Utc::now().format("%Y%m%d%H%M%S")));
                warn!(
                    "Database at {} is unreadable ({:#}), moving it to {}",
                    path.display(),
                    e,
                    aside.display()
                );
                std::fs::rename(&path, &aside)
                    .with_context(|| format!("Failed to move unreadable database {} aside", path.display()))?;

                let mut db = Self::open_at(path)?;
                db.recovered = Some(format!("{:#} (old file moved to {})", e, aside.display()));
                Ok(db)
            }
            Err(e) => Err(e),
        }
    }

    pub fn open_at(path: PathBuf) -> Result<Self> {
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let db = Self { conn, path, recovered: None };
        db.init()
            .with_context(|| format!("Failed to initialize database at {}", db.path.display()))?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
            recovered: None,
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Why the previous archive file was discarded at open, if it was.
    pub fn recovered(&self) -> Option<&str> {
        self.recovered.as_deref()
    }

    #[cfg(test)]
    pub fn drop_blobs_table(&self) -> Result<()> {
        self.conn.execute_batch("DROP TABLE blobs;")?;
        Ok(())
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                name TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(())
    }

    pub fn read_blob(&self, name: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT body FROM blobs WHERE name = ?1", [name], |row| row.get(0))
            .optional()
            .with_context(|| format!("Failed to read blob '{}'", name))
    }

    pub fn write_blob(&self, name: &str, body: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO blobs (name, body, updated_at) VALUES (?1, ?2, datetime('now'))",
                params![name, body],
            )
            .with_context(|| format!("Failed to write blob '{}'", name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_blob_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.read_blob("savedOffers").unwrap(), None);
    }

    #[test]
    fn test_write_replaces_whole_blob() {
        let db = Database::open_in_memory().unwrap();
        db.write_blob("savedOffers", "[1,2,3]").unwrap();
        db.write_blob("savedOffers", "[]").unwrap();
        assert_eq!(db.read_blob("savedOffers").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_open_at_creates_schema_once() {
        let path = std::env::temp_dir().join(format!("offerlens_db_{}.db", uuid::Uuid::new_v4()));
        {
            let db = Database::open_at(path.clone()).unwrap();
            db.write_blob("k", "v").unwrap();
        }
        let db = Database::open_at(path.clone()).unwrap();
        assert_eq!(db.read_blob("k").unwrap().as_deref(), Some("v"));
        assert_eq!(db.path(), path.as_path());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_open_moves_unreadable_file_aside() {
        let dir = std::env::temp_dir().join(format!("offerlens_dir_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DB_FILE), b"this is definitely not an sqlite database file, honest!!").unwrap();

        let db = Database::open(&dir).unwrap();
        assert!(db.recovered().is_some());
        assert_eq!(db.read_blob("savedOffers").unwrap(), None);
        db.write_blob("savedOffers", "[]").unwrap();

        let moved = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("offerlens.db.corrupt-"))
            .count();
        assert_eq!(moved, 1);

        drop(db);
        let reopened = Database::open(&dir).unwrap();
        assert!(reopened.recovered().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
