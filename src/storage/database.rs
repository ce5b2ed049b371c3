use rusqlite::{Connection, Result as SqlResult};
use std::path::Path;
use std::time::Duration;

/// How long a write waits for another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite connection holding the `documents` table.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        // One row per document; `data` is the JSON object of its fields and
        // `written_at` the server timestamp of its latest write.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                written_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_written_at ON documents(written_at)",
            [],
        )?;

        Ok(())
    }

    /// Latest server timestamp handed out by any connection, 0 when empty.
    pub fn latest_write(&self) -> SqlResult<i64> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(written_at), 0) FROM documents",
            [],
            |row| row.get(0),
        )
    }

    /// Changes whenever another connection commits to the database file.
    pub fn data_version(&self) -> SqlResult<i64> {
        self.conn
            .query_row("PRAGMA data_version", [], |row| row.get(0))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
