use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// Thread-safe database handle wrapping a SQLite connection.
///
/// Backs the bundled credit ledger and usage store. Statements are short
/// and run under the mutex; callers never hold it across an `.await`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path with WAL mode.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, rusqlite::Error>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure with exclusive access, e.g. to open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, rusqlite::Error>
    where
        F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.with_conn(|conn| conn.execute_batch(SCHEMA))?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS credit_accounts (
    user_id         TEXT PRIMARY KEY,
    balance_cents   INTEGER NOT NULL DEFAULT 0,
    tier            TEXT NOT NULL DEFAULT 'basic' CHECK (tier IN ('basic', 'premium', 'unlimited')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS credit_transactions (
    id              TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    org_id          TEXT,
    amount_cents    INTEGER NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    idempotency_key TEXT NOT NULL,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (user_id, idempotency_key)
);
CREATE INDEX IF NOT EXISTS idx_credit_tx_user ON credit_transactions(user_id);

CREATE TABLE IF NOT EXISTS usage_records (
    id                  TEXT PRIMARY KEY,
    user_id             TEXT NOT NULL,
    org_id              TEXT,
    provider            TEXT NOT NULL,
    model               TEXT NOT NULL,
    task_type           TEXT NOT NULL,
    prompt_tokens       INTEGER NOT NULL DEFAULT 0,
    completion_tokens   INTEGER NOT NULL DEFAULT 0,
    cost_cents          INTEGER NOT NULL DEFAULT 0,
    cost_usd            REAL NOT NULL DEFAULT 0.0,
    request_id          TEXT NOT NULL,
    response_time_ms    INTEGER NOT NULL DEFAULT 0,
    success             INTEGER NOT NULL,
    error_message       TEXT,
    metadata            TEXT NOT NULL DEFAULT '{}',
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_records_user ON usage_records(user_id);
CREATE INDEX IF NOT EXISTS idx_usage_records_provider ON usage_records(provider);
CREATE INDEX IF NOT EXISTS idx_usage_records_created ON usage_records(created_at);
"#;
