use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

mod companies;
mod events;

pub use companies::EnrichmentUpdate;

/// Relational mirror of captured events plus the company registry.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::configure(conn, path.to_path_buf())
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self::configure(conn, PathBuf::from(":memory:"))?;
        db.init()?;
        Ok(db)
    }

    fn configure(conn: Connection, path: PathBuf) -> Result<Self> {
        // cascade deletes from events to dependents rely on this
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn, path })
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                url TEXT NOT NULL,
                display_url TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL,
                date_text TEXT,
                start_date TEXT,
                end_date TEXT,
                location TEXT,
                description TEXT,
                estimated_attendees INTEGER,
                analyzed_at TEXT NOT NULL,
                last_viewed_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (user_id, url)
            );

            CREATE TABLE IF NOT EXISTS event_people (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                role TEXT,
                title TEXT,
                company TEXT,
                persona TEXT,
                linkedin TEXT,
                connection_message TEXT,
                ice_breaker TEXT
            );

            CREATE TABLE IF NOT EXISTS event_sponsors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                tier TEXT
            );

            CREATE TABLE IF NOT EXISTS event_personas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                persona TEXT NOT NULL,
                likelihood TEXT,
                expected_count TEXT,
                outreach_message TEXT,
                ice_breaker TEXT,
                conversation_starters TEXT NOT NULL DEFAULT '[]',
                keywords TEXT NOT NULL DEFAULT '[]',
                pain_points TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS event_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                action TEXT NOT NULL,
                rationale TEXT
            );

            CREATE TABLE IF NOT EXISTS event_related (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                url TEXT,
                date_text TEXT,
                relevance TEXT
            );

            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                industry TEXT,
                context TEXT,
                recent_activity TEXT,
                enriched_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS company_employees (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                title TEXT,
                linkedin TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_user_start ON events(user_id, start_date);
            CREATE INDEX IF NOT EXISTS idx_people_event ON event_people(event_id);
            CREATE INDEX IF NOT EXISTS idx_sponsors_event ON event_sponsors(event_id);
            CREATE INDEX IF NOT EXISTS idx_personas_event ON event_personas(event_id);
            CREATE INDEX IF NOT EXISTS idx_actions_event ON event_actions(event_id);
            CREATE INDEX IF NOT EXISTS idx_related_event ON event_related(event_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_companies_name ON companies(name COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_employees_company ON company_employees(company_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='events'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'eventscope init' first."));
        }
        Ok(())
    }
}

/// Empty or whitespace-only strings are stored as NULL.
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_requires_init() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("nested/eventscope.db")).unwrap();
        assert!(db.ensure_initialized().is_err());
        db.init().unwrap();
        db.init().unwrap();
        assert!(db.ensure_initialized().is_ok());
    }
}
