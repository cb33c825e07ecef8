//! SQLite schema for the race collection
//!
//! Tables:
//! - races: race card and optional top-three result
//! - race_entries: horses in entry order

use rusqlite::{Connection, Result};

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS races (
            race_id TEXT PRIMARY KEY,
            race_date TEXT,
            course TEXT NOT NULL,
            distance INTEGER NOT NULL,
            surface TEXT NOT NULL,
            condition TEXT,
            level TEXT,
            first_place TEXT,
            second_place TEXT,
            third_place TEXT,
            has_result INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS race_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            race_id TEXT NOT NULL REFERENCES races(race_id) ON DELETE CASCADE,
            entry_order INTEGER NOT NULL,
            frame_number INTEGER,
            horse_number INTEGER,
            horse_name TEXT NOT NULL,
            sex TEXT,
            age INTEGER,
            weight_carried REAL,
            jockey TEXT,
            win_odds REAL,
            popularity INTEGER,
            UNIQUE(race_id, entry_order)
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_races_date ON races(race_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_race_entries_race ON race_entries(race_id)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_create_tables() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
                 ('races', 'race_entries')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_create_tables_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }
}
