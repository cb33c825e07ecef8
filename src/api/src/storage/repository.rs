//! SQLite repository for CRUD operations on races

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use super::schema::create_tables;
use crate::types::{Condition, Course, Horse, Level, Race, RaceResult, Surface};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("race not found: {0}")]
    NotFound(String),
}

/// Outcome of a bulk import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub total: usize,
}

/// Full dump of the collection; also the import payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    #[serde(default)]
    pub export_date: String,
    #[serde(default)]
    pub total_races: usize,
    pub data: Vec<Race>,
}

/// Millisecond timestamp plus a process-wide sequence, hex encoded.
fn generate_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}{:04x}", Utc::now().timestamp_millis(), seq & 0xffff)
}

/// Race columns as stored, before label parsing
struct RaceRow {
    id: String,
    date: Option<String>,
    course: String,
    distance: u32,
    surface: String,
    condition: Option<String>,
    level: Option<String>,
    first: Option<String>,
    second: Option<String>,
    third: Option<String>,
    has_result: bool,
}

impl RaceRow {
    const COLUMNS: &'static str = "race_id, race_date, course, distance, surface, condition, \
         level, first_place, second_place, third_place, has_result";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date: row.get(1)?,
            course: row.get(2)?,
            distance: row.get(3)?,
            surface: row.get(4)?,
            condition: row.get(5)?,
            level: row.get(6)?,
            first: row.get(7)?,
            second: row.get(8)?,
            third: row.get(9)?,
            has_result: row.get(10)?,
        })
    }

    fn into_race(self, horses: Vec<Horse>) -> Result<Race> {
        let surface = Surface::from_label(&self.surface)
            .ok_or_else(|| anyhow!("Invalid surface '{}' for race {}", self.surface, self.id))?;
        let result = self.has_result.then(|| RaceResult {
            first: self.first,
            second: self.second,
            third: self.third,
        });

        Ok(Race {
            date: self
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            course: Course::from_label(&self.course).unwrap_or_default(),
            distance: self.distance,
            surface,
            condition: self.condition.as_deref().and_then(Condition::from_label),
            level: self.level.as_deref().and_then(Level::from_label),
            horses,
            result,
            id: self.id,
        })
    }
}

/// Repository for the race collection
pub struct RaceRepository {
    conn: Connection,
}

impl RaceRepository {
    /// Create a new repository, initializing the database if needed
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(db_path).context("Failed to open database")?;
        Self::init(conn)
    }

    /// Create an in-memory repository (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    // ==================== Write Operations ====================

    /// Insert or replace a race with its entries. Assigns an id when empty.
    pub fn save(&self, race: &Race) -> Result<Race> {
        let mut race = race.clone();
        if race.id.trim().is_empty() {
            race.id = generate_id();
        }

        let tx = self.conn.unchecked_transaction()?;
        Self::write_race(&tx, &race)?;
        tx.commit()?;

        tracing::debug!("Saved race {} with {} horses", race.id, race.field_size());
        Ok(race)
    }

    fn write_race(conn: &Connection, race: &Race) -> Result<()> {
        let result = race.result.clone().unwrap_or_default();
        conn.execute(
            "DELETE FROM race_entries WHERE race_id = ?1",
            [&race.id],
        )?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO races
            (race_id, race_date, course, distance, surface, condition, level,
             first_place, second_place, third_place, has_result)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                race.id,
                race.date.map(|d| d.to_string()),
                race.course.as_str(),
                race.distance,
                race.surface.as_str(),
                race.condition.map(|c| c.as_str()),
                race.level.map(|l| l.as_str()),
                result.first,
                result.second,
                result.third,
                race.has_result(),
            ],
        )?;

        let mut stmt = conn.prepare(
            r#"
            INSERT INTO race_entries
            (race_id, entry_order, frame_number, horse_number, horse_name, sex, age,
             weight_carried, jockey, win_odds, popularity)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )?;
        for (order, horse) in race.horses.iter().enumerate() {
            stmt.execute(params![
                race.id,
                order as i64,
                horse.frame_number,
                horse.horse_number,
                horse.name,
                horse.sex,
                horse.age,
                horse.weight,
                horse.jockey,
                horse.odds,
                horse.popularity,
            ])?;
        }
        Ok(())
    }

    /// Set or overwrite the result of an existing race.
    pub fn update_result(&self, race_id: &str, result: &RaceResult) -> Result<Race> {
        let updated = self.conn.execute(
            r#"
            UPDATE races
            SET first_place = ?2, second_place = ?3, third_place = ?4, has_result = 1
            WHERE race_id = ?1
            "#,
            params![race_id, result.first, result.second, result.third],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(race_id.to_string()).into());
        }
        self.get(race_id)?
            .ok_or_else(|| StoreError::NotFound(race_id.to_string()).into())
    }

    pub fn delete(&self, race_id: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM race_entries WHERE race_id = ?1", [race_id])?;
        let deleted = tx.execute("DELETE FROM races WHERE race_id = ?1", [race_id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(race_id.to_string()).into());
        }
        tx.commit()?;
        tracing::debug!("Deleted race {}", race_id);
        Ok(())
    }

    /// Add races whose id is not already stored. Id-less races get a new id.
    pub fn import(&self, races: &[Race]) -> Result<ImportSummary> {
        let tx = self.conn.unchecked_transaction()?;
        let mut imported = 0;
        let mut skipped = 0;

        for race in races {
            if !race.id.is_empty() && Self::exists(&tx, &race.id)? {
                skipped += 1;
                continue;
            }
            let mut race = race.clone();
            if race.id.trim().is_empty() {
                race.id = generate_id();
            }
            Self::write_race(&tx, &race)?;
            imported += 1;
        }
        tx.commit()?;

        tracing::info!("Imported {} races, skipped {}", imported, skipped);
        Ok(ImportSummary {
            imported,
            skipped,
            total: races.len(),
        })
    }

    // ==================== Query Operations ====================

    fn exists(conn: &Connection, race_id: &str) -> Result<bool> {
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM races WHERE race_id = ?1",
            [race_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn entries(&self, race_id: &str) -> Result<Vec<Horse>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT frame_number, horse_number, horse_name, sex, age,
                   weight_carried, jockey, win_odds, popularity
            FROM race_entries
            WHERE race_id = ?1
            ORDER BY entry_order
            "#,
        )?;

        let horses = stmt
            .query_map([race_id], |row| {
                Ok(Horse {
                    frame_number: row.get::<_, Option<u8>>(0)?.unwrap_or_default(),
                    horse_number: row.get::<_, Option<i32>>(1)?.unwrap_or_default(),
                    name: row.get(2)?,
                    sex: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    age: row.get::<_, Option<u8>>(4)?.unwrap_or_default(),
                    weight: row.get::<_, Option<f64>>(5)?.unwrap_or_default(),
                    jockey: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    odds: row.get::<_, Option<f64>>(7)?.unwrap_or_default(),
                    popularity: row.get::<_, Option<i32>>(8)?.unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(horses)
    }

    pub fn get(&self, race_id: &str) -> Result<Option<Race>> {
        let sql = format!("SELECT {} FROM races WHERE race_id = ?1", RaceRow::COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [race_id], RaceRow::from_row)
            .optional()?;

        match row {
            Some(row) => {
                let horses = self.entries(&row.id)?;
                Ok(Some(row.into_race(horses)?))
            }
            None => Ok(None),
        }
    }

    /// Every race, in insertion order.
    pub fn list(&self) -> Result<Vec<Race>> {
        let sql = format!("SELECT {} FROM races ORDER BY rowid", RaceRow::COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], RaceRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let horses = self.entries(&row.id)?;
                row.into_race(horses)
            })
            .collect()
    }

    pub fn export(&self) -> Result<ExportBundle> {
        let data = self.list()?;
        Ok(ExportBundle {
            export_date: Utc::now().to_rfc3339(),
            total_races: data.len(),
            data,
        })
    }

    pub fn race_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM races", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::tests::{create_test_race, result};

    fn race_without_id() -> Race {
        let mut race = create_test_race("", Course::Nakayama, Surface::Turf, 1600);
        race.date = NaiveDate::from_ymd_opt(2024, 1, 6);
        race.condition = Some(Condition::Good);
        race
    }

    #[test]
    fn test_save_assigns_id_and_round_trips() {
        let repo = RaceRepository::in_memory().unwrap();
        let saved = repo.save(&race_without_id()).unwrap();
        assert!(!saved.id.is_empty());

        let loaded = repo.get(&saved.id).unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.horses[2].name, "H3");
        assert_eq!(loaded.result.unwrap().first.as_deref(), Some("H1"));
    }

    #[test]
    fn test_ids_are_unique() {
        let repo = RaceRepository::in_memory().unwrap();
        let a = repo.save(&race_without_id()).unwrap();
        let b = repo.save(&race_without_id()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(repo.race_count().unwrap(), 2);
    }

    #[test]
    fn test_save_existing_id_replaces() {
        let repo = RaceRepository::in_memory().unwrap();
        let mut race = create_test_race("r1", Course::Tokyo, Surface::Dirt, 1400);
        repo.save(&race).unwrap();

        race.horses.pop();
        race.distance = 1600;
        repo.save(&race).unwrap();

        let loaded = repo.get("r1").unwrap().unwrap();
        assert_eq!(repo.race_count().unwrap(), 1);
        assert_eq!(loaded.distance, 1600);
        assert_eq!(loaded.horses.len(), 2);
    }

    #[test]
    fn test_pending_race_has_no_result() {
        let repo = RaceRepository::in_memory().unwrap();
        let mut race = race_without_id();
        race.result = None;
        let saved = repo.save(&race).unwrap();
        assert!(!repo.get(&saved.id).unwrap().unwrap().has_result());
    }

    #[test]
    fn test_update_result_overwrites() {
        let repo = RaceRepository::in_memory().unwrap();
        let saved = repo.save(&race_without_id()).unwrap();

        let new_result = result("H3", "H2", "H1").unwrap();
        let updated = repo.update_result(&saved.id, &new_result).unwrap();
        assert_eq!(updated.result, Some(new_result));
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let repo = RaceRepository::in_memory().unwrap();
        let err = repo
            .update_result("missing", &RaceResult::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound(_))
        ));
        let err = repo.delete("missing").unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some());
        assert!(repo.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_removes_entries() {
        let repo = RaceRepository::in_memory().unwrap();
        let saved = repo.save(&race_without_id()).unwrap();
        repo.delete(&saved.id).unwrap();

        assert!(repo.get(&saved.id).unwrap().is_none());
        let entries: i64 = repo
            .conn
            .query_row("SELECT COUNT(*) FROM race_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(entries, 0);
    }

    #[test]
    fn test_list_keeps_insertion_order() {
        let repo = RaceRepository::in_memory().unwrap();
        for id in ["c", "a", "b"] {
            repo.save(&create_test_race(id, Course::Kyoto, Surface::Turf, 2000))
                .unwrap();
        }
        let ids: Vec<_> = repo.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_import_skips_existing_ids() {
        let repo = RaceRepository::in_memory().unwrap();
        repo.save(&create_test_race("r1", Course::Tokyo, Surface::Turf, 1600))
            .unwrap();

        let incoming = vec![
            create_test_race("r1", Course::Tokyo, Surface::Turf, 1600),
            create_test_race("r2", Course::Tokyo, Surface::Turf, 1600),
            race_without_id(),
        ];
        let summary = repo.import(&incoming).unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                imported: 2,
                skipped: 1,
                total: 3
            }
        );
        assert_eq!(repo.race_count().unwrap(), 3);
    }

    #[test]
    fn test_import_bundle_with_blank_labels() {
        let json = r#"{
            "exportDate": "2024-02-01T00:00:00Z",
            "totalRaces": 2,
            "data": [
                {"id": "a", "date": "2024-01-06", "course": "中山", "distance": 1600,
                 "surface": "芝", "condition": "良", "horses": []},
                {"id": "b", "date": "", "course": "東京", "distance": 2000,
                 "surface": "芝", "condition": "", "horses": []}
            ]
        }"#;
        let bundle: ExportBundle = serde_json::from_str(json).unwrap();
        let repo = RaceRepository::in_memory().unwrap();
        let summary = repo.import(&bundle.data).unwrap();

        assert_eq!(summary.imported, 2);
        let blank = repo.get("b").unwrap().unwrap();
        assert_eq!(blank.date, None);
        assert_eq!(blank.condition, None);
        assert_eq!(blank.course, Course::Tokyo);
        let dated = repo.get("a").unwrap().unwrap();
        assert_eq!(dated.date, NaiveDate::from_ymd_opt(2024, 1, 6));
        assert_eq!(dated.condition, Some(Condition::Good));
    }

    #[test]
    fn test_export_bundle() {
        let repo = RaceRepository::in_memory().unwrap();
        repo.save(&race_without_id()).unwrap();
        let bundle = repo.export().unwrap();

        assert_eq!(bundle.total_races, 1);
        assert!(!bundle.export_date.is_empty());
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["totalRaces"], 1);
        assert_eq!(json["data"][0]["course"], "nakayama");
    }

    #[test]
    fn test_unknown_course_survives_storage() {
        let repo = RaceRepository::in_memory().unwrap();
        let saved = repo
            .save(&create_test_race("x", Course::Unknown, Surface::Dirt, 1200))
            .unwrap();
        let loaded = repo.get(&saved.id).unwrap().unwrap();
        assert_eq!(loaded.course, Course::Unknown);
    }
}
