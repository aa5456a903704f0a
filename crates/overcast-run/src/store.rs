//! SQLite persistence of per-region coverage.

use std::path::Path;

use chrono::DateTime;
use overcast_core::analyze::AnalysisRecord;
use overcast_core::error::SinkError;
use overcast_core::sinks::RecordStore;
use rusqlite::{params, Connection};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cloud_coverage (
    region_name TEXT NOT NULL,
    timestamp   TEXT NOT NULL,
    district    TEXT NOT NULL,
    value       TEXT NOT NULL,
    kind        TEXT NOT NULL,
    PRIMARY KEY (region_name, timestamp)
);";

pub struct SqliteStore {
    conn: Connection,
}

fn persistence(e: rusqlite::Error) -> SinkError {
    SinkError::Persistence(e.to_string())
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        Self::with_connection(Connection::open(path).map_err(persistence)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self { conn })
    }

    /// Up to `limit` stored records, newest slot first, regions alphabetical
    /// within a slot.
    pub fn recent(&self, limit: usize) -> Result<Vec<AnalysisRecord>, SinkError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT district, region_name, value, kind, timestamp FROM cloud_coverage
                 ORDER BY timestamp DESC, region_name ASC
                 LIMIT ?1",
            )
            .map_err(persistence)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(persistence)?;

        let mut records = Vec::new();
        for row in rows {
            let (district, region_name, cloud_percentage, classification_type, stamp) =
                row.map_err(persistence)?;
            let timestamp = DateTime::parse_from_rfc3339(&stamp).map_err(|e| {
                SinkError::Persistence(format!("bad timestamp '{stamp}' for {region_name}: {e}"))
            })?;
            records.push(AnalysisRecord {
                district,
                region_name,
                cloud_percentage,
                classification_type,
                timestamp,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
impl SqliteStore {
    fn in_memory() -> Result<Self, SinkError> {
        Self::with_connection(Connection::open_in_memory().map_err(persistence)?)
    }

    /// `(value, kind)` for one key, if stored.
    fn get(&self, region_name: &str, timestamp: &str) -> Result<Option<(String, String)>, SinkError> {
        let mut stmt = self
            .conn
            .prepare("SELECT value, kind FROM cloud_coverage WHERE region_name = ?1 AND timestamp = ?2")
            .map_err(persistence)?;
        let mut rows = stmt
            .query_map(params![region_name, timestamp], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(persistence)?;
        rows.next().transpose().map_err(persistence)
    }

    fn count(&self) -> Result<i64, SinkError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM cloud_coverage", [], |row| row.get(0))
            .map_err(persistence)
    }
}

impl RecordStore for SqliteStore {
    fn upsert(&mut self, record: &AnalysisRecord) -> Result<(), SinkError> {
        self.conn
            .execute(
                "INSERT INTO cloud_coverage (region_name, timestamp, district, value, kind)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(region_name, timestamp) DO UPDATE SET
                    district = excluded.district,
                    value = excluded.value,
                    kind = excluded.kind",
                params![
                    record.region_name,
                    record.timestamp.to_rfc3339(),
                    record.district,
                    record.cloud_percentage,
                    record.classification_type,
                ],
            )
            .map_err(persistence)?;
        Ok(())
    }
}
