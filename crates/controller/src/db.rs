//! Append-only observation store on sqlite.
//!
//! One row per control cycle, keyed by unix timestamp. Rows are never
//! updated or deleted; range queries exist for the reporting tooling and
//! the `--dump` probe.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use thiserror::Error;

/// Storage I/O failure. Fatal: the loop never continues past a cycle whose
/// observation could not be persisted.
#[derive(Debug, Error)]
#[error("observation store failure: {0}")]
pub struct PersistenceFault(#[from] sqlx::Error);

/// One persisted control cycle.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Observation {
    /// Unix seconds; primary key, monotonically increasing.
    pub ts: i64,
    /// Calibrated units (°F when conversion is configured).
    pub temperature: f64,
    pub humidity: f64,
    pub lights_on: bool,
    pub heater_on: bool,
    pub fan_on: bool,
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/growbox/growbox.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        // A single connection is all the single-threaded loop ever needs.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create the observation table if it does not exist. Idempotent.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceFault> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS observations (
              ts          INTEGER PRIMARY KEY,
              temperature REAL NOT NULL,
              humidity    REAL NOT NULL,
              lights_on   INTEGER NOT NULL,
              heater_on   INTEGER NOT NULL,
              fan_on      INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one observation. Rows are never rewritten.
    pub async fn append(&self, obs: &Observation) -> Result<(), PersistenceFault> {
        sqlx::query(
            r#"
            INSERT INTO observations (ts, temperature, humidity, lights_on, heater_on, fan_on)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(obs.ts)
        .bind(obs.temperature)
        .bind(obs.humidity)
        .bind(obs.lights_on)
        .bind(obs.heater_on)
        .bind(obs.fan_on)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Observations ascending by timestamp, optionally bounded: `start` is
    /// inclusive, `end` exclusive, and an absent bound leaves that side open.
    pub async fn query(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Observation>, PersistenceFault> {
        const BASE: &str =
            "SELECT ts, temperature, humidity, lights_on, heater_on, fan_on FROM observations";

        let rows = match (start, end) {
            (Some(s), Some(e)) => {
                sqlx::query_as::<_, Observation>(&format!(
                    "{BASE} WHERE ts >= ? AND ts < ? ORDER BY ts ASC"
                ))
                .bind(s)
                .bind(e)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(s), None) => {
                sqlx::query_as::<_, Observation>(&format!("{BASE} WHERE ts >= ? ORDER BY ts ASC"))
                    .bind(s)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(e)) => {
                sqlx::query_as::<_, Observation>(&format!("{BASE} WHERE ts < ? ORDER BY ts ASC"))
                    .bind(e)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, None) => {
                sqlx::query_as::<_, Observation>(&format!("{BASE} ORDER BY ts ASC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.ensure_schema().await.unwrap();
        db
    }

    fn obs(ts: i64) -> Observation {
        Observation {
            ts,
            temperature: 76.4,
            humidity: 52.5,
            lights_on: true,
            heater_on: false,
            fan_on: true,
        }
    }

    // -- Schema -------------------------------------------------------------

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let db = memory_db().await;
        db.ensure_schema().await.unwrap();
        db.append(&obs(1_700_000_000)).await.unwrap();
        db.ensure_schema().await.unwrap();
        // Existing rows survive a repeated ensure_schema.
        assert_eq!(db.query(None, None).await.unwrap().len(), 1);
    }

    // -- Append + query round trip -------------------------------------------

    #[tokio::test]
    async fn append_then_query_round_trips() {
        let db = memory_db().await;
        let o = obs(1_700_000_000);
        db.append(&o).await.unwrap();

        let rows = db
            .query(Some(o.ts - 1), Some(o.ts + 1))
            .await
            .unwrap();
        assert_eq!(rows, vec![o]);
    }

    #[tokio::test]
    async fn query_orders_ascending() {
        let db = memory_db().await;
        for ts in [30, 10, 20] {
            db.append(&obs(ts)).await.unwrap();
        }
        let rows = db.query(None, None).await.unwrap();
        let stamps: Vec<i64> = rows.iter().map(|o| o.ts).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn query_start_is_inclusive_end_exclusive() {
        let db = memory_db().await;
        for ts in [10, 20, 30] {
            db.append(&obs(ts)).await.unwrap();
        }
        let rows = db.query(Some(10), Some(30)).await.unwrap();
        let stamps: Vec<i64> = rows.iter().map(|o| o.ts).collect();
        assert_eq!(stamps, vec![10, 20]);
    }

    #[tokio::test]
    async fn query_unbounded_sides() {
        let db = memory_db().await;
        for ts in [10, 20, 30] {
            db.append(&obs(ts)).await.unwrap();
        }
        assert_eq!(db.query(Some(20), None).await.unwrap().len(), 2);
        assert_eq!(db.query(None, Some(20)).await.unwrap().len(), 1);
        assert_eq!(db.query(None, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn query_empty_range_returns_nothing() {
        let db = memory_db().await;
        db.append(&obs(10)).await.unwrap();
        assert!(db.query(Some(11), Some(20)).await.unwrap().is_empty());
    }

    // -- Failure surface -----------------------------------------------------

    #[tokio::test]
    async fn append_without_schema_is_a_persistence_fault() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let err = db.append(&obs(10)).await.unwrap_err();
        // The typed fault keeps storage errors distinguishable from
        // aggregation failures at the top of the loop.
        assert!(err.to_string().contains("observation store failure"));
    }

    #[tokio::test]
    async fn bool_columns_round_trip() {
        let db = memory_db().await;
        let mut o = obs(10);
        o.lights_on = false;
        o.heater_on = true;
        o.fan_on = false;
        db.append(&o).await.unwrap();
        let rows = db.query(None, None).await.unwrap();
        assert_eq!(rows[0], o);
    }
}
