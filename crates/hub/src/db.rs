use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

use crate::state::SensorState;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// One stored sample. `ts` is UTC unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingRow {
    pub ts: i64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/pi-home/pi-home.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let in_memory = db_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?;
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to an in-memory database is its own database.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Sensor samples
    // ----------------------------

    pub async fn insert_reading(&self, ts: DateTime<Utc>, s: &SensorState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_data (ts, temperature, humidity, pressure)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(ts.timestamp())
        .bind(s.temperature)
        .bind(s.humidity)
        .bind(s.pressure)
        .execute(&self.pool)
        .await
        .context("insert_reading failed")?;
        Ok(())
    }

    /// Delete samples older than `days` before `now`. Returns rows removed.
    pub async fn prune_older_than(&self, now: DateTime<Utc>, days: i64) -> Result<u64> {
        let cutoff = (now - Duration::days(days)).timestamp();
        let res = sqlx::query("DELETE FROM sensor_data WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("prune_older_than failed")?;
        Ok(res.rows_affected())
    }

    /// Samples at or after `since`, oldest first, thinned by row id so that
    /// roughly `max_points` rows come back.
    pub async fn readings_since(
        &self,
        since: DateTime<Utc>,
        max_points: usize,
    ) -> Result<Vec<ReadingRow>> {
        let since = since.timestamp();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensor_data WHERE ts >= ?")
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .context("readings_since count failed")?;

        let max_points = max_points.max(1) as i64;
        let skip = ((count + max_points - 1) / max_points).max(1);

        let rows = sqlx::query(
            r#"
            SELECT ts, temperature, humidity, pressure
            FROM sensor_data
            WHERE ts >= ? AND rowid % ? = 0
            ORDER BY ts
            "#,
        )
        .bind(since)
        .bind(skip)
        .fetch_all(&self.pool)
        .await
        .context("readings_since failed")?;

        rows.iter()
            .map(|r| -> Result<ReadingRow, sqlx::Error> {
                Ok(ReadingRow {
                    ts: r.try_get("ts")?,
                    temperature: r.try_get("temperature")?,
                    humidity: r.try_get("humidity")?,
                    pressure: r.try_get("pressure")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("readings_since decode failed")
    }
}

// ===========================================================================
// Tests
// ===========================================================================
