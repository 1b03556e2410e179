//! Periodic sensor-history recorder: snapshots the shared sensor state into
//! the database every sample period and prunes rows older than a year.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::db::Db;
use crate::state::SharedState;

/// Samples older than this are deleted.
pub const RETENTION_DAYS: i64 = 365;

/// Store one snapshot. Returns false when no reading has arrived yet.
pub async fn record_once(db: &Db, shared: &SharedState, now: DateTime<Utc>) -> Result<bool> {
    let snapshot = shared.read().await.sensors;
    if snapshot.is_unknown() {
        debug!("no sensor readings yet, skipping sample");
        return Ok(false);
    }

    db.insert_reading(now, &snapshot).await?;
    let pruned = db.prune_older_than(now, RETENTION_DAYS).await?;
    if pruned > 0 {
        debug!(pruned, "pruned old samples");
    }
    Ok(true)
}

pub async fn run(db: Db, shared: SharedState, period: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(period_secs = period.as_secs(), "sensor recorder started");
    let mut tick = tokio::time::interval(period);
    // The first tick fires immediately; skip it so the first sample has data behind it.
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = record_once(&db, &shared, Utc::now()).await {
                    error!(error = %e, "failed to record sensor sample");
                    shared.write().await.record_error(format!("recorder: {e:#}"));
                }
            }
            _ = shutdown.changed() => {
                info!("sensor recorder stopping");
                break;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::SensorPayload;
    use crate::state::SystemState;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    async fn setup() -> (Db, SharedState) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        (db, Arc::new(RwLock::new(SystemState::new())))
    }

    #[tokio::test]
    async fn skips_when_nothing_reported() {
        let (db, shared) = setup().await;
        assert!(!record_once(&db, &shared, Utc::now()).await.unwrap());
        assert!(db
            .readings_since(Utc.timestamp_opt(0, 0).unwrap(), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn stores_current_snapshot() {
        let (db, shared) = setup().await;
        shared.write().await.record_reading(
            "basement",
            &SensorPayload {
                temperature: Some(18.0),
                humidity: Some(55.0),
                ..SensorPayload::default()
            },
        );
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(record_once(&db, &shared, now).await.unwrap());

        let rows = db
            .readings_since(Utc.timestamp_opt(0, 0).unwrap(), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, now.timestamp());
        assert_eq!(rows[0].temperature, Some(18.0));
        assert_eq!(rows[0].pressure, None);
    }

    #[tokio::test]
    async fn old_rows_are_pruned_on_record() {
        let (db, shared) = setup().await;
        shared.write().await.record_reading(
            "basement",
            &SensorPayload {
                temperature: Some(18.0),
                ..SensorPayload::default()
            },
        );
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        record_once(&db, &shared, old).await.unwrap();
        record_once(&db, &shared, now).await.unwrap();

        let rows = db.readings_since(old, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, now.timestamp());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (db, shared) = setup().await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(db, shared, Duration::from_secs(3600), rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
