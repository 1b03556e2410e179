//! Inbound telemetry: decodes sensor reports, updates the shared sensor
//! state, runs the alarm machines and hands any alerts to the notifier.
//!
//! Owned by the MQTT event-loop task, so alarm state needs no locking of
//! its own; only the shared dashboard state is behind the `RwLock`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::alarm::{Alert, AlarmTracker};
use crate::mail::Notifier;
use crate::mqtt::{extract_sensor_name, SensorPayload};
use crate::state::SharedState;

pub struct TelemetryIngest {
    base_topic: String,
    alarms: AlarmTracker,
    shared: SharedState,
    notifier: Arc<dyn Notifier>,
}

impl TelemetryIngest {
    pub fn new(
        base_topic: &str,
        alarms: AlarmTracker,
        shared: SharedState,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            base_topic: base_topic.to_string(),
            alarms,
            shared,
            notifier,
        }
    }

    /// Handle one published message. Malformed payloads are logged,
    /// recorded and dropped.
    pub async fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        let Some(sensor) = extract_sensor_name(&self.base_topic, topic) else {
            debug!(%topic, "unhandled topic");
            return;
        };

        let report: SensorPayload = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(%sensor, error = %e, "bad sensor payload");
                let mut st = self.shared.write().await;
                st.record_error(format!("bad payload from {sensor}: {e}"));
                return;
            }
        };
        if report.is_empty() {
            debug!(%sensor, "payload carries no monitored keys");
            return;
        }

        debug!(
            %sensor,
            temperature = ?report.temperature,
            humidity = ?report.humidity,
            pressure = ?report.pressure,
            water_leak = ?report.water_leak,
            battery_low = ?report.battery_low,
            "telemetry"
        );

        let mut alerts = Vec::new();
        if let Some(t) = report.temperature {
            alerts.extend(self.alarms.temperature(t));
        }
        if let Some(h) = report.humidity {
            alerts.extend(self.alarms.humidity(h));
        }
        if let Some(p) = report.pressure {
            alerts.extend(self.alarms.pressure(p));
        }
        if let Some(wet) = report.water_leak {
            alerts.extend(self.alarms.water_leak(sensor, wet));
        }
        if let Some(low) = report.battery_low {
            alerts.extend(self.alarms.battery_low(sensor, low));
        }

        {
            let mut st = self.shared.write().await;
            st.record_reading(sensor, &report);
        }
        self.dispatch(alerts).await;
    }

    /// Feed one sump float-switch sample.
    pub async fn handle_switch_sample(&mut self, high: bool) {
        let alerts: Vec<Alert> = self.alarms.sump(high).into_iter().collect();
        self.dispatch(alerts).await;
    }

    async fn dispatch(&mut self, alerts: Vec<Alert>) {
        if alerts.is_empty() {
            return;
        }
        {
            let mut st = self.shared.write().await;
            for alert in &alerts {
                st.record_alert(alert);
            }
            st.set_alarms(self.alarms.active());
        }
        for alert in &alerts {
            info!(alarm = %alert.kind, transition = ?alert.transition, subject = %alert.subject, "alarm");
            self.notifier.notify(&alert.subject, &alert.body);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
