use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::alarm::{AlarmKind, Alert, Transition};
use crate::mqtt::SensorPayload;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub sensors: SensorState,
    pub nodes: BTreeMap<String, NodeState>,
    pub alarms: Vec<AlarmKind>,
    pub events: VecDeque<SystemEvent>,
}

/// Latest value of each monitored quantity; `None` until first reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SensorState {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub water_leak: bool,
    pub low_battery: bool,
}

impl SensorState {
    /// True when none of the numeric quantities has been reported yet.
    pub fn is_unknown(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none() && self.pressure.is_none()
    }
}

#[derive(Clone, Serialize)]
pub struct NodeState {
    pub last_seen: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub water_leak: Option<bool>,
    pub battery_low: Option<bool>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Alarm,
    Device,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub sensors: SensorState,
    pub nodes: BTreeMap<String, NodeState>,
    pub alarms: Vec<AlarmKind>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            sensors: SensorState::default(),
            nodes: BTreeMap::new(),
            alarms: Vec::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a decoded sensor report. Only keys present in the payload
    /// overwrite the current values.
    pub fn record_reading(&mut self, sensor: &str, payload: &SensorPayload) {
        if let Some(t) = payload.temperature {
            self.sensors.temperature = Some(t);
        }
        if let Some(h) = payload.humidity {
            self.sensors.humidity = Some(h);
        }
        if let Some(p) = payload.pressure {
            self.sensors.pressure = Some(p);
        }

        let node = self
            .nodes
            .entry(sensor.to_string())
            .or_insert_with(|| NodeState {
                last_seen: Utc::now(),
                temperature: None,
                humidity: None,
                pressure: None,
                water_leak: None,
                battery_low: None,
            });
        node.last_seen = Utc::now();
        node.temperature = payload.temperature.or(node.temperature);
        node.humidity = payload.humidity.or(node.humidity);
        node.pressure = payload.pressure.or(node.pressure);
        node.water_leak = payload.water_leak.or(node.water_leak);
        node.battery_low = payload.battery_low.or(node.battery_low);

        let mut parts = Vec::new();
        if let Some(t) = payload.temperature {
            parts.push(format!("temperature={t}"));
        }
        if let Some(h) = payload.humidity {
            parts.push(format!("humidity={h}"));
        }
        if let Some(p) = payload.pressure {
            parts.push(format!("pressure={p}"));
        }
        if let Some(w) = payload.water_leak {
            parts.push(format!("water_leak={w}"));
        }
        if let Some(b) = payload.battery_low {
            parts.push(format!("battery_low={b}"));
        }
        self.push_event(EventKind::Reading, format!("{sensor}: {}", parts.join(", ")));
    }

    /// Record an alarm transition.
    pub fn record_alert(&mut self, alert: &Alert) {
        let edge = match alert.transition {
            Transition::Raised => "raised",
            Transition::Cleared => "cleared",
        };
        self.push_event(
            EventKind::Alarm,
            format!("{} {edge}: {}", alert.kind, alert.subject),
        );
    }

    /// Mirror the set of active alarms; the leak and battery flags follow it.
    pub fn set_alarms(&mut self, active: Vec<AlarmKind>) {
        self.sensors.water_leak = active.iter().any(|a| matches!(a, AlarmKind::WaterLeak(_)));
        self.sensors.low_battery = active.iter().any(|a| matches!(a, AlarmKind::LowBattery(_)));
        self.alarms = active;
    }

    /// Record a device action.
    pub fn record_device(&mut self, detail: String) {
        self.push_event(EventKind::Device, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            sensors: self.sensors,
            nodes: self.nodes.clone(),
            alarms: self.alarms.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: Utc::now(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
