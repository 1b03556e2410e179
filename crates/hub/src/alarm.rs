//! Hysteretic alarm state machines.
//!
//! Every alarm has two states, normal and active, and reports a
//! [`Transition`] only on the edge between them:
//!
//! ```text
//!            crosses threshold
//!  Normal ─────────────────────► Active
//!    ▲                             │
//!    └─────────────────────────────┘
//!     crosses threshold ± hysteresis
//! ```
//!
//! Analog quantities use [`ThresholdAlarm`]; noisy digital inputs (leak
//! probes, battery flags, the sump float switch) use [`WindowedFlag`], which
//! only changes state when the last N samples agree unanimously.
//! [`AlarmTracker`] owns one machine per alarm kind and turns transitions
//! into ready-to-send [`Alert`]s.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::config::AlarmConfig;

/// Edge reported by an alarm when its state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Raised,
    Cleared,
}

// ---------------------------------------------------------------------------
// Threshold alarm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Raised when the value drops below the threshold.
    Below,
    /// Raised when the value rises above the threshold.
    Above,
}

/// Analog alarm with a hysteresis band on the recovery side.
#[derive(Debug, Clone)]
pub struct ThresholdAlarm {
    direction: Direction,
    threshold: f64,
    hysteresis: f64,
    active: bool,
}

impl ThresholdAlarm {
    /// Raised below `threshold`, cleared above `threshold + hysteresis`.
    pub fn below(threshold: f64, hysteresis: f64) -> Self {
        Self {
            direction: Direction::Below,
            threshold,
            hysteresis,
            active: false,
        }
    }

    /// Raised above `threshold`, cleared below `threshold - hysteresis`.
    pub fn above(threshold: f64, hysteresis: f64) -> Self {
        Self {
            direction: Direction::Above,
            threshold,
            hysteresis,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed one reading. NaN never causes a transition.
    pub fn evaluate(&mut self, value: f64) -> Option<Transition> {
        let (trips, recovers) = match self.direction {
            Direction::Below => (
                value < self.threshold,
                value > self.threshold + self.hysteresis,
            ),
            Direction::Above => (
                value > self.threshold,
                value < self.threshold - self.hysteresis,
            ),
        };

        if !self.active && trips {
            self.active = true;
            Some(Transition::Raised)
        } else if self.active && recovers {
            self.active = false;
            Some(Transition::Cleared)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Windowed flag
// ---------------------------------------------------------------------------

/// Boolean alarm filtered through a sliding window of the last N samples.
/// The window starts full of `false`.
#[derive(Debug, Clone)]
pub struct WindowedFlag {
    window: VecDeque<bool>,
    size: usize,
    active: bool,
}

impl WindowedFlag {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            window: std::iter::repeat(false).take(size).collect(),
            size,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn push(&mut self, sample: bool) -> Option<Transition> {
        if self.window.len() == self.size {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        if !self.active && self.window.iter().all(|&s| s) {
            self.active = true;
            Some(Transition::Raised)
        } else if self.active && self.window.iter().all(|&s| !s) {
            self.active = false;
            Some(Transition::Cleared)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Alarm kinds and alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "sensor", rename_all = "snake_case")]
pub enum AlarmKind {
    LowTemperature,
    Freezing,
    HighHumidity,
    LowPressure,
    WaterLeak(String),
    LowBattery(String),
    SumpPump,
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowTemperature => f.write_str("low temperature"),
            Self::Freezing => f.write_str("freezing"),
            Self::HighHumidity => f.write_str("high humidity"),
            Self::LowPressure => f.write_str("low pressure"),
            Self::WaterLeak(sensor) => write!(f, "water leak ({sensor})"),
            Self::LowBattery(sensor) => write!(f, "low battery ({sensor})"),
            Self::SumpPump => f.write_str("sump pump"),
        }
    }
}

/// A notification produced by exactly one alarm transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlarmKind,
    pub transition: Transition,
    pub subject: String,
    pub body: String,
}

impl Alert {
    fn new(kind: AlarmKind, transition: Transition, subject: &str, body: String) -> Self {
        Self {
            kind,
            transition,
            subject: subject.to_string(),
            body,
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Temperature below which the freezing alarm trips.
const FREEZING_C: f64 = 0.0;

pub struct AlarmTracker {
    low_temp: ThresholdAlarm,
    freezing: ThresholdAlarm,
    humidity: ThresholdAlarm,
    pressure: Option<ThresholdAlarm>,
    leak: HashMap<String, WindowedFlag>,
    battery: HashMap<String, WindowedFlag>,
    sump: WindowedFlag,
    leak_samples: usize,
    battery_samples: usize,
}

impl AlarmTracker {
    pub fn new(cfg: &AlarmConfig, sump_samples: usize) -> Self {
        Self {
            low_temp: ThresholdAlarm::below(cfg.low_temp_threshold, cfg.temperature_hysteresis),
            freezing: ThresholdAlarm::below(FREEZING_C, cfg.temperature_hysteresis),
            humidity: ThresholdAlarm::above(cfg.high_humidity_threshold, cfg.humidity_hysteresis),
            pressure: cfg
                .low_pressure_threshold
                .map(|t| ThresholdAlarm::below(t, cfg.pressure_hysteresis)),
            leak: HashMap::new(),
            battery: HashMap::new(),
            sump: WindowedFlag::new(sump_samples),
            leak_samples: cfg.leak_samples,
            battery_samples: cfg.battery_samples,
        }
    }

    /// Temperature feeds both the low-temperature and the freezing alarm.
    pub fn temperature(&mut self, value: f64) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if let Some(t) = self.low_temp.evaluate(value) {
            alerts.push(match t {
                Transition::Raised => Alert::new(
                    AlarmKind::LowTemperature,
                    t,
                    "Home temperature warning!",
                    format!("The house temperature has fallen to: {value} degrees C!"),
                ),
                Transition::Cleared => Alert::new(
                    AlarmKind::LowTemperature,
                    t,
                    "Home temperature update",
                    format!("The house temperature is now risen to {value} degrees C."),
                ),
            });
        }

        if let Some(t) = self.freezing.evaluate(value) {
            alerts.push(match t {
                Transition::Raised => Alert::new(
                    AlarmKind::Freezing,
                    t,
                    "Home temperature FREEZING!",
                    format!("The house temperature is freezing! Temperature={value} degrees C!"),
                ),
                Transition::Cleared => Alert::new(
                    AlarmKind::Freezing,
                    t,
                    "Home temperature update",
                    format!(
                        "The house temperature is now risen above freezing. Temperature={value} degrees C."
                    ),
                ),
            });
        }

        alerts
    }

    pub fn humidity(&mut self, value: f64) -> Option<Alert> {
        let t = self.humidity.evaluate(value)?;
        Some(match t {
            Transition::Raised => Alert::new(
                AlarmKind::HighHumidity,
                t,
                "Home humidity warning!",
                format!("The basement humidity has risen to: {value}%!"),
            ),
            Transition::Cleared => Alert::new(
                AlarmKind::HighHumidity,
                t,
                "Home humidity update",
                format!("The basement humidity has now fallen to: {value}%."),
            ),
        })
    }

    /// No-op unless a low-pressure threshold is configured.
    pub fn pressure(&mut self, value: f64) -> Option<Alert> {
        let t = self.pressure.as_mut()?.evaluate(value)?;
        Some(match t {
            Transition::Raised => Alert::new(
                AlarmKind::LowPressure,
                t,
                "Home pressure warning!",
                format!("The air pressure has fallen to: {value} hPa!"),
            ),
            Transition::Cleared => Alert::new(
                AlarmKind::LowPressure,
                t,
                "Home pressure update",
                format!("The air pressure is now back up to {value} hPa."),
            ),
        })
    }

    pub fn water_leak(&mut self, sensor: &str, wet: bool) -> Option<Alert> {
        let samples = self.leak_samples;
        let t = self
            .leak
            .entry(sensor.to_string())
            .or_insert_with(|| WindowedFlag::new(samples))
            .push(wet)?;
        let kind = AlarmKind::WaterLeak(sensor.to_string());
        Some(match t {
            Transition::Raised => Alert::new(
                kind,
                t,
                &format!("Water leak alarm detected for {sensor}!"),
                format!("Sensor {sensor} reports water_leak=true."),
            ),
            Transition::Cleared => Alert::new(
                kind,
                t,
                &format!("Water leak alarm stopped for {sensor}"),
                format!("Sensor {sensor} reports water_leak=false."),
            ),
        })
    }

    pub fn battery_low(&mut self, sensor: &str, low: bool) -> Option<Alert> {
        let samples = self.battery_samples;
        let t = self
            .battery
            .entry(sensor.to_string())
            .or_insert_with(|| WindowedFlag::new(samples))
            .push(low)?;
        let kind = AlarmKind::LowBattery(sensor.to_string());
        Some(match t {
            Transition::Raised => Alert::new(
                kind,
                t,
                &format!("Low battery detected for {sensor}!"),
                format!("Sensor {sensor} reports battery_low=true. Replace the battery soon."),
            ),
            Transition::Cleared => Alert::new(
                kind,
                t,
                &format!("Battery restored for {sensor}"),
                format!("Sensor {sensor} reports battery_low=false."),
            ),
        })
    }

    /// One float-switch sample; `high` means the water level is high.
    pub fn sump(&mut self, high: bool) -> Option<Alert> {
        let t = self.sump.push(high)?;
        Some(match t {
            Transition::Raised => Alert::new(
                AlarmKind::SumpPump,
                t,
                "SUMP PUMP ALARM!",
                "SUMP PUMP ALARM: the float switch reports a high water level.".to_string(),
            ),
            Transition::Cleared => Alert::new(
                AlarmKind::SumpPump,
                t,
                "Sump pump returned to normal",
                "Sump pump sensor returned to normal.".to_string(),
            ),
        })
    }

    /// Every alarm currently in the active state, sorted.
    pub fn active(&self) -> Vec<AlarmKind> {
        let mut out = Vec::new();
        if self.low_temp.is_active() {
            out.push(AlarmKind::LowTemperature);
        }
        if self.freezing.is_active() {
            out.push(AlarmKind::Freezing);
        }
        if self.humidity.is_active() {
            out.push(AlarmKind::HighHumidity);
        }
        if self.pressure.as_ref().is_some_and(ThresholdAlarm::is_active) {
            out.push(AlarmKind::LowPressure);
        }
        out.extend(
            self.leak
                .iter()
                .filter(|(_, f)| f.is_active())
                .map(|(s, _)| AlarmKind::WaterLeak(s.clone())),
        );
        out.extend(
            self.battery
                .iter()
                .filter(|(_, f)| f.is_active())
                .map(|(s, _)| AlarmKind::LowBattery(s.clone())),
        );
        if self.sump.is_active() {
            out.push(AlarmKind::SumpPump);
        }
        out.sort();
        out
    }
}

// ===========================================================================
// Tests
// ===========================================================================
