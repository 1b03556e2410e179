//! Stateful zigbee sensor simulator for local development.
//!
//! Each simulated sensor is either a climate sensor (temperature, humidity,
//! pressure) or a leak probe (`water_leak`), picked from its name. Values
//! follow a random walk with mean reversion so consecutive reports stay
//! coherent, plus a slow diurnal swing on temperature.

use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Comfortable indoor climate, dry probes. Nothing should alarm.
    Stable,
    /// Temperature sinks toward freezing. Exercises the low-temperature and
    /// freezing alarms and their hysteresis.
    Cold,
    /// Damp basement: humidity hovers around the alarm threshold.
    Humid,
    /// Leak probes flap between wet and dry, occasionally staying wet.
    /// Exercises the sample window.
    Leaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "cold" => Self::Cold,
            "humid" => Self::Humid,
            "leaky" => Self::Leaky,
            _ => Self::Stable,
        }
    }

    /// (temperature centre, humidity centre, leak probability, sticky leak)
    fn profile(self) -> (f64, f64, f64, bool) {
        match self {
            Self::Stable => (20.0, 45.0, 0.0, false),
            Self::Cold => (4.0, 50.0, 0.0, false),
            Self::Humid => (18.0, 85.0, 0.0, false),
            Self::Leaky => (19.0, 60.0, 0.35, true),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Cold => write!(f, "cold"),
            Self::Humid => write!(f, "humid"),
            Self::Leaky => write!(f, "leaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A zigbee2mqtt-style device report. Absent keys are omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_leak: Option<bool>,
    pub battery_low: bool,
    pub linkquality: u8,
}

// ---------------------------------------------------------------------------
// Per-sensor state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Climate,
    Leak,
}

impl Role {
    fn for_name(name: &str) -> Self {
        let n = name.to_ascii_lowercase();
        if n.contains("leak") || n.contains("water") || n.contains("flood") {
            Self::Leak
        } else {
            Self::Climate
        }
    }
}

struct Sensor {
    name: String,
    role: Role,
    temperature: f64,
    humidity: f64,
    pressure: f64,
    wet: bool,
    /// Fraction of battery left, 0..1.
    battery: f64,
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct HomeSim {
    sensors: Vec<Sensor>,
    temp_center: f64,
    humidity_center: f64,
    leak_prob: f64,
    sticky_leak: bool,
    diurnal_period_s: f64,
}

impl HomeSim {
    pub fn new(scenario: Scenario, names: &[String], diurnal_period_s: f64) -> Self {
        let (temp_center, humidity_center, leak_prob, sticky_leak) = scenario.profile();
        let sensors = names
            .iter()
            .map(|name| Sensor {
                name: name.clone(),
                role: Role::for_name(name),
                temperature: gaussian(temp_center, 1.0),
                humidity: gaussian(humidity_center, 3.0).clamp(0.0, 100.0),
                pressure: gaussian(1013.0, 4.0),
                wet: false,
                battery: 0.3 + 0.7 * fastrand::f64(),
            })
            .collect();

        Self {
            sensors,
            temp_center,
            humidity_center,
            leak_prob,
            sticky_leak,
            diurnal_period_s: diurnal_period_s.max(1.0),
        }
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.sensors[index].name
    }

    /// Advance sensor `index` by one tick and return its report. `now_s` is
    /// seconds since the epoch, used for the diurnal phase.
    pub fn sample(&mut self, index: usize, now_s: f64) -> Report {
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        let (temp_center, humidity_center) = (self.temp_center, self.humidity_center);
        let (leak_prob, sticky) = (self.leak_prob, self.sticky_leak);
        let s = &mut self.sensors[index];

        // Mean-reverting walks.
        s.temperature += 0.1 * (temp_center + 1.5 * phase.sin() - s.temperature) + gaussian(0.0, 0.2);
        s.humidity = (s.humidity + 0.1 * (humidity_center - s.humidity) + gaussian(0.0, 0.8))
            .clamp(0.0, 100.0);
        s.pressure += 0.05 * (1013.0 - s.pressure) + gaussian(0.0, 0.3);
        s.battery = (s.battery - 0.0005).max(0.0);

        if s.role == Role::Leak {
            s.wet = if sticky && s.wet {
                fastrand::f64() < 0.8
            } else {
                fastrand::f64() < leak_prob
            };
        }

        let round1 = |v: f64| (v * 10.0).round() / 10.0;
        let linkquality = fastrand::u8(40..=255);
        match s.role {
            Role::Climate => Report {
                temperature: Some(round1(s.temperature)),
                humidity: Some(round1(s.humidity)),
                pressure: Some(round1(s.pressure)),
                water_leak: None,
                battery_low: s.battery < 0.1,
                linkquality,
            },
            Role::Leak => Report {
                temperature: None,
                humidity: None,
                pressure: None,
                water_leak: Some(s.wet),
                battery_low: s.battery < 0.1,
                linkquality,
            },
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
