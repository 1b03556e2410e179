use anyhow::{Context, Result};
use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;

use crate::device::DeviceGroup;

// ---------------------------------------------------------------------------
// Publisher seam
// ---------------------------------------------------------------------------

/// Outbound half of the message bus. Publishing never blocks; a returned
/// error only means the message could not be queued.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

impl Publisher for AsyncClient {
    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .with_context(|| format!("failed to queue publish to {topic}"))
    }
}

/// Smallest request channel the hub runs with.
pub const MIN_REQUEST_CAPACITY: usize = 64;

/// Request channel size for the client. The startup sync queues one state
/// publish per member, plus one brightness publish per bulb, before the
/// event loop drains anything, and the first ConnAck adds one subscribe
/// per sensor. The channel must hold that whole burst.
pub fn request_capacity(groups: &[DeviceGroup], sensors: usize) -> usize {
    let sync: usize = groups
        .iter()
        .map(|g| g.members.len() * if g.kind.is_dimmable() { 2 } else { 1 })
        .sum();
    (sync + sensors + 16).max(MIN_REQUEST_CAPACITY)
}

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// A zigbee2mqtt sensor report. Every key is optional and unknown keys
/// (linkquality, voltage, ...) are ignored.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub(crate) struct SensorPayload {
    pub(crate) temperature: Option<f64>,
    pub(crate) humidity: Option<f64>,
    pub(crate) pressure: Option<f64>,
    pub(crate) water_leak: Option<bool>,
    pub(crate) battery_low: Option<bool>,
}

impl SensorPayload {
    pub(crate) fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Topic a sensor reports on: "<base>/<sensor>".
pub(crate) fn sensor_topic(base: &str, sensor: &str) -> String {
    format!("{base}/{sensor}")
}

/// Extract the sensor name from "<base>/<sensor>". Command and bridge
/// topics ("<base>/<dev>/set", "<base>/bridge/...") have more segments and
/// are rejected.
pub(crate) fn extract_sensor_name<'a>(base: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(base)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') || rest == "bridge" {
        None
    } else {
        Some(rest)
    }
}

/// "<base>/<device>/set/state"
pub(crate) fn state_topic(base: &str, device: &str) -> String {
    format!("{base}/{device}/set/state")
}

/// "<base>/<device>/set/brightness"
pub(crate) fn brightness_topic(base: &str, device: &str) -> String {
    format!("{base}/{device}/set/brightness")
}

pub(crate) fn power_payload(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ---------------------------------------------------------------------------
// Test publisher
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::Publisher;
    use anyhow::{bail, Result};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every publish; topics in `failing` return an error instead.
    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        sent: Mutex<Vec<(String, String)>>,
        failing: Mutex<HashSet<String>>,
    }

    impl RecordingPublisher {
        pub(crate) fn fail_topic(&self, topic: &str) {
            self.failing.lock().unwrap().insert(topic.to_string());
        }

        pub(crate) fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        pub(crate) fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: &str) -> Result<()> {
            if self.failing.lock().unwrap().contains(topic) {
                bail!("broker rejected {topic}");
            }
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
