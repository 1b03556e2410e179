//! Device groups: a named set of zigbee bulbs or outlets switched as one
//! unit. Every action publishes one message per member and records the new
//! state optimistically; a member that fails to publish is logged and the
//! rest are still addressed.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::mqtt::{brightness_topic, power_payload, state_topic, Publisher};

// ---------------------------------------------------------------------------
// Schedule modes and clock times
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    Fixed,
    Dusk,
    Dawn,
}

impl FromStr for ScheduleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "dusk" => Ok(Self::Dusk),
            "dawn" => Ok(Self::Dawn),
            other => Err(format!("unknown schedule mode '{other}' (use fixed, dusk or dawn)")),
        }
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fixed => "fixed",
            Self::Dusk => "dusk",
            Self::Dawn => "dawn",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockTimeError {
    #[error("time is empty")]
    Empty,
    #[error("'{0}' is not in HH:MM form")]
    Malformed(String),
    #[error("'{0}' is out of range")]
    OutOfRange(String),
}

/// Local wall-clock time of day, minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub const fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour.into(), self.minute.into(), 0).unwrap_or(NaiveTime::MIN)
    }
}

/// Default on-time for fixed schedules and the fallback for a bad `on_time`.
pub const DEFAULT_ON_TIME: ClockTime = ClockTime { hour: 18, minute: 0 };
/// Default off-time for fixed schedules and the fallback for a bad `off_time`.
pub const DEFAULT_OFF_TIME: ClockTime = ClockTime { hour: 23, minute: 59 };

impl FromStr for ClockTime {
    type Err = ClockTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ClockTimeError::Empty);
        }
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| ClockTimeError::Malformed(s.to_string()))?;
        let parse = |part: &str| -> Result<u8, ClockTimeError> {
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ClockTimeError::Malformed(s.to_string()));
            }
            part.parse()
                .map_err(|_| ClockTimeError::Malformed(s.to_string()))
        };
        let (hour, minute) = (parse(h)?, parse(m)?);
        Self::new(hour, minute).ok_or_else(|| ClockTimeError::OutOfRange(s.to_string()))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Brightness
// ---------------------------------------------------------------------------

/// Zigbee brightness level, 0..=254.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Brightness(u8);

impl Brightness {
    pub const MAX: Self = Self(254);

    pub fn value(self) -> u8 {
        self.0
    }

    /// Clamp an arbitrary configured value into range. The flag reports
    /// whether clamping was needed so the caller can warn.
    pub fn clamped(raw: i64) -> (Self, bool) {
        let v = raw.clamp(0, i64::from(Self::MAX.0));
        (Self(v as u8), v != raw)
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::MAX
    }
}

impl TryFrom<i64> for Brightness {
    type Error = i64;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        if (0..=i64::from(Self::MAX.0)).contains(&raw) {
            Ok(Self(raw as u8))
        } else {
            Err(raw)
        }
    }
}

// ---------------------------------------------------------------------------
// Device group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Bulbs,
    Outlets,
}

impl DeviceKind {
    pub fn is_dimmable(self) -> bool {
        matches!(self, Self::Bulbs)
    }
}

#[derive(Debug, Clone)]
pub struct DeviceGroup {
    pub name: String,
    pub kind: DeviceKind,
    pub members: Vec<String>,
    /// Last action issued, not a confirmed device state.
    pub state: bool,
    pub brightness: Brightness,
    pub on_mode: ScheduleMode,
    pub on_time: ClockTime,
    pub off_mode: ScheduleMode,
    pub off_time: ClockTime,
    pub timer_enabled: bool,
    /// Leader group whose scheduled actions this group copies.
    pub follow: Option<String>,
}

impl DeviceGroup {
    pub fn new(name: &str, kind: DeviceKind, members: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            members,
            state: false,
            brightness: Brightness::default(),
            on_mode: ScheduleMode::Fixed,
            on_time: DEFAULT_ON_TIME,
            off_mode: ScheduleMode::Fixed,
            off_time: DEFAULT_OFF_TIME,
            timer_enabled: true,
            follow: None,
        }
    }

    pub fn turn_on(&mut self, publisher: &dyn Publisher, base: &str) -> usize {
        self.set_power(true, publisher, base)
    }

    pub fn turn_off(&mut self, publisher: &dyn Publisher, base: &str) -> usize {
        self.set_power(false, publisher, base)
    }

    /// Publish ON/OFF to every member. Returns the number of members whose
    /// publish failed; the state flag is updated regardless.
    fn set_power(&mut self, on: bool, publisher: &dyn Publisher, base: &str) -> usize {
        let payload = power_payload(on);
        let failed = self.publish_each(publisher, |dev| state_topic(base, dev), payload);
        self.state = on;
        info!(group = %self.name, state = payload, failed, "group switched");
        failed
    }

    /// Publish a brightness level to every member. Callers must check
    /// `kind.is_dimmable()` first.
    pub fn set_brightness(&mut self, level: Brightness, publisher: &dyn Publisher, base: &str) -> usize {
        let payload = level.value().to_string();
        let failed = self.publish_each(publisher, |dev| brightness_topic(base, dev), &payload);
        self.brightness = level;
        info!(group = %self.name, brightness = level.value(), failed, "brightness set");
        failed
    }

    fn publish_each(
        &self,
        publisher: &dyn Publisher,
        topic_for: impl Fn(&str) -> String,
        payload: &str,
    ) -> usize {
        let mut failed = 0;
        for dev in &self.members {
            let topic = topic_for(dev);
            if let Err(e) = publisher.publish(&topic, payload) {
                failed += 1;
                warn!(group = %self.name, device = %dev, error = %e, "publish failed");
            }
        }
        failed
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::testing::RecordingPublisher;

    fn porch() -> DeviceGroup {
        DeviceGroup::new(
            "porch",
            DeviceKind::Bulbs,
            vec!["porch-1".into(), "porch-2".into()],
        )
    }

    // -- ClockTime ----------------------------------------------------------

    #[test]
    fn clock_time_parses_hh_mm() {
        let t: ClockTime = "18:05".parse().unwrap();
        assert_eq!(Some(t), ClockTime::new(18, 5));
        assert_eq!(t.to_string(), "18:05");
    }

    #[test]
    fn clock_time_accepts_single_digit_hour() {
        let t: ClockTime = "7:30".parse().unwrap();
        assert_eq!(t.to_string(), "07:30");
    }

    #[test]
    fn clock_time_rejects_empty() {
        assert_eq!("".parse::<ClockTime>(), Err(ClockTimeError::Empty));
        assert_eq!("   ".parse::<ClockTime>(), Err(ClockTimeError::Empty));
    }

    #[test]
    fn clock_time_rejects_garbage() {
        for bad in ["1800", "18:", ":30", "aa:bb", "18:30:00", "+1:30", "018:00"] {
            assert!(
                matches!(bad.parse::<ClockTime>(), Err(ClockTimeError::Malformed(_))),
                "{bad} should be malformed"
            );
        }
    }

    #[test]
    fn clock_time_rejects_out_of_range() {
        assert!(matches!("24:00".parse::<ClockTime>(), Err(ClockTimeError::OutOfRange(_))));
        assert!(matches!("12:60".parse::<ClockTime>(), Err(ClockTimeError::OutOfRange(_))));
    }

    #[test]
    fn clock_time_serializes_as_string() {
        let json = serde_json::to_string(&DEFAULT_OFF_TIME).unwrap();
        assert_eq!(json, r#""23:59""#);
    }

    // -- ScheduleMode -------------------------------------------------------

    #[test]
    fn schedule_mode_parse() {
        assert_eq!("Dusk".parse::<ScheduleMode>(), Ok(ScheduleMode::Dusk));
        assert_eq!(" fixed ".parse::<ScheduleMode>(), Ok(ScheduleMode::Fixed));
        assert_eq!("dawn".parse::<ScheduleMode>(), Ok(ScheduleMode::Dawn));
        assert!("sunset".parse::<ScheduleMode>().is_err());
    }

    // -- Brightness ---------------------------------------------------------

    #[test]
    fn brightness_try_from_bounds() {
        assert_eq!(Brightness::try_from(0).map(Brightness::value), Ok(0));
        assert_eq!(Brightness::try_from(254).map(Brightness::value), Ok(254));
        assert_eq!(Brightness::try_from(255), Err(255));
        assert_eq!(Brightness::try_from(-1), Err(-1));
    }

    #[test]
    fn brightness_clamped_reports_adjustment() {
        assert_eq!(Brightness::clamped(300), (Brightness::MAX, true));
        assert_eq!(Brightness::clamped(-5).0.value(), 0);
        assert_eq!(Brightness::clamped(100), (Brightness(100), false));
    }

    // -- DeviceGroup --------------------------------------------------------

    #[test]
    fn turn_on_publishes_to_every_member() {
        let publisher = RecordingPublisher::default();
        let mut g = porch();
        assert_eq!(g.turn_on(&publisher, "zigbee2mqtt"), 0);
        assert!(g.state);
        assert_eq!(
            publisher.sent(),
            vec![
                ("zigbee2mqtt/porch-1/set/state".to_string(), "ON".to_string()),
                ("zigbee2mqtt/porch-2/set/state".to_string(), "ON".to_string()),
            ]
        );
    }

    #[test]
    fn turn_off_publishes_off() {
        let publisher = RecordingPublisher::default();
        let mut g = porch();
        g.state = true;
        g.turn_off(&publisher, "zigbee2mqtt");
        assert!(!g.state);
        assert!(publisher.sent().iter().all(|(_, p)| p == "OFF"));
    }

    #[test]
    fn failed_member_does_not_stop_the_rest() {
        let publisher = RecordingPublisher::default();
        publisher.fail_topic("zigbee2mqtt/porch-1/set/state");
        let mut g = porch();
        assert_eq!(g.set_power(true, &publisher, "zigbee2mqtt"), 1);
        // State is optimistic even on partial delivery.
        assert!(g.state);
        assert_eq!(
            publisher.sent(),
            vec![("zigbee2mqtt/porch-2/set/state".to_string(), "ON".to_string())]
        );
    }

    #[test]
    fn set_brightness_254_publishes_per_member() {
        let publisher = RecordingPublisher::default();
        let mut g = porch();
        g.set_brightness(Brightness::MAX, &publisher, "zigbee2mqtt");
        assert_eq!(
            publisher.sent(),
            vec![
                ("zigbee2mqtt/porch-1/set/brightness".to_string(), "254".to_string()),
                ("zigbee2mqtt/porch-2/set/brightness".to_string(), "254".to_string()),
            ]
        );
        assert_eq!(g.brightness, Brightness::MAX);
    }
}
