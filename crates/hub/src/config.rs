//! TOML config file loading, environment overrides, validation, and
//! normalisation of device groups.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::warn;

use crate::device::{
    Brightness, ClockTime, DeviceGroup, DeviceKind, ScheduleMode, DEFAULT_OFF_TIME,
    DEFAULT_ON_TIME,
};
use crate::solar;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_city")]
    pub city: String,
    /// IANA zone; defaults to the city's zone, then UTC.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_sample_period")]
    pub sample_period_sec: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Friendly names of the zigbee sensors to subscribe to.
    #[serde(default)]
    pub sensors: Vec<String>,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub alarms: AlarmConfig,
    #[serde(default)]
    pub float_switch: Option<FloatSwitchConfig>,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub base_topic: String,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            base_topic: "zigbee2mqtt".into(),
            client_id: "pi-home".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

/// An empty `recipient` disables mail.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub sender: String,
    pub recipient: String,
    pub smtp_server: String,
}

impl MailConfig {
    pub fn enabled(&self) -> bool {
        !self.recipient.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    pub low_temp_threshold: f64,
    pub high_humidity_threshold: f64,
    pub temperature_hysteresis: f64,
    pub humidity_hysteresis: f64,
    pub low_pressure_threshold: Option<f64>,
    pub pressure_hysteresis: f64,
    pub leak_samples: usize,
    pub battery_samples: usize,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            low_temp_threshold: 10.0,
            high_humidity_threshold: 85.0,
            temperature_hysteresis: 1.0,
            humidity_hysteresis: 2.0,
            low_pressure_threshold: None,
            pressure_hysteresis: 2.0,
            leak_samples: 1,
            battery_samples: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloatSwitchConfig {
    pub gpio_pin: i64,
    #[serde(default = "default_float_samples")]
    pub samples: usize,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    /// Switch pulls the pin low when the water is high.
    #[serde(default = "default_true")]
    pub active_low: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    pub kind: DeviceKind,
    pub devices: Vec<String>,
    #[serde(default)]
    pub brightness: Option<i64>,
    #[serde(default = "default_mode")]
    pub on_mode: ScheduleMode,
    #[serde(default)]
    pub on_time: Option<String>,
    #[serde(default = "default_mode")]
    pub off_mode: ScheduleMode,
    #[serde(default)]
    pub off_time: Option<String>,
    #[serde(default = "default_true")]
    pub timer: bool,
    #[serde(default)]
    pub follow: Option<String>,
}

fn default_city() -> String {
    "Detroit".into()
}
fn default_database() -> String {
    "sqlite:pi-home.db?mode=rwc".into()
}
fn default_sample_period() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".into()
}
fn default_float_samples() -> usize {
    5
}
fn default_poll_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_mode() -> ScheduleMode {
    ScheduleMode::Fixed
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_general(&mut errors);
        self.validate_alarms(&mut errors);
        self.validate_groups(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_general(&self, errors: &mut Vec<String>) {
        if self.sample_period_sec == 0 {
            errors.push("sample_period_sec must be positive".into());
        }

        if let Some(tz) = &self.timezone {
            if tz.parse::<Tz>().is_err() {
                errors.push(format!("timezone '{tz}' is not a known IANA zone"));
            }
        }

        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host is empty".into());
        }
        if self.mqtt.port == 0 {
            errors.push("mqtt.port must be non-zero".into());
        }
        let base = self.mqtt.base_topic.trim();
        if base.is_empty() || base.contains(['+', '#']) {
            errors.push(format!(
                "mqtt.base_topic '{}' must be non-empty and free of wildcards",
                self.mqtt.base_topic
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (i, s) in self.sensors.iter().enumerate() {
            if s.trim().is_empty() || s.contains(['/', '+', '#']) {
                errors.push(format!("sensors[{i}]: '{s}' is not a valid sensor name"));
            } else if !seen.insert(s) {
                errors.push(format!("sensors[{i}]: duplicate sensor '{s}'"));
            }
        }

        if self.mail.enabled() {
            if self.mail.sender.trim().is_empty() {
                errors.push("mail.sender is empty but mail.recipient is set".into());
            }
            if self.mail.smtp_server.trim().is_empty() {
                errors.push("mail.smtp_server is empty but mail.recipient is set".into());
            }
        }

        if let Some(fs) = &self.float_switch {
            if !VALID_GPIO_PINS.contains(&fs.gpio_pin) {
                errors.push(format!(
                    "float_switch.gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    fs.gpio_pin
                ));
            }
            if fs.samples == 0 {
                errors.push("float_switch.samples must be positive".into());
            }
            if fs.poll_ms == 0 {
                errors.push("float_switch.poll_ms must be positive".into());
            }
        }
    }

    fn validate_alarms(&self, errors: &mut Vec<String>) {
        let a = &self.alarms;
        for (key, value) in [
            ("temperature_hysteresis", a.temperature_hysteresis),
            ("humidity_hysteresis", a.humidity_hysteresis),
            ("pressure_hysteresis", a.pressure_hysteresis),
        ] {
            if value.is_nan() || value <= 0.0 {
                errors.push(format!("alarms.{key} must be positive, got {value}"));
            }
        }
        if !(0.0..=100.0).contains(&a.high_humidity_threshold) {
            errors.push(format!(
                "alarms.high_humidity_threshold {} out of range [0, 100]",
                a.high_humidity_threshold
            ));
        }
        if a.leak_samples == 0 {
            errors.push("alarms.leak_samples must be positive".into());
        }
        if a.battery_samples == 0 {
            errors.push("alarms.battery_samples must be positive".into());
        }
    }

    fn validate_groups(&self, errors: &mut Vec<String>) {
        let mut seen_names: HashSet<&str> = HashSet::new();
        let followers: HashSet<&str> = self
            .groups
            .iter()
            .filter(|g| g.follow.is_some())
            .map(|g| g.name.as_str())
            .collect();
        let names: HashSet<&str> = self.groups.iter().map(|g| g.name.as_str()).collect();

        for (i, g) in self.groups.iter().enumerate() {
            let ctx = || {
                if g.name.is_empty() {
                    format!("groups[{i}]")
                } else {
                    format!("group '{}'", g.name)
                }
            };

            // ── Identity ────────────────────────────────────────
            if g.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen_names.insert(&g.name) {
                errors.push(format!("{}: duplicate group name", ctx()));
            }

            // ── Members ─────────────────────────────────────────
            if g.devices.is_empty() {
                errors.push(format!("{}: devices list is empty", ctx()));
            }
            for d in &g.devices {
                if d.trim().is_empty() || d.contains(['/', '+', '#']) {
                    errors.push(format!("{}: '{d}' is not a valid device name", ctx()));
                }
            }

            // ── Follow policy ───────────────────────────────────
            if let Some(leader) = &g.follow {
                if leader == &g.name {
                    errors.push(format!("{}: cannot follow itself", ctx()));
                } else if !names.contains(leader.as_str()) {
                    errors.push(format!(
                        "{}: follow '{leader}' does not match any defined group",
                        ctx()
                    ));
                } else if followers.contains(leader.as_str()) {
                    errors.push(format!(
                        "{}: follow '{leader}' is itself a follower",
                        ctx()
                    ));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Derived settings
// ---------------------------------------------------------------------------

impl Config {
    /// Override selected keys from the environment (`MQTT_HOST`,
    /// `MQTT_PORT`, `DB_URL`, `WEB_PORT`). Unparseable ports are ignored with
    /// a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            match port.parse() {
                Ok(p) => self.mqtt.port = p,
                Err(_) => warn!(value = %port, "ignoring invalid MQTT_PORT"),
            }
        }
        if let Some(url) = lookup("DB_URL") {
            self.database = url;
        }
        if let Some(port) = lookup("WEB_PORT") {
            match port.parse() {
                Ok(p) => self.web.port = p,
                Err(_) => warn!(value = %port, "ignoring invalid WEB_PORT"),
            }
        }
    }

    /// Configured timezone, else the city's zone, else UTC.
    pub fn tz(&self) -> Tz {
        self.timezone
            .as_deref()
            .and_then(|s| s.parse().ok())
            .or_else(|| solar::lookup_city(&self.city).and_then(|c| c.tz()))
            .unwrap_or(Tz::UTC)
    }

    /// Build runtime device groups. Lenient values are normalised with a
    /// warning: brightness is clamped, malformed times fall back to
    /// 18:00 / 23:59, and brightness on outlets is ignored.
    pub fn device_groups(&self) -> Vec<DeviceGroup> {
        self.groups.iter().map(normalise_group).collect()
    }
}

fn normalise_group(entry: &GroupEntry) -> DeviceGroup {
    let mut g = DeviceGroup::new(&entry.name, entry.kind, entry.devices.clone());

    match (entry.kind, entry.brightness) {
        (DeviceKind::Bulbs, Some(raw)) => {
            let (level, clamped) = Brightness::clamped(raw);
            if clamped {
                warn!(group = %entry.name, raw, used = level.value(), "brightness out of range, clamped");
            }
            g.brightness = level;
        }
        (DeviceKind::Outlets, Some(_)) => {
            warn!(group = %entry.name, "brightness ignored for outlet group");
        }
        (_, None) => {}
    }

    g.on_mode = entry.on_mode;
    g.on_time = parse_time_or(&entry.name, "on_time", entry.on_time.as_deref(), DEFAULT_ON_TIME);
    g.off_mode = entry.off_mode;
    g.off_time = parse_time_or(&entry.name, "off_time", entry.off_time.as_deref(), DEFAULT_OFF_TIME);
    g.timer_enabled = entry.timer;
    g.follow = entry.follow.clone();
    g
}

fn parse_time_or(group: &str, key: &str, raw: Option<&str>, fallback: ClockTime) -> ClockTime {
    let Some(raw) = raw else {
        return fallback;
    };
    raw.parse().unwrap_or_else(|e| {
        warn!(group = %group, key, error = %e, used = %fallback, "invalid time, using default");
        fallback
    })
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, override from the environment, and validate a TOML config
/// file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let mut config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // -- Helper: build a valid baseline config that passes validation ------

    fn valid_group(name: &str) -> GroupEntry {
        GroupEntry {
            name: name.into(),
            kind: DeviceKind::Bulbs,
            devices: vec![format!("{name}-1")],
            brightness: None,
            on_mode: ScheduleMode::Dusk,
            on_time: None,
            off_mode: ScheduleMode::Fixed,
            off_time: Some("23:00".into()),
            timer: true,
            follow: None,
        }
    }

    fn valid_config() -> Config {
        let mut cfg: Config = toml::from_str("").unwrap();
        cfg.sensors = vec!["basement".into(), "attic".into()];
        cfg.groups = vec![valid_group("porch")];
        cfg
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
city = "Grand Rapids"
timezone = "America/Detroit"
sample_period_sec = 600
sensors = ["basement", "laundry"]

[mqtt]
host = "broker.local"
base_topic = "z2m"

[mail]
sender = "pi@home"
recipient = "me@example.com"
smtp_server = "localhost"

[alarms]
low_temp_threshold = 12.5
leak_samples = 3

[float_switch]
gpio_pin = 17

[[groups]]
name = "porch"
kind = "bulbs"
devices = ["porch-1", "porch-2"]
brightness = 200
on_mode = "dusk"
off_mode = "fixed"
off_time = "23:30"

[[groups]]
name = "tree"
kind = "outlets"
devices = ["tree-plug"]
follow = "porch"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.city, "Grand Rapids");
        assert_eq!(config.sample_period_sec, 600);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.base_topic, "z2m");
        assert!(config.mail.enabled());
        assert_eq!(config.alarms.low_temp_threshold, 12.5);
        assert_eq!(config.alarms.high_humidity_threshold, 85.0);
        assert_eq!(config.alarms.leak_samples, 3);
        let fs = config.float_switch.as_ref().unwrap();
        assert_eq!((fs.gpio_pin, fs.samples, fs.poll_ms, fs.active_low), (17, 5, 1000, true));
        assert_eq!(config.groups.len(), 2);
        assert_eq!(config.groups[1].follow.as_deref(), Some("porch"));
        assert_eq!(config.groups[1].on_mode, ScheduleMode::Fixed);
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.city, "Detroit");
        assert_eq!(config.sample_period_sec, 300);
        assert_eq!(config.mqtt.base_topic, "zigbee2mqtt");
        assert_eq!(config.web.port, 8080);
        assert!(!config.mail.enabled());
        assert!(config.float_switch.is_none());
        assert!(config.groups.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let toml_str = r#"
[[groups]]
name = "porch"
kind = "bulbs"
devices = ["p1"]
on_mode = "sunset"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let toml_str = r#"
[[groups]]
name = "porch"
kind = "switches"
devices = ["p1"]
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    // -- Validation: valid configs pass -----------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn follower_group_passes() {
        let mut cfg = valid_config();
        let mut tree = valid_group("tree");
        tree.kind = DeviceKind::Outlets;
        tree.follow = Some("porch".into());
        cfg.groups.push(tree);
        cfg.validate().unwrap();
    }

    // -- Validation: rejections -------------------------------------------

    #[test]
    fn group_empty_name_rejected() {
        let mut cfg = valid_config();
        cfg.groups[0].name = "".into();
        assert_validation_err(&cfg, "name is empty");
    }

    #[test]
    fn group_duplicate_name_rejected() {
        let mut cfg = valid_config();
        cfg.groups.push(valid_group("porch"));
        assert_validation_err(&cfg, "duplicate group name");
    }

    #[test]
    fn group_empty_devices_rejected() {
        let mut cfg = valid_config();
        cfg.groups[0].devices.clear();
        assert_validation_err(&cfg, "devices list is empty");
    }

    #[test]
    fn group_device_with_slash_rejected() {
        let mut cfg = valid_config();
        cfg.groups[0].devices = vec!["a/b".into()];
        assert_validation_err(&cfg, "not a valid device name");
    }

    #[test]
    fn follow_self_rejected() {
        let mut cfg = valid_config();
        cfg.groups[0].follow = Some("porch".into());
        assert_validation_err(&cfg, "cannot follow itself");
    }

    #[test]
    fn follow_unknown_rejected() {
        let mut cfg = valid_config();
        cfg.groups[0].follow = Some("garage".into());
        assert_validation_err(&cfg, "does not match any defined group");
    }

    #[test]
    fn follow_chain_rejected() {
        let mut cfg = valid_config();
        let mut a = valid_group("a");
        a.follow = Some("porch".into());
        let mut b = valid_group("b");
        b.follow = Some("a".into());
        cfg.groups.extend([a, b]);
        assert_validation_err(&cfg, "is itself a follower");
    }

    #[test]
    fn zero_sample_period_rejected() {
        let mut cfg = valid_config();
        cfg.sample_period_sec = 0;
        assert_validation_err(&cfg, "sample_period_sec must be positive");
    }

    #[test]
    fn unknown_timezone_rejected() {
        let mut cfg = valid_config();
        cfg.timezone = Some("Mars/Olympus".into());
        assert_validation_err(&cfg, "not a known IANA zone");
    }

    #[test]
    fn zero_hysteresis_rejected() {
        let mut cfg = valid_config();
        cfg.alarms.humidity_hysteresis = 0.0;
        assert_validation_err(&cfg, "alarms.humidity_hysteresis must be positive");
    }

    #[test]
    fn nan_hysteresis_rejected() {
        let mut cfg = valid_config();
        cfg.alarms.temperature_hysteresis = f64::NAN;
        assert_validation_err(&cfg, "alarms.temperature_hysteresis must be positive");
    }

    #[test]
    fn zero_leak_samples_rejected() {
        let mut cfg = valid_config();
        cfg.alarms.leak_samples = 0;
        assert_validation_err(&cfg, "alarms.leak_samples must be positive");
    }

    #[test]
    fn duplicate_sensor_rejected() {
        let mut cfg = valid_config();
        cfg.sensors.push("attic".into());
        assert_validation_err(&cfg, "duplicate sensor 'attic'");
    }

    #[test]
    fn wildcard_sensor_rejected() {
        let mut cfg = valid_config();
        cfg.sensors.push("#".into());
        assert_validation_err(&cfg, "not a valid sensor name");
    }

    #[test]
    fn mail_without_server_rejected() {
        let mut cfg = valid_config();
        cfg.mail.recipient = "me@example.com".into();
        cfg.mail.sender = "pi@home".into();
        assert_validation_err(&cfg, "mail.smtp_server is empty");
    }

    #[test]
    fn float_switch_reserved_pin_rejected() {
        let mut cfg = valid_config();
        cfg.float_switch = Some(FloatSwitchConfig {
            gpio_pin: 1,
            samples: 5,
            poll_ms: 1000,
            active_low: true,
        });
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.sample_period_sec = 0;
        cfg.groups[0].devices.clear();
        cfg.alarms.battery_samples = 0;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "got: {msg}");
    }

    // -- Overrides ----------------------------------------------------------

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("MQTT_HOST", "10.0.0.2"),
            ("MQTT_PORT", "8883"),
            ("DB_URL", "sqlite::memory:"),
            ("WEB_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();
        let mut cfg = valid_config();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.mqtt.host, "10.0.0.2");
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.database, "sqlite::memory:");
        assert_eq!(cfg.web.port, 8080);
    }

    // -- Derived settings -------------------------------------------------

    #[test]
    fn tz_defaults_to_city_zone() {
        let mut cfg = valid_config();
        assert_eq!(cfg.tz(), chrono_tz::America::Detroit);
        cfg.city = "London".into();
        assert_eq!(cfg.tz(), chrono_tz::Europe::London);
        cfg.timezone = Some("Asia/Tokyo".into());
        assert_eq!(cfg.tz(), chrono_tz::Asia::Tokyo);
        cfg.timezone = None;
        cfg.city = "Atlantis".into();
        assert_eq!(cfg.tz(), Tz::UTC);
    }

    #[test]
    fn device_groups_normalise_values() {
        let mut cfg = valid_config();
        cfg.groups[0].brightness = Some(400);
        cfg.groups[0].on_time = Some("25:99".into());
        cfg.groups[0].off_time = Some("".into());
        let mut tree = valid_group("tree");
        tree.kind = DeviceKind::Outlets;
        tree.brightness = Some(10);
        tree.timer = false;
        cfg.groups.push(tree);

        let groups = cfg.device_groups();
        assert_eq!(groups[0].brightness, Brightness::MAX);
        assert_eq!(groups[0].on_time, DEFAULT_ON_TIME);
        assert_eq!(groups[0].off_time, DEFAULT_OFF_TIME);
        assert_eq!(groups[0].on_mode, ScheduleMode::Dusk);
        assert_eq!(groups[1].brightness, Brightness::MAX);
        assert!(!groups[1].timer_enabled);
    }

    #[test]
    fn device_groups_keep_valid_times() {
        let cfg = valid_config();
        let groups = cfg.device_groups();
        assert_eq!(groups[0].off_time.to_string(), "23:00");
        assert!(!groups[0].state);
    }

    #[test]
    fn load_reads_file() {
        let dir = std::env::temp_dir().join(format!("pihome-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pi-home.toml");
        std::fs::write(&path, "city = \"Toronto\"\nsensors = [\"basement\"]\n").unwrap();
        let cfg = load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.city, "Toronto");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(load("/nonexistent/pi-home.toml").is_err());
    }
}
