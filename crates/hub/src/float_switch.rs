//! Sump float switch on a GPIO input. The `gpio` feature gates the real
//! rppal driver; without it, a mock switch holds a level set in software.

use anyhow::Result;
use tracing::info;

use crate::config::FloatSwitchConfig;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin, Level};

// ---------------------------------------------------------------------------
// Real GPIO input (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct FloatSwitch {
    pin: InputPin,
    active_low: bool, // switch pulls the line to ground when the float rises
}

#[cfg(feature = "gpio")]
impl FloatSwitch {
    pub(crate) fn new(cfg: &FloatSwitchConfig) -> Result<Self> {
        let gpio = Gpio::new()?;
        // Pin range is checked by config validation.
        let pin = gpio.get(cfg.gpio_pin as u8)?;
        let pin = if cfg.active_low {
            pin.into_input_pullup()
        } else {
            pin.into_input_pulldown()
        };
        info!(pin = cfg.gpio_pin, active_low = cfg.active_low, "float switch ready");
        Ok(Self {
            pin,
            active_low: cfg.active_low,
        })
    }

    /// True when the water level is high.
    pub(crate) fn read(&self) -> bool {
        let active = if self.active_low { Level::Low } else { Level::High };
        self.pin.read() == active
    }
}

// ---------------------------------------------------------------------------
// Mock float switch (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct FloatSwitch {
    high: std::sync::atomic::AtomicBool,
}

#[cfg(not(feature = "gpio"))]
impl FloatSwitch {
    pub(crate) fn new(cfg: &FloatSwitchConfig) -> Result<Self> {
        info!(pin = cfg.gpio_pin, "[mock-gpio] float switch registered (not wired)");
        Ok(Self {
            high: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub(crate) fn read(&self) -> bool {
        self.high.load(std::sync::atomic::Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn set_level(&self, high: bool) {
        self.high.store(high, std::sync::atomic::Ordering::Relaxed);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn cfg() -> FloatSwitchConfig {
        FloatSwitchConfig {
            gpio_pin: 17,
            samples: 5,
            poll_ms: 1000,
            active_low: true,
        }
    }

    #[test]
    fn mock_starts_low() {
        let sw = FloatSwitch::new(&cfg()).unwrap();
        assert!(!sw.read());
    }

    #[test]
    fn mock_reports_set_level() {
        let sw = FloatSwitch::new(&cfg()).unwrap();
        sw.set_level(true);
        assert!(sw.read());
        sw.set_level(false);
        assert!(!sw.read());
    }
}
