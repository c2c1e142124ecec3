//! Controller configuration.
//!
//! Every field has a default matching the reference installation, so an
//! empty JSON object (or no file at all) is a complete configuration.
//! Durations are milliseconds on the wire.

use crate::actuator::{ActuatorPins, ActuatorTiming};
use crate::control::ControlConfig;
use crate::error::ConfigError;
use crate::hal::{GpioBackend, Polarity};
use crate::meter::MeterSettings;
use crate::receiver::MulticastConfig;
use crate::safety::ThermalLimits;
use crate::schedule::OperatingWindow;
use crate::sensor::W1Config;
use crate::status::StatusConfig;
use crate::telegram::TelegramLimits;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub backend: GpioBackend,
    pub power_pin: u8,
    pub increase_pin: u8,
    pub decrease_pin: u8,
    pub meter_pin: u8,
    pub output_polarity: Polarity,
    pub pulse_polarity: Polarity,
}

impl Default for GpioConfig {
    fn default() -> Self {
        let pins = ActuatorPins::default();
        Self {
            backend: GpioBackend::Simulated,
            power_pin: pins.power,
            increase_pin: pins.increase,
            decrease_pin: pins.decrease,
            meter_pin: 13,
            output_polarity: Polarity::ActiveLow,
            pulse_polarity: Polarity::ActiveLow,
        }
    }
}

impl GpioConfig {
    pub fn actuator_pins(&self) -> ActuatorPins {
        ActuatorPins {
            power: self.power_pin,
            increase: self.increase_pin,
            decrease: self.decrease_pin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub step_up_ms: u64,
    pub step_down_ms: u64,
    pub settle_ms: u64,
    pub reset_multiplier: u32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        let timing = ActuatorTiming::default();
        Self {
            step_up_ms: timing.step_up.as_millis() as u64,
            step_down_ms: timing.step_down.as_millis() as u64,
            settle_ms: timing.settle.as_millis() as u64,
            reset_multiplier: timing.reset_multiplier,
        }
    }
}

impl ActuatorConfig {
    pub fn timing(&self) -> ActuatorTiming {
        ActuatorTiming {
            step_up: Duration::from_millis(self.step_up_ms),
            step_down: Duration::from_millis(self.step_down_ms),
            settle: Duration::from_millis(self.settle_ms),
            reset_multiplier: self.reset_multiplier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub wh_per_pulse: f64,
    pub min_pulse_width_ms: u64,
    pub max_pulse_width_ms: u64,
    pub min_pulse_gap_ms: u64,
    pub max_pulse_gap_ms: u64,
    pub max_power_w: f64,
    /// Simulated back-end only: feed the meter input with a constant load.
    pub simulated_load_w: Option<f64>,
}

impl Default for MeterConfig {
    fn default() -> Self {
        let settings = MeterSettings::default();
        Self {
            wh_per_pulse: settings.wh_per_pulse,
            min_pulse_width_ms: settings.min_pulse_width.as_millis() as u64,
            max_pulse_width_ms: settings.max_pulse_width.as_millis() as u64,
            min_pulse_gap_ms: settings.min_pulse_gap.as_millis() as u64,
            max_pulse_gap_ms: settings.max_pulse_gap.as_millis() as u64,
            max_power_w: settings.max_power_w,
            simulated_load_w: None,
        }
    }
}

impl MeterConfig {
    pub fn settings(&self) -> MeterSettings {
        MeterSettings {
            wh_per_pulse: self.wh_per_pulse,
            min_pulse_width: Duration::from_millis(self.min_pulse_width_ms),
            max_pulse_width: Duration::from_millis(self.max_pulse_width_ms),
            min_pulse_gap: Duration::from_millis(self.min_pulse_gap_ms),
            max_pulse_gap: Duration::from_millis(self.max_pulse_gap_ms),
            max_power_w: self.max_power_w,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    pub limits: ThermalLimits,
    pub sensor: W1Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub multicast: MulticastConfig,
    pub limits: TelegramLimits,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub gpio: GpioConfig,
    pub actuator: ActuatorConfig,
    pub meter: MeterConfig,
    pub control: ControlConfig,
    pub schedule: OperatingWindow,
    pub thermal: ThermalConfig,
    pub telegram: TelegramConfig,
    pub status: StatusConfig,
}

impl ControllerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings. Nothing is clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |what| Err(ConfigError::Invalid(what));

        let pins = [
            self.gpio.power_pin,
            self.gpio.increase_pin,
            self.gpio.decrease_pin,
            self.gpio.meter_pin,
        ];
        if pins.iter().enumerate().any(|(i, pin)| pins[i + 1..].contains(pin)) {
            return invalid("GPIO pins must be distinct");
        }

        let a = &self.actuator;
        if a.step_up_ms == 0 || a.step_down_ms == 0 {
            return invalid("actuator step durations must be non-zero");
        }
        if a.reset_multiplier == 0 {
            return invalid("actuator reset multiplier must be at least 1");
        }

        let m = &self.meter;
        if !positive(m.wh_per_pulse) {
            return invalid("meter energy per pulse must be positive");
        }
        if !positive(m.max_power_w) {
            return invalid("meter max power must be positive");
        }
        if m.min_pulse_width_ms >= m.max_pulse_width_ms {
            return invalid("meter min pulse width must be below max pulse width");
        }
        if m.min_pulse_gap_ms >= m.max_pulse_gap_ms {
            return invalid("meter min pulse gap must be below max pulse gap");
        }
        if matches!(m.simulated_load_w, Some(load) if !positive(load)) {
            return invalid("simulated load must be positive");
        }

        let c = &self.control;
        if c.tick_ms == 0 || c.night_sleep_ms == 0 || c.cutoff_sleep_ms == 0 {
            return invalid("control loop intervals must be non-zero");
        }
        if c.heartbeat_every_ticks == 0 {
            return invalid("heartbeat interval must be at least one tick");
        }
        if c.up_threshold_w.partial_cmp(&c.down_threshold_w) != Some(Ordering::Greater) {
            return invalid("up threshold must be above down threshold");
        }

        if self.schedule.is_empty() {
            return invalid("operating window is empty");
        }

        let t = &self.thermal.limits;
        if t.resume_c.partial_cmp(&t.cutoff_c) != Some(Ordering::Less) {
            return invalid("thermal resume threshold must be below cutoff threshold");
        }
        if t.poll_every_ticks == 0 {
            return invalid("thermal poll interval must be at least one tick");
        }

        if self.telegram.multicast.timeout_ms == 0 {
            return invalid("telegram receive timeout must be non-zero");
        }
        if !self.telegram.multicast.group.is_multicast() {
            return invalid("telegram group must be a multicast address");
        }
        if !positive(self.telegram.limits.max_surplus_w) {
            return invalid("implausibility bound must be positive");
        }

        Ok(())
    }
}

/// False for NaN as well.
fn positive(value: f64) -> bool {
    value > 0.0
}
