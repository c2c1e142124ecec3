//! Digital I/O capability.
//!
//! The controller only ever needs two things from the platform: output lines
//! it can drive high or low, and input lines that report edges. Back-ends are
//! chosen by configuration through [`open`].

pub mod raspberry;
pub mod simulated;

pub use simulated::SimulatedGpio;

use crate::error::GpioError;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn inverted(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pull {
    Up,
    Down,
    Off,
}

/// Which line level a device asserts while it signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    ActiveLow,
    ActiveHigh,
}

impl Polarity {
    pub fn active_level(self) -> Level {
        match self {
            Polarity::ActiveLow => Level::Low,
            Polarity::ActiveHigh => Level::High,
        }
    }

    pub fn idle_level(self) -> Level {
        self.active_level().inverted()
    }

    /// Input bias that holds the line idle while the device is silent.
    pub fn idle_pull(self) -> Pull {
        match self {
            Polarity::ActiveLow => Pull::Up,
            Polarity::ActiveHigh => Pull::Down,
        }
    }
}

pub trait OutputLine: Send {
    fn pin(&self) -> u8;

    fn set_level(&mut self, level: Level) -> Result<(), GpioError>;

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.set_level(Level::High)
    }

    fn set_low(&mut self) -> Result<(), GpioError> {
        self.set_level(Level::Low)
    }
}

/// Called from the back-end's notification context on every input edge,
/// with the new level and the instant it was observed.
pub type EdgeHandler = Box<dyn FnMut(Level, Instant) + Send + 'static>;

pub trait GpioProvider: Send {
    fn name(&self) -> &'static str;

    /// Claim `pin` as an output, driven to `initial` immediately.
    fn output(&mut self, pin: u8, initial: Level) -> Result<Box<dyn OutputLine>, GpioError>;

    /// Claim `pin` as an input and deliver its edges to `handler` for the
    /// lifetime of the provider.
    fn watch_input(&mut self, pin: u8, pull: Pull, handler: EdgeHandler) -> Result<(), GpioError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioBackend {
    Simulated,
    Raspberry,
}

impl std::str::FromStr for GpioBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simulated" | "sim" => Ok(GpioBackend::Simulated),
            "raspberry" | "rpi" => Ok(GpioBackend::Raspberry),
            other => Err(format!("unknown GPIO backend '{other}'")),
        }
    }
}

pub fn open(backend: GpioBackend) -> Result<Box<dyn GpioProvider>, GpioError> {
    match backend {
        GpioBackend::Simulated => Ok(Box::new(SimulatedGpio::new())),
        GpioBackend::Raspberry => raspberry::open(),
    }
}
