//! # Surplus Heater
//!
//! Closed-loop controller that feeds surplus photovoltaic power into a water
//! heater. The utility energy meter broadcasts its readings as binary
//! telegrams; whenever more power is exported than imported, a motorised
//! heating-element actuator is stepped up, and stepped down again when the
//! house starts importing.
//!
//! ## Features
//!
//! - **Telegram decoding**: data-driven, big-endian field table with
//!   plausibility checks on every frame
//! - **Open-loop actuator model**: discrete position estimate anchored by a
//!   mandatory reset, timed relay pulses through a GPIO capability
//! - **Pulse energy meter**: debounced S0 pulse counting with lock-free
//!   snapshot reads and a staleness-capped power estimate
//! - **Safety**: operating window, thermal cutoff with hysteresis, and a
//!   reset to zero on any loss of telegrams
//! - **Status**: JSON over HTTP, plus the `heatctl` client
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use surplus_heater::actuator::{ActuatorPins, ActuatorTiming, HeaterActuator};
//! use surplus_heater::clock::SystemClock;
//! use surplus_heater::hal::{Polarity, SimulatedGpio};
//! use surplus_heater::meter::{pulse_meter, MeterSettings};
//! use surplus_heater::receiver::{MulticastConfig, MulticastReceiver};
//! use surplus_heater::sensor::NoSensor;
//! use surplus_heater::ControlLoop;
//!
//! let clock = Arc::new(SystemClock);
//! let mut gpio = SimulatedGpio::new();
//! let actuator = HeaterActuator::provision(
//!     &mut gpio,
//!     ActuatorPins::default(),
//!     Polarity::ActiveLow,
//!     ActuatorTiming::default(),
//!     clock.clone(),
//! )?;
//! let (_recorder, meter) = pulse_meter(MeterSettings::default(), Polarity::ActiveLow);
//! let receiver = MulticastReceiver::bind(&MulticastConfig::default())?;
//!
//! let mut control = ControlLoop::new(actuator, Box::new(receiver), Box::new(NoSensor), meter, clock);
//! control.startup()?;
//! control.run();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`telegram`] - Telegram layout and decoder
//! - [`actuator`] - Heating-element actuator
//! - [`meter`] - Pulse energy meter
//! - [`control`] - The control loop
//! - [`safety`] - Thermal guard
//! - [`schedule`] - Operating window
//! - [`hal`] - Digital I/O capability and back-ends
//! - [`receiver`], [`sensor`], [`clock`] - I/O collaborators
//! - [`status`] - Status snapshot and HTTP endpoint
//! - [`config`] - Configuration file

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

pub mod actuator;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod hal;
pub mod meter;
pub mod receiver;
pub mod safety;
pub mod schedule;
pub mod sensor;
pub mod status;
pub mod telegram;

// Re-export main public types for convenience
pub use actuator::HeaterActuator;
pub use config::ControllerConfig;
pub use control::{ControlLoop, TickKind, TickOutcome};
pub use meter::{pulse_meter, MeterReader, PulseRecorder};
pub use telegram::{decode, DecodedTelegram, Telegram};
