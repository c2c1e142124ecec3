//! In-memory GPIO for machines without hardware.
//!
//! Outputs record every level they are driven to; inputs are fed through
//! [`SimulatedGpio::inject_edge`] or a synthetic S0 pulse train.

use super::{EdgeHandler, GpioProvider, Level, OutputLine, Polarity, Pull};
use crate::error::GpioError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Width of a synthetic S0 pulse.
const SIMULATED_PULSE_WIDTH: Duration = Duration::from_millis(80);

#[derive(Default)]
struct SimState {
    outputs: HashMap<u8, Vec<Level>>,
    inputs: HashMap<u8, EdgeHandler>,
}

/// Cloning yields another handle onto the same simulated chip.
#[derive(Clone, Default)]
pub struct SimulatedGpio {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every level an output has been driven to, starting with its initial level.
    pub fn history(&self, pin: u8) -> Vec<Level> {
        self.lock().outputs.get(&pin).cloned().unwrap_or_default()
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        self.lock().outputs.get(&pin).and_then(|h| h.last().copied())
    }

    /// Number of times `pin` was driven to `level` from the opposite level.
    pub fn transitions_to(&self, pin: u8, level: Level) -> usize {
        self.history(pin)
            .windows(2)
            .filter(|w| w[0] != level && w[1] == level)
            .count()
    }

    /// Deliver an edge to the handler watching `pin`. Returns false if nobody watches it.
    pub fn inject_edge(&self, pin: u8, level: Level, at: Instant) -> bool {
        let mut state = self.lock();
        match state.inputs.get_mut(&pin) {
            Some(handler) => {
                handler(level, at);
                true
            }
            None => false,
        }
    }

    /// Drive `pin` with an endless pulse train equivalent to a constant load
    /// of `power_w`, one pulse per `wh_per_pulse`.
    pub fn spawn_pulse_train(
        &self,
        pin: u8,
        polarity: Polarity,
        power_w: f64,
        wh_per_pulse: f64,
    ) -> JoinHandle<()> {
        let gpio = self.clone();
        let period = Duration::from_secs_f64(3600.0 * wh_per_pulse / power_w.max(1.0));
        let idle = period.saturating_sub(SIMULATED_PULSE_WIDTH);
        debug!(pin, power_w, period_ms = period.as_millis() as u64, "starting simulated pulse train");

        std::thread::spawn(move || loop {
            gpio.inject_edge(pin, polarity.active_level(), Instant::now());
            std::thread::sleep(SIMULATED_PULSE_WIDTH);
            gpio.inject_edge(pin, polarity.idle_level(), Instant::now());
            std::thread::sleep(idle);
        })
    }
}

impl GpioProvider for SimulatedGpio {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn output(&mut self, pin: u8, initial: Level) -> Result<Box<dyn OutputLine>, GpioError> {
        let mut state = self.lock();
        if state.outputs.contains_key(&pin) || state.inputs.contains_key(&pin) {
            return Err(GpioError::PinBusy(pin));
        }
        state.outputs.insert(pin, vec![initial]);
        debug!(pin, ?initial, "simulated output provisioned");

        Ok(Box::new(SimulatedOutput {
            pin,
            gpio: self.clone(),
        }))
    }

    fn watch_input(&mut self, pin: u8, pull: Pull, handler: EdgeHandler) -> Result<(), GpioError> {
        let mut state = self.lock();
        if state.outputs.contains_key(&pin) || state.inputs.contains_key(&pin) {
            return Err(GpioError::PinBusy(pin));
        }
        state.inputs.insert(pin, handler);
        debug!(pin, ?pull, "simulated input provisioned");
        Ok(())
    }
}

struct SimulatedOutput {
    pin: u8,
    gpio: SimulatedGpio,
}

impl OutputLine for SimulatedOutput {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn set_level(&mut self, level: Level) -> Result<(), GpioError> {
        trace!(pin = self.pin, ?level, "simulated output");
        self.gpio
            .lock()
            .outputs
            .entry(self.pin)
            .or_default()
            .push(level);
        Ok(())
    }
}
