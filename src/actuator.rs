//! Motorised heating-element actuator.
//!
//! The element's output is set by holding an "increase" or "decrease" relay
//! for a fixed time per step. Nothing reports the real position back, so the
//! position here is a software estimate that is only trustworthy right after
//! [`HeaterActuator::reset_to_zero`] has driven the mechanism into its floor.
//!
//! Every operation blocks for the full duration of the physical pulse. The
//! actuator holds no lock; its single owner serialises calls.

use crate::clock::Clock;
use crate::error::GpioError;
use crate::hal::{GpioProvider, Level, OutputLine, Polarity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Fully retracted: element off.
pub const MIN_POSITION: i8 = -1;
/// Fully extended: maximum output.
pub const MAX_POSITION: i8 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorPins {
    pub power: u8,
    pub increase: u8,
    pub decrease: u8,
}

impl Default for ActuatorPins {
    fn default() -> Self {
        Self {
            power: 22,
            increase: 27,
            decrease: 17,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorTiming {
    pub step_up: Duration,
    // Slightly longer than a step up; the mechanism is slower going down.
    pub step_down: Duration,
    pub settle: Duration,
    /// Reset holds "decrease" for this many step-down durations.
    pub reset_multiplier: u32,
}

impl Default for ActuatorTiming {
    fn default() -> Self {
        Self {
            step_up: Duration::from_millis(1500),
            step_down: Duration::from_millis(1600),
            settle: Duration::from_millis(500),
            reset_multiplier: 11,
        }
    }
}

impl ActuatorTiming {
    pub fn reset_pulse(&self) -> Duration {
        self.step_down * self.reset_multiplier
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A pulse was issued; carries the new position.
    Moved(i8),
    /// Already at the end of travel in that direction; no pulse issued.
    AtLimit,
    /// Position unknown; no pulse issued until the next reset.
    Unanchored,
}

pub struct HeaterActuator {
    power: Box<dyn OutputLine>,
    increase: Box<dyn OutputLine>,
    decrease: Box<dyn OutputLine>,
    polarity: Polarity,
    timing: ActuatorTiming,
    clock: Arc<dyn Clock>,
    position: Option<i8>,
}

impl HeaterActuator {
    /// Claim the three relay outputs, all released.
    pub fn provision(
        gpio: &mut dyn GpioProvider,
        pins: ActuatorPins,
        polarity: Polarity,
        timing: ActuatorTiming,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GpioError> {
        let idle = polarity.idle_level();
        let power = gpio.output(pins.power, idle)?;
        let increase = gpio.output(pins.increase, idle)?;
        let decrease = gpio.output(pins.decrease, idle)?;
        info!(
            backend = gpio.name(),
            power = pins.power,
            increase = pins.increase,
            decrease = pins.decrease,
            "actuator outputs provisioned"
        );

        Ok(Self {
            power,
            increase,
            decrease,
            polarity,
            timing,
            clock,
            position: None,
        })
    }

    /// Estimated position, `None` until the first reset.
    pub fn position(&self) -> Option<i8> {
        self.position
    }

    pub fn timing(&self) -> &ActuatorTiming {
        &self.timing
    }

    pub fn up(&mut self) -> Result<StepOutcome, GpioError> {
        let Some(position) = self.position else {
            warn!("refusing to step up: position unknown");
            return Ok(StepOutcome::Unanchored);
        };
        if position >= MAX_POSITION {
            return Ok(StepOutcome::AtLimit);
        }

        self.pulse(Direction::Up, self.timing.step_up)?;
        let position = position + 1;
        self.position = Some(position);
        debug!(position, "stepped up");
        Ok(StepOutcome::Moved(position))
    }

    pub fn down(&mut self) -> Result<StepOutcome, GpioError> {
        let Some(position) = self.position else {
            warn!("refusing to step down: position unknown");
            return Ok(StepOutcome::Unanchored);
        };
        if position <= MIN_POSITION {
            return Ok(StepOutcome::AtLimit);
        }

        self.pulse(Direction::Down, self.timing.step_down)?;
        let position = position - 1;
        self.position = Some(position);
        debug!(position, "stepped down");
        Ok(StepOutcome::Moved(position))
    }

    /// Drive into the floor regardless of the current estimate and anchor at
    /// [`MIN_POSITION`].
    pub fn reset_to_zero(&mut self) -> Result<(), GpioError> {
        let hold = self.timing.reset_pulse();
        info!(previous = ?self.position, hold_ms = hold.as_millis() as u64, "resetting actuator to zero");
        self.pulse(Direction::Down, hold)?;
        self.position = Some(MIN_POSITION);
        Ok(())
    }

    /// Forget the estimate; the next movement requires a reset first.
    pub fn invalidate(&mut self) {
        self.position = None;
    }

    fn pulse(&mut self, direction: Direction, hold: Duration) -> Result<(), GpioError> {
        let active = self.polarity.active_level();
        let idle = self.polarity.idle_level();
        let line = match direction {
            Direction::Up => &mut self.increase,
            Direction::Down => &mut self.decrease,
        };

        let result = drive(line.as_mut(), active, idle, hold, self.clock.as_ref());
        if let Err(e) = &result {
            error!(pin = line.pin(), ?direction, "actuation pulse failed: {}", e);
            self.invalidate();
            return result;
        }
        self.clock.sleep(self.timing.settle);
        result
    }
}

fn drive(
    line: &mut dyn OutputLine,
    active: Level,
    idle: Level,
    hold: Duration,
    clock: &dyn Clock,
) -> Result<(), GpioError> {
    line.set_level(active)?;
    clock.sleep(hold);
    line.set_level(idle)
}

impl Drop for HeaterActuator {
    fn drop(&mut self) {
        let idle = self.polarity.idle_level();
        for line in [&mut self.increase, &mut self.decrease, &mut self.power] {
            if let Err(e) = line.set_level(idle) {
                warn!(pin = line.pin(), "failed to release output on shutdown: {}", e);
            }
        }
    }
}
