//! The control loop.
//!
//! One tick, strictly in order:
//!
//! 1. schedule guard: outside the operating window the heater is parked once
//!    and the loop idles on a long sleep;
//! 2. thermal guard: every Nth tick the tank temperature is read; while cut
//!    off nothing is actuated;
//! 3. the newest telegram is received, decoded and checked for plausibility;
//! 4. the surplus is compared against the hysteresis band and the actuator
//!    stepped at most once;
//! 5. every Mth tick a heartbeat is logged.
//!
//! Ticks never overlap: the caller sleeps for [`TickOutcome::sleep`] after
//! each one, and actuation blocks inside the tick.

use crate::actuator::{Direction, HeaterActuator, StepOutcome};
use crate::clock::Clock;
use crate::error::{GpioError, ProtocolError};
use crate::meter::MeterReader;
use crate::receiver::TelegramSource;
use crate::safety::{ThermalEvent, ThermalGuard, ThermalLimits};
use crate::schedule::OperatingWindow;
use crate::sensor::TemperatureSensor;
use crate::telegram::{self, TelegramLimits};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub tick_ms: u64,
    pub night_sleep_ms: u64,
    pub cutoff_sleep_ms: u64,
    pub heartbeat_every_ticks: u32,
    /// Step up while the surplus is above this.
    pub up_threshold_w: f64,
    /// Step down while the surplus is below this.
    pub down_threshold_w: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_ms: 5_000,
            night_sleep_ms: 60_000,
            cutoff_sleep_ms: 10_000,
            heartbeat_every_ticks: 60,
            up_threshold_w: 150.0,
            down_threshold_w: 0.0,
        }
    }
}

impl ControlConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn night_sleep(&self) -> Duration {
        Duration::from_millis(self.night_sleep_ms)
    }

    pub fn cutoff_sleep(&self) -> Duration {
        Duration::from_millis(self.cutoff_sleep_ms)
    }
}

/// The idle condition last announced in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum IdleReason {
    #[default]
    None,
    MaxReached,
    MinReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ControlLoopState {
    pub sleep_mode: bool,
    pub thermal_cutoff: bool,
    pub last_logged_idle: IdleReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickKind {
    /// Left the operating window on this tick; the heater was parked.
    EnteredSleep,
    Sleeping,
    ThermalCutoff,
    ReceiveFailed,
    Rejected(ProtocolError),
    Stepped { direction: Direction, position: i8 },
    /// At the end of travel. `logged` is true only on the tick that entered
    /// this idle condition.
    Idle { reason: IdleReason, logged: bool },
    DeadBand,
    ActuationFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub kind: TickKind,
    pub surplus_w: Option<f64>,
    /// How long to wait before the next tick.
    pub sleep: Duration,
}

pub struct ControlLoop {
    config: ControlConfig,
    window: OperatingWindow,
    limits: TelegramLimits,
    actuator: HeaterActuator,
    source: Box<dyn TelegramSource>,
    sensor: Box<dyn TemperatureSensor>,
    thermal: ThermalGuard,
    meter: MeterReader,
    clock: Arc<dyn Clock>,
    state: ControlLoopState,
    ticks: u64,
}

impl ControlLoop {
    pub fn new(
        actuator: HeaterActuator,
        source: Box<dyn TelegramSource>,
        sensor: Box<dyn TemperatureSensor>,
        meter: MeterReader,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: ControlConfig::default(),
            window: OperatingWindow::default(),
            limits: TelegramLimits::default(),
            actuator,
            source,
            sensor,
            thermal: ThermalGuard::new(ThermalLimits::default()),
            meter,
            clock,
            state: ControlLoopState::default(),
            ticks: 0,
        }
    }

    pub fn with_config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_window(mut self, window: OperatingWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_thermal_limits(mut self, limits: ThermalLimits) -> Self {
        self.thermal = ThermalGuard::new(limits);
        self
    }

    pub fn with_telegram_limits(mut self, limits: TelegramLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn state(&self) -> &ControlLoopState {
        &self.state
    }

    pub fn actuator(&self) -> &HeaterActuator {
        &self.actuator
    }

    pub fn thermal(&self) -> &ThermalGuard {
        &self.thermal
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Anchor the actuator. Must succeed before the first tick.
    pub fn startup(&mut self) -> Result<(), GpioError> {
        info!("resetting heater to zero before the first tick");
        self.actuator.reset_to_zero()?;
        self.state.last_logged_idle = IdleReason::None;
        info!("reset complete, control loop ready");
        Ok(())
    }

    /// Tick forever. The process ends the loop.
    pub fn run(&mut self) -> ! {
        loop {
            let outcome = self.tick();
            self.clock.sleep(outcome.sleep);
        }
    }

    pub fn tick(&mut self) -> TickOutcome {
        let tick = self.ticks;
        self.ticks = self.ticks.wrapping_add(1);

        if let Some(outcome) = self.schedule_guard() {
            return outcome;
        }
        if let Some(outcome) = self.thermal_guard(tick) {
            return outcome;
        }

        let outcome = self.regulate();
        if tick % u64::from(self.config.heartbeat_every_ticks.max(1)) == 0 {
            self.heartbeat();
        }
        outcome
    }

    fn schedule_guard(&mut self) -> Option<TickOutcome> {
        let now = self.clock.local_time();
        if self.window.contains(now) {
            if self.state.sleep_mode {
                self.state.sleep_mode = false;
                info!(time = %now, "operating window open, resuming control");
            }
            return None;
        }

        let kind = if self.state.sleep_mode {
            TickKind::Sleeping
        } else {
            info!(time = %now, "outside operating window, parking heater");
            self.safety_reset("night");
            self.state.sleep_mode = true;
            TickKind::EnteredSleep
        };
        Some(outcome(kind, None, self.config.night_sleep()))
    }

    fn thermal_guard(&mut self, tick: u64) -> Option<TickOutcome> {
        if self.thermal.poll_due(tick) {
            let reading = self.sensor.read();
            let (event, actions) = self.thermal.update(reading);
            if let ThermalEvent::Steady { temp_c } = event {
                debug!(temp_c, "tank temperature");
            }
            if actions.reset_actuator {
                self.safety_reset("thermal cutoff");
            }
            self.state.thermal_cutoff = self.thermal.is_cut_off();
        }

        self.state
            .thermal_cutoff
            .then(|| outcome(TickKind::ThermalCutoff, None, self.config.cutoff_sleep()))
    }

    fn regulate(&mut self) -> TickOutcome {
        let frame = match self.source.receive() {
            Ok(frame) => frame,
            Err(e) => {
                error!("telegram receive failed: {}", e);
                self.safety_reset("receive failure");
                return outcome(TickKind::ReceiveFailed, None, self.config.tick());
            }
        };

        let decoded = match telegram::decode(frame.as_bytes()) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(len = frame.len(), "dropping telegram: {}", e);
                return outcome(TickKind::Rejected(e), None, self.config.tick());
            }
        };
        let surplus_w = match telegram::validate(&decoded, &self.limits) {
            Ok(surplus_w) => surplus_w,
            Err(e) => {
                warn!(
                    serial = decoded.serial_number,
                    import_w = decoded.import_power_w,
                    export_w = decoded.export_power_w,
                    "dropping corrupt telegram: {}",
                    e
                );
                return outcome(TickKind::Rejected(e), None, self.config.tick());
            }
        };

        let kind = if surplus_w > self.config.up_threshold_w {
            self.step(Direction::Up, surplus_w)
        } else if surplus_w < self.config.down_threshold_w {
            self.step(Direction::Down, surplus_w)
        } else {
            TickKind::DeadBand
        };
        outcome(kind, Some(surplus_w), self.config.tick())
    }

    fn step(&mut self, direction: Direction, surplus_w: f64) -> TickKind {
        if self.actuator.position().is_none() {
            warn!("heater position unknown, resetting before actuation");
            if let Err(e) = self.actuator.reset_to_zero() {
                error!("reset before actuation failed: {}", e);
                return TickKind::ActuationFailed;
            }
            self.state.last_logged_idle = IdleReason::None;
        }

        let result = match direction {
            Direction::Up => self.actuator.up(),
            Direction::Down => self.actuator.down(),
        };

        match result {
            Ok(StepOutcome::Moved(position)) => {
                self.state.last_logged_idle = IdleReason::None;
                info!(position, surplus_w, ?direction, "heater stepped");
                TickKind::Stepped { direction, position }
            }
            Ok(StepOutcome::AtLimit) => {
                let reason = match direction {
                    Direction::Up => IdleReason::MaxReached,
                    Direction::Down => IdleReason::MinReached,
                };
                let logged = self.state.last_logged_idle != reason;
                if logged {
                    match reason {
                        IdleReason::MaxReached => info!(surplus_w, "idle: max reached"),
                        _ => info!(surplus_w, "idle: min reached"),
                    }
                    self.state.last_logged_idle = reason;
                }
                TickKind::Idle { reason, logged }
            }
            Ok(StepOutcome::Unanchored) => TickKind::ActuationFailed,
            Err(e) => {
                error!(?direction, surplus_w, "actuation failed: {}", e);
                TickKind::ActuationFailed
            }
        }
    }

    /// Drive the heater to zero; on failure the position stays unknown and
    /// the next actuation retries the reset.
    fn safety_reset(&mut self, reason: &'static str) {
        self.state.last_logged_idle = IdleReason::None;
        if let Err(e) = self.actuator.reset_to_zero() {
            error!(reason, "safety reset failed, heater position unknown: {}", e);
        }
    }

    fn heartbeat(&self) {
        let snapshot = self.meter.snapshot_at(self.clock.now());
        let estimated_pct = self
            .actuator
            .position()
            .map(|p| (i32::from(p) * 10).clamp(0, 100));
        info!(
            position = ?self.actuator.position(),
            estimated_pct = ?estimated_pct,
            pfc_level = snapshot.effective_level,
            power_w = snapshot.effective_power_w,
            energy_wh = snapshot.energy_wh,
            "heartbeat"
        );
    }
}

fn outcome(kind: TickKind, surplus_w: Option<f64>, sleep: Duration) -> TickOutcome {
    TickOutcome {
        kind,
        surplus_w,
        sleep,
    }
}
