use crate::error::SensorError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalLimits {
    /// Cut off above this temperature.
    pub cutoff_c: f64,
    /// Resume below this temperature; strictly lower than `cutoff_c`.
    pub resume_c: f64,
    /// The sensor is slow (about 2 s per read), so it is polled every Nth tick.
    pub poll_every_ticks: u32,
}

impl Default for ThermalLimits {
    fn default() -> Self {
        Self {
            cutoff_c: 60.0,
            resume_c: 55.0,
            poll_every_ticks: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ThermalEvent {
    CutoffEntered { temp_c: f64 },
    CutoffCleared { temp_c: f64 },
    /// Reading taken, state unchanged.
    Steady { temp_c: f64 },
    /// Unreadable sensor; previous cutoff state kept.
    ReadFailed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThermalState {
    pub cutoff_active: bool,
    pub last_temp_c: Option<f64>,
    pub cutoff_entry_count: u32,
    pub consecutive_read_failures: u32,
}

#[derive(Debug)]
pub struct ThermalGuard {
    limits: ThermalLimits,
    state: ThermalState,
}

impl ThermalGuard {
    pub fn new(limits: ThermalLimits) -> Self {
        Self {
            limits,
            state: ThermalState::default(),
        }
    }

    pub fn limits(&self) -> &ThermalLimits {
        &self.limits
    }

    /// Whether the sensor should be read on this tick.
    pub fn poll_due(&self, tick: u64) -> bool {
        let every = u64::from(self.limits.poll_every_ticks.max(1));
        tick % every == 0
    }

    pub fn is_cut_off(&self) -> bool {
        self.state.cutoff_active
    }

    pub fn get_state(&self) -> &ThermalState {
        &self.state
    }

    /// Feed one sensor reading through the hysteresis.
    pub fn update(&mut self, reading: Result<f64, SensorError>) -> (ThermalEvent, SafetyActions) {
        let mut actions = SafetyActions::new();

        let temp_c = match reading {
            Ok(temp_c) => temp_c,
            Err(e) => {
                self.state.consecutive_read_failures = self.state.consecutive_read_failures.saturating_add(1);
                warn!(
                    failures = self.state.consecutive_read_failures,
                    cutoff = self.state.cutoff_active,
                    "temperature unreadable, keeping thermal state: {}",
                    e
                );
                return (ThermalEvent::ReadFailed, actions);
            }
        };

        self.state.consecutive_read_failures = 0;
        self.state.last_temp_c = Some(temp_c);

        let event = if !self.state.cutoff_active && temp_c > self.limits.cutoff_c {
            self.enter_cutoff(temp_c, &mut actions);
            ThermalEvent::CutoffEntered { temp_c }
        } else if self.state.cutoff_active && temp_c < self.limits.resume_c {
            self.exit_cutoff(temp_c);
            ThermalEvent::CutoffCleared { temp_c }
        } else {
            ThermalEvent::Steady { temp_c }
        };

        (event, actions)
    }

    fn enter_cutoff(&mut self, temp_c: f64, actions: &mut SafetyActions) {
        self.state.cutoff_active = true;
        self.state.cutoff_entry_count = self.state.cutoff_entry_count.saturating_add(1);
        actions.reset_actuator = true;
        warn!(temp_c, limit_c = self.limits.cutoff_c, "thermal cutoff engaged");
    }

    fn exit_cutoff(&mut self, temp_c: f64) {
        self.state.cutoff_active = false;
        info!(temp_c, resume_c = self.limits.resume_c, "thermal cutoff released");
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SafetyActions {
    pub reset_actuator: bool,
}

impl SafetyActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_actions(&self) -> bool {
        self.reset_actuator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_hysteresis() {
        let mut guard = ThermalGuard::new(ThermalLimits::default());

        let (event, actions) = guard.update(Ok(61.0));
        assert_eq!(event, ThermalEvent::CutoffEntered { temp_c: 61.0 });
        assert!(actions.reset_actuator);
        assert!(guard.is_cut_off());

        // Between the thresholds nothing changes.
        let (event, actions) = guard.update(Ok(57.0));
        assert_eq!(event, ThermalEvent::Steady { temp_c: 57.0 });
        assert!(!actions.has_actions());
        assert!(guard.is_cut_off());

        let (event, _) = guard.update(Ok(54.5));
        assert_eq!(event, ThermalEvent::CutoffCleared { temp_c: 54.5 });
        assert!(!guard.is_cut_off());
    }

    #[test]
    fn test_read_failure_keeps_state() {
        let mut guard = ThermalGuard::new(ThermalLimits::default());
        guard.update(Ok(65.0));

        let (event, actions) = guard.update(Err(SensorError::NotConfigured));
        assert_eq!(event, ThermalEvent::ReadFailed);
        assert!(!actions.has_actions());
        assert!(guard.is_cut_off());
        assert_eq!(guard.get_state().consecutive_read_failures, 1);
        assert_eq!(guard.get_state().last_temp_c, Some(65.0));
    }

    #[test]
    fn test_poll_schedule() {
        let guard = ThermalGuard::new(ThermalLimits::default());
        assert!(guard.poll_due(0));
        assert!(!guard.poll_due(9));
        assert!(guard.poll_due(10));
    }

    #[test]
    fn test_exactly_at_cutoff_does_not_trip() {
        let mut guard = ThermalGuard::new(ThermalLimits::default());
        guard.update(Ok(60.0));
        assert!(!guard.is_cut_off());
    }
}
