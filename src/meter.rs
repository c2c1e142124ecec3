//! Heater power and energy from the S0 pulse output of a sub-meter.
//!
//! The sub-meter emits one pulse per fixed energy quantum. Power follows from
//! the gap between consecutive pulses, so a single bounced edge would produce
//! a wildly wrong reading; every gap and every pulse width is therefore
//! checked against plausible bounds before it counts.
//!
//! # Concurrency
//!
//! Edges arrive on the GPIO notification thread and are forwarded over a
//! channel to one [`PulseRecorder`], the sole writer. The recorder publishes
//! each new [`MeterState`] as a whole through a sequence-locked cell, so any
//! number of [`MeterReader`]s see a coherent state (never a power value next
//! to a stale energy total) without ever blocking the writer.

use crate::hal::{Level, Polarity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::f64::consts::FRAC_2_PI;
use std::hint;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterSettings {
    pub wh_per_pulse: f64,
    pub min_pulse_width: Duration,
    pub max_pulse_width: Duration,
    pub min_pulse_gap: Duration,
    pub max_pulse_gap: Duration,
    /// Draw at which the element is at full output.
    pub max_power_w: f64,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            wh_per_pulse: 0.5,
            min_pulse_width: Duration::from_millis(25),
            max_pulse_width: Duration::from_millis(135),
            min_pulse_gap: Duration::from_millis(100),
            max_pulse_gap: Duration::from_secs(3600),
            max_power_w: 1130.0,
        }
    }
}

impl MeterSettings {
    /// Average power if one quantum was consumed over `gap`.
    pub fn power_for_gap(&self, gap: Duration) -> f64 {
        3600.0 * self.wh_per_pulse / gap.as_secs_f64()
    }

    pub fn level_of(&self, power_w: f64) -> u8 {
        level_of(power_w, self.max_power_w)
    }
}

/// Output level (0-100) for a power draw.
///
/// The element's response follows a half cosine, `y = (1 - cos(πx)) / 2`, so
/// the level is its inverse `x = 2·asin(√y)/π` with `y = power / max_power`
/// saturated at 1.
pub fn level_of(power_w: f64, max_power_w: f64) -> u8 {
    if power_w.is_nan() || power_w <= 0.0 || max_power_w <= 0.0 {
        return 0;
    }
    let y = (power_w / max_power_w).min(1.0);
    let level = (100.0 * FRAC_2_PI * y.sqrt().asin()).round();
    level.clamp(0.0, 100.0) as u8
}

/// The two edges of one S0 pulse, named by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PulseEdge {
    /// Line goes active. Closes the gap since the previous pulse and
    /// counts the quantum.
    Leading,
    /// Line released. Closes the pulse width, which only validates.
    Trailing,
}

impl PulseEdge {
    pub fn from_level(level: Level, polarity: Polarity) -> Self {
        if level == polarity.active_level() {
            PulseEdge::Leading
        } else {
            PulseEdge::Trailing
        }
    }
}

/// What the recorder made of one edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeVerdict {
    Pulse { gap: Duration, power_w: f64 },
    GapRejected(Duration),
    /// Leading edge without a trusted predecessor; only re-arms the reference.
    NoReference,
    WidthAccepted(Duration),
    /// Bounce: the reference is dropped so the next gap is discarded as well.
    WidthRejected(Duration),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MeterState {
    /// Debounce reference: the last leading edge, cleared by a bounce.
    pub last_pulse: Option<Duration>,
    /// Last leading edge of any kind; only `None` before the first pulse.
    pub last_seen: Option<Duration>,
    pub pulses: u64,
    pub energy_wh: f64,
    pub power_w: f64,
    pub level: u8,
}

impl MeterState {
    /// Pure edge transition; `at` is measured from the meter epoch.
    pub fn apply(&mut self, edge: PulseEdge, at: Duration, settings: &MeterSettings) -> EdgeVerdict {
        match edge {
            PulseEdge::Leading => {
                let verdict = match self.last_pulse {
                    None => EdgeVerdict::NoReference,
                    Some(previous) => {
                        let gap = at.saturating_sub(previous);
                        if gap > settings.min_pulse_gap && gap < settings.max_pulse_gap {
                            let power_w = settings.power_for_gap(gap);
                            self.pulses += 1;
                            self.energy_wh += settings.wh_per_pulse;
                            self.power_w = power_w;
                            self.level = settings.level_of(power_w);
                            EdgeVerdict::Pulse { gap, power_w }
                        } else {
                            EdgeVerdict::GapRejected(gap)
                        }
                    }
                };
                self.last_pulse = Some(at);
                self.last_seen = Some(at);
                verdict
            }
            PulseEdge::Trailing => match self.last_pulse {
                None => EdgeVerdict::Ignored,
                Some(previous) => {
                    let width = at.saturating_sub(previous);
                    if width > settings.min_pulse_width && width < settings.max_pulse_width {
                        EdgeVerdict::WidthAccepted(width)
                    } else {
                        self.last_pulse = None;
                        EdgeVerdict::WidthRejected(width)
                    }
                }
            },
        }
    }
}

const NEVER: u64 = u64::MAX;

/// Sequence lock over the fields of a [`MeterState`]. One writer, any readers.
#[derive(Debug, Default)]
struct MeterCell {
    seq: AtomicU64,
    last_pulse_ns: AtomicU64,
    last_seen_ns: AtomicU64,
    pulses: AtomicU64,
    energy_bits: AtomicU64,
    power_bits: AtomicU64,
    level: AtomicU64,
}

impl MeterCell {
    fn new() -> Self {
        let cell = Self::default();
        cell.last_pulse_ns.store(NEVER, Ordering::Relaxed);
        cell.last_seen_ns.store(NEVER, Ordering::Relaxed);
        cell
    }

    fn store(&self, state: &MeterState) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.last_pulse_ns.store(to_nanos(state.last_pulse), Ordering::Relaxed);
        self.last_seen_ns.store(to_nanos(state.last_seen), Ordering::Relaxed);
        self.pulses.store(state.pulses, Ordering::Relaxed);
        self.energy_bits.store(state.energy_wh.to_bits(), Ordering::Relaxed);
        self.power_bits.store(state.power_w.to_bits(), Ordering::Relaxed);
        self.level.store(u64::from(state.level), Ordering::Relaxed);

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    fn load(&self) -> MeterState {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                hint::spin_loop();
                continue;
            }

            let state = MeterState {
                last_pulse: from_nanos(self.last_pulse_ns.load(Ordering::Relaxed)),
                last_seen: from_nanos(self.last_seen_ns.load(Ordering::Relaxed)),
                pulses: self.pulses.load(Ordering::Relaxed),
                energy_wh: f64::from_bits(self.energy_bits.load(Ordering::Relaxed)),
                power_w: f64::from_bits(self.power_bits.load(Ordering::Relaxed)),
                level: self.level.load(Ordering::Relaxed) as u8,
            };

            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return state;
            }
            hint::spin_loop();
        }
    }
}

fn to_nanos(t: Option<Duration>) -> u64 {
    t.map_or(NEVER, |t| u64::try_from(t.as_nanos()).unwrap_or(NEVER - 1))
}

fn from_nanos(ns: u64) -> Option<Duration> {
    (ns != NEVER).then_some(Duration::from_nanos(ns))
}

#[derive(Debug)]
struct Shared {
    cell: MeterCell,
    settings: MeterSettings,
    epoch: Instant,
    started_at: DateTime<Utc>,
}

/// Create a meter: the single writer and a cloneable read handle.
pub fn pulse_meter(settings: MeterSettings, polarity: Polarity) -> (PulseRecorder, MeterReader) {
    let shared = Arc::new(Shared {
        cell: MeterCell::new(),
        settings,
        epoch: Instant::now(),
        started_at: Utc::now(),
    });
    let recorder = PulseRecorder {
        shared: Arc::clone(&shared),
        state: MeterState::default(),
        polarity,
    };
    (recorder, MeterReader { shared })
}

/// An input edge as observed by the GPIO back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub level: Level,
    pub at: Instant,
}

pub type EdgeSender = UnboundedSender<EdgeEvent>;
pub type EdgeReceiver = UnboundedReceiver<EdgeEvent>;

pub fn edge_channel() -> (EdgeSender, EdgeReceiver) {
    unbounded_channel()
}

/// Sole writer of the meter state. Not `Clone`.
#[derive(Debug)]
pub struct PulseRecorder {
    shared: Arc<Shared>,
    state: MeterState,
    polarity: Polarity,
}

impl PulseRecorder {
    pub fn record(&mut self, edge: PulseEdge, at: Instant) -> EdgeVerdict {
        let since_epoch = at.saturating_duration_since(self.shared.epoch);
        let verdict = self.state.apply(edge, since_epoch, &self.shared.settings);

        match verdict {
            EdgeVerdict::Pulse { gap, power_w } => {
                debug!(
                    gap_ms = gap.as_millis() as u64,
                    power_w,
                    level = self.state.level,
                    energy_wh = self.state.energy_wh,
                    "pulse"
                );
            }
            EdgeVerdict::GapRejected(gap) => {
                debug!(gap_ms = gap.as_millis() as u64, "invalid pulse gap");
            }
            EdgeVerdict::WidthRejected(width) => {
                debug!(width_ms = width.as_millis() as u64, "invalid pulse width");
            }
            EdgeVerdict::NoReference | EdgeVerdict::WidthAccepted(_) | EdgeVerdict::Ignored => {}
        }

        self.shared.cell.store(&self.state);
        verdict
    }

    pub fn record_level(&mut self, level: Level, at: Instant) -> EdgeVerdict {
        self.record(PulseEdge::from_level(level, self.polarity), at)
    }

    /// Consume edges until every sender is gone.
    pub fn run(mut self, mut edges: EdgeReceiver) {
        while let Some(event) = edges.blocking_recv() {
            self.record_level(event.level, event.at);
        }
        info!("edge channel closed, pulse recorder stopping");
    }

    pub fn spawn(self, edges: EdgeReceiver) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("pulse-recorder".into())
            .spawn(move || self.run(edges))
    }
}

/// Readings derived from the last published state at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeterSnapshot {
    /// Power implied by the last accepted gap.
    pub raw_power_w: f64,
    pub raw_level: u8,
    /// Raw power capped by what the time since the last pulse still allows.
    pub effective_power_w: f64,
    pub effective_level: u8,
    /// Highest level the elapsed time since the last pulse allows; 100
    /// before the first pulse.
    pub max_level: u8,
    pub energy_wh: f64,
    pub pulses: u64,
    pub since_last_pulse: Option<Duration>,
}

/// Read-only handle, cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct MeterReader {
    shared: Arc<Shared>,
}

impl MeterReader {
    pub fn settings(&self) -> &MeterSettings {
        &self.shared.settings
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    pub fn state(&self) -> MeterState {
        self.shared.cell.load()
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> MeterSnapshot {
        let state = self.state();
        let settings = &self.shared.settings;
        let since_last_pulse = state
            .last_seen
            .map(|t| now.saturating_duration_since(self.shared.epoch + t));

        let (effective_power_w, max_level) = match since_last_pulse {
            Some(elapsed) => {
                let bound = settings.power_for_gap(elapsed);
                (state.power_w.min(bound), settings.level_of(bound))
            }
            None => (state.power_w, 100),
        };

        MeterSnapshot {
            raw_power_w: state.power_w,
            raw_level: state.level,
            effective_power_w,
            effective_level: settings.level_of(effective_power_w),
            max_level,
            energy_wh: state.energy_wh,
            pulses: state.pulses,
            since_last_pulse,
        }
    }
}
