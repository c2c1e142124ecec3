#![allow(dead_code)]

use chrono::NaiveTime;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use surplus_heater::actuator::{ActuatorPins, ActuatorTiming, HeaterActuator};
use surplus_heater::clock::Clock;
use surplus_heater::error::{ReceiveError, SensorError};
use surplus_heater::hal::{Level, Polarity, SimulatedGpio};
use surplus_heater::meter::{pulse_meter, MeterReader, MeterSettings, PulseRecorder};
use surplus_heater::receiver::TelegramSource;
use surplus_heater::sensor::TemperatureSensor;
use surplus_heater::telegram::{Telegram, CORE_TELEGRAM_LEN, MAGIC};
use surplus_heater::ControlLoop;

pub const PINS: ActuatorPins = ActuatorPins {
    power: 22,
    increase: 27,
    decrease: 17,
};

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

struct ManualState {
    elapsed: Duration,
    local: NaiveTime,
    sleeps: Vec<Duration>,
}

/// Virtual time: sleeping is recorded and advances the monotonic clock
/// instantly. Time of day only changes through [`ManualClock::set_local_time`].
pub struct ManualClock {
    base: Instant,
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(local: NaiveTime) -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            state: Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                local,
                sleeps: Vec::new(),
            }),
        })
    }

    pub fn set_local_time(&self, local: NaiveTime) {
        self.state.lock().unwrap().local = local;
    }

    pub fn advance(&self, by: Duration) {
        self.state.lock().unwrap().elapsed += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }

    pub fn clear_sleeps(&self) {
        self.state.lock().unwrap().sleeps.clear();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.state.lock().unwrap().elapsed
    }

    fn local_time(&self) -> NaiveTime {
        self.state.lock().unwrap().local
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        state.sleeps.push(duration);
        state.elapsed += duration;
    }
}

/// Telegram source fed from the test. Empty means the receive timed out.
#[derive(Clone, Default)]
pub struct ScriptedTelegramSource {
    queue: Arc<Mutex<VecDeque<Result<Telegram, ReceiveError>>>>,
}

impl ScriptedTelegramSource {
    pub fn push_bytes(&self, bytes: &[u8]) {
        let telegram = Telegram::from_slice(bytes).unwrap();
        self.queue.lock().unwrap().push_back(Ok(telegram));
    }

    pub fn push_surplus(&self, surplus_w: f64) {
        self.push_bytes(&surplus_telegram(surplus_w));
    }

    pub fn push_error(&self, error: ReceiveError) {
        self.queue.lock().unwrap().push_back(Err(error));
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

impl TelegramSource for ScriptedTelegramSource {
    fn receive(&mut self) -> Result<Telegram, ReceiveError> {
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ReceiveError::Timeout))
    }
}

struct SensorScript {
    queued: VecDeque<Result<f64, SensorError>>,
    steady_c: f64,
    reads: usize,
}

/// Temperature sensor that returns queued readings first, then a steady value.
#[derive(Clone)]
pub struct ScriptedSensor {
    script: Arc<Mutex<SensorScript>>,
}

impl ScriptedSensor {
    pub fn new(steady_c: f64) -> Self {
        Self {
            script: Arc::new(Mutex::new(SensorScript {
                queued: VecDeque::new(),
                steady_c,
                reads: 0,
            })),
        }
    }

    pub fn set_temperature(&self, temp_c: f64) {
        self.script.lock().unwrap().steady_c = temp_c;
    }

    pub fn push_error(&self, error: SensorError) {
        self.script.lock().unwrap().queued.push_back(Err(error));
    }

    pub fn reads(&self) -> usize {
        self.script.lock().unwrap().reads
    }
}

impl TemperatureSensor for ScriptedSensor {
    fn read(&mut self) -> Result<f64, SensorError> {
        let mut script = self.script.lock().unwrap();
        script.reads += 1;
        let steady = script.steady_c;
        script.queued.pop_front().unwrap_or(Ok(steady))
    }
}

/// A minimal sound telegram carrying the given readings.
pub fn telegram_bytes(serial: u32, import_w: f64, export_w: f64) -> Vec<u8> {
    let mut bytes = vec![0u8; CORE_TELEGRAM_LEN];
    bytes[..3].copy_from_slice(&MAGIC);
    bytes[0x14..0x18].copy_from_slice(&serial.to_be_bytes());
    bytes[0x20..0x24].copy_from_slice(&((import_w * 10.0).round() as u32).to_be_bytes());
    bytes[0x34..0x38].copy_from_slice(&((export_w * 10.0).round() as u32).to_be_bytes());
    bytes
}

pub fn surplus_telegram(surplus_w: f64) -> Vec<u8> {
    if surplus_w >= 0.0 {
        telegram_bytes(1_900_123_456, 0.0, surplus_w)
    } else {
        telegram_bytes(1_900_123_456, -surplus_w, 0.0)
    }
}

pub fn provision_actuator(gpio: &mut SimulatedGpio, clock: Arc<dyn Clock>) -> HeaterActuator {
    HeaterActuator::provision(gpio, PINS, Polarity::ActiveLow, ActuatorTiming::default(), clock).unwrap()
}

/// Actuation pulses issued so far on each relay (active-low: a pulse drives LOW).
pub fn pulses(gpio: &SimulatedGpio) -> (usize, usize) {
    (
        gpio.transitions_to(PINS.increase, Level::Low),
        gpio.transitions_to(PINS.decrease, Level::Low),
    )
}

/// A control loop wired to test doubles, at noon, after the startup reset.
pub struct Rig {
    pub gpio: SimulatedGpio,
    pub clock: Arc<ManualClock>,
    pub source: ScriptedTelegramSource,
    pub sensor: ScriptedSensor,
    pub meter: MeterReader,
    pub recorder: PulseRecorder,
    pub control: ControlLoop,
}

impl Rig {
    pub fn new() -> Self {
        let mut gpio = SimulatedGpio::new();
        let clock = ManualClock::new(hm(12, 0));
        let source = ScriptedTelegramSource::default();
        let sensor = ScriptedSensor::new(40.0);
        let (recorder, meter) = pulse_meter(MeterSettings::default(), Polarity::ActiveLow);

        let actuator = provision_actuator(&mut gpio, clock.clone());
        let mut control = ControlLoop::new(
            actuator,
            Box::new(source.clone()),
            Box::new(sensor.clone()),
            meter.clone(),
            clock.clone(),
        );
        control.startup().unwrap();

        Self {
            gpio,
            clock,
            source,
            sensor,
            meter,
            recorder,
            control,
        }
    }

    pub fn position(&self) -> Option<i8> {
        self.control.actuator().position()
    }

    /// Step up from the anchored floor until `position` is reached.
    pub fn drive_to(&mut self, position: i8) {
        while self.position() != Some(position) {
            self.source.push_surplus(500.0);
            self.control.tick();
        }
    }
}
