//! Tank temperature from a DS18B20 on the Linux 1-Wire bus.
//!
//! The kernel exposes each probe as `<root>/devices/<id>/w1_slave`:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The second line carries the temperature in millidegrees Celsius.

use crate::error::SensorError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub trait TemperatureSensor: Send {
    /// Degrees Celsius. May block for a couple of seconds.
    fn read(&mut self) -> Result<f64, SensorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct W1Config {
    /// Probe id such as `28-0316a2795bff`; `None` disables the thermal guard input.
    pub device: Option<String>,
    pub root: PathBuf,
}

impl Default for W1Config {
    fn default() -> Self {
        Self {
            device: None,
            root: PathBuf::from("/sys/bus/w1"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct W1ThermSensor {
    path: PathBuf,
}

impl W1ThermSensor {
    pub fn new(root: impl AsRef<Path>, device: &str) -> Self {
        Self {
            path: root.as_ref().join("devices").join(device).join("w1_slave"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemperatureSensor for W1ThermSensor {
    fn read(&mut self) -> Result<f64, SensorError> {
        let contents = fs::read_to_string(&self.path)?;
        parse_w1_slave(&contents)
    }
}

/// Stand-in when no probe is configured; every read fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSensor;

impl TemperatureSensor for NoSensor {
    fn read(&mut self) -> Result<f64, SensorError> {
        Err(SensorError::NotConfigured)
    }
}

pub fn from_config(config: &W1Config) -> Box<dyn TemperatureSensor> {
    match &config.device {
        Some(device) => Box::new(W1ThermSensor::new(&config.root, device)),
        None => Box::new(NoSensor),
    }
}

pub fn parse_w1_slave(contents: &str) -> Result<f64, SensorError> {
    let malformed = || SensorError::Malformed(contents.trim().to_string());

    let line = contents.lines().nth(1).ok_or_else(malformed)?;
    let start = line.find("t=").ok_or_else(malformed)? + 2;
    let value = &line[start..];
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(value.len(), |(i, _)| i);

    let millidegrees: i64 = value[..end].parse().map_err(|_| malformed())?;
    Ok(millidegrees as f64 * 0.001)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    #[test]
    fn test_parse_second_line() {
        let temp = parse_w1_slave(SAMPLE).unwrap();
        assert!((temp - 23.125).abs() < 1e-9);
    }

    #[test]
    fn test_parse_negative() {
        let temp = parse_w1_slave("crc=00 YES\nff ff t=-1250\n").unwrap();
        assert!((temp + 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_w1_slave("only one line"), Err(SensorError::Malformed(_))));
        assert!(matches!(parse_w1_slave("a\nno temperature here"), Err(SensorError::Malformed(_))));
        assert!(matches!(parse_w1_slave("a\nt=\n"), Err(SensorError::Malformed(_))));
    }

    #[test]
    fn test_sensor_reads_device_file() {
        let root = std::env::temp_dir().join(format!("w1-test-{}", std::process::id()));
        let device_dir = root.join("devices").join("28-test");
        fs::create_dir_all(&device_dir).unwrap();
        fs::write(device_dir.join("w1_slave"), SAMPLE).unwrap();

        let mut sensor = W1ThermSensor::new(&root, "28-test");
        assert!((sensor.read().unwrap() - 23.125).abs() < 1e-9);

        let mut missing = W1ThermSensor::new(&root, "28-missing");
        assert!(matches!(missing.read(), Err(SensorError::Io(_))));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_no_sensor_reports_not_configured() {
        assert!(matches!(NoSensor.read(), Err(SensorError::NotConfigured)));
    }
}
