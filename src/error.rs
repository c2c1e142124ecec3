use thiserror::Error;

/// A telegram that cannot be trusted. The frame is dropped and nothing is actuated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("telegram does not start with the expected magic marker")]
    BadMagic,
    #[error("telegram truncated: {actual} bytes, at least {needed} required")]
    Truncated { needed: usize, actual: usize },
    #[error("telegram carries the invalid serial number sentinel {0:#010x}")]
    InvalidSerial(u32),
    #[error("implausible surplus of {0} W")]
    ImplausibleSurplus(f64),
    #[error("malformed hex dump")]
    InvalidHex,
}

/// Failure to obtain a telegram from the network.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("no telegram received within the receive timeout")]
    Timeout,
    #[error("datagram of {0} bytes exceeds the telegram buffer")]
    Oversized(usize),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no temperature sensor configured")]
    NotConfigured,
    #[error("sensor read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected sensor output: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("GPIO back-end unavailable: {0}")]
    Unavailable(String),
    #[error("pin {0} is already provisioned")]
    PinBusy(u8),
    #[error("GPIO back-end error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Anything that prevents the controller from coming up. Always fatal.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("GPIO provisioning failed: {0}")]
    Gpio(#[from] GpioError),
    #[error("telegram receiver setup failed: {0}")]
    Receiver(#[source] std::io::Error),
    #[error("status server setup failed: {0}")]
    Status(#[source] std::io::Error),
}
