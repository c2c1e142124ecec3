//! Raspberry Pi GPIO through `rppal` (BCM numbering).
//!
//! Compiled only with the `rpi` feature; without it [`open`] reports the
//! back-end as unavailable so a misconfigured deployment fails at startup.

use super::GpioProvider;
use crate::error::GpioError;

#[cfg(feature = "rpi")]
pub use imp::RaspberryGpio;

#[cfg(feature = "rpi")]
pub fn open() -> Result<Box<dyn GpioProvider>, GpioError> {
    Ok(Box::new(imp::RaspberryGpio::new()?))
}

#[cfg(not(feature = "rpi"))]
pub fn open() -> Result<Box<dyn GpioProvider>, GpioError> {
    Err(GpioError::Unavailable(
        "built without the `rpi` feature".to_string(),
    ))
}

#[cfg(feature = "rpi")]
mod imp {
    use super::super::{EdgeHandler, GpioProvider, Level, OutputLine, Pull};
    use crate::error::GpioError;
    use rppal::gpio::{Gpio, InputPin, Level as PinLevel, OutputPin, Trigger};
    use std::time::Instant;
    use tracing::info;

    pub struct RaspberryGpio {
        gpio: Gpio,
        // Interrupts stay armed only while the pins are alive.
        inputs: Vec<InputPin>,
    }

    impl RaspberryGpio {
        pub fn new() -> Result<Self, GpioError> {
            let gpio = Gpio::new().map_err(|e| GpioError::Unavailable(e.to_string()))?;
            info!("using Raspberry Pi GPIO with BCM pin numbering");
            Ok(Self {
                gpio,
                inputs: Vec::new(),
            })
        }
    }

    fn to_level(level: PinLevel) -> Level {
        match level {
            PinLevel::Low => Level::Low,
            PinLevel::High => Level::High,
        }
    }

    impl GpioProvider for RaspberryGpio {
        fn name(&self) -> &'static str {
            "raspberry"
        }

        fn output(&mut self, pin: u8, initial: Level) -> Result<Box<dyn OutputLine>, GpioError> {
            let raw = self
                .gpio
                .get(pin)
                .map_err(|e| GpioError::Backend(format!("pin {pin}: {e}")))?;
            let line = match initial {
                Level::High => raw.into_output_high(),
                Level::Low => raw.into_output_low(),
            };
            Ok(Box::new(RaspberryOutput { pin, line }))
        }

        fn watch_input(&mut self, pin: u8, pull: Pull, handler: EdgeHandler) -> Result<(), GpioError> {
            let raw = self
                .gpio
                .get(pin)
                .map_err(|e| GpioError::Backend(format!("pin {pin}: {e}")))?;
            let mut input = match pull {
                Pull::Up => raw.into_input_pullup(),
                Pull::Down => raw.into_input_pulldown(),
                Pull::Off => raw.into_input(),
            };

            let mut handler = handler;
            input
                .set_async_interrupt(Trigger::Both, move |level: PinLevel| {
                    handler(to_level(level), Instant::now());
                })
                .map_err(|e| GpioError::Backend(format!("pin {pin} interrupt: {e}")))?;
            self.inputs.push(input);
            Ok(())
        }
    }

    struct RaspberryOutput {
        pin: u8,
        line: OutputPin,
    }

    impl OutputLine for RaspberryOutput {
        fn pin(&self) -> u8 {
            self.pin
        }

        fn set_level(&mut self, level: Level) -> Result<(), GpioError> {
            match level {
                Level::High => self.line.set_high(),
                Level::Low => self.line.set_low(),
            }
            Ok(())
        }
    }
}
