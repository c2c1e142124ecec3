use clap::{App, Arg};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use surplus_heater::clock::{Clock, SystemClock};
use surplus_heater::config::ControllerConfig;
use surplus_heater::error::{GpioError, StartupError};
use surplus_heater::hal::{self, GpioBackend, GpioProvider, Level, SimulatedGpio};
use surplus_heater::meter::{edge_channel, pulse_meter, EdgeEvent};
use surplus_heater::receiver::MulticastReceiver;
use surplus_heater::{sensor, status, ControlLoop, HeaterActuator};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("surplus-heater")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Steers a water heater with surplus solar power")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("gpio")
                .long("gpio")
                .value_name("BACKEND")
                .help("GPIO back-end")
                .takes_value(true)
                .possible_values(&["simulated", "sim", "raspberry", "rpi"]),
        )
        .arg(
            Arg::with_name("status-port")
                .long("status-port")
                .value_name("PORT")
                .help("Port of the JSON status endpoint")
                .takes_value(true)
                .validator(|v| v.parse::<u16>().map(|_| ()).map_err(|_| "port must be 0-65535".to_string())),
        )
        .arg(
            Arg::with_name("simulate-power")
                .long("simulate-power")
                .value_name("WATTS")
                .help("Simulated back-end only: drive the heater meter input with a constant load")
                .takes_value(true)
                .validator(|v| match v.parse::<f64>() {
                    Ok(w) if w > 0.0 => Ok(()),
                    _ => Err("load must be a positive number of watts".to_string()),
                }),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => {
            info!(path, "loading configuration");
            ControllerConfig::load(path).map_err(StartupError::from)?
        }
        None => ControllerConfig::default(),
    };
    if let Some(backend) = matches.value_of("gpio") {
        config.gpio.backend = backend.parse()?;
    }
    if let Some(port) = matches.value_of("status-port") {
        config.status.port = port.parse()?;
    }
    if let Some(load) = matches.value_of("simulate-power") {
        config.meter.simulated_load_w = Some(load.parse()?);
    }
    config.validate().map_err(StartupError::from)?;

    if let Err(e) = run(config).await {
        error!("controller stopped: {}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(config: ControllerConfig) -> Result<(), Box<dyn Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let simulated = SimulatedGpio::new();
    let mut gpio: Box<dyn GpioProvider> = match config.gpio.backend {
        GpioBackend::Simulated => Box::new(simulated.clone()),
        GpioBackend::Raspberry => hal::open(GpioBackend::Raspberry).map_err(StartupError::from)?,
    };
    info!(backend = gpio.name(), "GPIO back-end ready");

    let pulse_polarity = config.gpio.pulse_polarity;
    let (recorder, meter) = pulse_meter(config.meter.settings(), pulse_polarity);
    let (edges_tx, edges_rx) = edge_channel();
    gpio.watch_input(
        config.gpio.meter_pin,
        pulse_polarity.idle_pull(),
        Box::new(move |level: Level, at: Instant| {
            if let Err(e) = edges_tx.send(EdgeEvent { level, at }) {
                debug!("pulse recorder gone, edge dropped: {}", e);
            }
        }),
    )
    .map_err(StartupError::from)?;
    recorder.spawn(edges_rx)?;

    let actuator = HeaterActuator::provision(
        gpio.as_mut(),
        config.gpio.actuator_pins(),
        config.gpio.output_polarity,
        config.actuator.timing(),
        Arc::clone(&clock),
    )
    .map_err(StartupError::from)?;

    let receiver = MulticastReceiver::bind(&config.telegram.multicast).map_err(StartupError::Receiver)?;

    let listener = status::bind(&config.status).await.map_err(StartupError::Status)?;
    let status_meter = meter.clone();
    tokio::spawn(async move {
        if let Err(e) = status::serve(listener, status_meter).await {
            error!("status server error: {}", e);
        }
    });

    match (config.gpio.backend, config.meter.simulated_load_w) {
        (GpioBackend::Simulated, Some(load_w)) => {
            simulated.spawn_pulse_train(
                config.gpio.meter_pin,
                pulse_polarity,
                load_w,
                config.meter.wh_per_pulse,
            );
            info!(load_w, "simulated heater load attached");
        }
        (GpioBackend::Raspberry, Some(_)) => {
            warn!("simulated load ignored on real hardware");
        }
        (_, None) => {}
    }

    let mut control = ControlLoop::new(
        actuator,
        Box::new(receiver),
        sensor::from_config(&config.thermal.sensor),
        meter,
        clock,
    )
    .with_config(config.control)
    .with_window(config.schedule)
    .with_thermal_limits(config.thermal.limits)
    .with_telegram_limits(config.telegram.limits);

    // The GPIO provider keeps the meter interrupt armed; it lives as long as the loop.
    let control_task = tokio::task::spawn_blocking(move || -> Result<(), GpioError> {
        let _gpio = gpio;
        control.startup()?;
        control.run()
    });

    control_task.await?.map_err(StartupError::from)?;
    Ok(())
}
