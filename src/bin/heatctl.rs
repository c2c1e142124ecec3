use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::Duration;
use surplus_heater::status::{self, ErrorResponse, StatusSnapshot};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "7474";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("heatctl")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Query a running surplus-heater controller")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Controller host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Status port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(SubCommand::with_name("status").about("Show the current heater reading"))
        .subcommand(
            SubCommand::with_name("watch")
                .about("Poll the heater reading until interrupted")
                .arg(
                    Arg::with_name("interval")
                        .short("i")
                        .long("interval")
                        .value_name("SECONDS")
                        .help("Seconds between polls")
                        .takes_value(true)
                        .default_value("5")
                        .validator(|v| match v.parse::<u64>() {
                            Ok(s) if s > 0 => Ok(()),
                            _ => Err("interval must be a positive number of seconds".into()),
                        }),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let format = matches.value_of("format").unwrap_or("table");
    let addr = format!("{host}:{port}");

    match matches.subcommand() {
        ("status", Some(_)) => {
            let snapshot = fetch_status(&addr).await?;
            print_snapshot(&snapshot, format)?;
        }
        ("watch", Some(sub)) => handle_watch(sub, &addr, format).await?,
        _ => println!("{}", "No command specified. Use --help for usage information.".yellow()),
    }
    Ok(())
}

async fn handle_watch(matches: &ArgMatches<'_>, addr: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let seconds: u64 = matches.value_of("interval").unwrap_or("5").parse()?;
    let mut interval = tokio::time::interval(Duration::from_secs(seconds));
    println!("{} {} {}", "Watching".dimmed(), addr.bright_white(), "(Ctrl-C to stop)".dimmed());

    loop {
        interval.tick().await;
        match fetch_status(addr).await {
            Ok(snapshot) => print_snapshot(&snapshot, format)?,
            Err(e) => eprintln!("{} {}", "status request failed:".red(), e.to_string().bright_red()),
        }
    }
}

async fn fetch_status(addr: &str) -> Result<StatusSnapshot, Box<dyn std::error::Error>> {
    let response = match tokio::time::timeout(REQUEST_TIMEOUT, status::http_get(addr, "/status")).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            eprintln!("{} Failed to reach controller at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Controller is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "surplus-heater --gpio simulated".bright_cyan());
            }
            return Err(e.into());
        }
        Err(_) => return Err(format!("no response from {addr} within {}s", REQUEST_TIMEOUT.as_secs()).into()),
    };

    if response.status != 200 {
        let message = serde_json::from_str::<ErrorResponse>(&response.body)
            .map(|e| format!("{} {}: {}", e.status, e.status_text, e.message))
            .unwrap_or_else(|_| format!("HTTP {}", response.status));
        return Err(message.into());
    }
    Ok(serde_json::from_str(&response.body)?)
}

fn print_snapshot(snapshot: &StatusSnapshot, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(snapshot)?),
        "compact" => println!(
            "level {}% ({} W), {:.1} Wh",
            snapshot.pfc_level, snapshot.current_power.round(), snapshot.total_energy_wh
        ),
        _ => {
            println!("{} {}", "🔥".bright_red(), "Heater Status".bright_blue().bold());
            println!("{:<16} {}", "Level:".bright_white(), level_colored(snapshot.pfc_level));
            println!(
                "{:<16} {} {}",
                "Raw level:".bright_white(),
                snapshot.raw_pfc_level,
                format!("(max {})", snapshot.max_pfc_level).dimmed()
            );
            println!("{:<16} {:.0} W", "Power:".bright_white(), snapshot.current_power);
            println!("{:<16} {:.0} W", "Raw power:".bright_white(), snapshot.current_raw_power);
            println!("{:<16} {:.1} Wh", "Energy:".bright_white(), snapshot.total_energy_wh);
            println!("{:<16} {}", "Running since:".bright_white(), snapshot.start_time.to_rfc3339());
        }
    }
    Ok(())
}

fn level_colored(level: u8) -> ColoredString {
    let text = format!("{level}%");
    match level {
        0 => text.dimmed(),
        1..=49 => text.bright_yellow(),
        _ => text.bright_green(),
    }
}
