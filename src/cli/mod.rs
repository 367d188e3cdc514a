pub mod config;

use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use std::{io::BufRead, thread};

pub use config::{GroupConfig, GroupsConfig, PollerConfig};

use crate::{
    api::LoggingPublisher,
    core::{Bus, ControlToCore, CoreToControl, PollRuntime},
    protocol::{DatapointValue, Decoder},
    scheduler::{Clock, ConfigCommand, MonotonicClock, StartupPolicy},
    transport::{RegisterMap, SimulatedDevice},
};

/// Command line definition, kept separate from parsing so it can be tested.
pub fn command() -> Command {
    Command::new("tierpoll")
        .about("Tiered polling scheduler for a half-duplex serial device")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Poller configuration file (.json or .toml); built-in catalog if omitted")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("startup")
                .long("startup")
                .help("When the first sweep of each group starts")
                .value_parser(["deferred", "immediate"])
                .value_name("POLICY"),
        )
        .arg(
            Arg::new("tick-ms")
                .long("tick-ms")
                .help("Upper bound on the time between two scheduling ticks")
                .value_parser(clap::value_parser!(u64).range(1..))
                .value_name("MS"),
        )
        .arg(
            Arg::new("threshold")
                .long("threshold")
                .help("Consecutive failures before a communication fault is raised (1-100)")
                .value_parser(clap::value_parser!(u32))
                .value_name("COUNT"),
        )
        .arg(
            Arg::new("latency-ms")
                .long("latency-ms")
                .help("Simulated device: response latency")
                .value_parser(clap::value_parser!(u64))
                .value_name("MS"),
        )
        .arg(
            Arg::new("fail-every")
                .long("fail-every")
                .help("Simulated device: fail every n-th request (0 = never)")
                .value_parser(clap::value_parser!(u32))
                .value_name("N"),
        )
        .arg(
            Arg::new("drop-every")
                .long("drop-every")
                .help("Simulated device: never answer every n-th request (0 = never)")
                .value_parser(clap::value_parser!(u32))
                .value_name("N"),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .help("Print the effective configuration as JSON and exit")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

/// Load the configuration file (or the built-in catalog) and apply overrides.
pub fn load_config(matches: &ArgMatches) -> Result<PollerConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => PollerConfig::from_file(path)?,
        None => PollerConfig::default(),
    };
    if let Some(startup) = matches.get_one::<String>("startup") {
        config.startup = match startup.as_str() {
            "immediate" => StartupPolicy::Immediate,
            _ => StartupPolicy::Deferred,
        };
    }
    if let Some(&tick) = matches.get_one::<u64>("tick-ms") {
        config.tick_interval_ms = tick;
    }
    if let Some(&threshold) = matches.get_one::<u32>("threshold") {
        config.error_threshold = threshold;
    }
    if let Some(&latency) = matches.get_one::<u64>("latency-ms") {
        config.simulation.latency_ms = latency;
    }
    if let Some(&n) = matches.get_one::<u32>("fail-every") {
        config.simulation.fail_every = n;
    }
    if let Some(&n) = matches.get_one::<u32>("drop-every") {
        config.simulation.drop_every = n;
    }
    config.validate()?;
    Ok(config)
}

/// Translate one line typed on stdin. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ControlToCore>> {
    let line = line.trim();
    let message = match line {
        "" => return Ok(None),
        "status" => ControlToCore::Status,
        "pause" => ControlToCore::PausePolling,
        "resume" => ControlToCore::ResumePolling,
        "quit" | "exit" => ControlToCore::Quit,
        other => ControlToCore::Config(other.parse::<ConfigCommand>()?),
    };
    Ok(Some(message))
}

/// Forward stdin lines to the poll loop until EOF or `quit`.
pub fn spawn_stdin_thread(bus: Bus) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_line(&line) {
                Ok(Some(message)) => {
                    let quit = message == ControlToCore::Quit;
                    if bus.control_tx.send(message).is_err() || quit {
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!("{err}"),
            }
        }
        let _ = bus.control_tx.send(ControlToCore::Quit);
    })
}

/// Give every temperature in the catalog a plausible starting value.
fn seed_registers(config: &PollerConfig) -> RegisterMap {
    config
        .datapoints()
        .filter(|dp| dp.decoder == Decoder::Div10)
        .fold(RegisterMap::default(), |registers, dp| {
            match dp.encode(&DatapointValue::Float(21.5)) {
                Ok(bytes) => registers.with_register(dp.address, bytes),
                Err(_) => registers,
            }
        })
}

/// Run the poller against the simulated device until stdin closes or `quit`.
pub async fn start(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    if matches.get_flag("print-config") {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let (transport, device) =
        SimulatedDevice::spawn(config.simulation.clone(), seed_registers(&config));
    let clock = MonotonicClock::new();
    let coordinator = config
        .coordinator_builder()
        .build(transport, LoggingPublisher, clock.now())?;
    log::info!(
        "polling {} datapoints (startup {:?}, threshold {})",
        config.datapoint_count(),
        config.startup,
        coordinator.errors().threshold()
    );

    let runtime = PollRuntime::spawn(
        coordinator,
        clock,
        device.completions.clone(),
        config.runtime_config(),
    );
    let bus = runtime.bus();
    spawn_stdin_thread(bus.clone());

    while let Ok(event) = bus.core_rx.recv_async().await {
        match event {
            CoreToControl::Applied(ack) => log::info!("{ack}"),
            CoreToControl::Rejected(reason) => log::warn!("command rejected: {reason}"),
            CoreToControl::Health(health) => {
                log::info!("{}", serde_json::to_string(&health)?);
            }
            CoreToControl::Stopped => break,
        }
    }
    runtime
        .stop()
        .await
        .map_err(|err| anyhow!("poll loop failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Tier;

    #[test]
    fn test_overrides_apply_on_top_of_catalog() -> Result<()> {
        let matches = command().try_get_matches_from([
            "tierpoll",
            "--startup",
            "immediate",
            "--threshold",
            "3",
            "--fail-every",
            "4",
        ])?;
        let config = load_config(&matches)?;
        assert_eq!(config.startup, StartupPolicy::Immediate);
        assert_eq!(config.error_threshold, 3);
        assert_eq!(config.simulation.fail_every, 4);
        assert_eq!(config.groups, PollerConfig::default().groups);
        Ok(())
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        assert!(command()
            .try_get_matches_from(["tierpoll", "--startup", "eventually"])
            .is_err());
        assert!(command()
            .try_get_matches_from(["tierpoll", "--tick-ms", "0"])
            .is_err());
    }

    #[test]
    fn test_parse_line() -> Result<()> {
        assert_eq!(parse_line("   ")?, None);
        assert_eq!(parse_line("status")?, Some(ControlToCore::Status));
        assert_eq!(parse_line("quit")?, Some(ControlToCore::Quit));
        assert_eq!(
            parse_line("interval medium 120")?,
            Some(ControlToCore::Config(ConfigCommand::SetGroupInterval {
                tier: Tier::Medium,
                seconds: 120
            }))
        );
        assert!(parse_line("interval").is_err());
        Ok(())
    }
}
