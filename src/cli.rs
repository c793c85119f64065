use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::ArgMatches;

use crate::simulator::SimulatorConfig;
use crate::units::{parse_spice_value, Celsius};

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: DemoCommand,
    pub simulator: SimulatorConfig,
    pub plot_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub verbose_level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemoCommand {
    RlcFilter,
    Millman,
    Netlist { circuit: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
}

impl CliArgs {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let (name, sub) = matches
            .subcommand()
            .ok_or_else(|| anyhow!("A demo to run is required"))?;

        let command = match name {
            "rlc-filter" => DemoCommand::RlcFilter,
            "millman" => DemoCommand::Millman,
            "netlist" => DemoCommand::Netlist {
                circuit: sub
                    .get_one::<String>("circuit")
                    .ok_or_else(|| anyhow!("Circuit name is required"))?
                    .clone(),
            },
            other => return Err(anyhow!("Unknown command '{}'", other)),
        };

        // Global flags are propagated to the subcommand's matches.
        let verbose_level = sub.get_count("verbose");

        let output_format = match sub.get_one::<String>("format").map(String::as_str) {
            None | Some("csv") => OutputFormat::Csv,
            Some("json") => OutputFormat::Json,
            Some(other) => return Err(anyhow!("Invalid output format '{}'", other)),
        };

        let mut simulator = SimulatorConfig::default();
        if let Some(executable) = sub.get_one::<String>("ngspice") {
            simulator.engine.executable = executable.clone();
        }
        if let Some(timeout) = sub.get_one::<String>("timeout") {
            simulator.engine.timeout = Some(parse_duration(timeout)?);
        }
        simulator.engine.keep_files = sub.get_flag("keep-files");
        if let Some(temperature) = sub.get_one::<String>("temperature") {
            simulator.temperature = parse_temperature(temperature)?;
        }
        if let Some(temperature) = sub.get_one::<String>("nominal-temperature") {
            simulator.nominal_temperature = parse_temperature(temperature)?;
        }

        let plot_file = sub
            .try_get_one::<String>("plot")
            .ok()
            .flatten()
            .map(PathBuf::from);
        let output_file = sub.get_one::<String>("output").map(PathBuf::from);

        Ok(CliArgs {
            command,
            simulator,
            plot_file,
            output_file,
            output_format,
            verbose_level,
        })
    }
}

/// Parse a duration in seconds with an optional SPICE scale (e.g. "30", "1.5", "500ms")
fn parse_duration(value: &str) -> Result<Duration> {
    let seconds = parse_spice_value(value)?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(anyhow!("Timeout must be positive, got '{}'", value));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| anyhow!("Invalid timeout '{}': {}", value, e))
}

/// Parse a temperature in degrees Celsius (e.g. "25", "-40", "27C")
fn parse_temperature(value: &str) -> Result<Celsius> {
    let trimmed = value.trim();
    let number = trimmed
        .strip_suffix('C')
        .or_else(|| trimmed.strip_suffix('c'))
        .unwrap_or(trimmed);
    let celsius: f64 = number
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid temperature '{}': {}", value, e))?;
    if celsius < -273.15 {
        return Err(anyhow!("Temperature {} °C is below absolute zero", celsius));
    }
    Ok(Celsius(celsius))
}
