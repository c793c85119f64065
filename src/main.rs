use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use log::{error, info, warn};

use spicelab::analysis::{export_results, AnalysisResult};
use spicelab::cli::{CliArgs, DemoCommand};
use spicelab::demos::{demo_circuit, demo_deck, run_millman, run_rlc_filter, DEMO_CIRCUITS};
use spicelab::ngspice::ngspice_version;

fn main() {
    let matches = create_cli().get_matches();

    let args = CliArgs::from_matches(&matches);
    init_logging(args.as_ref().map(|args| args.verbose_level).unwrap_or(0));

    if let Err(e) = args.and_then(|args| run_application(&matches, &args)) {
        error!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

/// `warn` by default, one level more per `-v`; `RUST_LOG` wins when set.
fn init_logging(verbose_level: u8) {
    let level = match verbose_level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn global(arg: Arg) -> Arg {
    arg.global(true)
}

fn create_cli() -> Command {
    Command::new("spicelab")
        .version(spicelab::VERSION)
        .about("Circuit theory demonstrations driven through ngspice")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("rlc-filter")
                .about("Bode diagrams of four low-pass and one pass-band RLC filter")
                .arg(
                    Arg::new("plot")
                        .short('p')
                        .long("plot")
                        .value_name("FILE")
                        .help("Save the Bode diagram as SVG"),
                ),
        )
        .subcommand(Command::new("millman").about("Millman's theorem with voltage and current sources"))
        .subcommand(
            Command::new("netlist")
                .about("Print the deck a demonstration hands to ngspice")
                .arg(
                    Arg::new("circuit")
                        .help("Demonstration circuit")
                        .required(true)
                        .value_parser(DEMO_CIRCUITS)
                        .index(1),
                )
                .arg(
                    Arg::new("summary")
                        .long("summary")
                        .action(ArgAction::SetTrue)
                        .help("Print node and component counts before the deck"),
                ),
        )
        .arg(global(
            Arg::new("ngspice")
                .long("ngspice")
                .value_name("PATH")
                .help("ngspice executable [default: ngspice]"),
        ))
        .arg(global(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .help("Kill ngspice after this long (e.g. 30, 500ms)"),
        ))
        .arg(global(
            Arg::new("temperature")
                .long("temperature")
                .value_name("CELSIUS")
                .help("Operating temperature [default: 25]"),
        ))
        .arg(global(
            Arg::new("nominal-temperature")
                .long("nominal-temperature")
                .value_name("CELSIUS")
                .help("Nominal temperature of model parameters [default: 25]"),
        ))
        .arg(global(
            Arg::new("keep-files")
                .long("keep-files")
                .action(ArgAction::SetTrue)
                .help("Keep the deck, rawfile and ngspice logs"),
        ))
        .arg(global(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Output file for simulation results"),
        ))
        .arg(global(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .default_value("csv")
                .value_parser(["csv", "json"])
                .help("Output format"),
        ))
        .arg(global(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase verbosity level"),
        ))
}

fn run_application(matches: &ArgMatches, args: &CliArgs) -> anyhow::Result<()> {
    let results = match &args.command {
        DemoCommand::Netlist { circuit } => {
            let summary = matches
                .subcommand_matches("netlist")
                .map(|sub| sub.get_flag("summary"))
                .unwrap_or(false);
            if summary {
                demo_circuit(circuit)?.print_summary();
                println!();
            }
            print!("{}", demo_deck(circuit, &args.simulator)?);
            return Ok(());
        }
        DemoCommand::RlcFilter => {
            info!("{}", "Starting RLC filter demonstration".green().bold());
            log_engine(args);
            let report = run_rlc_filter(&args.simulator, args.plot_file.as_deref())?;
            println!("{}", report);
            if let Some(plot) = &args.plot_file {
                info!("Bode diagram written to: {}", plot.display().to_string().bright_green());
            }
            report.results()
        }
        DemoCommand::Millman => {
            info!("{}", "Starting Millman's theorem demonstration".green().bold());
            log_engine(args);
            let report = run_millman(&args.simulator)?;
            println!("{}", report);
            report.results()
        }
    };

    export(args, &results)?;

    info!("{}", "Demonstration completed successfully!".green().bold());
    Ok(())
}

fn log_engine(args: &CliArgs) {
    match ngspice_version(&args.simulator.engine) {
        Ok(version) => info!("Using {}", version.bright_blue()),
        Err(e) => warn!("Could not query ngspice version: {}", e),
    }
}

fn export(args: &CliArgs, results: &[(String, AnalysisResult)]) -> anyhow::Result<()> {
    if let Some(output_file) = &args.output_file {
        for path in export_results(results, output_file, args.output_format)? {
            info!("Results exported to: {}", path.display().to_string().bright_green());
        }
    }
    Ok(())
}
