//! `riskwatch-sim` command line entry point

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use riskwatch_model::Role;
use riskwatch_sim::{run_simulator, SimulatorConfig};
use riskwatch_sync::SyncConfig;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("riskwatch-sim")
        .version(riskwatch_sim::VERSION)
        .about("Riskwatch prediction cache session simulator")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a seeded dashboard session and check cache invariants")
                .arg(
                    Arg::new("role")
                        .long("role")
                        .default_value("org_member")
                        .value_parser(value_parser!(String))
                        .help("Role of the simulated user"),
                )
                .arg(
                    Arg::new("steps")
                        .long("steps")
                        .default_value("500")
                        .value_parser(value_parser!(u64))
                        .help("Number of operations to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a network call fails"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(String))
                        .help("TOML file with the sync configuration"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(Command::new("config").about("Print the default sync configuration as TOML"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn simulator_config(matches: &ArgMatches) -> anyhow::Result<SimulatorConfig> {
    let defaults = SimulatorConfig::default();
    let role: Role = matches
        .get_one::<String>("role")
        .map(String::as_str)
        .unwrap_or("org_member")
        .parse()?;
    let failure_rate = matches
        .get_one::<f64>("failure-rate")
        .copied()
        .unwrap_or(defaults.failure_rate);
    if !(0.0..=1.0).contains(&failure_rate) {
        anyhow::bail!("failure rate must be within 0..=1, got {failure_rate}");
    }

    let sync = match matches.get_one::<String>("config") {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            let config =
                SyncConfig::from_toml_str(&text).with_context(|| format!("parsing {path}"))?;
            config.validate()?;
            config
        }
        None => defaults.sync.clone(),
    };

    Ok(SimulatorConfig {
        seed: matches.get_one::<u64>("seed").copied().unwrap_or(defaults.seed),
        steps: matches.get_one::<u64>("steps").copied().unwrap_or(defaults.steps),
        role,
        failure_rate,
        stop_on_first_violation: matches.get_flag("stop-on-violation"),
        sync,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", sub)) => {
            let config = simulator_config(sub)?;
            let json = sub.get_flag("json");
            let report = run_simulator(config).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("config", _)) => {
            print!("{}", SyncConfig::default().to_toml_string()?);
        }
        _ => {
            cli().print_help()?;
            println!();
        }
    }
    Ok(())
}
