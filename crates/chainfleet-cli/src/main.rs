//! chainfleet operator CLI
//!
//! Inspects and repairs network ledgers, reports migration progress, and
//! runs the full pipeline against the in-process simulated chain.

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod simulate;

fn cli() -> Command {
    Command::new("chainfleet")
        .version(chainfleet_core::VERSION)
        .about("Idempotent provisioning and resumable migration for on-chain fleets")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("ledger-dir")
                .long("ledger-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding one ledger per network [default: from config, else ./deployments]"),
        )
        .arg(
            Arg::new("network")
                .long("network")
                .global(true)
                .default_value("localhost")
                .help("Network identity; selects the ledger document"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML engine configuration"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("JSON output and JSON logs"),
        )
        .subcommand(
            Command::new("ledger")
                .about("Read or repair the network ledger")
                .subcommand_required(true)
                .subcommand(
                    Command::new("get")
                        .about("Print the value at a dotted key")
                        .arg(Arg::new("key").required(true)),
                )
                .subcommand(
                    Command::new("set")
                        .about("Write a value (parsed as JSON, else stored as a string)")
                        .arg(Arg::new("key").required(true))
                        .arg(Arg::new("value").required(true)),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Remove a key")
                        .arg(Arg::new("key").required(true)),
                )
                .subcommand(
                    Command::new("clear-pending")
                        .about("Forget the pending submission recorded for a key")
                        .arg(Arg::new("key").required(true)),
                )
                .subcommand(
                    Command::new("reset")
                        .about("Empty the whole ledger")
                        .arg(
                            Arg::new("yes")
                                .long("yes")
                                .action(ArgAction::SetTrue)
                                .help("Confirm the reset"),
                        ),
                )
                .subcommand(Command::new("dump").about("Print the whole ledger")),
        )
        .subcommand(
            Command::new("status")
                .about("Report migration progress from the ledger")
                .arg(
                    Arg::new("namespace")
                        .long("namespace")
                        .help("Migration namespace [default: from config, else migration]"),
                )
                .arg(
                    Arg::new("owner")
                        .long("owner")
                        .help("Single group owner; all groups when omitted"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the full pipeline against a simulated chain")
                .arg(
                    Arg::new("items")
                        .long("items")
                        .default_value("25")
                        .value_parser(value_parser!(usize))
                        .help("Items per owner"),
                )
                .arg(
                    Arg::new("owners")
                        .long("owners")
                        .default_value("3")
                        .value_parser(value_parser!(u8))
                        .help("Number of migration groups"),
                )
                .arg(
                    Arg::new("chunk-size")
                        .long("chunk-size")
                        .value_parser(value_parser!(usize))
                        .help("Operations per multicall [default: from config, else 50]"),
                )
                .arg(
                    Arg::new("parallelism")
                        .long("parallelism")
                        .value_parser(value_parser!(usize))
                        .help("Unconfirmed multicalls at once [default: from config, else 4]"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("jitter-ms")
                        .long("jitter-ms")
                        .default_value("20")
                        .value_parser(value_parser!(u64))
                        .help("Upper bound of simulated confirmation delay"),
                )
                .arg(
                    Arg::new("crash-after")
                        .long("crash-after")
                        .value_parser(value_parser!(usize))
                        .help("Crash after this many submissions, then resume"),
                )
                .arg(
                    Arg::new("dump")
                        .long("dump")
                        .action(ArgAction::SetTrue)
                        .help("Print the resulting ledger"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json"));

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: cannot start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(commands::run(&matches)) {
        eprintln!("error: {err:#}");
        if let Some(hint) = commands::intervention_hint(&err) {
            eprintln!("hint: {hint}");
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let matches = cli()
            .try_get_matches_from([
                "chainfleet",
                "ledger",
                "clear-pending",
                "Staking",
                "--network",
                "sepolia",
            ])
            .unwrap();
        assert_eq!(matches.get_one::<String>("network").unwrap(), "sepolia");
    }

    #[test]
    fn simulate_defaults() {
        let matches = cli().try_get_matches_from(["chainfleet", "simulate"]).unwrap();
        let (_, sim) = matches.subcommand().unwrap();
        assert_eq!(*sim.get_one::<usize>("items").unwrap(), 25);
        assert_eq!(sim.get_one::<usize>("crash-after"), None);
    }
}
