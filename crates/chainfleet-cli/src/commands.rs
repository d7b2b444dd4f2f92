//! Subcommand handlers

use crate::simulate;
use anyhow::{bail, Context, Result};
use chainfleet_core::{
    group_status, namespace_status, Address, ChainConfig, EngineConfig, FleetError,
    MigrationStatus,
};
use chainfleet_ledger::{Ledger, LedgerKey};
use clap::ArgMatches;
use serde_json::Value;
use std::path::PathBuf;

const DEFAULT_NAMESPACE: &str = "migration";

/// Global options resolved against the optional config file
pub(crate) struct Session {
    pub(crate) config: EngineConfig,
    pub(crate) ledger_dir: PathBuf,
    pub(crate) network: String,
    pub(crate) json: bool,
}

impl Session {
    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let config = match matches.get_one::<PathBuf>("config") {
            Some(path) => EngineConfig::load(path)
                .map_err(FleetError::from)
                .with_context(|| format!("loading {}", path.display()))?,
            None => EngineConfig::default(),
        };
        let ledger_dir = matches
            .get_one::<PathBuf>("ledger-dir")
            .cloned()
            .unwrap_or_else(|| config.ledger_dir.clone());
        let network = matches
            .get_one::<String>("network")
            .cloned()
            .unwrap_or_else(|| "localhost".to_string());
        if network.is_empty() || network.contains(['/', '\\', '.']) {
            bail!("network name '{network}' must be non-empty and path-safe");
        }
        Ok(Self {
            config,
            ledger_dir,
            network,
            json: matches.get_flag("json"),
        })
    }

    fn ledger(&self) -> Ledger {
        Ledger::open(&self.ledger_dir, &self.network)
    }

    /// Configured parameters for the selected network
    pub(crate) fn chain_config(&self) -> Option<&ChainConfig> {
        self.config.network(&self.network)
    }

    fn print_json(value: &impl serde::Serialize) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Dispatch the parsed command line
pub(crate) async fn run(matches: &ArgMatches) -> Result<()> {
    let session = Session::from_matches(matches)?;
    match matches.subcommand() {
        Some(("ledger", args)) => ledger(&session, args).await,
        Some(("status", args)) => status(&session, args).await,
        Some(("simulate", args)) => simulate::run(&session, args).await,
        Some((other, _)) => bail!("unknown command '{other}'"),
        None => bail!("no command given"),
    }
}

/// Operator hint carried by a fleet error anywhere in the chain
pub(crate) fn intervention_hint(err: &anyhow::Error) -> Option<String> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<FleetError>())
        .and_then(FleetError::intervention_hint)
}

fn key_arg(args: &ArgMatches) -> Result<LedgerKey> {
    let raw = args
        .get_one::<String>("key")
        .context("missing ledger key")?;
    Ok(LedgerKey::parse(raw.as_str())?)
}

async fn ledger(session: &Session, matches: &ArgMatches) -> Result<()> {
    let ledger = session.ledger();
    match matches.subcommand() {
        Some(("get", args)) => {
            let key = key_arg(args)?;
            match ledger.get(&key).await? {
                Some(value) => Session::print_json(&value),
                None => bail!("'{key}' is not recorded in {}", ledger.location()),
            }
        }
        Some(("set", args)) => {
            let key = key_arg(args)?;
            let raw = args.get_one::<String>("value").context("missing value")?;
            let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            ledger.set(&key, &value).await?;
            tracing::info!(key = %key, network = %ledger.network(), "recorded");
            Ok(())
        }
        Some(("remove", args)) => {
            let key = key_arg(args)?;
            match ledger.remove(&key).await? {
                Some(previous) => {
                    tracing::info!(key = %key, previous = %previous, "removed");
                    Ok(())
                }
                None => bail!("'{key}' is not recorded in {}", ledger.location()),
            }
        }
        Some(("clear-pending", args)) => {
            let key = key_arg(args)?;
            match ledger.remove(&key.pending()).await? {
                Some(previous) => {
                    tracing::warn!(
                        key = %key,
                        pending = %previous,
                        "pending submission forgotten; the next run submits again"
                    );
                    Ok(())
                }
                None => {
                    tracing::info!(key = %key, "no pending submission recorded");
                    Ok(())
                }
            }
        }
        Some(("reset", args)) => {
            if !args.get_flag("yes") {
                bail!(
                    "refusing to reset {} without --yes; every recorded step would run again",
                    ledger.location()
                );
            }
            ledger.reset().await?;
            tracing::warn!(network = %ledger.network(), location = %ledger.location(), "ledger reset");
            Ok(())
        }
        Some(("dump", _)) => Session::print_json(&ledger.snapshot().await?),
        Some((other, _)) => bail!("unknown ledger command '{other}'"),
        None => bail!("no ledger command given"),
    }
}

async fn status(session: &Session, args: &ArgMatches) -> Result<()> {
    let namespace = args
        .get_one::<String>("namespace")
        .cloned()
        .or_else(|| {
            session
                .chain_config()
                .map(|chain| chain.migration.namespace.clone())
        })
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let ledger = session.ledger();

    let statuses = match args.get_one::<String>("owner") {
        Some(raw) => {
            let owner = Address::parse(raw)?;
            vec![group_status(&ledger, &namespace, owner.as_str())
                .await
                .map_err(FleetError::from)?]
        }
        None => namespace_status(&ledger, &namespace)
            .await
            .map_err(FleetError::from)?,
    };

    if session.json {
        return Session::print_json(&statuses);
    }
    print_statuses(&namespace, &statuses);
    Ok(())
}

fn print_statuses(namespace: &str, statuses: &[MigrationStatus]) {
    if statuses.is_empty() {
        println!("No groups recorded under '{namespace}'");
        return;
    }
    println!(
        "{:<42}  {:>6}  {:<16}  {:>9}",
        "OWNER", "GROUP", "STATE", "MIGRATED"
    );
    for status in statuses {
        println!(
            "{:<42}  {:>6}  {:<16}  {:>9}",
            status.owner,
            status.group_id,
            status.state.to_string(),
            format!("{}/{}", status.migrated, status.total)
        );
        if let Some(pending) = &status.pending {
            println!("  creation pending in {pending}");
        }
    }
}
