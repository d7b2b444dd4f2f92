//! `chainfleet simulate`: the whole pipeline against an in-process chain
//!
//! Deploys a token and an upgradeable staking proxy, upgrades the proxy,
//! applies version-gated wiring, registers names, then migrates every
//! group. With `--crash-after` the chain stops accepting submissions part
//! way through; the run is then resumed from the same ledger.

use crate::commands::Session;
use anyhow::{Context, Result};
use chainfleet_core::simulator::{SimConfig, SimStats, SimulatedChain};
use chainfleet_core::{
    Address, ChainConfig, ChainId, ConfirmationPolicy, ConstructorArgs, FleetError,
    ImplementationCode, MigrationItem, MigrationReport, MigrationWorkflow, NameRegistrar,
    NameRequest, Provisioner, ProxyTracker, BatchExecutor, UpgradeOptions, UpgradeOutcome,
    Version, VersionGate, WiringStep,
};
use chainfleet_ledger::{Ledger, LedgerKey};
use clap::ArgMatches;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SIM_CHAIN: ChainId = ChainId(31_337);
const STAKING_TARGET: Version = Version::new(0, 1, 2);

/// Shape of one simulated fleet
#[derive(Debug, Clone, Copy)]
struct Plan {
    owners: u8,
    items: usize,
}

#[derive(Debug, Serialize)]
struct WiringSummary {
    applied: usize,
    not_applicable: usize,
    already_applied: usize,
}

#[derive(Debug, Serialize)]
struct NameSummary {
    node: String,
    created: bool,
    transferred: bool,
}

#[derive(Debug, Serialize)]
struct PipelineReport {
    token: Address,
    staking: Address,
    staking_version: Version,
    staking_upgrade: &'static str,
    wiring: WiringSummary,
    names: Vec<NameSummary>,
    groups: Vec<MigrationReport>,
}

#[derive(Debug, Serialize)]
struct SimulationOutput {
    seed: u64,
    network: String,
    interrupted: bool,
    elapsed_ms: u128,
    report: PipelineReport,
    stats: SimStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    ledger: Option<Map<String, Value>>,
}

/// Run the simulation described by `args`
pub(crate) async fn run(session: &Session, args: &ArgMatches) -> Result<()> {
    let plan = Plan {
        owners: args.get_one::<u8>("owners").copied().unwrap_or(3),
        items: args.get_one::<usize>("items").copied().unwrap_or(25),
    };
    let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);
    let jitter = args.get_one::<u64>("jitter-ms").copied().unwrap_or(0);
    let crash_after = args.get_one::<usize>("crash-after").copied();

    let mut config = session.chain_config().cloned().unwrap_or_else(|| {
        ChainConfig::new(SIM_CHAIN, session.network.clone()).with_confirmation(
            ConfirmationPolicy::new()
                .with_max_attempts(3)
                .with_backoff(Duration::from_millis(10), Duration::from_millis(50)),
        )
    });
    if let Some(chunk_size) = args.get_one::<usize>("chunk-size") {
        config.batch.chunk_size = *chunk_size;
    }
    if let Some(parallelism) = args.get_one::<usize>("parallelism") {
        config.batch.parallelism = *parallelism;
    }

    // Simulated state lives only as long as this process; so does its ledger
    let scratch = tempfile::tempdir().context("creating scratch ledger directory")?;
    let chain = Arc::new(SimulatedChain::new(
        SimConfig::default().with_seed(seed).with_jitter(jitter),
    ));
    chain.set_name_owner("eth", &Address::from_bytes([0xee; Address::LEN]));
    chain.set_name_owner("fleet.eth", chain.operator());

    tracing::info!(
        seed,
        owners = plan.owners,
        items = plan.items,
        chunk_size = config.batch.chunk_size,
        parallelism = config.batch.parallelism,
        ledger = %scratch.path().display(),
        "starting simulation"
    );
    let started = Instant::now();

    let mut interrupted = false;
    if let Some(limit) = crash_after {
        chain.crash_after(limit);
        let ledger = Ledger::open(scratch.path(), &config.network);
        match pipeline(&chain, ledger, &config, plan).await {
            Ok(_) => tracing::info!(limit, "pipeline finished before the crash point"),
            Err(err) => {
                interrupted = true;
                tracing::warn!(
                    error = %err,
                    retryable = err.is_retryable(),
                    submissions = chain.stats().submissions,
                    "run interrupted; resuming from the ledger"
                );
            }
        }
        chain.recover();
    }

    // Fresh handles over the reopened document, as after a process restart
    let ledger = Ledger::open(scratch.path(), &config.network);
    let report = pipeline(&chain, ledger.clone(), &config, plan).await?;

    let output = SimulationOutput {
        seed,
        network: config.network.clone(),
        interrupted,
        elapsed_ms: started.elapsed().as_millis(),
        report,
        stats: chain.stats(),
        ledger: if args.get_flag("dump") {
            Some(ledger.snapshot().await?)
        } else {
            None
        },
    };

    if session.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_output(&output)?;
    }
    Ok(())
}

async fn pipeline(
    chain: &Arc<SimulatedChain>,
    ledger: Ledger,
    config: &ChainConfig,
    plan: Plan,
) -> Result<PipelineReport, FleetError> {
    let provisioner = Provisioner::new(ledger, chain.clone(), config.confirmation.clone());
    let executor = BatchExecutor::new(chain.clone(), chain.clone(), config.confirmation.clone());
    let no_args = ConstructorArgs::new();

    let token = chain.contract("Token", "1.0.0");
    let token = provisioner
        .provision(&LedgerKey::parse("Token")?, &token, &no_args)
        .await?;

    let tracker = ProxyTracker::new(provisioner.clone());
    let staking_key = LedgerKey::parse("Staking")?;
    let staking = chain.upgradeable("Staking", "0.1.0");
    let proxy = tracker.deploy(&staking_key, &staking, &no_args).await?;
    let code = ImplementationCode {
        name: "Staking".into(),
        version: STAKING_TARGET,
        artifact: format!("staking-{STAKING_TARGET}"),
    };
    let upgrade = tracker
        .upgrade(&staking_key, &staking, &code, &UpgradeOptions::default())
        .await?;
    let (staking_version, staking_upgrade) = match upgrade {
        UpgradeOutcome::Current(v) => (v, "current"),
        UpgradeOutcome::Recovered(v) => (v, "recovered"),
        UpgradeOutcome::Upgraded(v) => (v, "upgraded"),
    };

    let steps: Vec<Arc<dyn WiringStep>> = vec![
        Arc::new(chain.wiring_step("setRewards", &proxy.address, STAKING_TARGET)),
        Arc::new(chain.wiring_step("enableSlashing", &proxy.address, Version::new(0, 2, 0))),
        Arc::new(chain.wiring_step("setMinter", &token.address, Version::new(1, 0, 0))),
    ];
    let wiring = VersionGate::new(chain.clone())
        .configure_fleet(&steps, &executor, config.batch)
        .await?;

    let custodian = Address::from_bytes([0xcc; Address::LEN]);
    let requests = vec![
        NameRequest::new("staking.fleet.eth", proxy.address.clone())
            .with_final_owner(custodian.clone()),
        NameRequest::new("token.fleet.eth", token.address.clone()).with_final_owner(custodian),
    ];
    let names = NameRegistrar::new(provisioner.clone(), chain.clone(), chain.operator().clone())
        .register_all(&requests)
        .await?;

    let workflow = MigrationWorkflow::new(provisioner, executor, chain.clone(), chain.clone(), config);
    let groups = (1..=plan.owners)
        .map(|n| {
            let owner = owner_address(n);
            let items = discover(&owner, config.chain_id, plan.items);
            (owner, items)
        })
        .collect();
    let groups = workflow.run_all(groups).await?;

    Ok(PipelineReport {
        token: token.address,
        staking: proxy.address,
        staking_version,
        staking_upgrade,
        wiring: WiringSummary {
            applied: wiring.applied,
            not_applicable: wiring.not_applicable,
            already_applied: wiring.already_applied,
        },
        names: names
            .into_iter()
            .map(|r| NameSummary {
                node: r.node,
                created: r.created,
                transferred: r.transferred,
            })
            .collect(),
        groups,
    })
}

fn owner_address(n: u8) -> Address {
    let mut bytes = [0u8; Address::LEN];
    bytes[0] = 0xb0;
    bytes[Address::LEN - 1] = n;
    Address::from_bytes(bytes)
}

/// Stand-in for an indexer query: every item of `owner`, none migrated
fn discover(owner: &Address, chain_id: ChainId, count: usize) -> Vec<MigrationItem> {
    (0..count)
        .map(|i| {
            MigrationItem::new(format!("stake-{i}"), owner.clone(), chain_id)
                .with_attribute("amount", (i as u64 + 1) * 1_000)
        })
        .collect()
}

fn print_output(output: &SimulationOutput) -> Result<()> {
    let report = &output.report;
    let stats = &output.stats;

    println!(
        "Simulation seed {} on '{}'{}",
        output.seed,
        output.network,
        if output.interrupted { " (resumed after crash)" } else { "" }
    );
    println!("  Token     {}", report.token);
    println!(
        "  Staking   {} implementation {} ({})",
        report.staking, report.staking_version, report.staking_upgrade
    );
    println!(
        "  Wiring    {} applied, {} not yet applicable, {} already applied",
        report.wiring.applied, report.wiring.not_applicable, report.wiring.already_applied
    );
    for name in &report.names {
        println!(
            "  Name      {:<24} created={} transferred={}",
            name.node, name.created, name.transferred
        );
    }
    for group in &report.groups {
        println!(
            "  Group {:>3} {} {:<16} migrated {} remaining {}",
            group.group_id,
            group.owner,
            group.state.to_string(),
            group.migrated_now,
            group.remaining
        );
    }
    println!(
        "  Chain     {} submissions ({} multicalls, peak {} in flight), {} reverted, {} ms",
        stats.submissions, stats.multicalls, stats.max_in_flight, stats.reverted, output.elapsed_ms
    );
    if let Some(ledger) = &output.ledger {
        println!("{}", serde_json::to_string_pretty(ledger)?);
    }
    Ok(())
}
