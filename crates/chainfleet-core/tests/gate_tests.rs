use chainfleet_core::simulator::SimContract;
use chainfleet_core::{
    Address, BatchConfig, GateDecision, ImplementationCode, UpgradeOptions, Version, WiringStep,
};
use chainfleet_ledger::LedgerKey;
use chainfleet_test_utils::Harness;
use pretty_assertions::assert_eq;
use std::sync::Arc;

const REQUIRED: Version = Version::new(0, 1, 2);

async fn deploy(h: &Harness, name: &str, contract: &SimContract) -> Address {
    h.provisioner()
        .provision(&LedgerKey::parse(name).unwrap(), contract, &vec![])
        .await
        .unwrap()
        .address
}

async fn configure_at(version: &str) -> (usize, usize) {
    let h = Harness::in_memory();
    let rewards = h.chain.contract("Rewards", version);
    let target = deploy(&h, "Rewards", &rewards).await;
    let step: Arc<dyn WiringStep> = Arc::new(h.chain.wiring_step("setRewards", &target, REQUIRED));

    let report = h
        .gate()
        .configure_fleet(&[step], &h.executor(), BatchConfig::new(10, 2))
        .await
        .unwrap();
    (report.applied, h.chain.stats().multicalls)
}

#[tokio::test]
async fn below_minimum_submits_nothing() {
    assert_eq!(configure_at("0.1.0").await, (0, 0));
}

#[tokio::test]
async fn at_minimum_submits_once() {
    assert_eq!(configure_at("0.1.2").await, (1, 1));
}

#[tokio::test]
async fn ordering_is_numeric_not_lexical() {
    assert_eq!(configure_at("0.1.10").await, (1, 1));
}

#[tokio::test]
async fn unreadable_version_counts_as_zero() {
    let h = Harness::in_memory();
    let legacy = h.chain.legacy_contract("Legacy");
    let target = deploy(&h, "Legacy", &legacy).await;
    let step = h.chain.wiring_step("setRewards", &target, Version::new(0, 0, 1));

    let decision = h.gate().decide(&step).await.unwrap();
    assert_eq!(
        decision,
        GateDecision::NotYetApplicable {
            found: Version::ZERO,
            required: Version::new(0, 0, 1),
        }
    );
}

#[tokio::test]
async fn applied_steps_are_skipped_on_rerun() {
    let h = Harness::in_memory();
    let mut steps: Vec<Arc<dyn WiringStep>> = Vec::new();
    for (name, version) in [("A", "0.1.0"), ("B", "0.1.2"), ("C", "0.2.0")] {
        let contract = h.chain.contract(name, version);
        let target = deploy(&h, name, &contract).await;
        steps.push(Arc::new(h.chain.wiring_step("setRewards", &target, REQUIRED)));
    }

    let first = h
        .gate()
        .configure_fleet(&steps, &h.executor(), BatchConfig::new(1, 2))
        .await
        .unwrap();
    assert_eq!((first.applied, first.not_applicable, first.already_applied), (2, 1, 0));
    assert_eq!(first.receipts.len(), 2);

    let second = h
        .gate()
        .configure_fleet(&steps, &h.executor(), BatchConfig::new(1, 2))
        .await
        .unwrap();
    assert_eq!((second.applied, second.not_applicable, second.already_applied), (0, 1, 2));
    assert_eq!(h.chain.stats().multicalls, 2);
}

#[tokio::test]
async fn upgrade_makes_step_applicable() {
    let h = Harness::in_memory();
    let staking = h.chain.upgradeable("Staking", "0.1.0");
    let key = LedgerKey::parse("Staking").unwrap();
    let tracker = h.tracker();
    let proxy = tracker.deploy(&key, &staking, &vec![]).await.unwrap().address;
    let step = h.chain.wiring_step("enableSlashing", &proxy, Version::new(0, 2, 0));

    assert_eq!(h.gate().plan(&step).await.unwrap(), None);

    let code = ImplementationCode {
        name: "Staking".into(),
        version: Version::new(0, 2, 0),
        artifact: "staking-0.2.0".into(),
    };
    tracker
        .upgrade(&key, &staking, &code, &UpgradeOptions::default())
        .await
        .unwrap();

    assert!(h.gate().plan(&step).await.unwrap().is_some());
}
