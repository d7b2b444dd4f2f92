use chainfleet_core::{
    namespace_status, BatchConfig, BatchSubmitter, ConfirmError, FleetError, GroupState,
    MigrationError, MigrationTarget, ProvisionError,
};
use chainfleet_ledger::{Ledger, LedgerKey};
use chainfleet_test_utils::{address, items, sim_chain, temp_ledger, Harness, TEST_NETWORK};
use pretty_assertions::assert_eq;

fn migrated_flag(owner: &chainfleet_core::Address, item: &str) -> LedgerKey {
    LedgerKey::parse(format!("migration.{owner}.items.{item}.migrated")).unwrap()
}

#[tokio::test]
async fn rerun_migrates_exactly_the_remaining_items() {
    let h = Harness::in_memory();
    let owner = address(1);
    let workflow = h.workflow(BatchConfig::new(2, 2));
    for i in 5..10 {
        h.chain.skip_item(&format!("item-{i}"));
    }

    let first = workflow.run(&owner, items(&owner, 10)).await.unwrap();
    assert_eq!(first.state, GroupState::ItemsMigrating);
    assert_eq!((first.migrated_now, first.remaining), (5, 5));
    // item-0..1 ride the creation call, item-2..9 go out in 4 chunks
    assert_eq!(h.chain.stats().single_calls, 1);
    assert_eq!(h.chain.stats().multicalls, 4);

    for i in 5..10 {
        h.chain.unskip_item(&format!("item-{i}"));
    }
    let second = workflow.run(&owner, items(&owner, 10)).await.unwrap();

    assert_eq!(second.state, GroupState::Complete);
    assert_eq!(second.group_id, first.group_id);
    assert!(!second.created);
    assert_eq!((second.migrated_now, second.remaining), (5, 0));
    // ceil(5 / 2) more chunks, no second group
    assert_eq!(h.chain.stats().multicalls, 4 + 3);
    assert_eq!(h.chain.stats().single_calls, 1);
    assert_eq!(h.chain.group_count(), 1);
    assert_eq!(h.chain.group_items(first.group_id).len(), 10);
}

#[tokio::test]
async fn partial_chunk_marks_only_evidenced_items() {
    let h = Harness::in_memory();
    let owner = address(2);
    h.chain.skip_item("item-3");

    let report = h
        .workflow(BatchConfig::new(2, 1))
        .run(&owner, items(&owner, 4))
        .await
        .unwrap();
    assert_eq!(report.remaining, 1);

    let ledger = &h.ledger;
    assert_eq!(ledger.get_as::<bool>(&migrated_flag(&owner, "item-2")).await.unwrap(), Some(true));
    assert_eq!(ledger.get_as::<bool>(&migrated_flag(&owner, "item-3")).await.unwrap(), Some(false));
}

#[tokio::test]
async fn crash_before_group_id_commit_does_not_create_second_group() {
    let (dir, ledger) = temp_ledger();
    let chain = sim_chain();
    let owner = address(3);
    let h = Harness::new(chain.clone(), ledger);

    // The creation call is accepted, then the node goes away
    chain.crash_after(1);
    let err = h
        .workflow(BatchConfig::new(3, 2))
        .run(&owner, items(&owner, 7))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Provision(ProvisionError::Confirm {
            source: ConfirmError::Exhausted { .. },
            ..
        })
    ));
    assert!(FleetError::from(err).is_retryable());
    drop(h);

    chain.recover();
    let restarted = Harness::new(chain.clone(), Ledger::open(dir.path(), TEST_NETWORK));
    let report = restarted
        .workflow(BatchConfig::new(3, 2))
        .run(&owner, items(&owner, 7))
        .await
        .unwrap();

    assert!(report.created);
    assert_eq!(report.state, GroupState::Complete);
    assert_eq!(chain.group_count(), 1);
    assert_eq!(chain.stats().single_calls, 1);
    assert_eq!(chain.group_owner(report.group_id), Some(owner));
}

#[tokio::test]
async fn completed_group_is_not_touched_again() {
    let h = Harness::in_memory();
    let owner = address(4);
    let workflow = h.workflow(BatchConfig::new(4, 2));

    workflow.run(&owner, items(&owner, 6)).await.unwrap();
    let submissions = h.chain.stats().submissions;

    let again = workflow.run(&owner, items(&owner, 6)).await.unwrap();
    assert_eq!(again.state, GroupState::Complete);
    assert_eq!(again.migrated_now, 0);
    assert_eq!(h.chain.stats().submissions, submissions);
}

#[tokio::test]
async fn failed_chunk_keeps_confirmed_progress() {
    let h = Harness::in_memory();
    let owner = address(5);
    // Chunks after creation: [2,3] [4,5] [6,7]; the second reverts
    h.chain.revert_multicall(1);

    let workflow = h.workflow(BatchConfig::new(2, 1));
    let err = workflow.run(&owner, items(&owner, 8)).await.unwrap_err();
    assert!(matches!(err, MigrationError::Batch(_)));

    let status = workflow.status(&owner).await.unwrap();
    assert_eq!(status.migrated, 4);
    assert_eq!(status.state, GroupState::ItemsMigrating);

    let report = workflow.run(&owner, items(&owner, 8)).await.unwrap();
    assert_eq!(report.state, GroupState::Complete);
    assert_eq!(report.migrated_now, 4);
}

#[tokio::test]
async fn run_all_reports_every_group() {
    let h = Harness::in_memory();
    let owners = [address(6), address(7), address(8)];
    let groups = owners
        .iter()
        .map(|owner| (owner.clone(), items(owner, 5)))
        .collect();

    let reports = h.workflow(BatchConfig::new(2, 2)).run_all(groups).await.unwrap();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.state == GroupState::Complete));

    let ids: std::collections::BTreeSet<u64> = reports.iter().map(|r| r.group_id).collect();
    assert_eq!(ids.len(), 3);

    let statuses = namespace_status(&h.ledger, "migration").await.unwrap();
    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|s| s.total == 5 && s.migrated == 5 && s.pending.is_none()));
}

#[tokio::test]
async fn fully_marked_group_recovers_uncommitted_id() {
    let h = Harness::in_memory();
    let owner = address(9);
    let group_key = LedgerKey::parse(format!("migration.{owner}")).unwrap();

    // Creation confirmed and every item marked, but the id never recorded
    let call = h.chain.encode_create_group(&owner, &items(&owner, 2)).unwrap();
    let pending = h.chain.submit(&call).await.unwrap();
    h.ledger.set(&group_key.pending(), &pending).await.unwrap();
    for item in ["item-0", "item-1"] {
        h.ledger.set(&migrated_flag(&owner, item), &true).await.unwrap();
    }

    let report = h
        .workflow(BatchConfig::new(5, 2))
        .run(&owner, items(&owner, 2))
        .await
        .unwrap();
    assert_eq!(report.state, GroupState::Complete);
    assert_ne!(report.group_id, 0);
    assert_eq!(
        h.ledger.get_as::<u64>(&group_key.child("poolId").unwrap()).await.unwrap(),
        Some(report.group_id)
    );
    assert_eq!(h.chain.group_count(), 1);
    assert_eq!(h.chain.stats().single_calls, 1);
    assert_eq!(h.chain.group_owner(report.group_id), Some(owner));
}

#[tokio::test]
async fn creation_carrying_every_item_survives_crash() {
    let (dir, ledger) = temp_ledger();
    let chain = sim_chain();
    let owner = address(10);
    let batch = BatchConfig::new(5, 2);
    let pool_key = LedgerKey::parse(format!("migration.{owner}.poolId")).unwrap();

    chain.crash_after(1);
    let h = Harness::new(chain.clone(), ledger);
    assert!(h.workflow(batch).run(&owner, items(&owner, 3)).await.is_err());
    drop(h);

    chain.recover();
    let h = Harness::new(chain.clone(), Ledger::open(dir.path(), TEST_NETWORK));
    let report = h.workflow(batch).run(&owner, items(&owner, 3)).await.unwrap();
    assert_eq!(report.state, GroupState::Complete);
    assert_ne!(report.group_id, 0);
    assert_eq!(h.ledger.get_as::<u64>(&pool_key).await.unwrap(), Some(report.group_id));
    assert_eq!((chain.stats().single_calls, chain.stats().multicalls), (1, 0));

    let again = h.workflow(batch).run(&owner, items(&owner, 3)).await.unwrap();
    assert_eq!(again.group_id, report.group_id);
    assert_eq!(h.ledger.get_as::<u64>(&pool_key).await.unwrap(), Some(report.group_id));
    assert_eq!(chain.stats().single_calls, 1);
}

#[tokio::test]
async fn bare_migrated_flags_count_as_items() {
    let h = Harness::in_memory();
    let owner = address(11);
    h.ledger.set(&migrated_flag(&owner, "item-0"), &true).await.unwrap();

    let workflow = h.workflow(BatchConfig::new(2, 2));
    let group = workflow.load_group(&owner, items(&owner, 3)).await.unwrap();
    assert_eq!(group.items.len(), 3);
    assert_eq!(group.pending_count(), 2);

    let status = workflow.status(&owner).await.unwrap();
    assert_eq!((status.migrated, status.total), (1, 3));
}
