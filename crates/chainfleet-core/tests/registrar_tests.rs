use chainfleet_core::{NameRequest, NameService, RegistrarError};
use chainfleet_test_utils::{address, Harness};
use pretty_assertions::assert_eq;

fn setup() -> Harness {
    let h = Harness::in_memory();
    let operator = h.chain.operator().clone();
    h.chain.set_name_owner("eth", &address(0xee));
    h.chain.set_name_owner("fleet.eth", &operator);
    h
}

#[tokio::test]
async fn foreign_parent_is_rejected_without_writes() {
    let h = setup();
    h.chain.set_name_owner("fleet.eth", &address(9));

    let err = h
        .registrar()
        .register(&NameRequest::new("vault.fleet.eth", address(1)))
        .await
        .unwrap_err();

    match err {
        RegistrarError::Unauthorized {
            parent,
            parent_owner,
            ..
        } => {
            assert_eq!(parent, "fleet.eth");
            assert_eq!(parent_owner, Some(address(9)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.chain.stats().name_writes, 0);
    assert_eq!(h.chain.stats().submissions, 0);
}

#[tokio::test]
async fn register_creates_then_hands_over() {
    let h = setup();
    let request = NameRequest::new("vault.fleet.eth", address(1)).with_final_owner(address(2));

    let done = h.registrar().register(&request).await.unwrap();
    assert!(done.created && done.transferred);
    assert_eq!(h.chain.resolve("vault.fleet.eth").await.unwrap(), Some(address(1)));
    assert_eq!(h.chain.owner("vault.fleet.eth").await.unwrap(), Some(address(2)));

    // Caller no longer owns the node; the rerun must still be a no-op
    let again = h.registrar().register(&request).await.unwrap();
    assert!(again.is_noop());
    assert_eq!(h.chain.stats().name_writes, 2);
}

#[tokio::test]
async fn register_all_orders_parents_first() {
    let h = setup();
    let final_owner = address(3);
    // Listed child-first on purpose
    let requests = vec![
        NameRequest::new("rewards.vault.fleet.eth", address(5)).with_final_owner(final_owner.clone()),
        NameRequest::new("vault.fleet.eth", address(4)).with_final_owner(final_owner.clone()),
    ];

    let done = h.registrar().register_all(&requests).await.unwrap();
    assert!(done.iter().all(|r| r.created && r.transferred));
    assert_eq!(done[0].node, "rewards.vault.fleet.eth");

    for node in ["vault.fleet.eth", "rewards.vault.fleet.eth"] {
        assert_eq!(h.chain.owner(node).await.unwrap(), Some(final_owner.clone()));
    }
    assert_eq!(h.chain.stats().name_writes, 4);

    let again = h.registrar().register_all(&requests).await.unwrap();
    assert!(again.iter().all(|r| r.is_noop()));
    assert_eq!(h.chain.stats().name_writes, 4);
}

#[tokio::test]
async fn top_level_names_are_invalid() {
    let h = setup();
    let err = h
        .registrar()
        .register(&NameRequest::new("eth", address(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrarError::InvalidName(_)));
}

#[tokio::test]
async fn new_target_re_points_recorded_name() {
    let h = setup();
    let registrar = h.registrar();

    let first = registrar
        .register(&NameRequest::new("vault.fleet.eth", address(1)))
        .await
        .unwrap();
    assert!(first.created);

    // Redeployed contract; the recorded creation is for the old address
    let second = registrar
        .register(&NameRequest::new("vault.fleet.eth", address(2)))
        .await
        .unwrap();
    assert!(second.created);
    assert_eq!(h.chain.resolve("vault.fleet.eth").await.unwrap(), Some(address(2)));
    assert_eq!(h.chain.stats().name_writes, 2);

    let again = registrar
        .register(&NameRequest::new("vault.fleet.eth", address(2)))
        .await
        .unwrap();
    assert!(again.is_noop());
    assert_eq!(h.chain.stats().name_writes, 2);
}

#[tokio::test]
async fn hand_over_of_foreign_node_is_rejected() {
    let h = setup();
    let registrar = h.registrar();
    registrar
        .register(&NameRequest::new("vault.fleet.eth", address(1)).with_final_owner(address(2)))
        .await
        .unwrap();
    let writes = h.chain.stats().name_writes;

    let err = registrar
        .register(&NameRequest::new("vault.fleet.eth", address(1)).with_final_owner(address(3)))
        .await
        .unwrap_err();
    match &err {
        RegistrarError::TransferUnauthorized { node, owner, .. } => {
            assert_eq!(node, "vault.fleet.eth");
            assert_eq!(owner, &Some(address(2)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("cannot hand over 'vault.fleet.eth'"));
    assert_eq!(h.chain.stats().name_writes, writes);
}
