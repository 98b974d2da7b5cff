mod common;

use common::*;
use solsniffer_connector::{
    storage::MemoryStore,
    subscription::{SubscriptionClient, SubscriptionState},
    telemetry::PipelineStats,
    workers::{HealthSupervisor, MonitorCoordinator},
    SnifferError,
};
use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn live_notification_is_saved_exactly_once() {
    let chain = Arc::new(StubChain::default().with_transaction("sigA", transfer("sigA", WALLET, USDC, "1500", 2)));
    let store = Arc::new(MemoryStore::new());
    let stats = Arc::new(PipelineStats::new());
    let ctx = context(test_config(), chain, store.clone(), stats.clone());

    let (dialer, servers, mut requests) = ScriptedDialer::new(1);
    let client = Arc::new(SubscriptionClient::new(dialer, Duration::from_secs(1)));
    client.connect().await.unwrap();

    servers[0].push_subscribed(1, 42);
    let coordinator = Arc::new(MonitorCoordinator::new(ctx, client.clone()));
    let cancel = CancellationToken::new();
    let task = coordinator.start(&cancel).await.unwrap();
    assert_eq!(client.state(), SubscriptionState::Subscribed);

    servers[0].push_notification("sigA");
    wait_until(|| store.len() == 1).await;

    let saved = store.transactions();
    assert_eq!(saved[0].hash, hex::encode("sigA"));
    assert_eq!(saved[0].amount.to_string(), "15.00");
    assert_eq!(saved[0].destination, WALLET);

    coordinator.stop(&CancellationToken::new()).await.unwrap();
    task.await.unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(client.state(), SubscriptionState::Closed);
    assert_eq!(stats.snapshot().records_saved, 1);

    let subscribe: serde_json::Value = serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
    assert_eq!(subscribe["method"], "logsSubscribe");
    let unsubscribe: serde_json::Value = serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
    assert_eq!(unsubscribe["method"], "logsUnsubscribe");
    assert_eq!(unsubscribe["params"], serde_json::json!([42]));
}

#[tokio::test]
async fn bad_messages_do_not_stop_the_loop() {
    let chain = Arc::new(
        StubChain::default()
            .with_transaction("sigB", transfer("sigB", WALLET, USDC, "3", 0))
            .with_transaction("sigOther", transfer("sigOther", "Elsewhere", USDC, "3", 0)),
    );
    let store = Arc::new(MemoryStore::new());
    let stats = Arc::new(PipelineStats::new());
    let ctx = context(test_config(), chain, store.clone(), stats.clone());

    let (dialer, servers, _requests) = ScriptedDialer::new(1);
    let client = Arc::new(SubscriptionClient::new(dialer, Duration::from_secs(1)));
    client.connect().await.unwrap();
    servers[0].push_subscribed(1, 7);
    let coordinator = Arc::new(MonitorCoordinator::new(ctx, client));
    let cancel = CancellationToken::new();
    let task = coordinator.start(&cancel).await.unwrap();

    servers[0].push("not json");
    servers[0].push_notification("sigUnknown");
    servers[0].push_notification("sigOther");
    servers[0].push_notification("sigB");
    wait_until(|| store.len() == 1).await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.messages_received, 4);
    assert_eq!(snapshot.messages_rejected, 2);
    assert_eq!(snapshot.transactions_resolved, 2);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn subscribe_failure_fails_start() {
    let ctx = context(
        test_config(),
        Arc::new(StubChain::default()),
        Arc::new(MemoryStore::new()),
        Arc::new(PipelineStats::new()),
    );
    let (dialer, servers, _requests) = ScriptedDialer::new(1);
    let client = Arc::new(SubscriptionClient::new(dialer, Duration::from_millis(200)));
    client.connect().await.unwrap();
    servers[0].push(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Invalid params"}}"#);

    let coordinator = Arc::new(MonitorCoordinator::new(ctx, client));
    assert!(coordinator.start(&CancellationToken::new()).await.is_err());
}

#[tokio::test]
async fn stop_closes_even_when_unsubscribe_fails() {
    let ctx = context(
        test_config(),
        Arc::new(StubChain::default()),
        Arc::new(MemoryStore::new()),
        Arc::new(PipelineStats::new()),
    );
    let (dialer, servers, requests) = ScriptedDialer::new(1);
    let client = Arc::new(SubscriptionClient::new(dialer, Duration::from_secs(1)));
    client.connect().await.unwrap();
    servers[0].push_subscribed(1, 9);

    let coordinator = Arc::new(MonitorCoordinator::new(ctx, client.clone()));
    let task = coordinator.start(&CancellationToken::new()).await.unwrap();

    // with the request side gone, the unsubscribe write fails
    drop(requests);
    let stopped = coordinator.stop(&CancellationToken::new()).await;

    assert!(matches!(stopped, Err(SnifferError::ConnectionLost(_))), "got {:?}", stopped);
    assert_eq!(client.state(), SubscriptionState::Closed);
    assert!(client.subscription_id().is_none());
    task.await.unwrap();
}

#[tokio::test]
async fn failed_establish_closes_the_unstarted_client() {
    let ctx = context(
        test_config(),
        Arc::new(StubChain::default()),
        Arc::new(MemoryStore::new()),
        Arc::new(PipelineStats::new()),
    );
    let (dialer, servers, _requests) = ScriptedDialer::new(1);
    let supervisor = HealthSupervisor::new(ctx, dialer.clone());

    // both start attempts are rejected by the server
    for id in 1..=2 {
        servers[0].push(&format!(
            r#"{{"jsonrpc":"2.0","id":{},"error":{{"code":-32602,"message":"Invalid params"}}}}"#,
            id
        ));
    }

    assert!(supervisor.establish(&CancellationToken::new()).await.is_err());
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
    // closing dropped the client's read half of the connection
    assert!(servers[0].inbound.is_closed());
}

#[tokio::test]
async fn supervisor_rebuilds_a_lost_connection() {
    let chain = Arc::new(StubChain::default().with_transaction("sigA", native_transfer("sigA", WALLET)));
    let store = Arc::new(MemoryStore::new());
    let stats = Arc::new(PipelineStats::new());
    let mut config = test_config();
    config.monitor.health_check_interval_secs = 3600;
    let ctx = context(config, chain, store.clone(), stats.clone());

    let (dialer, mut servers, _requests) = ScriptedDialer::new(2);
    let supervisor = Arc::new(HealthSupervisor::new(ctx, dialer.clone()));
    let cancel = CancellationToken::new();

    servers[0].push_subscribed(1, 1);
    let session = supervisor.establish(&cancel).await.unwrap();

    let running = {
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run(&cancel, session).await })
    };

    // the second connection answers the fresh client's first request
    servers[1].push_subscribed(1, 2);
    servers[1].push_notification("sigA");
    // dropping the server end of the first connection ends its stream
    drop(servers.remove(0));

    wait_until(|| store.len() == 1).await;
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.connections_lost, 1);
    assert_eq!(snapshot.reconnects, 1);

    cancel.cancel();
    running.await.unwrap();
}
