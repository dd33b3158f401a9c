//! Pool behavior against the in-memory driver.
//!
//! These tests exercise leasing, capacity limits, health checks, idle
//! reclamation and shutdown through the public `Pool` capability.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use rdb_client::cancel::timeout_token;
use rdb_client::{
    CancellationToken, Command, Config, Connection, Error, IsolationLevel, Param, Pool, Queryer,
    Transaction,
};
use rdb_memory::{MemoryServer, open_with};
use rdb_pool::PoolConfig;

fn kv_server(name: &str) -> MemoryServer {
    MemoryServer::builder(name).with_kv_procedures().build()
}

async fn drain(next: &mut rdb_client::Next<'_>, cancel: &CancellationToken) {
    loop {
        match next.buffer(cancel).await {
            Ok(_) => {}
            Err(Error::NoMoreResults) => break,
            Err(e) => panic!("unexpected error while draining: {e}"),
        }
    }
}

// =============================================================================
// Opening
// =============================================================================

#[tokio::test]
async fn test_open_creates_init_cap_sessions() {
    let server = kv_server("pool-open");
    let pool = open_with(server.clone(), PoolConfig::new().init_cap(2).max_cap(4))
        .await
        .unwrap();

    let status = pool.status();
    assert_eq!(status.total, 2);
    assert_eq!(status.idle, 2);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.capacity, 4);
    assert_eq!(status.available, 4);
    assert_eq!(server.stats().open_sessions, 2);

    pool.close().await;
}

#[tokio::test]
async fn test_open_from_url() {
    let server = kv_server("pool-url");
    server.register();

    let config = Config::from_url("memory://localhost/pool-url?init_cap=2&max_cap=3").unwrap();
    let pool = rdb_memory::open(&config).await.unwrap();
    assert_eq!(pool.status().total, 2);
    assert_eq!(pool.status().capacity, 3);

    pool.close().await;
    rdb_memory::unregister("pool-url");
}

#[tokio::test]
async fn test_open_fails_when_server_refuses() {
    let server = kv_server("pool-refuse");
    server.set_fail_connects(true);

    let result = open_with(server.clone(), PoolConfig::new().init_cap(2).max_cap(2)).await;
    assert!(matches!(result, Err(Error::ConnectFailed(_))));
    assert_eq!(server.stats().open_sessions, 0);
}

#[tokio::test]
async fn test_open_rejects_invalid_sizes() {
    let result = open_with(kv_server("pool-sizes"), PoolConfig::new().init_cap(3).max_cap(2)).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

// =============================================================================
// Capacity
// =============================================================================

#[tokio::test]
async fn test_lease_waits_at_max_cap() {
    let server = kv_server("pool-cap");
    let pool = open_with(server.clone(), PoolConfig::new().init_cap(1).max_cap(2))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let first = pool.connection(&cancel).await.unwrap();
    let mut second = pool.connection(&cancel).await.unwrap();
    assert_eq!(pool.status().in_use, 2);
    assert_eq!(pool.status().available, 0);

    let waiting = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            pool.connection(&cancel).await.map(|conn| conn.id())
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting.is_finished());

    let released = second.id();
    second.close().await;
    let id = waiting.await.unwrap().unwrap();
    assert_eq!(id, released);
    assert_eq!(server.stats().connects, 2);

    drop(first);
    pool.close().await;
}

#[tokio::test]
async fn test_cancelled_wait_reports_exhausted() {
    let pool = open_with(kv_server("pool-exhausted"), PoolConfig::new().init_cap(1).max_cap(1))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let held = pool.connection(&cancel).await.unwrap();

    let result = pool.connection(&timeout_token(Duration::from_millis(20))).await;
    assert!(matches!(result, Err(Error::PoolExhausted)));

    drop(held);
    assert!(pool.connection(&cancel).await.is_ok());
}

#[tokio::test]
async fn test_failed_connect_keeps_accounting() {
    let server = kv_server("pool-connect-fail");
    let pool = open_with(server.clone(), PoolConfig::new().init_cap(1).max_cap(2))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let _held = pool.connection(&cancel).await.unwrap();
    server.set_fail_connects(true);
    assert!(matches!(
        pool.connection(&cancel).await,
        Err(Error::ConnectFailed(_))
    ));
    assert_eq!(pool.status().total, 1);
    assert_eq!(pool.status().available, 1);

    server.set_fail_connects(false);
    assert!(pool.connection(&cancel).await.is_ok());
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_ping() {
    let server = kv_server("pool-ping");
    let pool = open_with(server.clone(), PoolConfig::new().init_cap(1).max_cap(1))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    pool.ping(&cancel).await.unwrap();
    server.set_fail_pings(true);
    assert!(matches!(pool.ping(&cancel).await, Err(Error::Backend(_))));
    server.set_fail_pings(false);
    pool.ping(&cancel).await.unwrap();
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_checkout_health_check_replaces_broken_session() {
    let server = kv_server("pool-checkout");
    let pool = open_with(
        server.clone(),
        PoolConfig::new().init_cap(1).max_cap(1).test_on_checkout(true),
    )
    .await
    .unwrap();
    let cancel = CancellationToken::new();

    server.set_fail_pings(true);
    let conn = pool.connection(&cancel).await.unwrap();
    assert_eq!(server.stats().connects, 2);

    // the broken session is closed in the background
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(server.stats().open_sessions, 1);
    assert_eq!(pool.status().total, 1);
    drop(conn);
}

#[tokio::test]
async fn test_abandoned_cursor_resets_session() {
    let server = kv_server("pool-abandon");
    let pool = open_with(server.clone(), PoolConfig::new().init_cap(1).max_cap(1))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let mut next = pool
        .query(&cancel, &Command::new("scan"), vec![Param::new("")])
        .await
        .unwrap();
    assert_eq!(pool.status().in_use, 1);
    drop(next.result(&cancel).await.unwrap());
    drop(next);
    assert_eq!(pool.status().in_use, 0);

    let _conn = pool.connection(&cancel).await.unwrap();
    assert_eq!(server.stats().resets, 1);
    assert_eq!(server.stats().connects, 1);
}

#[tokio::test]
async fn test_drained_cursor_does_not_reset() {
    let server = kv_server("pool-drained");
    let pool = open_with(server.clone(), PoolConfig::new().init_cap(1).max_cap(1))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let mut next = pool
        .query(&cancel, &Command::new("scan"), vec![Param::new("")])
        .await
        .unwrap();
    drain(&mut next, &cancel).await;
    drop(next);

    let _conn = pool.connection(&cancel).await.unwrap();
    assert_eq!(server.stats().resets, 0);
}

#[tokio::test]
async fn test_abandoned_transaction_is_rolled_back() {
    let server = kv_server("pool-abandon-tx");
    let pool = open_with(server.clone(), PoolConfig::new().init_cap(1).max_cap(1))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    {
        let mut tx = pool.begin(&cancel, IsolationLevel::Default).await.unwrap();
        let mut next = tx
            .query(&cancel, &Command::new("put"), vec![Param::new("k"), Param::new(1)])
            .await
            .unwrap();
        drain(&mut next, &cancel).await;
    }

    let mut tx = pool.begin(&cancel, IsolationLevel::Default).await.unwrap();
    assert_eq!(server.stats().resets, 1);
    tx.commit(&cancel).await.unwrap();
    assert_eq!(server.committed("k"), None);
}

// =============================================================================
// Idle reclamation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_sessions_are_reaped_down_to_init_cap() {
    let server = kv_server("pool-reap");
    let pool = open_with(
        server.clone(),
        PoolConfig::new()
            .init_cap(1)
            .max_cap(3)
            .idle_timeout(Duration::from_secs(1))
            .reap_interval(Duration::from_millis(100)),
    )
    .await
    .unwrap();
    let cancel = CancellationToken::new();

    let leased = vec![
        pool.connection(&cancel).await.unwrap(),
        pool.connection(&cancel).await.unwrap(),
        pool.connection(&cancel).await.unwrap(),
    ];
    assert_eq!(pool.status().total, 3);
    drop(leased);
    assert_eq!(pool.status().idle, 3);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(pool.status().total, 1);
    assert_eq!(server.stats().open_sessions, 1);

    pool.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_reaps_keep_init_cap() {
    let server = kv_server("pool-reap-twice");
    let pool = open_with(
        server.clone(),
        PoolConfig::new()
            .init_cap(1)
            .max_cap(3)
            .idle_timeout(Duration::from_secs(1))
            .reap_interval(Duration::from_secs(3600)),
    )
    .await
    .unwrap();
    let cancel = CancellationToken::new();

    let leased = vec![
        pool.connection(&cancel).await.unwrap(),
        pool.connection(&cancel).await.unwrap(),
        pool.connection(&cancel).await.unwrap(),
    ];
    drop(leased);
    tokio::time::advance(Duration::from_secs(2)).await;

    // the second pass runs before the first pass's closes have finished
    pool.reap_idle();
    pool.reap_idle();
    assert_eq!(pool.status().idle, 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.status().total, 1);
    assert_eq!(server.stats().open_sessions, 1);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let server = kv_server("pool-close");
    let pool = open_with(server.clone(), PoolConfig::new().init_cap(2).max_cap(2))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    pool.close().await;
    pool.close().await;
    assert_eq!(server.stats().open_sessions, 0);
    assert_eq!(pool.status().available, 0);

    assert!(matches!(pool.connection(&cancel).await, Err(Error::PoolClosed)));
    assert!(matches!(
        pool.begin(&cancel, IsolationLevel::Default).await,
        Err(Error::PoolClosed)
    ));
    assert!(matches!(
        pool.query(&cancel, &Command::new("scan"), vec![]).await,
        Err(Error::PoolClosed)
    ));
    assert!(matches!(pool.ping(&cancel).await, Err(Error::PoolClosed)));
}

#[tokio::test]
async fn test_closed_connection_rejects_queries() {
    let pool = open_with(kv_server("pool-conn-closed"), PoolConfig::new().init_cap(1).max_cap(1))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let mut conn = pool.connection(&cancel).await.unwrap();
    assert_eq!(pool.status().available, 0);
    conn.close().await;
    conn.close().await;
    assert!(conn.is_closed());
    assert_eq!(pool.status().available, pool.status().capacity);

    assert!(matches!(
        conn.query(&cancel, &Command::new("scan"), vec![Param::new("")]).await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        conn.begin(&cancel, IsolationLevel::Default).await,
        Err(Error::ConnectionClosed)
    ));
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_close_waits_for_leased_sessions() {
    let server = kv_server("pool-close-wait");
    let pool = open_with(server.clone(), PoolConfig::new().init_cap(1).max_cap(2))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let mut conn = pool.connection(&cancel).await.unwrap();

    let closing = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.close().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!closing.is_finished());

    conn.close().await;
    closing.await.unwrap();
    assert_eq!(server.stats().open_sessions, 0);
}
