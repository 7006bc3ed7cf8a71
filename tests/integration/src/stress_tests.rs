//! Stress Tests - Many associations against one SAMR server
//!
//! These tests look for races in connection handling and in the shared
//! account store by:
//! - Running many concurrent clients through full SAMR sessions
//! - Updating distinct accounts from different associations at once
//! - Churning connections and hitting the connection limit

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use dcerpc::{DceRpcClient, DceRpcServerConfig};
use futures::future::join_all;
use samr::status::*;
use samr::types::RpcSid;
use samr::user::{class as user_class, UserStringInformation};
use samr::*;
use samr_server::{Account, Domain, SamStore};
use tokio::sync::Barrier;

#[derive(Default)]
struct ConcurrentStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl ConcurrentStats {
    fn record(&self, ok: bool) {
        let counter = if ok { &self.succeeded } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn print(&self, label: &str, elapsed: Duration) {
        let ok = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        println!(
            "{}: {} ok, {} failed in {:?} ({:.0} calls/s)",
            label,
            ok,
            failed,
            elapsed,
            ok as f64 / elapsed.as_secs_f64()
        );
    }
}

/// Test: many clients running full sessions at once
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_high_concurrency_many_clients() {
    init_logging();

    const NUM_CLIENTS: usize = 40;
    const ROUNDS: usize = 25;

    let server = TestServer::samr().await;
    let stats = Arc::new(ConcurrentStats::default());
    let barrier = Arc::new(Barrier::new(NUM_CLIENTS));
    let start = Instant::now();

    let tasks = (0..NUM_CLIENTS).map(|_| {
        let stats = Arc::clone(&stats);
        let barrier = Arc::clone(&barrier);
        let addr = server.addr;
        tokio::spawn(async move {
            barrier.wait().await;
            let client = DceRpcClient::connect(addr, samr::syntax()).await.unwrap();
            let (_, domain) = open_account_domain(&client).await;

            for _ in 0..ROUNDS {
                let reply = client
                    .call_op::<LookupNamesInDomain>(&LookupNamesRequest::new(domain, &["alice", "bob"]))
                    .await;
                let ok = matches!(
                    &reply,
                    Ok(r) if r.status == STATUS_SUCCESS && r.out.relative_ids.values() == [1104, 1105]
                );
                stats.record(ok);
            }
            client.close().await.unwrap();
        })
    });

    for result in join_all(tasks).await {
        result.unwrap();
    }
    stats.print("lookups", start.elapsed());

    assert_eq!(stats.failed.load(Ordering::Relaxed), 0);
    assert_eq!(
        stats.succeeded.load(Ordering::Relaxed),
        (NUM_CLIENTS * ROUNDS) as u64
    );
}

/// Test: concurrent writers on one domain each own an account
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_account_updates() {
    init_logging();

    const WRITERS: u32 = 16;
    const UPDATES: u32 = 20;

    let sid: RpcSid = "S-1-5-21-7-8-9".parse().unwrap();
    let mut domain = Domain::new(DOMAIN, sid, 0);
    for i in 0..WRITERS {
        domain.add(Account::new(3000 + i, &format!("writer{}", i)));
    }
    let server = TestServer::start(
        DceRpcServerConfig::default(),
        vec![samr::interface(Arc::new(SamStore::new(vec![domain])))],
    )
    .await;

    let tasks = (0..WRITERS).map(|i| {
        let addr = server.addr;
        tokio::spawn(async move {
            let client = DceRpcClient::connect(addr, samr::syntax()).await.unwrap();
            let (_, domain) = open_account_domain(&client).await;
            let user = client
                .call_op::<OpenUser>(&OpenUserRequest {
                    handle: domain,
                    desired_access: 0x0002_011B,
                    user_id: 3000 + i,
                })
                .await
                .unwrap()
                .out
                .handle;

            for n in 0..UPDATES {
                let comment = format!("writer {} update {}", i, n);
                let set = client
                    .call_op::<SetInformationUser>(&SetInformationUserRequest::new(
                        user,
                        UserInfo::AdminComment(UserStringInformation::new(&comment)),
                    ))
                    .await
                    .unwrap();
                assert_eq!(set.status, STATUS_SUCCESS);
            }

            let read = client
                .call_op::<QueryInformationUser>(&QueryInformationUserRequest {
                    handle: user,
                    information_class: user_class::ADMIN_COMMENT,
                })
                .await
                .unwrap();
            let expected = format!("writer {} update {}", i, UPDATES - 1);
            assert_eq!(
                read.out.buffer.as_ref(),
                Some(&UserInfo::AdminComment(UserStringInformation::new(&expected)))
            );
        })
    });

    for result in join_all(tasks).await {
        result.unwrap();
    }

    // Every update bumped the domain's modified count
    let client = server.connect().await;
    let (_, domain) = open_account_domain(&client).await;
    let general = client
        .call_op::<QueryInformationDomain>(&QueryInformationDomainRequest {
            handle: domain,
            information_class: samr::domain::class::MODIFIED,
        })
        .await
        .unwrap();
    let Some(DomainInfo::Modified(modified)) = general.out.buffer.as_ref() else {
        panic!("expected modified information");
    };
    assert_eq!(
        modified.domain_modified_count.value(),
        1 + i64::from(WRITERS) + i64::from(WRITERS * UPDATES)
    );
}

/// Test: open and close many short associations
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_churn() {
    init_logging();

    const CONNECTIONS: usize = 100;

    let server = TestServer::samr().await;
    let start = Instant::now();
    for _ in 0..CONNECTIONS {
        let client = server.connect().await;
        let handle = connect_server(&client).await;
        assert!(!handle.is_null());
        client.close().await.unwrap();
    }
    println!("{} connections in {:?}", CONNECTIONS, start.elapsed());

    // Connection tasks finish shortly after the client side closes
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = server.server.stats().snapshot();
        if stats.connections_active == 0 {
            assert_eq!(stats.connections_accepted, CONNECTIONS as u64);
            break;
        }
        assert!(Instant::now() < deadline, "{} connections still active", stats.connections_active);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Test: connections past the limit are turned away
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_limit() {
    init_logging();

    let server = TestServer::samr_with_config(DceRpcServerConfig::default().with_max_connections(2)).await;
    let first = server.connect().await;
    let second = server.connect().await;

    let third = DceRpcClient::connect(server.addr, samr::syntax()).await;
    assert!(third.is_err());
    assert_eq!(server.server.stats().snapshot().connections_rejected, 1);

    // The admitted associations keep working
    assert!(!connect_server(&first).await.is_null());
    assert!(!connect_server(&second).await.is_null());
}
