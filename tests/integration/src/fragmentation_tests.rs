//! Fragmentation Tests - SAMR calls larger than one fragment
//!
//! These tests shrink the negotiated fragment size so ordinary SAMR calls
//! span many PDUs:
//! - Requests exceeding max_xmit_frag (lookups of many names)
//! - Responses exceeding max_recv_frag (enumeration of a large domain)
//! - Reassembly limits and fragmentation under concurrent load

mod common;

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use common::*;
use dcerpc::{DceRpcClient, DceRpcClientBuilder, DceRpcServerConfig, FaultStatus, RpcError};
use futures::future::join_all;
use ndr::{ContextHandle, NdrContext};
use samr::status::*;
use samr::types::RpcSid;
use samr::*;
use samr_server::{Account, Domain, SamStore};

const SMALL_FRAG: u16 = 512;
const USERS: u32 = 400;

fn small_frag_config() -> DceRpcServerConfig {
    DceRpcServerConfig::default().with_max_frag(SMALL_FRAG, SMALL_FRAG)
}

/// One account domain holding `USERS` generated accounts
fn large_store() -> SamStore {
    let sid: RpcSid = "S-1-5-21-1000-2000-3000".parse().unwrap();
    let mut domain = Domain::new(DOMAIN, sid, 0);
    for i in 0..USERS {
        domain.add(Account::new(2000 + i, &format!("user{:04}", i)));
    }
    SamStore::new(vec![domain])
}

async fn large_server() -> TestServer {
    TestServer::start(small_frag_config(), vec![samr::interface(Arc::new(large_store()))]).await
}

async fn small_frag_client(server: &TestServer) -> DceRpcClient {
    DceRpcClientBuilder::from_syntax(samr::syntax())
        .max_frag(SMALL_FRAG)
        .connect(server.addr)
        .await
        .unwrap()
}

fn names(count: u32) -> Vec<String> {
    (0..count).map(|i| format!("user{:04}", i)).collect()
}

async fn lookup_all(client: &DceRpcClient, domain: ContextHandle, count: u32) -> Vec<u32> {
    let names = names(count);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let reply = client
        .call_op::<LookupNamesInDomain>(&LookupNamesRequest::new(domain, &refs))
        .await
        .unwrap();
    assert_eq!(reply.status, STATUS_SUCCESS);
    reply.out.relative_ids.values().to_vec()
}

/// Test: a lookup request far larger than one fragment
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_request_fragmentation() {
    init_logging();
    let server = large_server().await;
    let client = small_frag_client(&server).await;
    assert_eq!(client.max_xmit_frag(), SMALL_FRAG);
    let (_, domain) = open_account_domain(&client).await;

    let stub = ndr::encode_request::<LookupNamesInDomain>(
        &LookupNamesRequest::new(domain, &["user0000"; 300]),
        NdrContext::new(),
    )
    .unwrap();
    println!("LookupNames stub for 300 names: {} bytes", stub.len());
    assert!(stub.len() > 10 * SMALL_FRAG as usize);

    let start = Instant::now();
    let rids = lookup_all(&client, domain, 300).await;
    println!("300-name lookup completed in {:?}", start.elapsed());

    let expected: Vec<u32> = (0..300).map(|i| 2000 + i).collect();
    assert_eq!(rids, expected);
}

/// Test: an enumeration response spanning many fragments
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_response_fragmentation() {
    init_logging();
    let server = large_server().await;
    let client = small_frag_client(&server).await;
    let (_, domain) = open_account_domain(&client).await;

    let reply = client
        .call_op::<EnumerateUsersInDomain>(&EnumerateUsersRequest {
            handle: domain,
            enumeration_context: 0,
            user_account_control: 0,
            prefered_maximum_length: u32::MAX,
        })
        .await
        .unwrap();
    assert_eq!(reply.status, STATUS_SUCCESS);
    assert_eq!(reply.out.count_returned, USERS);

    let entries = reply.out.entries();
    assert_eq!(entries.len(), USERS as usize);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.relative_id, 2000 + i as u32);
        assert_eq!(entry.name.to_string(), format!("user{:04}", i));
    }
}

/// Test: both directions fragmented, LookupIds over every account
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bidirectional_large_transfer() {
    init_logging();
    let server = large_server().await;
    let client = small_frag_client(&server).await;
    let (_, domain) = open_account_domain(&client).await;

    let rids: Vec<u32> = (0..USERS).map(|i| 2000 + i).collect();
    let reply = client
        .call_op::<LookupIdsInDomain>(&LookupIdsRequest::new(domain, rids))
        .await
        .unwrap();
    assert_eq!(reply.status, STATUS_SUCCESS);
    let resolved: Vec<String> = reply.out.names.names().iter().map(|n| n.to_string()).collect();
    assert_eq!(resolved, names(USERS));
}

/// Test: a request above the reassembly limit is refused
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reassembly_limit() {
    init_logging();
    let server = TestServer::samr_with_config(small_frag_config().with_max_call_size(2048)).await;
    let client = small_frag_client(&server).await;

    let err = client.call(0, Bytes::from(vec![0u8; 8192])).await.unwrap_err();
    assert!(
        matches!(err, RpcError::Fault(s) if s == u32::from(FaultStatus::ServerTooBusy)),
        "unexpected {:?}",
        err
    );

    // Other associations are unaffected
    let other = small_frag_client(&server).await;
    assert!(!connect_server(&other).await.is_null());
}

/// Test: fragmented calls from several associations at once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fragmented_calls() {
    init_logging();
    let server = large_server().await;

    let tasks = (0..8).map(|_| {
        let addr = server.addr;
        tokio::spawn(async move {
            let client = DceRpcClientBuilder::from_syntax(samr::syntax())
                .max_frag(SMALL_FRAG)
                .connect(addr)
                .await
                .unwrap();
            let (_, domain) = open_account_domain(&client).await;
            let mut total = 0;
            for _ in 0..5 {
                total += lookup_all(&client, domain, 200).await.len();
            }
            total
        })
    });

    let results = join_all(tasks).await;
    for result in results {
        assert_eq!(result.unwrap(), 1000);
    }
    assert_eq!(server.server.stats().snapshot().faults_sent, 0);
}
