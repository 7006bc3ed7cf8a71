//! Transport Tests - Bind, presentation contexts and connection lifecycle
//!
//! - Bind rejection for interfaces the server does not export
//! - Alter-context onto a second interface over one association
//! - Unknown presentation contexts, statistics and graceful shutdown

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::*;
use dcerpc::{
    DceRpcClient, DceRpcClientBuilder, DceRpcServerConfig, FaultStatus, Interface, InterfaceBuilder, RpcError,
    SyntaxId, Uuid,
};
use samr::status::STATUS_SUCCESS;
use samr::{EnumerateDomainsInSamServer, EnumerateDomainsRequest};

const ECHO_UUID: Uuid = Uuid::from_u128(0x6e0c_1b4a_5f3d_4c2e_9a71_0d8b_2f64_c3a5);

fn echo_syntax() -> SyntaxId {
    SyntaxId::new(ECHO_UUID, 1, 0)
}

/// opnum 0 echoes the stub, opnum 1 reverses it
fn echo_interface() -> Interface {
    InterfaceBuilder::from_syntax(echo_syntax())
        .raw_operation(0, |_call, stub: Bytes| async move { Ok(stub) })
        .raw_operation(1, |_call, stub: Bytes| async move {
            let mut reversed = stub.to_vec();
            reversed.reverse();
            Ok(Bytes::from(reversed))
        })
        .build()
}

async fn samr_and_echo() -> TestServer {
    let store = samr_server::SamStore::demo(DOMAIN).unwrap();
    TestServer::start(
        DceRpcServerConfig::default(),
        vec![samr::interface(std::sync::Arc::new(store)), echo_interface()],
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bind_to_unknown_interface_is_rejected() {
    init_logging();
    let server = TestServer::samr().await;

    let unknown = SyntaxId::new(Uuid::from_u128(0xdead_beef), 1, 0);
    let err = DceRpcClient::connect(server.addr, unknown).await.unwrap_err();
    assert!(matches!(err, RpcError::BindRejected(_)), "unexpected {:?}", err);

    // Wrong major version of a known interface
    let old = SyntaxId::new(samr::SAMR_UUID, 2, 0);
    let err = DceRpcClient::connect(server.addr, old).await.unwrap_err();
    assert!(matches!(err, RpcError::BindRejected(_)), "unexpected {:?}", err);

    // The server keeps serving
    let client = server.connect().await;
    assert!(client.is_bound());
    assert!(client.assoc_group_id() != 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_alter_context_adds_an_interface() {
    init_logging();
    let server = samr_and_echo().await;
    let mut client = server.connect().await;

    let echo = client.alter_context(echo_syntax()).await.unwrap();
    assert_ne!(echo, 0);
    assert_eq!(client.context_interface(echo), Some(&echo_syntax()));

    let out = client.call_on(echo, 1, Bytes::from_static(b"samr")).await.unwrap();
    assert_eq!(&out[..], b"rmas");

    // The primary context still talks SAMR on the same association
    let server_handle = connect_server(&client).await;
    let domains = client
        .call_op::<EnumerateDomainsInSamServer>(&EnumerateDomainsRequest {
            handle: server_handle,
            enumeration_context: 0,
            prefered_maximum_length: 0x1000,
        })
        .await
        .unwrap();
    assert_eq!(domains.status, STATUS_SUCCESS);

    let err = client
        .alter_context(SyntaxId::new(Uuid::from_u128(7), 1, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::BindRejected(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_presentation_context_faults() {
    init_logging();
    let server = TestServer::samr().await;
    let client = server.connect().await;

    let err = client.call_on(9, 0, Bytes::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::Fault(s) if s == u32::from(FaultStatus::UnkIf)));

    let stats = server.server.stats().snapshot();
    assert_eq!(stats.requests_received, 1);
    assert_eq!(stats.requests_failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_builder_and_stats() {
    init_logging();
    let server = samr_and_echo().await;

    let client = DceRpcClientBuilder::from_syntax(echo_syntax())
        .timeout(Duration::from_secs(5))
        .max_frag(2048)
        .connect(server.addr)
        .await
        .unwrap();
    assert_eq!(client.max_xmit_frag(), 2048);

    for i in 0..10u8 {
        let out = client.call(0, Bytes::from(vec![i; 16])).await.unwrap();
        assert_eq!(&out[..], &[i; 16]);
    }

    let stats = server.server.stats().snapshot();
    assert_eq!(stats.connections_accepted, 1);
    assert_eq!(stats.requests_received, 10);
    assert_eq!(stats.requests_processed, 10);
    assert_eq!(stats.faults_sent, 0);
    assert!(stats.bytes_received > 0 && stats.bytes_sent > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_graceful_shutdown() {
    init_logging();
    let server = TestServer::samr().await;
    let addr = server.addr;

    let client = server.connect().await;
    connect_server(&client).await;
    client.close().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("server did not stop");

    assert!(DceRpcClient::connect(addr, samr::syntax()).await.is_err());
}
