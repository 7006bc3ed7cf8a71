//! Shared setup for the integration test targets

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Once};

use dcerpc::{DceRpcClient, DceRpcServer, DceRpcServerConfig, Interface};
use ndr::ContextHandle;
use samr::{Connect, ConnectRequest, LookupDomainInSamServer, LookupDomainRequest, OpenDomain, OpenDomainRequest};
use samr_server::SamStore;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

pub const DOMAIN: &str = "CONTOSO";

static INIT: Once = Once::new();

/// Install a test subscriber once per process. `RUST_LOG` selects the level.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A server on an ephemeral port, stopped on drop
pub struct TestServer {
    pub addr: SocketAddr,
    pub server: Arc<DceRpcServer>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<dcerpc::Result<()>>,
}

impl TestServer {
    pub async fn start(config: DceRpcServerConfig, interfaces: Vec<Interface>) -> Self {
        let server = Arc::new(DceRpcServer::with_config(config));
        for interface in interfaces {
            server.register_interface(interface).await;
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel();

        let running = Arc::clone(&server);
        let task = tokio::spawn(async move {
            running
                .serve_listener(listener, async {
                    let _ = rx.await;
                })
                .await
        });

        Self {
            addr,
            server,
            shutdown: Some(tx),
            task,
        }
    }

    /// SAMR over the demo store with default limits
    pub async fn samr() -> Self {
        Self::samr_with_config(DceRpcServerConfig::default()).await
    }

    pub async fn samr_with_config(config: DceRpcServerConfig) -> Self {
        let store = SamStore::demo(DOMAIN).expect("demo store");
        Self::start(config, vec![samr::interface(Arc::new(store))]).await
    }

    pub async fn connect(&self) -> DceRpcClient {
        DceRpcClient::connect(self.addr, samr::syntax())
            .await
            .expect("connect")
    }

    /// Stop accepting and wait for open connections to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn connect_server(client: &DceRpcClient) -> ContextHandle {
    let reply = client
        .call_op::<Connect>(&ConnectRequest {
            desired_access: 0x0002_0031,
            ..Default::default()
        })
        .await
        .expect("SamrConnect");
    assert_eq!(reply.status, samr::status::STATUS_SUCCESS);
    reply.out.handle
}

/// Connect, look up and open the account domain
pub async fn open_account_domain(client: &DceRpcClient) -> (ContextHandle, ContextHandle) {
    let server = connect_server(client).await;

    let lookup = client
        .call_op::<LookupDomainInSamServer>(&LookupDomainRequest {
            handle: server,
            name: DOMAIN.into(),
        })
        .await
        .expect("SamrLookupDomainInSamServer");
    assert_eq!(lookup.status, samr::status::STATUS_SUCCESS);
    let sid = lookup.out.domain_id.as_ref().expect("domain SID").clone();

    let domain = client
        .call_op::<OpenDomain>(&OpenDomainRequest {
            handle: server,
            desired_access: 0x0000_0305,
            domain_id: sid,
        })
        .await
        .expect("SamrOpenDomain");
    assert_eq!(domain.status, samr::status::STATUS_SUCCESS);
    (server, domain.out.handle)
}
