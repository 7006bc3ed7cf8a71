//! Connection-oriented DCE RPC (MS-RPCE) runtime
//!
//! This crate carries NDR-marshalled calls over a byte stream using the
//! connection-oriented DCE RPC protocol: bind and alter-context
//! negotiation, request/response fragmentation, faults, cancellation and
//! per-association context handles. Stub data is encoded with the [`ndr`]
//! crate.
//!
//! # Example
//!
//! ## Server
//!
//! ```no_run
//! use dcerpc::{DceRpcServer, InterfaceBuilder, RpcError, Uuid};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() {
//!     let uuid = Uuid::parse_str("12345678-1234-1234-1234-123456789012").unwrap();
//!     let interface = InterfaceBuilder::new(uuid, 1, 0)
//!         // Operation 0: echo the raw stub back
//!         .raw_operation(0, |_call, stub: Bytes| async move { Ok::<_, RpcError>(stub) })
//!         .build();
//!
//!     let server = DceRpcServer::new();
//!     server.register_interface(interface).await;
//!     server.run("127.0.0.1:12345".parse().unwrap()).await.unwrap();
//! }
//! ```
//!
//! ## Client
//!
//! ```no_run
//! use dcerpc::{DceRpcClient, SyntaxId, Uuid};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() {
//!     let interface = SyntaxId::new(
//!         Uuid::parse_str("12345678-1234-1234-1234-123456789012").unwrap(),
//!         1,
//!         0,
//!     );
//!
//!     let client = DceRpcClient::connect("127.0.0.1:12345".parse().unwrap(), interface)
//!         .await
//!         .unwrap();
//!
//!     let result = client.call(0, Bytes::from("hello")).await.unwrap();
//!     assert_eq!(result.as_ref(), b"hello");
//! }
//! ```

pub mod association;
pub mod client;
pub mod context_handle;
pub mod error;
pub mod fragmentation;
pub mod pdu;
pub mod server;
pub mod transport;

pub use error::{Result, RpcError};

pub use association::{Association, PresentationContext, MUST_RECV_FRAG_SIZE};
pub use client::{DceRpcClient, DceRpcClientBuilder};
pub use context_handle::ContextHandleTable;
pub use fragmentation::{FragmentAssembler, FragmentGenerator, DEFAULT_MAX_STUB_SIZE};
pub use pdu::{
    BindAckPdu, BindNakPdu, BindNakReason, BindPdu, ContextElement, ContextResult,
    ContextResultEntry, DataRepresentation, FaultPdu, FaultStatus, PacketFlags, PacketType, Pdu,
    PduHeader, ProviderReason, RequestPdu, ResponsePdu, SyntaxId, DCE_RPC_VERSION,
    DCE_RPC_VERSION_MINOR, DEFAULT_MAX_FRAG, NDR_SYNTAX_UUID, NDR_SYNTAX_VERSION,
};
pub use server::{
    CallContext, DceRpcServer, DceRpcServerConfig, HandlerFuture, Interface, InterfaceBuilder,
    ServerStats, ServerStatsSnapshot,
};
pub use transport::{DceRpcTransport, DEFAULT_MAX_PDU_SIZE};

pub use uuid::Uuid;
