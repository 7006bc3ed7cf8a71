//! Security Account Manager Remote Protocol (MS-SAMR)
//!
//! Wire types, per-operation schemas and a dispatcher that binds the SAMR
//! interface to an application [`SamrServer`] on a [`dcerpc`] server.
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use dcerpc::{CallContext, DceRpcServer};
//! use ndr::Reply;
//! use samr::{HandleResponse, SamrServer};
//! use std::sync::Arc;
//!
//! struct Store;
//!
//! #[async_trait]
//! impl SamrServer for Store {
//!     async fn connect(&self, call: &CallContext, _access: u32) -> dcerpc::Result<Reply<HandleResponse>> {
//!         Ok(Reply::ok(HandleResponse { handle: call.create_handle(()) }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = DceRpcServer::new();
//!     server.register_interface(samr::interface(Arc::new(Store))).await;
//!     server.run("127.0.0.1:1500".parse().unwrap()).await.unwrap();
//! }
//! ```

pub mod domain;
pub mod error;
pub mod ops;
pub mod server;
pub mod status;
pub mod types;
pub mod user;
pub mod user_properties;

pub use domain::DomainInfo;
pub use error::{Result, SamrError};
pub use ops::*;
pub use server::{interface, registry, SamrServer};
pub use types::{RevisionInfo, RpcSid, RpcUnicodeString};
pub use user::UserInfo;
pub use user_properties::{UserProperties, UserProperty};

use dcerpc::SyntaxId;
use uuid::Uuid;

/// `12345778-1234-ABCD-EF00-0123456789AC`
pub const SAMR_UUID: Uuid = Uuid::from_u128(0x12345778_1234_abcd_ef00_0123456789ac);
pub const SAMR_VERSION_MAJOR: u16 = 1;
pub const SAMR_VERSION_MINOR: u16 = 0;

/// Abstract syntax of the SAMR interface
pub fn syntax() -> SyntaxId {
    SyntaxId::new(SAMR_UUID, SAMR_VERSION_MAJOR, SAMR_VERSION_MINOR)
}
