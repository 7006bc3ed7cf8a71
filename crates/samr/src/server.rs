//! SAMR dispatch
//!
//! [`interface`] binds every opnum of the interface to a [`SamrServer`]:
//! implemented operations decode their request and call the matching trait
//! method, the remaining valid opnums answer with a `STATUS_NOT_IMPLEMENTED`
//! fault and reserved opnums are left to the runtime's op-range fault.

use crate::ops::{self, *};
use crate::status::STATUS_NOT_IMPLEMENTED;
use crate::types::{RevisionInfo, RevisionInfoV1};
use async_trait::async_trait;
use bytes::Bytes;
use dcerpc::{CallContext, Interface, InterfaceBuilder, Result, RpcError};
use ndr::{OperationRegistry, Reply};
use std::sync::Arc;
use tracing::debug;

/// Application side of the SAMR interface.
///
/// Every method has a default that answers `STATUS_NOT_IMPLEMENTED` in the
/// return code, so an implementation only provides what it supports. Return
/// `Err` for failures that should become a fault instead of a status; a
/// handle that does not resolve (see [`CallContext::lookup_handle`]) becomes
/// a context-mismatch fault.
#[async_trait]
pub trait SamrServer: Send + Sync + 'static {
    /// Shared by `SamrConnect`, `SamrConnect2` and `SamrConnect4`
    async fn connect(&self, _call: &CallContext, _desired_access: u32) -> Result<Reply<HandleResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    /// `SamrConnect5`. Defaults to [`SamrServer::connect`] and answers with
    /// revision 1 info.
    async fn connect5(&self, call: &CallContext, request: Connect5Request) -> Result<Reply<Connect5Response>> {
        let reply = self.connect(call, request.desired_access).await?;
        Ok(Reply::new(
            Connect5Response {
                out_version: 1,
                out_revision_info: RevisionInfo::V1(RevisionInfoV1 {
                    revision: 3,
                    supported_features: 0,
                }),
                server_handle: reply.out.handle,
            },
            reply.status,
        ))
    }

    async fn close_handle(&self, _call: &CallContext, _request: HandleRequest) -> Result<Reply<HandleResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn set_security_object(&self, _call: &CallContext, _request: SetSecurityObjectRequest) -> Result<Reply<()>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn query_security_object(
        &self,
        _call: &CallContext,
        _request: QuerySecurityObjectRequest,
    ) -> Result<Reply<QuerySecurityObjectResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn lookup_domain(&self, _call: &CallContext, _request: LookupDomainRequest) -> Result<Reply<LookupDomainResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn enumerate_domains(
        &self,
        _call: &CallContext,
        _request: EnumerateDomainsRequest,
    ) -> Result<Reply<EnumerateResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn open_domain(&self, _call: &CallContext, _request: OpenDomainRequest) -> Result<Reply<HandleResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    /// Shared by `SamrQueryInformationDomain` and `SamrQueryInformationDomain2`
    async fn query_information_domain(
        &self,
        _call: &CallContext,
        _request: QueryInformationDomainRequest,
    ) -> Result<Reply<QueryInformationDomainResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn enumerate_users(&self, _call: &CallContext, _request: EnumerateUsersRequest) -> Result<Reply<EnumerateResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn lookup_names(&self, _call: &CallContext, _request: LookupNamesRequest) -> Result<Reply<LookupNamesResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn lookup_ids(&self, _call: &CallContext, _request: LookupIdsRequest) -> Result<Reply<LookupIdsResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn open_user(&self, _call: &CallContext, _request: OpenUserRequest) -> Result<Reply<HandleResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    /// Shared by `SamrQueryInformationUser` and `SamrQueryInformationUser2`
    async fn query_information_user(
        &self,
        _call: &CallContext,
        _request: QueryInformationUserRequest,
    ) -> Result<Reply<QueryInformationUserResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn set_information_user(&self, _call: &CallContext, _request: SetInformationUserRequest) -> Result<Reply<()>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn get_groups_for_user(&self, _call: &CallContext, _request: HandleRequest) -> Result<Reply<GetGroupsForUserResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn get_user_domain_password_information(
        &self,
        _call: &CallContext,
        _request: HandleRequest,
    ) -> Result<Reply<PasswordInformationResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn get_domain_password_information(
        &self,
        _call: &CallContext,
        _request: GetDomainPasswordInformationRequest,
    ) -> Result<Reply<PasswordInformationResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }

    async fn rid_to_sid(&self, _call: &CallContext, _request: RidToSidRequest) -> Result<Reply<RidToSidResponse>> {
        Ok(Reply::error(STATUS_NOT_IMPLEMENTED))
    }
}

/// Opnum table with every implemented schema registered and the
/// "not used on wire" slots reserved
pub fn registry() -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    registry
        .register::<Connect>()
        .register::<CloseHandle>()
        .register::<SetSecurityObject>()
        .register::<QuerySecurityObject>()
        .register::<LookupDomainInSamServer>()
        .register::<EnumerateDomainsInSamServer>()
        .register::<OpenDomain>()
        .register::<QueryInformationDomain>()
        .register::<EnumerateUsersInDomain>()
        .register::<LookupNamesInDomain>()
        .register::<LookupIdsInDomain>()
        .register::<OpenUser>()
        .register::<QueryInformationUser>()
        .register::<SetInformationUser>()
        .register::<GetGroupsForUser>()
        .register::<GetUserDomainPasswordInformation>()
        .register::<QueryInformationDomain2>()
        .register::<QueryInformationUser2>()
        .register::<GetDomainPasswordInformation>()
        .register::<Connect2>()
        .register::<Connect4>()
        .register::<Connect5>()
        .register::<RidToSid>();
    for &opnum in ops::RESERVED_OPNUMS {
        registry.reserve(opnum, ops::OPERATION_NAMES[opnum as usize]);
    }
    registry
}

/// Bind a typed operation to a trait method
macro_rules! route {
    ($builder:expr, $server:expr, $op:ty, |$s:ident, $call:ident, $req:ident: $rt:ty| $body:expr) => {{
        let server = Arc::clone(&$server);
        $builder.operation::<$op, _, _>(move |$call: CallContext, $req: $rt| {
            let $s = Arc::clone(&server);
            async move { $body }
        })
    }};
}

/// Build the SAMR [`Interface`] served by `server`
pub fn interface<S: SamrServer>(server: Arc<S>) -> Interface {
    let mut builder = InterfaceBuilder::from_syntax(crate::syntax()).registry(registry());

    builder = route!(builder, server, Connect, |s, call, req: ConnectRequest| {
        s.connect(&call, req.desired_access).await
    });
    builder = route!(builder, server, Connect2, |s, call, req: Connect2Request| {
        s.connect(&call, req.desired_access).await
    });
    builder = route!(builder, server, Connect4, |s, call, req: Connect4Request| {
        s.connect(&call, req.desired_access).await
    });
    builder = route!(builder, server, Connect5, |s, call, req: Connect5Request| {
        s.connect5(&call, req).await
    });
    builder = route!(builder, server, CloseHandle, |s, call, req: HandleRequest| {
        s.close_handle(&call, req).await
    });
    builder = route!(builder, server, SetSecurityObject, |s, call, req: SetSecurityObjectRequest| {
        s.set_security_object(&call, req).await
    });
    builder = route!(builder, server, QuerySecurityObject, |s, call, req: QuerySecurityObjectRequest| {
        s.query_security_object(&call, req).await
    });
    builder = route!(builder, server, LookupDomainInSamServer, |s, call, req: LookupDomainRequest| {
        s.lookup_domain(&call, req).await
    });
    builder = route!(builder, server, EnumerateDomainsInSamServer, |s, call, req: EnumerateDomainsRequest| {
        s.enumerate_domains(&call, req).await
    });
    builder = route!(builder, server, OpenDomain, |s, call, req: OpenDomainRequest| {
        s.open_domain(&call, req).await
    });
    builder = route!(builder, server, QueryInformationDomain, |s, call, req: QueryInformationDomainRequest| {
        s.query_information_domain(&call, req).await
    });
    builder = route!(builder, server, QueryInformationDomain2, |s, call, req: QueryInformationDomainRequest| {
        s.query_information_domain(&call, req).await
    });
    builder = route!(builder, server, EnumerateUsersInDomain, |s, call, req: EnumerateUsersRequest| {
        s.enumerate_users(&call, req).await
    });
    builder = route!(builder, server, LookupNamesInDomain, |s, call, req: LookupNamesRequest| {
        check_lookup_count(req.count, req.names.len())?;
        s.lookup_names(&call, req).await
    });
    builder = route!(builder, server, LookupIdsInDomain, |s, call, req: LookupIdsRequest| {
        check_lookup_count(req.count, req.relative_ids.len())?;
        s.lookup_ids(&call, req).await
    });
    builder = route!(builder, server, OpenUser, |s, call, req: OpenUserRequest| {
        s.open_user(&call, req).await
    });
    builder = route!(builder, server, QueryInformationUser, |s, call, req: QueryInformationUserRequest| {
        s.query_information_user(&call, req).await
    });
    builder = route!(builder, server, QueryInformationUser2, |s, call, req: QueryInformationUserRequest| {
        s.query_information_user(&call, req).await
    });
    builder = route!(builder, server, SetInformationUser, |s, call, req: SetInformationUserRequest| {
        if req.information_class != req.buffer.class() {
            debug!(
                "SetInformationUser: class {} with a class {} buffer",
                req.information_class,
                req.buffer.class()
            );
            return Err(RpcError::Fault(dcerpc::FaultStatus::BadStubData.into()));
        }
        s.set_information_user(&call, req).await
    });
    builder = route!(builder, server, GetGroupsForUser, |s, call, req: HandleRequest| {
        s.get_groups_for_user(&call, req).await
    });
    builder = route!(builder, server, GetUserDomainPasswordInformation, |s, call, req: HandleRequest| {
        s.get_user_domain_password_information(&call, req).await
    });
    builder = route!(builder, server, GetDomainPasswordInformation, |s, call, req: GetDomainPasswordInformationRequest| {
        s.get_domain_password_information(&call, req).await
    });
    builder = route!(builder, server, RidToSid, |s, call, req: RidToSidRequest| {
        s.rid_to_sid(&call, req).await
    });

    let mut interface = builder.build();
    for opnum in 0..ops::OPERATION_NAMES.len() as u16 {
        if interface.has_operation(opnum) || interface.registry().is_reserved(opnum) {
            continue;
        }
        interface.register_raw(opnum, not_implemented);
    }
    interface
}

/// The `[range(0, 1000)]` count must also match the array it describes
fn check_lookup_count(count: u32, len: usize) -> Result<()> {
    if count as usize > ops::MAX_LOOKUP_COUNT || count as usize != len {
        return Err(RpcError::Fault(dcerpc::FaultStatus::BadStubData.into()));
    }
    Ok(())
}

async fn not_implemented(call: CallContext, _stub: Bytes) -> Result<Bytes> {
    debug!(
        "{} (opnum {}) is not implemented",
        ops::operation_name(call.opnum).unwrap_or("unknown"),
        call.opnum
    );
    Err(RpcError::Fault(STATUS_NOT_IMPLEMENTED))
}
