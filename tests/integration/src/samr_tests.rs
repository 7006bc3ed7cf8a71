//! SAMR Tests - End-to-end calls against the demo account store
//!
//! Each test starts a server on an ephemeral port and drives it through a
//! real TCP client:
//! - Connect, domain lookup and open, enumeration and name/RID lookups
//! - User queries and updates through the information class unions
//! - Faults for reserved opnums, unimplemented opnums and stale handles

mod common;

use common::*;
use dcerpc::{FaultStatus, RpcError};
use ndr::{ContextHandle, Operation, UniquePtr};
use samr::status::*;
use samr::types::{sid_name_use, RevisionInfoV1};
use samr::user::{class as user_class, UserStringInformation};
use samr::*;

async fn open_user(client: &dcerpc::DceRpcClient, domain: ContextHandle, rid: u32) -> ContextHandle {
    let reply = client
        .call_op::<OpenUser>(&OpenUserRequest {
            handle: domain,
            desired_access: 0x0002_011B,
            user_id: rid,
        })
        .await
        .unwrap();
    assert_eq!(reply.status, STATUS_SUCCESS);
    reply.out.handle
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_lookup_and_open_domain() {
    init_logging();
    let server = TestServer::samr().await;
    let client = server.connect().await;

    let (server_handle, domain) = open_account_domain(&client).await;
    assert!(!server_handle.is_null());
    assert!(!domain.is_null());
    assert_ne!(server_handle, domain);

    let missing = client
        .call_op::<LookupDomainInSamServer>(&LookupDomainRequest {
            handle: server_handle,
            name: "NOWHERE".into(),
        })
        .await
        .unwrap();
    assert_eq!(missing.status, STATUS_NO_SUCH_DOMAIN);
    assert!(missing.out.domain_id.is_null());

    let closed = client
        .call_op::<CloseHandle>(&HandleRequest { handle: domain })
        .await
        .unwrap();
    assert_eq!(closed.status, STATUS_SUCCESS);
    assert!(closed.out.handle.is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_variants_share_the_server_object() {
    init_logging();
    let server = TestServer::samr().await;
    let client = server.connect().await;

    let connect2 = client
        .call_op::<Connect2>(&Connect2Request {
            server_name: UniquePtr::new(ndr::NdrWString("\\\\dc01".into())),
            desired_access: 0x0002_0031,
        })
        .await
        .unwrap();
    assert_eq!(connect2.status, STATUS_SUCCESS);

    let connect5 = client
        .call_op::<Connect5>(&Connect5Request {
            server_name: UniquePtr::null(),
            desired_access: 0x0002_0031,
            in_version: 1,
            in_revision_info: RevisionInfo::V1(RevisionInfoV1 {
                revision: 3,
                supported_features: 0,
            }),
        })
        .await
        .unwrap();
    assert_eq!(connect5.status, STATUS_SUCCESS);
    assert_eq!(connect5.out.out_version, 1);
    assert!(matches!(connect5.out.out_revision_info, RevisionInfo::V1(RevisionInfoV1 { revision: 3, .. })));

    // Both handles resolve to the server object
    for handle in [connect2.out.handle, connect5.out.server_handle] {
        let domains = client
            .call_op::<EnumerateDomainsInSamServer>(&EnumerateDomainsRequest {
                handle,
                enumeration_context: 0,
                prefered_maximum_length: 0xFFFF_FFFF,
            })
            .await
            .unwrap();
        assert_eq!(domains.status, STATUS_SUCCESS);
        let names: Vec<String> = domains.out.entries().iter().map(|e| e.name.to_string()).collect();
        assert_eq!(names, ["CONTOSO", "Builtin"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_enumerate_users_in_pages() {
    init_logging();
    let server = TestServer::samr().await;
    let client = server.connect().await;
    let (_, domain) = open_account_domain(&client).await;

    let mut context = 0;
    let mut names = Vec::new();
    let mut calls = 0;
    loop {
        let page = client
            .call_op::<EnumerateUsersInDomain>(&EnumerateUsersRequest {
                handle: domain,
                enumeration_context: context,
                user_account_control: 0,
                prefered_maximum_length: 30,
            })
            .await
            .unwrap();
        calls += 1;
        assert_eq!(page.out.count_returned as usize, page.out.entries().len());
        names.extend(page.out.entries().iter().map(|e| (e.relative_id, e.name.to_string())));
        context = page.out.enumeration_context;
        if page.status == STATUS_SUCCESS {
            break;
        }
        assert_eq!(page.status, STATUS_MORE_ENTRIES);
        assert!(calls < 10, "enumeration does not terminate");
    }

    assert!(calls > 1);
    assert_eq!(
        names,
        [
            (500, "Administrator".to_string()),
            (501, "Guest".to_string()),
            (1104, "alice".to_string()),
            (1105, "bob".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lookup_names_and_ids() {
    init_logging();
    let server = TestServer::samr().await;
    let client = server.connect().await;
    let (_, domain) = open_account_domain(&client).await;

    let names = client
        .call_op::<LookupNamesInDomain>(&LookupNamesRequest::new(domain, &["ALICE", "nobody", "bob"]))
        .await
        .unwrap();
    assert_eq!(names.status, STATUS_SOME_NOT_MAPPED);
    assert_eq!(names.out.relative_ids.values(), &[1104, 0, 1105]);
    assert_eq!(
        names.out.use_.values(),
        &[sid_name_use::USER, sid_name_use::UNKNOWN, sid_name_use::USER]
    );

    let ids = client
        .call_op::<LookupIdsInDomain>(&LookupIdsRequest::new(domain, vec![500, 1105]))
        .await
        .unwrap();
    assert_eq!(ids.status, STATUS_SUCCESS);
    let resolved: Vec<String> = ids.out.names.names().iter().map(|n| n.to_string()).collect();
    assert_eq!(resolved, ["Administrator", "bob"]);

    let none = client
        .call_op::<LookupIdsInDomain>(&LookupIdsRequest::new(domain, vec![9999]))
        .await
        .unwrap();
    assert_eq!(none.status, STATUS_NONE_MAPPED);
    assert!(none.out.names.names()[0].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_query_and_set_user() {
    init_logging();
    let server = TestServer::samr().await;
    let client = server.connect().await;
    let (_, domain) = open_account_domain(&client).await;
    let user = open_user(&client, domain, 1104).await;

    let logon = client
        .call_op::<QueryInformationUser>(&QueryInformationUserRequest {
            handle: user,
            information_class: user_class::LOGON,
        })
        .await
        .unwrap();
    assert_eq!(logon.status, STATUS_SUCCESS);
    let Some(UserInfo::Logon(info)) = logon.out.buffer.as_ref() else {
        panic!("expected logon information, got {:?}", logon.out.buffer);
    };
    assert_eq!(info.user_id, 1104);
    assert_eq!(info.user_name.to_string(), "alice");
    assert_eq!(info.home_directory_drive.to_string(), "H:");
    assert_eq!(info.logon_hours.bitmap().len(), 21);

    let set = client
        .call_op::<SetInformationUser>(&SetInformationUserRequest::new(
            user,
            UserInfo::FullName(UserStringInformation::new("Alice Liddell")),
        ))
        .await
        .unwrap();
    assert_eq!(set.status, STATUS_SUCCESS);

    // QueryInformationUser2 answers from the same store
    let name = client
        .call_op::<QueryInformationUser2>(&QueryInformationUserRequest {
            handle: user,
            information_class: user_class::FULL_NAME,
        })
        .await
        .unwrap();
    assert_eq!(
        name.out.buffer.as_ref(),
        Some(&UserInfo::FullName(UserStringInformation::new("Alice Liddell")))
    );

    let groups = client
        .call_op::<GetGroupsForUser>(&HandleRequest { handle: user })
        .await
        .unwrap();
    let rids: Vec<u32> = groups
        .out
        .groups
        .as_ref()
        .map(|buffer| buffer.groups().iter().map(|g| g.relative_id).collect())
        .unwrap_or_default();
    assert_eq!(rids, [513]);

    let unsupported = client
        .call_op::<QueryInformationUser>(&QueryInformationUserRequest {
            handle: user,
            information_class: 4,
        })
        .await
        .unwrap();
    assert_eq!(unsupported.status, STATUS_INVALID_INFO_CLASS);
    assert!(unsupported.out.buffer.is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_domain_information_and_password_policy() {
    init_logging();
    let server = TestServer::samr().await;
    let client = server.connect().await;
    let (_, domain) = open_account_domain(&client).await;

    let general = client
        .call_op::<QueryInformationDomain2>(&QueryInformationDomainRequest {
            handle: domain,
            information_class: samr::domain::class::GENERAL,
        })
        .await
        .unwrap();
    let Some(DomainInfo::General(info)) = general.out.buffer.as_ref() else {
        panic!("expected general information");
    };
    assert_eq!(info.domain_name.to_string(), DOMAIN);
    assert_eq!(info.user_count, 4);

    let password = client
        .call_op::<QueryInformationDomain>(&QueryInformationDomainRequest {
            handle: domain,
            information_class: samr::domain::class::PASSWORD,
        })
        .await
        .unwrap();
    let Some(DomainInfo::Password(policy)) = password.out.buffer.as_ref() else {
        panic!("expected password information");
    };

    let unbound = client
        .call_op::<GetDomainPasswordInformation>(&GetDomainPasswordInformationRequest::default())
        .await
        .unwrap();
    assert_eq!(unbound.status, STATUS_SUCCESS);
    assert_eq!(
        unbound.out.password_information.min_password_length,
        policy.min_password_length
    );

    let sid = client
        .call_op::<RidToSid>(&RidToSidRequest { handle: domain, rid: 1105 })
        .await
        .unwrap();
    let sid = sid.out.sid.as_ref().unwrap();
    assert_eq!(sid.rid(), Some(1105));
    assert!(sid.to_string().starts_with("S-1-5-21-"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_faults() {
    init_logging();
    let server = TestServer::samr().await;
    let client = server.connect().await;
    let server_handle = connect_server(&client).await;

    // Reserved opnum
    let err = client.call(43, bytes::Bytes::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::Fault(s) if s == u32::from(FaultStatus::OpRngError)));

    // Past the end of the table
    let err = client.call(70, bytes::Bytes::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::Fault(s) if s == u32::from(FaultStatus::OpRngError)));

    // Valid but not implemented
    let err = client.call(35, bytes::Bytes::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::Fault(STATUS_NOT_IMPLEMENTED)));

    // Truncated stub
    let err = client.call(OpenDomain::OPNUM, bytes::Bytes::from_static(&[0; 6])).await.unwrap_err();
    assert!(matches!(err, RpcError::Fault(s) if s == u32::from(FaultStatus::BadStubData)));

    // Stale handle after close
    client
        .call_op::<CloseHandle>(&HandleRequest { handle: server_handle })
        .await
        .unwrap();
    let err = client
        .call_op::<EnumerateDomainsInSamServer>(&EnumerateDomainsRequest {
            handle: server_handle,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Fault(s) if s == u32::from(FaultStatus::ContextMismatch)));

    // The association survives every fault
    assert!(!connect_server(&client).await.is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handles_do_not_cross_associations() {
    init_logging();
    let server = TestServer::samr().await;
    let first = server.connect().await;
    let second = server.connect().await;

    let (_, domain) = open_account_domain(&first).await;
    let err = second
        .call_op::<LookupNamesInDomain>(&LookupNamesRequest::new(domain, &["alice"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Fault(s) if s == u32::from(FaultStatus::ContextMismatch)));

    let ok = first
        .call_op::<LookupNamesInDomain>(&LookupNamesRequest::new(domain, &["alice"]))
        .await
        .unwrap();
    assert_eq!(ok.status, STATUS_SUCCESS);
}
