//! SAMR operation schemas
//!
//! One [`Operation`] per opnum. Request and response structs list the
//! `[in]` and `[out]` arguments in wire order; `[ref]` top-level pointers are
//! carried as their pointee.

use crate::domain::DomainInfo;
use crate::types::{
    EnumerationBuffer, GetGroupsBuffer, ReturnedUstringArray, RevisionInfo, RpcSid,
    RpcUnicodeString, SrSecurityDescriptor, UlongArray, UserDomainPasswordInformation,
};
use crate::user::UserInfo;
use ndr::{ConformantVaryingArray, ContextHandle, NdrWString, Operation, UniquePtr};

/// Upper bound of the name and RID arrays in the lookup calls
pub const MAX_LOOKUP_COUNT: usize = 1000;

/// Opnums that exist in the interface but are never sent
pub const RESERVED_OPNUMS: &[u16] = &[4, 42, 43, 59, 60, 61, 63, 68, 69];

/// Operation names indexed by opnum
pub const OPERATION_NAMES: [&str; 70] = [
    "SamrConnect",
    "SamrCloseHandle",
    "SamrSetSecurityObject",
    "SamrQuerySecurityObject",
    "Opnum4NotUsedOnWire",
    "SamrLookupDomainInSamServer",
    "SamrEnumerateDomainsInSamServer",
    "SamrOpenDomain",
    "SamrQueryInformationDomain",
    "SamrSetInformationDomain",
    "SamrCreateGroupInDomain",
    "SamrEnumerateGroupsInDomain",
    "SamrCreateUserInDomain",
    "SamrEnumerateUsersInDomain",
    "SamrCreateAliasInDomain",
    "SamrEnumerateAliasesInDomain",
    "SamrGetAliasMembership",
    "SamrLookupNamesInDomain",
    "SamrLookupIdsInDomain",
    "SamrOpenGroup",
    "SamrQueryInformationGroup",
    "SamrSetInformationGroup",
    "SamrAddMemberToGroup",
    "SamrDeleteGroup",
    "SamrRemoveMemberFromGroup",
    "SamrGetMembersInGroup",
    "SamrSetMemberAttributesOfGroup",
    "SamrOpenAlias",
    "SamrQueryInformationAlias",
    "SamrSetInformationAlias",
    "SamrDeleteAlias",
    "SamrAddMemberToAlias",
    "SamrRemoveMemberFromAlias",
    "SamrGetMembersInAlias",
    "SamrOpenUser",
    "SamrDeleteUser",
    "SamrQueryInformationUser",
    "SamrSetInformationUser",
    "SamrChangePasswordUser",
    "SamrGetGroupsForUser",
    "SamrQueryDisplayInformation",
    "SamrGetDisplayEnumerationIndex",
    "Opnum42NotUsedOnWire",
    "Opnum43NotUsedOnWire",
    "SamrGetUserDomainPasswordInformation",
    "SamrRemoveMemberFromForeignDomain",
    "SamrQueryInformationDomain2",
    "SamrQueryInformationUser2",
    "SamrQueryDisplayInformation2",
    "SamrGetDisplayEnumerationIndex2",
    "SamrCreateUser2InDomain",
    "SamrQueryDisplayInformation3",
    "SamrAddMultipleMembersToAlias",
    "SamrRemoveMultipleMembersFromAlias",
    "SamrOemChangePasswordUser2",
    "SamrUnicodeChangePasswordUser2",
    "SamrGetDomainPasswordInformation",
    "SamrConnect2",
    "SamrSetInformationUser2",
    "Opnum59NotUsedOnWire",
    "Opnum60NotUsedOnWire",
    "Opnum61NotUsedOnWire",
    "SamrConnect4",
    "Opnum63NotUsedOnWire",
    "SamrConnect5",
    "SamrRidToSid",
    "SamrSetDSRMPassword",
    "SamrValidatePassword",
    "Opnum68NotUsedOnWire",
    "Opnum69NotUsedOnWire",
];

pub fn operation_name(opnum: u16) -> Option<&'static str> {
    OPERATION_NAMES.get(opnum as usize).copied()
}

macro_rules! samr_operation {
    ($(#[$meta:meta])* $op:ident = $opnum:literal, $name:literal, $req:ty => $resp:ty) => {
        $(#[$meta])*
        pub struct $op;

        impl Operation for $op {
            const OPNUM: u16 = $opnum;
            const NAME: &'static str = $name;
            type Request = $req;
            type Response = $resp;
        }
    };
}

/// Response carrying a single handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleResponse {
    pub handle: ContextHandle,
}

ndr::ndr_args!(HandleResponse { handle: ContextHandle });

/// Request carrying only the handle it acts on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleRequest {
    pub handle: ContextHandle,
}

ndr::ndr_args!(HandleRequest { handle: ContextHandle });

// SamrConnect

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    /// A single character; servers ignore it
    pub server_name: UniquePtr<u16>,
    pub desired_access: u32,
}

ndr::ndr_args!(ConnectRequest {
    server_name: UniquePtr<u16>,
    desired_access: u32,
});

samr_operation!(Connect = 0, "SamrConnect", ConnectRequest => HandleResponse);

// SamrCloseHandle: the handle comes back zeroed

samr_operation!(CloseHandle = 1, "SamrCloseHandle", HandleRequest => HandleResponse);

// SamrSetSecurityObject

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetSecurityObjectRequest {
    pub handle: ContextHandle,
    pub security_information: u32,
    pub security_descriptor: SrSecurityDescriptor,
}

ndr::ndr_args!(SetSecurityObjectRequest {
    handle: ContextHandle,
    security_information: u32,
    security_descriptor: SrSecurityDescriptor,
});

samr_operation!(SetSecurityObject = 2, "SamrSetSecurityObject", SetSecurityObjectRequest => ());

// SamrQuerySecurityObject

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySecurityObjectRequest {
    pub handle: ContextHandle,
    pub security_information: u32,
}

ndr::ndr_args!(QuerySecurityObjectRequest {
    handle: ContextHandle,
    security_information: u32,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySecurityObjectResponse {
    pub security_descriptor: UniquePtr<SrSecurityDescriptor>,
}

ndr::ndr_args!(QuerySecurityObjectResponse {
    security_descriptor: UniquePtr<SrSecurityDescriptor>,
});

samr_operation!(
    QuerySecurityObject = 3,
    "SamrQuerySecurityObject",
    QuerySecurityObjectRequest => QuerySecurityObjectResponse
);

// SamrLookupDomainInSamServer

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupDomainRequest {
    pub handle: ContextHandle,
    pub name: RpcUnicodeString,
}

ndr::ndr_args!(LookupDomainRequest {
    handle: ContextHandle,
    name: RpcUnicodeString,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupDomainResponse {
    pub domain_id: UniquePtr<RpcSid>,
}

ndr::ndr_args!(LookupDomainResponse { domain_id: UniquePtr<RpcSid> });

samr_operation!(
    LookupDomainInSamServer = 5,
    "SamrLookupDomainInSamServer",
    LookupDomainRequest => LookupDomainResponse
);

// SamrEnumerateDomainsInSamServer

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerateDomainsRequest {
    pub handle: ContextHandle,
    pub enumeration_context: u32,
    pub prefered_maximum_length: u32,
}

ndr::ndr_args!(EnumerateDomainsRequest {
    handle: ContextHandle,
    enumeration_context: u32,
    prefered_maximum_length: u32,
});

/// Out arguments shared by the enumeration calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerateResponse {
    pub enumeration_context: u32,
    pub buffer: UniquePtr<EnumerationBuffer>,
    pub count_returned: u32,
}

ndr::ndr_args!(EnumerateResponse {
    enumeration_context: u32,
    buffer: UniquePtr<EnumerationBuffer>,
    count_returned: u32,
});

impl EnumerateResponse {
    pub fn entries(&self) -> &[crate::types::RidEnumeration] {
        self.buffer
            .as_ref()
            .map(EnumerationBuffer::entries)
            .unwrap_or_default()
    }
}

samr_operation!(
    EnumerateDomainsInSamServer = 6,
    "SamrEnumerateDomainsInSamServer",
    EnumerateDomainsRequest => EnumerateResponse
);

// SamrOpenDomain

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenDomainRequest {
    pub handle: ContextHandle,
    pub desired_access: u32,
    pub domain_id: RpcSid,
}

ndr::ndr_args!(OpenDomainRequest {
    handle: ContextHandle,
    desired_access: u32,
    domain_id: RpcSid,
});

samr_operation!(OpenDomain = 7, "SamrOpenDomain", OpenDomainRequest => HandleResponse);

// SamrQueryInformationDomain(2)

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInformationDomainRequest {
    pub handle: ContextHandle,
    pub information_class: u16,
}

ndr::ndr_args!(QueryInformationDomainRequest {
    handle: ContextHandle,
    information_class: u16,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInformationDomainResponse {
    pub buffer: UniquePtr<DomainInfo>,
}

ndr::ndr_args!(QueryInformationDomainResponse { buffer: UniquePtr<DomainInfo> });

samr_operation!(
    QueryInformationDomain = 8,
    "SamrQueryInformationDomain",
    QueryInformationDomainRequest => QueryInformationDomainResponse
);

samr_operation!(
    /// Same arguments as [`QueryInformationDomain`]
    QueryInformationDomain2 = 46,
    "SamrQueryInformationDomain2",
    QueryInformationDomainRequest => QueryInformationDomainResponse
);

// SamrEnumerateUsersInDomain

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerateUsersRequest {
    pub handle: ContextHandle,
    pub enumeration_context: u32,
    /// Only accounts with one of these bits set; zero matches all
    pub user_account_control: u32,
    pub prefered_maximum_length: u32,
}

ndr::ndr_args!(EnumerateUsersRequest {
    handle: ContextHandle,
    enumeration_context: u32,
    user_account_control: u32,
    prefered_maximum_length: u32,
});

samr_operation!(
    EnumerateUsersInDomain = 13,
    "SamrEnumerateUsersInDomain",
    EnumerateUsersRequest => EnumerateResponse
);

// SamrLookupNamesInDomain

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupNamesRequest {
    pub handle: ContextHandle,
    pub count: u32,
    pub names: ConformantVaryingArray<RpcUnicodeString>,
}

ndr::ndr_args!(LookupNamesRequest {
    handle: ContextHandle,
    count: u32,
    names: ConformantVaryingArray<RpcUnicodeString>,
});

impl LookupNamesRequest {
    pub fn new(handle: ContextHandle, names: &[&str]) -> Self {
        Self {
            handle,
            count: names.len() as u32,
            names: ConformantVaryingArray::with_max(
                MAX_LOOKUP_COUNT,
                names.iter().map(|name| RpcUnicodeString::new(name)).collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupNamesResponse {
    pub relative_ids: UlongArray,
    pub use_: UlongArray,
}

ndr::ndr_args!(LookupNamesResponse {
    relative_ids: UlongArray,
    use_: UlongArray,
});

samr_operation!(
    LookupNamesInDomain = 17,
    "SamrLookupNamesInDomain",
    LookupNamesRequest => LookupNamesResponse
);

// SamrLookupIdsInDomain

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupIdsRequest {
    pub handle: ContextHandle,
    pub count: u32,
    pub relative_ids: ConformantVaryingArray<u32>,
}

ndr::ndr_args!(LookupIdsRequest {
    handle: ContextHandle,
    count: u32,
    relative_ids: ConformantVaryingArray<u32>,
});

impl LookupIdsRequest {
    pub fn new(handle: ContextHandle, relative_ids: Vec<u32>) -> Self {
        Self {
            handle,
            count: relative_ids.len() as u32,
            relative_ids: ConformantVaryingArray::with_max(MAX_LOOKUP_COUNT, relative_ids),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupIdsResponse {
    pub names: ReturnedUstringArray,
    pub use_: UlongArray,
}

ndr::ndr_args!(LookupIdsResponse {
    names: ReturnedUstringArray,
    use_: UlongArray,
});

samr_operation!(
    LookupIdsInDomain = 18,
    "SamrLookupIdsInDomain",
    LookupIdsRequest => LookupIdsResponse
);

// SamrOpenUser

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenUserRequest {
    pub handle: ContextHandle,
    pub desired_access: u32,
    pub user_id: u32,
}

ndr::ndr_args!(OpenUserRequest {
    handle: ContextHandle,
    desired_access: u32,
    user_id: u32,
});

samr_operation!(OpenUser = 34, "SamrOpenUser", OpenUserRequest => HandleResponse);

// SamrQueryInformationUser(2)

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInformationUserRequest {
    pub handle: ContextHandle,
    pub information_class: u16,
}

ndr::ndr_args!(QueryInformationUserRequest {
    handle: ContextHandle,
    information_class: u16,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInformationUserResponse {
    pub buffer: UniquePtr<UserInfo>,
}

ndr::ndr_args!(QueryInformationUserResponse { buffer: UniquePtr<UserInfo> });

samr_operation!(
    QueryInformationUser = 36,
    "SamrQueryInformationUser",
    QueryInformationUserRequest => QueryInformationUserResponse
);

samr_operation!(
    /// Same arguments as [`QueryInformationUser`]
    QueryInformationUser2 = 47,
    "SamrQueryInformationUser2",
    QueryInformationUserRequest => QueryInformationUserResponse
);

// SamrSetInformationUser

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetInformationUserRequest {
    pub handle: ContextHandle,
    pub information_class: u16,
    pub buffer: UserInfo,
}

ndr::ndr_args!(SetInformationUserRequest {
    handle: ContextHandle,
    information_class: u16,
    buffer: UserInfo,
});

impl SetInformationUserRequest {
    pub fn new(handle: ContextHandle, buffer: UserInfo) -> Self {
        Self {
            handle,
            information_class: buffer.class(),
            buffer,
        }
    }
}

samr_operation!(SetInformationUser = 37, "SamrSetInformationUser", SetInformationUserRequest => ());

// SamrGetGroupsForUser

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetGroupsForUserResponse {
    pub groups: UniquePtr<GetGroupsBuffer>,
}

ndr::ndr_args!(GetGroupsForUserResponse { groups: UniquePtr<GetGroupsBuffer> });

samr_operation!(
    GetGroupsForUser = 39,
    "SamrGetGroupsForUser",
    HandleRequest => GetGroupsForUserResponse
);

// SamrGetUserDomainPasswordInformation

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordInformationResponse {
    pub password_information: UserDomainPasswordInformation,
}

ndr::ndr_args!(PasswordInformationResponse {
    password_information: UserDomainPasswordInformation,
});

samr_operation!(
    GetUserDomainPasswordInformation = 44,
    "SamrGetUserDomainPasswordInformation",
    HandleRequest => PasswordInformationResponse
);

// SamrGetDomainPasswordInformation: no handle, the binding handle is implicit

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetDomainPasswordInformationRequest {
    pub unused: UniquePtr<RpcUnicodeString>,
}

ndr::ndr_args!(GetDomainPasswordInformationRequest {
    unused: UniquePtr<RpcUnicodeString>,
});

samr_operation!(
    GetDomainPasswordInformation = 56,
    "SamrGetDomainPasswordInformation",
    GetDomainPasswordInformationRequest => PasswordInformationResponse
);

// SamrConnect2

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connect2Request {
    pub server_name: UniquePtr<NdrWString>,
    pub desired_access: u32,
}

ndr::ndr_args!(Connect2Request {
    server_name: UniquePtr<NdrWString>,
    desired_access: u32,
});

samr_operation!(Connect2 = 57, "SamrConnect2", Connect2Request => HandleResponse);

// SamrConnect4

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connect4Request {
    pub server_name: UniquePtr<NdrWString>,
    pub client_revision: u32,
    pub desired_access: u32,
}

ndr::ndr_args!(Connect4Request {
    server_name: UniquePtr<NdrWString>,
    client_revision: u32,
    desired_access: u32,
});

samr_operation!(Connect4 = 62, "SamrConnect4", Connect4Request => HandleResponse);

// SamrConnect5

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect5Request {
    pub server_name: UniquePtr<NdrWString>,
    pub desired_access: u32,
    pub in_version: u32,
    /// Last argument, so an unknown revision may keep the rest of the stub
    pub in_revision_info: RevisionInfo,
}

ndr::ndr_args!(Connect5Request {
    server_name: UniquePtr<NdrWString>,
    desired_access: u32,
    in_version: u32,
    in_revision_info: RevisionInfo,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connect5Response {
    pub out_version: u32,
    /// Always a known revision; an unknown arm here would swallow the handle
    pub out_revision_info: RevisionInfo,
    pub server_handle: ContextHandle,
}

ndr::ndr_args!(Connect5Response {
    out_version: u32,
    out_revision_info: RevisionInfo,
    server_handle: ContextHandle,
});

samr_operation!(Connect5 = 64, "SamrConnect5", Connect5Request => Connect5Response);

// SamrRidToSid

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RidToSidRequest {
    pub handle: ContextHandle,
    pub rid: u32,
}

ndr::ndr_args!(RidToSidRequest { handle: ContextHandle, rid: u32 });

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RidToSidResponse {
    pub sid: UniquePtr<RpcSid>,
}

ndr::ndr_args!(RidToSidResponse { sid: UniquePtr<RpcSid> });

samr_operation!(RidToSid = 65, "SamrRidToSid", RidToSidRequest => RidToSidResponse);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RevisionInfoV1, RidEnumeration};
    use crate::user::UserStringInformation;
    use ndr::{NdrContext, NdrError, Reply};
    use proptest::prelude::*;

    fn handle(byte: u8) -> ContextHandle {
        ContextHandle::new([byte; 20])
    }

    #[test]
    fn test_names_match_schemas() {
        assert_eq!(operation_name(Connect5::OPNUM), Some(Connect5::NAME));
        assert_eq!(operation_name(RidToSid::OPNUM), Some(RidToSid::NAME));
        assert_eq!(operation_name(GetDomainPasswordInformation::OPNUM), Some(GetDomainPasswordInformation::NAME));
        assert_eq!(operation_name(70), None);
        for &opnum in RESERVED_OPNUMS {
            assert!(OPERATION_NAMES[opnum as usize].ends_with("NotUsedOnWire"));
        }
    }

    #[test]
    fn test_connect_wire_layout() {
        let ctx = NdrContext::new();
        let request = ConnectRequest {
            server_name: UniquePtr::new(u16::from(b'\\')),
            desired_access: 0x0002_0031,
        };
        let stub = ndr::encode_request::<Connect>(&request, ctx).unwrap();
        // referent, the character, pad, access
        assert_eq!(
            stub.as_ref(),
            &[0x00, 0x00, 0x02, 0x00, b'\\', 0, 0, 0, 0x31, 0x00, 0x02, 0x00]
        );
        assert_eq!(ndr::decode_request::<Connect>(stub, ctx).unwrap(), request);
    }

    #[test]
    fn test_open_domain_carries_sid_inline() {
        let ctx = NdrContext::new();
        let sid: RpcSid = "S-1-5-32".parse().unwrap();
        let request = OpenDomainRequest {
            handle: handle(1),
            desired_access: 0x200,
            domain_id: sid.clone(),
        };
        let stub = ndr::encode_request::<OpenDomain>(&request, ctx).unwrap();
        // handle, access, then the SID's conformance count with no referent
        assert_eq!(&stub[24..28], &[1, 0, 0, 0]);
        assert_eq!(stub[28], 1);
        let decoded = ndr::decode_request::<OpenDomain>(stub, ctx).unwrap();
        assert_eq!(decoded.domain_id, sid);
    }

    #[test]
    fn test_enumerate_response() {
        let ctx = NdrContext::new();
        let reply = Reply::new(
            EnumerateResponse {
                enumeration_context: 2,
                buffer: UniquePtr::new(EnumerationBuffer::new(vec![
                    RidEnumeration::new(500, "Administrator"),
                    RidEnumeration::new(1104, "alice"),
                ])),
                count_returned: 2,
            },
            crate::status::STATUS_MORE_ENTRIES,
        );
        let stub = ndr::encode_response::<EnumerateUsersInDomain>(&reply, ctx).unwrap();
        assert_eq!(&stub[stub.len() - 4..], &[0x05, 0x01, 0, 0]);

        let decoded = ndr::decode_response::<EnumerateUsersInDomain>(stub, ctx).unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(decoded.out.entries()[1].name.to_string(), "alice");
    }

    #[test]
    fn test_lookup_names_array_header() {
        let ctx = NdrContext::new();
        let request = LookupNamesRequest::new(handle(2), &["alice", "bob"]);
        let stub = ndr::encode_request::<LookupNamesInDomain>(&request, ctx).unwrap();
        // handle, count, then max_count=1000, offset=0, actual_count=2
        assert_eq!(&stub[20..24], &[2, 0, 0, 0]);
        assert_eq!(&stub[24..28], &1000u32.to_le_bytes());
        assert_eq!(&stub[28..32], &[0, 0, 0, 0]);
        assert_eq!(&stub[32..36], &[2, 0, 0, 0]);
        assert_eq!(ndr::decode_request::<LookupNamesInDomain>(stub, ctx).unwrap(), request);
    }

    #[test]
    fn test_lookup_ids_rejects_bad_variance() {
        let ctx = NdrContext::new();
        let request = LookupIdsRequest::new(handle(3), vec![500, 501]);
        let mut stub = ndr::encode_request::<LookupIdsInDomain>(&request, ctx)
            .unwrap()
            .to_vec();
        // actual_count past max_count
        stub[32..36].copy_from_slice(&1001u32.to_le_bytes());
        assert!(matches!(
            ndr::decode_request::<LookupIdsInDomain>(stub, ctx),
            Err(NdrError::MalformedArray { .. })
        ));
    }

    #[test]
    fn test_query_information_user_null_buffer_on_error() {
        let ctx = NdrContext::new();
        let reply: Reply<QueryInformationUserResponse> =
            Reply::error(crate::status::STATUS_INVALID_INFO_CLASS);
        let stub = ndr::encode_response::<QueryInformationUser>(&reply, ctx).unwrap();
        assert_eq!(stub.as_ref(), &[0, 0, 0, 0, 0x03, 0x00, 0x00, 0xC0]);
    }

    #[test]
    fn test_set_information_user() {
        let ctx = NdrContext::new();
        let request = SetInformationUserRequest::new(
            handle(4),
            UserInfo::FullName(UserStringInformation::new("Alice Example")),
        );
        assert_eq!(request.information_class, crate::user::class::FULL_NAME);
        let stub = ndr::encode_request::<SetInformationUser>(&request, ctx).unwrap();
        let decoded = ndr::decode_request::<SetInformationUser>(stub, ctx).unwrap();
        assert_eq!(decoded, request);

        let done = ndr::encode_response::<SetInformationUser>(&Reply::ok(()), ctx).unwrap();
        assert_eq!(done.as_ref(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_connect5_revision_round_trip() {
        let ctx = NdrContext::new();
        let request = Connect5Request {
            server_name: UniquePtr::new(NdrWString::new("\\\\dc01")),
            desired_access: 0x0200_0000,
            in_version: 1,
            in_revision_info: RevisionInfo::V1(RevisionInfoV1 {
                revision: 3,
                supported_features: 0,
            }),
        };
        let stub = ndr::encode_request::<Connect5>(&request, ctx).unwrap();
        assert_eq!(ndr::decode_request::<Connect5>(stub, ctx).unwrap(), request);

        let reply = Reply::ok(Connect5Response {
            out_version: 1,
            out_revision_info: RevisionInfo::V1(RevisionInfoV1 {
                revision: 3,
                supported_features: 0x10,
            }),
            server_handle: handle(9),
        });
        let stub = ndr::encode_response::<Connect5>(&reply, ctx).unwrap();
        assert_eq!(stub.len(), 4 + 4 + 8 + 20 + 4);
        assert_eq!(ndr::decode_response::<Connect5>(stub, ctx).unwrap(), reply);
    }

    #[test]
    fn test_connect5_unknown_revision_is_kept() {
        let ctx = NdrContext::new();
        let mut stub = ndr::encode_request::<Connect5>(
            &Connect5Request {
                server_name: UniquePtr::null(),
                desired_access: 0x30,
                in_version: 2,
                in_revision_info: RevisionInfo::V1(RevisionInfoV1::default()),
            },
            ctx,
        )
        .unwrap()
        .to_vec();
        // null pointer, access, version, selector
        stub[12] = 2;
        let decoded = ndr::decode_request::<Connect5>(stub, ctx).unwrap();
        match decoded.in_revision_info {
            RevisionInfo::Unknown { selector, raw } => {
                assert_eq!(selector, 2);
                assert_eq!(raw.len(), 8);
            }
            other => panic!("expected unknown revision, got {other:?}"),
        }
    }

    #[test]
    fn test_rid_to_sid() {
        let ctx = NdrContext::new();
        let sid: RpcSid = "S-1-5-21-1-2-3-1104".parse().unwrap();
        let reply = Reply::ok(RidToSidResponse {
            sid: UniquePtr::new(sid.clone()),
        });
        let stub = ndr::encode_response::<RidToSid>(&reply, ctx).unwrap();
        let decoded = ndr::decode_response::<RidToSid>(stub, ctx).unwrap();
        assert_eq!(decoded.out.sid.as_ref(), Some(&sid));
    }

    proptest! {
        #[test]
        fn test_truncated_lookup_names(names in prop::collection::vec("[a-z]{0,12}", 0..6)) {
            let ctx = NdrContext::new();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let request = LookupNamesRequest::new(handle(5), &names);
            let stub = ndr::encode_request::<LookupNamesInDomain>(&request, ctx).unwrap();
            for k in 0..stub.len() {
                let result = ndr::decode_request::<LookupNamesInDomain>(stub.slice(..k), ctx);
                prop_assert!(
                    matches!(result, Err(NdrError::TruncatedInput { .. })),
                    "prefix {}: {:?}", k, result
                );
            }
        }
    }
}
