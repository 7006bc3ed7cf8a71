//! Common SAMR wire types
//!
//! Structures are declared in MS-SAMR field order through
//! [`ndr::ndr_struct!`]. `RPC_SID` is a conformant structure (its size
//! prefix is hoisted in front of the fixed fields), so it implements the
//! codec traits by hand.

use crate::error::SamrError;
use ndr::{
    decode_elements, encode_elements, ConformantArray, ConformantVaryingArray, NdrDecode, NdrEncode,
    NdrError, NdrReader, NdrWriter, UniquePtr,
};
use std::fmt;
use std::str::FromStr;

/// Longest string an `RPC_UNICODE_STRING` can carry, in UTF-16 units
pub const MAX_UNICODE_STRING_UNITS: usize = (u16::MAX / 2) as usize;

/// `RPC_UNICODE_STRING`: a counted UTF-16 string.
///
/// `length` and `maximum_length` are in bytes and do not include a
/// terminator. The buffer pointer may be null, which differs from an empty
/// string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcUnicodeString {
    pub length: u16,
    pub maximum_length: u16,
    pub buffer: UniquePtr<ConformantVaryingArray<u16>>,
}

ndr::ndr_struct!(RpcUnicodeString {
    length: u16,
    maximum_length: u16,
    buffer: UniquePtr<ConformantVaryingArray<u16>>,
});

impl RpcUnicodeString {
    /// Counted string holding `s`. Longer values are cut at
    /// [`MAX_UNICODE_STRING_UNITS`].
    pub fn new(s: &str) -> Self {
        let units: Vec<u16> = s.encode_utf16().take(MAX_UNICODE_STRING_UNITS).collect();
        let bytes = (units.len() * 2) as u16;
        Self {
            length: bytes,
            maximum_length: bytes,
            buffer: UniquePtr::new(ConformantVaryingArray::new(units)),
        }
    }

    /// Zero length, null buffer
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.buffer.is_null()
    }

    /// The transmitted characters, or `None` for a null buffer
    pub fn to_string_lossy(&self) -> Option<String> {
        self.buffer
            .as_ref()
            .map(|array| String::from_utf16_lossy(&array.elements))
    }
}

impl From<&str> for RpcUnicodeString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for RpcUnicodeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_string_lossy() {
            Some(s) => f.write_str(&s),
            None => f.write_str("(null)"),
        }
    }
}

/// Most sub-authorities a SID may carry
pub const SID_MAX_SUB_AUTHORITIES: usize = 15;

/// `RPC_SID`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RpcSid {
    pub revision: u8,
    /// 48-bit big-endian authority
    pub identifier_authority: [u8; 6],
    pub sub_authority: Vec<u32>,
}

impl RpcSid {
    pub fn new(authority: u64, sub_authority: Vec<u32>) -> Self {
        let mut identifier_authority = [0u8; 6];
        identifier_authority.copy_from_slice(&authority.to_be_bytes()[2..]);
        Self {
            revision: 1,
            identifier_authority,
            sub_authority,
        }
    }

    /// `S-1-5-32`, the builtin domain
    pub fn builtin() -> Self {
        Self::new(5, vec![32])
    }

    pub fn authority(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw[2..].copy_from_slice(&self.identifier_authority);
        u64::from_be_bytes(raw)
    }

    /// This SID with `rid` appended
    pub fn with_rid(&self, rid: u32) -> Self {
        let mut sid = self.clone();
        sid.sub_authority.push(rid);
        sid
    }

    /// Last sub-authority
    pub fn rid(&self) -> Option<u32> {
        self.sub_authority.last().copied()
    }

    /// This SID without its last sub-authority
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.sub_authority.split_last()?;
        Some(Self {
            revision: self.revision,
            identifier_authority: self.identifier_authority,
            sub_authority: rest.to_vec(),
        })
    }
}

impl NdrEncode for RpcSid {
    fn ndr_encode(&self, w: &mut NdrWriter) -> ndr::Result<()> {
        if self.sub_authority.len() > SID_MAX_SUB_AUTHORITIES {
            return Err(NdrError::ValueOutOfRange("RPC_SID sub-authority count"));
        }
        w.align(4);
        w.write_count(self.sub_authority.len(), "RPC_SID conformance")?;
        w.write_u8(self.revision);
        w.write_u8(self.sub_authority.len() as u8);
        w.write_bytes(&self.identifier_authority);
        encode_elements(&self.sub_authority, w)
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for RpcSid {
    fn ndr_decode(r: &mut NdrReader) -> ndr::Result<Self> {
        r.align(4)?;
        let max_count = r.read_u32()?;
        let revision = r.read_u8()?;
        let count = r.read_u8()?;
        if u32::from(count) != max_count || usize::from(count) > SID_MAX_SUB_AUTHORITIES {
            return Err(NdrError::MalformedArray {
                max_count,
                offset: 0,
                actual_count: u32::from(count),
            });
        }
        let mut identifier_authority = [0u8; 6];
        identifier_authority.copy_from_slice(&r.read_bytes(6)?);
        let sub_authority = decode_elements(r, usize::from(count))?;
        Ok(Self {
            revision,
            identifier_authority,
            sub_authority,
        })
    }

    fn ndr_align() -> usize {
        4
    }
}

impl fmt::Display for RpcSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let authority = self.authority();
        if authority >> 32 == 0 {
            write!(f, "S-{}-{}", self.revision, authority)?;
        } else {
            write!(f, "S-{}-0x{:012X}", self.revision, authority)?;
        }
        for sub in &self.sub_authority {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl FromStr for RpcSid {
    type Err = SamrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SamrError::InvalidSid(s.to_string());
        let mut parts = s.split('-');
        if !parts.next().is_some_and(|p| p.eq_ignore_ascii_case("S")) {
            return Err(invalid());
        }
        let revision = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let authority = match parts.next() {
            Some(p) => match p.strip_prefix("0x").or_else(|| p.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
                None => p.parse().map_err(|_| invalid())?,
            },
            None => return Err(invalid()),
        };
        if authority >> 48 != 0 {
            return Err(invalid());
        }
        let sub_authority = parts
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        if sub_authority.len() > SID_MAX_SUB_AUTHORITIES {
            return Err(invalid());
        }

        let mut sid = Self::new(authority, sub_authority);
        sid.revision = revision;
        Ok(sid)
    }
}

/// `OLD_LARGE_INTEGER`: a 64-bit value as two 4-byte aligned halves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OldLargeInteger {
    pub low_part: u32,
    pub high_part: i32,
}

ndr::ndr_struct!(OldLargeInteger { low_part: u32, high_part: i32 });

impl OldLargeInteger {
    pub fn value(&self) -> i64 {
        (i64::from(self.high_part) << 32) | i64::from(self.low_part)
    }
}

impl From<i64> for OldLargeInteger {
    fn from(value: i64) -> Self {
        Self {
            low_part: value as u32,
            high_part: (value >> 32) as i32,
        }
    }
}

/// `SAMPR_SR_SECURITY_DESCRIPTOR`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SrSecurityDescriptor {
    pub length: u32,
    pub security_descriptor: UniquePtr<ConformantArray<u8>>,
}

ndr::ndr_struct!(SrSecurityDescriptor {
    length: u32,
    security_descriptor: UniquePtr<ConformantArray<u8>>,
});

impl SrSecurityDescriptor {
    pub fn new(descriptor: Vec<u8>) -> Self {
        Self {
            length: descriptor.len() as u32,
            security_descriptor: UniquePtr::new(ConformantArray::new(descriptor)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.security_descriptor
            .as_ref()
            .map(|array| array.elements.as_slice())
            .unwrap_or_default()
    }
}

/// `SAMPR_RID_ENUMERATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RidEnumeration {
    pub relative_id: u32,
    pub name: RpcUnicodeString,
}

ndr::ndr_struct!(RidEnumeration {
    relative_id: u32,
    name: RpcUnicodeString,
});

impl RidEnumeration {
    pub fn new(relative_id: u32, name: &str) -> Self {
        Self {
            relative_id,
            name: RpcUnicodeString::new(name),
        }
    }
}

/// `SAMPR_ENUMERATION_BUFFER`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerationBuffer {
    pub entries_read: u32,
    pub buffer: UniquePtr<ConformantArray<RidEnumeration>>,
}

ndr::ndr_struct!(EnumerationBuffer {
    entries_read: u32,
    buffer: UniquePtr<ConformantArray<RidEnumeration>>,
});

impl EnumerationBuffer {
    pub fn new(entries: Vec<RidEnumeration>) -> Self {
        Self {
            entries_read: entries.len() as u32,
            buffer: UniquePtr::new(ConformantArray::new(entries)),
        }
    }

    pub fn entries(&self) -> &[RidEnumeration] {
        self.buffer
            .as_ref()
            .map(|array| array.elements.as_slice())
            .unwrap_or_default()
    }
}

/// `SAMPR_ULONG_ARRAY`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UlongArray {
    pub count: u32,
    pub element: UniquePtr<ConformantArray<u32>>,
}

ndr::ndr_struct!(UlongArray {
    count: u32,
    element: UniquePtr<ConformantArray<u32>>,
});

impl UlongArray {
    pub fn new(values: Vec<u32>) -> Self {
        Self {
            count: values.len() as u32,
            element: UniquePtr::new(ConformantArray::new(values)),
        }
    }

    pub fn values(&self) -> &[u32] {
        self.element
            .as_ref()
            .map(|array| array.elements.as_slice())
            .unwrap_or_default()
    }
}

/// `SAMPR_RETURNED_USTRING_ARRAY`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnedUstringArray {
    pub count: u32,
    pub element: UniquePtr<ConformantArray<RpcUnicodeString>>,
}

ndr::ndr_struct!(ReturnedUstringArray {
    count: u32,
    element: UniquePtr<ConformantArray<RpcUnicodeString>>,
});

impl ReturnedUstringArray {
    pub fn new(names: Vec<RpcUnicodeString>) -> Self {
        Self {
            count: names.len() as u32,
            element: UniquePtr::new(ConformantArray::new(names)),
        }
    }

    pub fn names(&self) -> &[RpcUnicodeString] {
        self.element
            .as_ref()
            .map(|array| array.elements.as_slice())
            .unwrap_or_default()
    }
}

/// `GROUP_MEMBERSHIP`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupMembership {
    pub relative_id: u32,
    pub attributes: u32,
}

ndr::ndr_struct!(GroupMembership {
    relative_id: u32,
    attributes: u32,
});

/// `SAMPR_GET_GROUPS_BUFFER`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetGroupsBuffer {
    pub membership_count: u32,
    pub groups: UniquePtr<ConformantArray<GroupMembership>>,
}

ndr::ndr_struct!(GetGroupsBuffer {
    membership_count: u32,
    groups: UniquePtr<ConformantArray<GroupMembership>>,
});

impl GetGroupsBuffer {
    pub fn new(groups: Vec<GroupMembership>) -> Self {
        Self {
            membership_count: groups.len() as u32,
            groups: UniquePtr::new(ConformantArray::new(groups)),
        }
    }

    pub fn groups(&self) -> &[GroupMembership] {
        self.groups
            .as_ref()
            .map(|array| array.elements.as_slice())
            .unwrap_or_default()
    }
}

/// `USER_DOMAIN_PASSWORD_INFORMATION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserDomainPasswordInformation {
    pub min_password_length: u16,
    pub password_properties: u32,
}

ndr::ndr_struct!(UserDomainPasswordInformation {
    min_password_length: u16,
    password_properties: u32,
});

/// `SAMPR_REVISION_INFO_V1`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevisionInfoV1 {
    pub revision: u32,
    pub supported_features: u32,
}

ndr::ndr_struct!(RevisionInfoV1 {
    revision: u32,
    supported_features: u32,
});

ndr::ndr_union! {
    /// `SAMPR_REVISION_INFO`. Newer revisions are kept as raw bytes.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RevisionInfo: u32, extensible {
        1 => V1(RevisionInfoV1),
    }
}

impl Default for RevisionInfo {
    fn default() -> Self {
        RevisionInfo::V1(RevisionInfoV1::default())
    }
}

/// `SID_NAME_USE` values carried in lookup results
pub mod sid_name_use {
    pub const USER: u32 = 1;
    pub const GROUP: u32 = 2;
    pub const DOMAIN: u32 = 3;
    pub const ALIAS: u32 = 4;
    pub const WELL_KNOWN_GROUP: u32 = 5;
    pub const UNKNOWN: u32 = 8;
}
