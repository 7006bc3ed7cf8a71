//! NTSTATUS values returned by SAMR operations

pub const STATUS_SUCCESS: u32 = 0x0000_0000;
pub const STATUS_MORE_ENTRIES: u32 = 0x0000_0105;
pub const STATUS_SOME_NOT_MAPPED: u32 = 0x0000_0107;
pub const STATUS_NOT_IMPLEMENTED: u32 = 0xC000_0002;
pub const STATUS_INVALID_INFO_CLASS: u32 = 0xC000_0003;
pub const STATUS_INVALID_HANDLE: u32 = 0xC000_0008;
pub const STATUS_INVALID_PARAMETER: u32 = 0xC000_000D;
pub const STATUS_ACCESS_DENIED: u32 = 0xC000_0022;
pub const STATUS_OBJECT_TYPE_MISMATCH: u32 = 0xC000_0024;
pub const STATUS_USER_EXISTS: u32 = 0xC000_0063;
pub const STATUS_NO_SUCH_USER: u32 = 0xC000_0064;
pub const STATUS_NONE_MAPPED: u32 = 0xC000_0073;
pub const STATUS_NO_SUCH_DOMAIN: u32 = 0xC000_00DF;
pub const STATUS_NOT_SUPPORTED: u32 = 0xC000_00BB;

/// True for success and informational codes
pub fn is_success(status: u32) -> bool {
    status & 0xC000_0000 != 0xC000_0000
}
