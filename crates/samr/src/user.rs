//! User information classes (`SAMPR_USER_INFO_BUFFER`)

use crate::types::{OldLargeInteger, RpcUnicodeString};
use ndr::{ConformantVaryingArray, UniquePtr};

/// `USER_INFORMATION_CLASS` values
pub mod class {
    pub const GENERAL: u16 = 1;
    pub const PREFERENCES: u16 = 2;
    pub const LOGON: u16 = 3;
    pub const NAME: u16 = 6;
    pub const ACCOUNT_NAME: u16 = 7;
    pub const FULL_NAME: u16 = 8;
    pub const HOME: u16 = 10;
    pub const SCRIPT: u16 = 11;
    pub const PROFILE: u16 = 12;
    pub const ADMIN_COMMENT: u16 = 13;
    pub const WORKSTATIONS: u16 = 14;
    pub const CONTROL: u16 = 16;
    pub const EXPIRES: u16 = 17;
    pub const PARAMETERS: u16 = 20;
}

/// `UserAccountControl` bits
pub mod account_control {
    pub const ACCOUNT_DISABLED: u32 = 0x0000_0001;
    pub const HOME_DIRECTORY_REQUIRED: u32 = 0x0000_0002;
    pub const PASSWORD_NOT_REQUIRED: u32 = 0x0000_0004;
    pub const NORMAL_ACCOUNT: u32 = 0x0000_0010;
    pub const WORKSTATION_TRUST_ACCOUNT: u32 = 0x0000_0080;
    pub const SERVER_TRUST_ACCOUNT: u32 = 0x0000_0100;
    pub const DONT_EXPIRE_PASSWORD: u32 = 0x0000_0200;
    pub const ACCOUNT_AUTO_LOCKED: u32 = 0x0000_0400;
}

/// Size of the logon hours bitmap buffer
pub const LOGON_HOURS_MAX: usize = 1260;

/// `SAMPR_LOGON_HOURS`: `units_per_week` bits, one per time unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogonHours {
    pub units_per_week: u16,
    pub logon_hours: UniquePtr<ConformantVaryingArray<u8>>,
}

ndr::ndr_struct!(LogonHours {
    units_per_week: u16,
    logon_hours: UniquePtr<ConformantVaryingArray<u8>>,
});

impl LogonHours {
    /// Every hour of the week allowed
    pub fn always() -> Self {
        Self::from_bitmap(168, vec![0xFF; 21])
    }

    pub fn from_bitmap(units_per_week: u16, bitmap: Vec<u8>) -> Self {
        Self {
            units_per_week,
            logon_hours: UniquePtr::new(ConformantVaryingArray::with_max(LOGON_HOURS_MAX, bitmap)),
        }
    }

    pub fn bitmap(&self) -> &[u8] {
        self.logon_hours
            .as_ref()
            .map(|array| array.elements.as_slice())
            .unwrap_or_default()
    }
}

/// `SAMPR_USER_GENERAL_INFORMATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserGeneralInformation {
    pub user_name: RpcUnicodeString,
    pub full_name: RpcUnicodeString,
    pub primary_group_id: u32,
    pub admin_comment: RpcUnicodeString,
    pub user_comment: RpcUnicodeString,
}

ndr::ndr_struct!(UserGeneralInformation {
    user_name: RpcUnicodeString,
    full_name: RpcUnicodeString,
    primary_group_id: u32,
    admin_comment: RpcUnicodeString,
    user_comment: RpcUnicodeString,
});

/// `SAMPR_USER_PREFERENCES_INFORMATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPreferencesInformation {
    pub user_comment: RpcUnicodeString,
    pub reserved1: RpcUnicodeString,
    pub country_code: u16,
    pub code_page: u16,
}

ndr::ndr_struct!(UserPreferencesInformation {
    user_comment: RpcUnicodeString,
    reserved1: RpcUnicodeString,
    country_code: u16,
    code_page: u16,
});

/// `SAMPR_USER_LOGON_INFORMATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserLogonInformation {
    pub user_name: RpcUnicodeString,
    pub full_name: RpcUnicodeString,
    pub user_id: u32,
    pub primary_group_id: u32,
    pub home_directory: RpcUnicodeString,
    pub home_directory_drive: RpcUnicodeString,
    pub script_path: RpcUnicodeString,
    pub profile_path: RpcUnicodeString,
    pub work_stations: RpcUnicodeString,
    pub last_logon: OldLargeInteger,
    pub last_logoff: OldLargeInteger,
    pub password_last_set: OldLargeInteger,
    pub password_can_change: OldLargeInteger,
    pub password_must_change: OldLargeInteger,
    pub logon_hours: LogonHours,
    pub bad_password_count: u16,
    pub logon_count: u16,
    pub user_account_control: u32,
}

ndr::ndr_struct!(UserLogonInformation {
    user_name: RpcUnicodeString,
    full_name: RpcUnicodeString,
    user_id: u32,
    primary_group_id: u32,
    home_directory: RpcUnicodeString,
    home_directory_drive: RpcUnicodeString,
    script_path: RpcUnicodeString,
    profile_path: RpcUnicodeString,
    work_stations: RpcUnicodeString,
    last_logon: OldLargeInteger,
    last_logoff: OldLargeInteger,
    password_last_set: OldLargeInteger,
    password_can_change: OldLargeInteger,
    password_must_change: OldLargeInteger,
    logon_hours: LogonHours,
    bad_password_count: u16,
    logon_count: u16,
    user_account_control: u32,
});

/// `SAMPR_USER_NAME_INFORMATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserNameInformation {
    pub user_name: RpcUnicodeString,
    pub full_name: RpcUnicodeString,
}

ndr::ndr_struct!(UserNameInformation {
    user_name: RpcUnicodeString,
    full_name: RpcUnicodeString,
});

/// `SAMPR_USER_HOME_INFORMATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserHomeInformation {
    pub home_directory: RpcUnicodeString,
    pub home_directory_drive: RpcUnicodeString,
}

ndr::ndr_struct!(UserHomeInformation {
    home_directory: RpcUnicodeString,
    home_directory_drive: RpcUnicodeString,
});

/// Single-string classes: account name, full name, script, profile,
/// admin comment, workstations and parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStringInformation {
    pub value: RpcUnicodeString,
}

ndr::ndr_struct!(UserStringInformation { value: RpcUnicodeString });

impl UserStringInformation {
    pub fn new(value: &str) -> Self {
        Self {
            value: RpcUnicodeString::new(value),
        }
    }
}

/// `USER_CONTROL_INFORMATION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserControlInformation {
    pub user_account_control: u32,
}

ndr::ndr_struct!(UserControlInformation { user_account_control: u32 });

/// `USER_EXPIRES_INFORMATION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserExpiresInformation {
    pub account_expires: OldLargeInteger,
}

ndr::ndr_struct!(UserExpiresInformation { account_expires: OldLargeInteger });

ndr::ndr_union! {
    /// `SAMPR_USER_INFO_BUFFER`, switched on the information class
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum UserInfo: u16, strict {
        1 => General(UserGeneralInformation),
        2 => Preferences(UserPreferencesInformation),
        3 => Logon(UserLogonInformation),
        6 => Name(UserNameInformation),
        7 => AccountName(UserStringInformation),
        8 => FullName(UserStringInformation),
        10 => Home(UserHomeInformation),
        11 => Script(UserStringInformation),
        12 => Profile(UserStringInformation),
        13 => AdminComment(UserStringInformation),
        14 => WorkStations(UserStringInformation),
        16 => Control(UserControlInformation),
        17 => Expires(UserExpiresInformation),
        20 => Parameters(UserStringInformation),
    }
}

impl UserInfo {
    /// Information class this value answers
    pub fn class(&self) -> u16 {
        ndr::NdrUnion::selector(self) as u16
    }
}
