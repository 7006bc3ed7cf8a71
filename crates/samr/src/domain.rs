//! Domain information classes (`SAMPR_DOMAIN_INFO_BUFFER`)

use crate::types::{OldLargeInteger, RpcUnicodeString};

/// `DOMAIN_INFORMATION_CLASS` values
pub mod class {
    pub const PASSWORD: u16 = 1;
    pub const GENERAL: u16 = 2;
    pub const LOGOFF: u16 = 3;
    pub const OEM: u16 = 4;
    pub const NAME: u16 = 5;
    pub const REPLICATION: u16 = 6;
    pub const SERVER_ROLE: u16 = 7;
    pub const MODIFIED: u16 = 8;
    pub const STATE: u16 = 9;
    pub const GENERAL2: u16 = 11;
    pub const LOCKOUT: u16 = 12;
    pub const MODIFIED2: u16 = 13;
}

/// `DOMAIN_PASSWORD_INFORMATION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainPasswordInformation {
    pub min_password_length: u16,
    pub password_history_length: u16,
    pub password_properties: u32,
    pub max_password_age: OldLargeInteger,
    pub min_password_age: OldLargeInteger,
}

ndr::ndr_struct!(DomainPasswordInformation {
    min_password_length: u16,
    password_history_length: u16,
    password_properties: u32,
    max_password_age: OldLargeInteger,
    min_password_age: OldLargeInteger,
});

/// `SAMPR_DOMAIN_GENERAL_INFORMATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainGeneralInformation {
    pub force_logoff: OldLargeInteger,
    pub oem_information: RpcUnicodeString,
    pub domain_name: RpcUnicodeString,
    pub replica_source_node_name: RpcUnicodeString,
    pub domain_modified_count: OldLargeInteger,
    pub domain_server_state: u32,
    pub domain_server_role: u32,
    pub uas_compatibility_required: u8,
    pub user_count: u32,
    pub group_count: u32,
    pub alias_count: u32,
}

ndr::ndr_struct!(DomainGeneralInformation {
    force_logoff: OldLargeInteger,
    oem_information: RpcUnicodeString,
    domain_name: RpcUnicodeString,
    replica_source_node_name: RpcUnicodeString,
    domain_modified_count: OldLargeInteger,
    domain_server_state: u32,
    domain_server_role: u32,
    uas_compatibility_required: u8,
    user_count: u32,
    group_count: u32,
    alias_count: u32,
});

/// `DOMAIN_LOGOFF_INFORMATION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainLogoffInformation {
    pub force_logoff: OldLargeInteger,
}

ndr::ndr_struct!(DomainLogoffInformation { force_logoff: OldLargeInteger });

/// `SAMPR_DOMAIN_OEM_INFORMATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainOemInformation {
    pub oem_information: RpcUnicodeString,
}

ndr::ndr_struct!(DomainOemInformation { oem_information: RpcUnicodeString });

/// `SAMPR_DOMAIN_NAME_INFORMATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainNameInformation {
    pub domain_name: RpcUnicodeString,
}

ndr::ndr_struct!(DomainNameInformation { domain_name: RpcUnicodeString });

/// `SAMPR_DOMAIN_REPLICATION_INFORMATION`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainReplicationInformation {
    pub replica_source_node_name: RpcUnicodeString,
}

ndr::ndr_struct!(DomainReplicationInformation {
    replica_source_node_name: RpcUnicodeString,
});

/// `DOMAIN_SERVER_ROLE_INFORMATION`. The role is an NDR enum, two bytes wide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainServerRoleInformation {
    pub domain_server_role: u16,
}

ndr::ndr_struct!(DomainServerRoleInformation { domain_server_role: u16 });

/// `DOMAIN_MODIFIED_INFORMATION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainModifiedInformation {
    pub domain_modified_count: OldLargeInteger,
    pub creation_time: OldLargeInteger,
}

ndr::ndr_struct!(DomainModifiedInformation {
    domain_modified_count: OldLargeInteger,
    creation_time: OldLargeInteger,
});

/// `DOMAIN_STATE_INFORMATION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainStateInformation {
    pub domain_server_state: u16,
}

ndr::ndr_struct!(DomainStateInformation { domain_server_state: u16 });

/// `SAMPR_DOMAIN_LOCKOUT_INFORMATION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainLockoutInformation {
    pub lockout_duration: i64,
    pub lockout_observation_window: i64,
    pub lockout_threshold: u16,
}

ndr::ndr_struct!(DomainLockoutInformation {
    lockout_duration: i64,
    lockout_observation_window: i64,
    lockout_threshold: u16,
});

/// `SAMPR_DOMAIN_GENERAL_INFORMATION2`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainGeneralInformation2 {
    pub general: DomainGeneralInformation,
    pub lockout_duration: i64,
    pub lockout_observation_window: i64,
    pub lockout_threshold: u16,
}

ndr::ndr_struct!(DomainGeneralInformation2 {
    general: DomainGeneralInformation,
    lockout_duration: i64,
    lockout_observation_window: i64,
    lockout_threshold: u16,
});

/// `DOMAIN_MODIFIED_INFORMATION2`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainModifiedInformation2 {
    pub domain_modified_count: OldLargeInteger,
    pub creation_time: OldLargeInteger,
    pub modified_count_at_last_promotion: OldLargeInteger,
}

ndr::ndr_struct!(DomainModifiedInformation2 {
    domain_modified_count: OldLargeInteger,
    creation_time: OldLargeInteger,
    modified_count_at_last_promotion: OldLargeInteger,
});

ndr::ndr_union! {
    /// `SAMPR_DOMAIN_INFO_BUFFER`, switched on the information class
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DomainInfo: u16, strict {
        1 => Password(DomainPasswordInformation),
        2 => General(DomainGeneralInformation),
        3 => Logoff(DomainLogoffInformation),
        4 => Oem(DomainOemInformation),
        5 => Name(DomainNameInformation),
        6 => Replication(DomainReplicationInformation),
        7 => Role(DomainServerRoleInformation),
        8 => Modified(DomainModifiedInformation),
        9 => State(DomainStateInformation),
        11 => General2(DomainGeneralInformation2),
        12 => Lockout(DomainLockoutInformation),
        13 => Modified2(DomainModifiedInformation2),
    }
}

impl DomainInfo {
    /// Information class this value answers
    pub fn class(&self) -> u16 {
        ndr::NdrUnion::selector(self) as u16
    }
}
