//! In-memory account database served over SAMR

use async_trait::async_trait;
use bytes::Bytes;
use dcerpc::CallContext;
use ndr::{ContextHandle, Reply, UniquePtr};
use parking_lot::RwLock;
use samr::domain::{
    DomainGeneralInformation, DomainGeneralInformation2, DomainInfo, DomainLockoutInformation,
    DomainLogoffInformation, DomainModifiedInformation, DomainModifiedInformation2,
    DomainNameInformation, DomainOemInformation, DomainPasswordInformation,
    DomainReplicationInformation, DomainServerRoleInformation, DomainStateInformation,
};
use samr::ops::*;
use samr::status::*;
use samr::types::{
    sid_name_use, EnumerationBuffer, GetGroupsBuffer, GroupMembership, OldLargeInteger,
    ReturnedUstringArray, RidEnumeration, RpcSid, RpcUnicodeString, SrSecurityDescriptor,
    UlongArray, UserDomainPasswordInformation,
};
use samr::user::{
    account_control, LogonHours, UserControlInformation, UserExpiresInformation,
    UserGeneralInformation, UserHomeInformation, UserInfo, UserLogonInformation,
    UserNameInformation, UserPreferencesInformation, UserStringInformation,
};
use samr::user_properties::{UserProperties, UserProperty};
use samr::SamrServer;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// `DomainServerEnabled`
const DOMAIN_SERVER_ENABLED: u16 = 1;
/// `DomainServerRolePrimary`
const DOMAIN_SERVER_ROLE_PRIMARY: u16 = 3;

/// Fixed part of one `SAMPR_RID_ENUMERATION` on the wire
const ENUMERATION_ENTRY_SIZE: usize = 12;

/// Self-relative descriptor with a present, empty DACL
const DEFAULT_SECURITY_DESCRIPTOR: [u8; 20] = [
    0x01, 0x00, 0x04, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

const GROUP_ATTRIBUTES: u32 = 0x0000_0007;

/// What a context handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamObject {
    Server,
    Domain(usize),
    User { domain: usize, rid: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct Account {
    pub rid: u32,
    pub name: String,
    pub full_name: String,
    pub admin_comment: String,
    pub user_comment: String,
    pub home_directory: String,
    pub home_directory_drive: String,
    pub script_path: String,
    pub profile_path: String,
    pub work_stations: String,
    pub parameters: String,
    pub primary_group_id: u32,
    pub account_control: u32,
    pub account_expires: i64,
    pub last_logon: i64,
    pub password_last_set: i64,
    pub logon_count: u16,
    pub bad_password_count: u16,
    pub country_code: u16,
    pub code_page: u16,
    pub groups: Vec<GroupMembership>,
    /// Encoded `USER_PROPERTIES`
    pub supplemental_credentials: Bytes,
}

impl Account {
    /// A normal account in Domain Users
    pub fn new(rid: u32, name: &str) -> Self {
        Self {
            rid,
            name: name.to_string(),
            primary_group_id: 513,
            account_control: account_control::NORMAL_ACCOUNT,
            account_expires: i64::MAX,
            groups: vec![GroupMembership {
                relative_id: 513,
                attributes: GROUP_ATTRIBUTES,
            }],
            ..Default::default()
        }
    }

    pub fn full_name(mut self, full_name: &str) -> Self {
        self.full_name = full_name.to_string();
        self
    }

    pub fn account_control(mut self, account_control: u32) -> Self {
        self.account_control = account_control;
        self
    }

    pub fn member_of(mut self, rid: u32) -> Self {
        self.groups.push(GroupMembership {
            relative_id: rid,
            attributes: GROUP_ATTRIBUTES,
        });
        self
    }

    /// Store `password` as cleartext supplemental credentials
    pub fn set_password(&mut self, password: &str, now: i64) -> samr::Result<()> {
        let properties = UserProperties::new(vec![
            UserProperty::packages(&["CLEARTEXT"]),
            UserProperty::cleartext(password),
        ]);
        self.supplemental_credentials = properties.to_bytes()?;
        self.password_last_set = now;
        Ok(())
    }

    fn general(&self) -> UserGeneralInformation {
        UserGeneralInformation {
            user_name: self.name.as_str().into(),
            full_name: self.full_name.as_str().into(),
            primary_group_id: self.primary_group_id,
            admin_comment: self.admin_comment.as_str().into(),
            user_comment: self.user_comment.as_str().into(),
        }
    }

    fn logon(&self, password: &DomainPasswordInformation) -> UserLogonInformation {
        let must_change = if self.account_control & account_control::DONT_EXPIRE_PASSWORD != 0 {
            i64::MAX
        } else {
            self.password_last_set
                .saturating_sub(password.max_password_age.value())
        };
        UserLogonInformation {
            user_name: self.name.as_str().into(),
            full_name: self.full_name.as_str().into(),
            user_id: self.rid,
            primary_group_id: self.primary_group_id,
            home_directory: self.home_directory.as_str().into(),
            home_directory_drive: self.home_directory_drive.as_str().into(),
            script_path: self.script_path.as_str().into(),
            profile_path: self.profile_path.as_str().into(),
            work_stations: self.work_stations.as_str().into(),
            last_logon: self.last_logon.into(),
            last_logoff: OldLargeInteger::default(),
            password_last_set: self.password_last_set.into(),
            password_can_change: self
                .password_last_set
                .saturating_sub(password.min_password_age.value())
                .into(),
            password_must_change: must_change.into(),
            logon_hours: LogonHours::always(),
            bad_password_count: self.bad_password_count,
            logon_count: self.logon_count,
            user_account_control: self.account_control,
        }
    }

    /// Answer one information class
    pub fn information(&self, class: u16, password: &DomainPasswordInformation) -> Option<UserInfo> {
        use samr::user::class;

        let string = |value: &str| UserStringInformation::new(value);
        Some(match class {
            class::GENERAL => UserInfo::General(self.general()),
            class::PREFERENCES => UserInfo::Preferences(UserPreferencesInformation {
                user_comment: self.user_comment.as_str().into(),
                reserved1: RpcUnicodeString::null(),
                country_code: self.country_code,
                code_page: self.code_page,
            }),
            class::LOGON => UserInfo::Logon(self.logon(password)),
            class::NAME => UserInfo::Name(UserNameInformation {
                user_name: self.name.as_str().into(),
                full_name: self.full_name.as_str().into(),
            }),
            class::ACCOUNT_NAME => UserInfo::AccountName(string(&self.name)),
            class::FULL_NAME => UserInfo::FullName(string(&self.full_name)),
            class::HOME => UserInfo::Home(UserHomeInformation {
                home_directory: self.home_directory.as_str().into(),
                home_directory_drive: self.home_directory_drive.as_str().into(),
            }),
            class::SCRIPT => UserInfo::Script(string(&self.script_path)),
            class::PROFILE => UserInfo::Profile(string(&self.profile_path)),
            class::ADMIN_COMMENT => UserInfo::AdminComment(string(&self.admin_comment)),
            class::WORKSTATIONS => UserInfo::WorkStations(string(&self.work_stations)),
            class::CONTROL => UserInfo::Control(UserControlInformation {
                user_account_control: self.account_control,
            }),
            class::EXPIRES => UserInfo::Expires(UserExpiresInformation {
                account_expires: self.account_expires.into(),
            }),
            class::PARAMETERS => UserInfo::Parameters(string(&self.parameters)),
            _ => return None,
        })
    }

    /// Apply a settable class. General and Logon are read-only.
    fn apply(&mut self, info: UserInfo) -> bool {
        let text = |value: &RpcUnicodeString| value.to_string_lossy().unwrap_or_default();
        match info {
            UserInfo::Preferences(prefs) => {
                self.user_comment = text(&prefs.user_comment);
                self.country_code = prefs.country_code;
                self.code_page = prefs.code_page;
            }
            UserInfo::Name(name) => {
                self.name = text(&name.user_name);
                self.full_name = text(&name.full_name);
            }
            UserInfo::AccountName(value) => self.name = text(&value.value),
            UserInfo::FullName(value) => self.full_name = text(&value.value),
            UserInfo::Home(home) => {
                self.home_directory = text(&home.home_directory);
                self.home_directory_drive = text(&home.home_directory_drive);
            }
            UserInfo::Script(value) => self.script_path = text(&value.value),
            UserInfo::Profile(value) => self.profile_path = text(&value.value),
            UserInfo::AdminComment(value) => self.admin_comment = text(&value.value),
            UserInfo::WorkStations(value) => self.work_stations = text(&value.value),
            UserInfo::Control(control) => self.account_control = control.user_account_control,
            UserInfo::Expires(expires) => self.account_expires = expires.account_expires.value(),
            UserInfo::Parameters(value) => self.parameters = text(&value.value),
            UserInfo::General(_) | UserInfo::Logon(_) => return false,
        }
        true
    }

    /// New account name carried by `info`, if it renames
    fn renames_to(info: &UserInfo) -> Option<String> {
        match info {
            UserInfo::AccountName(value) => value.value.to_string_lossy(),
            UserInfo::Name(name) => name.user_name.to_string_lossy(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Domain {
    pub name: String,
    pub sid: RpcSid,
    pub oem_information: String,
    pub password: DomainPasswordInformation,
    pub lockout: DomainLockoutInformation,
    pub force_logoff: i64,
    pub modified_count: i64,
    pub creation_time: i64,
    pub users: BTreeMap<u32, Account>,
}

impl Domain {
    pub fn new(name: &str, sid: RpcSid, creation_time: i64) -> Self {
        Self {
            name: name.to_string(),
            sid,
            oem_information: String::new(),
            password: DomainPasswordInformation {
                min_password_length: 7,
                password_history_length: 24,
                password_properties: 1,
                // 42 days
                max_password_age: OldLargeInteger::from(-36_288_000_000_000),
                min_password_age: OldLargeInteger::from(-864_000_000_000),
            },
            lockout: DomainLockoutInformation {
                lockout_duration: -18_000_000_000,
                lockout_observation_window: -18_000_000_000,
                lockout_threshold: 0,
            },
            force_logoff: i64::MIN,
            modified_count: 1,
            creation_time,
            users: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, account: Account) {
        self.users.insert(account.rid, account);
        self.modified_count += 1;
    }

    pub fn find(&self, name: &str) -> Option<&Account> {
        self.users
            .values()
            .find(|account| account.name.eq_ignore_ascii_case(name))
    }

    fn general(&self) -> DomainGeneralInformation {
        DomainGeneralInformation {
            force_logoff: self.force_logoff.into(),
            oem_information: self.oem_information.as_str().into(),
            domain_name: self.name.as_str().into(),
            replica_source_node_name: RpcUnicodeString::null(),
            domain_modified_count: self.modified_count.into(),
            domain_server_state: u32::from(DOMAIN_SERVER_ENABLED),
            domain_server_role: u32::from(DOMAIN_SERVER_ROLE_PRIMARY),
            uas_compatibility_required: 0,
            user_count: self.users.len() as u32,
            group_count: 0,
            alias_count: 0,
        }
    }

    /// Answer one information class
    pub fn information(&self, class: u16) -> Option<DomainInfo> {
        use samr::domain::class;

        let modified = DomainModifiedInformation {
            domain_modified_count: self.modified_count.into(),
            creation_time: self.creation_time.into(),
        };
        Some(match class {
            class::PASSWORD => DomainInfo::Password(self.password),
            class::GENERAL => DomainInfo::General(self.general()),
            class::LOGOFF => DomainInfo::Logoff(DomainLogoffInformation {
                force_logoff: self.force_logoff.into(),
            }),
            class::OEM => DomainInfo::Oem(DomainOemInformation {
                oem_information: self.oem_information.as_str().into(),
            }),
            class::NAME => DomainInfo::Name(DomainNameInformation {
                domain_name: self.name.as_str().into(),
            }),
            class::REPLICATION => DomainInfo::Replication(DomainReplicationInformation {
                replica_source_node_name: RpcUnicodeString::null(),
            }),
            class::SERVER_ROLE => DomainInfo::Role(DomainServerRoleInformation {
                domain_server_role: DOMAIN_SERVER_ROLE_PRIMARY,
            }),
            class::MODIFIED => DomainInfo::Modified(modified),
            class::STATE => DomainInfo::State(DomainStateInformation {
                domain_server_state: DOMAIN_SERVER_ENABLED,
            }),
            class::GENERAL2 => DomainInfo::General2(DomainGeneralInformation2 {
                general: self.general(),
                lockout_duration: self.lockout.lockout_duration,
                lockout_observation_window: self.lockout.lockout_observation_window,
                lockout_threshold: self.lockout.lockout_threshold,
            }),
            class::LOCKOUT => DomainInfo::Lockout(self.lockout),
            class::MODIFIED2 => DomainInfo::Modified2(DomainModifiedInformation2 {
                domain_modified_count: modified.domain_modified_count,
                creation_time: modified.creation_time,
                modified_count_at_last_promotion: modified.domain_modified_count,
            }),
            _ => return None,
        })
    }

    fn user_password_information(&self) -> UserDomainPasswordInformation {
        UserDomainPasswordInformation {
            min_password_length: self.password.min_password_length,
            password_properties: self.password.password_properties,
        }
    }
}

/// Domains, accounts and per-object security descriptors
pub struct SamStore {
    domains: Vec<RwLock<Domain>>,
    security: RwLock<HashMap<SamObject, Vec<u8>>>,
}

impl SamStore {
    pub fn new(domains: Vec<Domain>) -> Self {
        Self {
            domains: domains.into_iter().map(RwLock::new).collect(),
            security: RwLock::new(HashMap::new()),
        }
    }

    /// `Builtin` plus one account domain with a few users
    pub fn demo(domain_name: &str) -> samr::Result<Self> {
        // 2024-01-01T00:00:00Z as a FILETIME
        let created = 133_485_408_000_000_000;
        let builtin = Domain::new("Builtin", RpcSid::builtin(), created);

        let sid: RpcSid = "S-1-5-21-2127521184-1604012920-1887927527".parse()?;
        let mut domain = Domain::new(domain_name, sid, created);

        let mut administrator = Account::new(500, "Administrator")
            .account_control(account_control::NORMAL_ACCOUNT | account_control::DONT_EXPIRE_PASSWORD)
            .member_of(512);
        administrator.admin_comment = "Built-in account for administering the computer/domain".into();
        administrator.set_password("Adm1n!strat0r", created)?;

        let guest = Account::new(501, "Guest").account_control(
            account_control::NORMAL_ACCOUNT
                | account_control::ACCOUNT_DISABLED
                | account_control::PASSWORD_NOT_REQUIRED,
        );

        let mut alice = Account::new(1104, "alice").full_name("Alice Example");
        alice.home_directory = "\\\\fs01\\home\\alice".into();
        alice.home_directory_drive = "H:".into();
        alice.set_password("Wonderland1", created)?;

        let mut bob = Account::new(1105, "bob").full_name("Bob Example");
        bob.script_path = "logon.cmd".into();
        bob.set_password("Builder22", created)?;

        for account in [administrator, guest, alice, bob] {
            domain.add(account);
        }
        Ok(Self::new(vec![domain, builtin]))
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn domain(&self, index: usize) -> Option<Domain> {
        self.domains.get(index).map(|domain| domain.read().clone())
    }

    /// Decoded supplemental credentials of an account
    pub fn credentials(&self, domain: usize, rid: u32) -> samr::Result<Option<UserProperties>> {
        let blob = match self.domains.get(domain) {
            Some(domain) => match domain.read().users.get(&rid) {
                Some(account) if !account.supplemental_credentials.is_empty() => {
                    account.supplemental_credentials.clone()
                }
                _ => return Ok(None),
            },
            None => return Ok(None),
        };
        UserProperties::decode(blob).map(Some)
    }

    fn resolve(call: &CallContext, handle: &ContextHandle) -> dcerpc::Result<SamObject> {
        Ok(*call.lookup_handle::<SamObject>(handle)?)
    }

    fn open(call: &CallContext, object: SamObject) -> Reply<HandleResponse> {
        Reply::ok(HandleResponse {
            handle: call.create_handle(object),
        })
    }
}

/// Page `entries` from `start`, keeping the response near `max_length` bytes
fn page(entries: Vec<RidEnumeration>, start: u32, max_length: u32) -> Reply<EnumerateResponse> {
    let start = (start as usize).min(entries.len());
    let mut end = start;
    let mut size = 0usize;
    for entry in &entries[start..] {
        let cost = ENUMERATION_ENTRY_SIZE + usize::from(entry.name.length);
        if end > start && size + cost > max_length as usize {
            break;
        }
        size += cost;
        end += 1;
    }
    let status = if end < entries.len() {
        STATUS_MORE_ENTRIES
    } else {
        STATUS_SUCCESS
    };
    let returned = entries[start..end].to_vec();
    let count_returned = returned.len() as u32;
    Reply::new(
        EnumerateResponse {
            enumeration_context: end as u32,
            buffer: UniquePtr::new(EnumerationBuffer::new(returned)),
            count_returned,
        },
        status,
    )
}

fn lookup_status(mapped: usize, total: usize) -> u32 {
    if mapped == total {
        STATUS_SUCCESS
    } else if mapped == 0 {
        STATUS_NONE_MAPPED
    } else {
        STATUS_SOME_NOT_MAPPED
    }
}

#[async_trait]
impl SamrServer for SamStore {
    async fn connect(&self, call: &CallContext, desired_access: u32) -> dcerpc::Result<Reply<HandleResponse>> {
        debug!("connect, access {:#010x}", desired_access);
        Ok(Self::open(call, SamObject::Server))
    }

    async fn close_handle(&self, call: &CallContext, request: HandleRequest) -> dcerpc::Result<Reply<HandleResponse>> {
        call.close_handle(&request.handle)?;
        Ok(Reply::ok(HandleResponse::default()))
    }

    async fn set_security_object(
        &self,
        call: &CallContext,
        request: SetSecurityObjectRequest,
    ) -> dcerpc::Result<Reply<()>> {
        let object = Self::resolve(call, &request.handle)?;
        let descriptor = request.security_descriptor.as_bytes();
        if descriptor.len() != request.security_descriptor.length as usize
            || descriptor.len() < DEFAULT_SECURITY_DESCRIPTOR.len()
        {
            return Ok(Reply::error(STATUS_INVALID_PARAMETER));
        }
        self.security.write().insert(object, descriptor.to_vec());
        Ok(Reply::ok(()))
    }

    async fn query_security_object(
        &self,
        call: &CallContext,
        request: QuerySecurityObjectRequest,
    ) -> dcerpc::Result<Reply<QuerySecurityObjectResponse>> {
        let object = Self::resolve(call, &request.handle)?;
        let descriptor = self
            .security
            .read()
            .get(&object)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SECURITY_DESCRIPTOR.to_vec());
        Ok(Reply::ok(QuerySecurityObjectResponse {
            security_descriptor: UniquePtr::new(SrSecurityDescriptor::new(descriptor)),
        }))
    }

    async fn lookup_domain(
        &self,
        call: &CallContext,
        request: LookupDomainRequest,
    ) -> dcerpc::Result<Reply<LookupDomainResponse>> {
        if Self::resolve(call, &request.handle)? != SamObject::Server {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        }
        let name = request.name.to_string_lossy().unwrap_or_default();
        let sid = self
            .domains
            .iter()
            .map(|domain| domain.read())
            .find(|domain| domain.name.eq_ignore_ascii_case(&name))
            .map(|domain| domain.sid.clone());
        Ok(match sid {
            Some(sid) => Reply::ok(LookupDomainResponse {
                domain_id: UniquePtr::new(sid),
            }),
            None => Reply::error(STATUS_NO_SUCH_DOMAIN),
        })
    }

    async fn enumerate_domains(
        &self,
        call: &CallContext,
        request: EnumerateDomainsRequest,
    ) -> dcerpc::Result<Reply<EnumerateResponse>> {
        if Self::resolve(call, &request.handle)? != SamObject::Server {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        }
        let entries = self
            .domains
            .iter()
            .enumerate()
            .map(|(index, domain)| RidEnumeration::new(index as u32, &domain.read().name))
            .collect();
        Ok(page(
            entries,
            request.enumeration_context,
            request.prefered_maximum_length,
        ))
    }

    async fn open_domain(&self, call: &CallContext, request: OpenDomainRequest) -> dcerpc::Result<Reply<HandleResponse>> {
        if Self::resolve(call, &request.handle)? != SamObject::Server {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        }
        let index = self
            .domains
            .iter()
            .position(|domain| domain.read().sid == request.domain_id);
        Ok(match index {
            Some(index) => {
                info!("opened domain {}", request.domain_id);
                Self::open(call, SamObject::Domain(index))
            }
            None => Reply::error(STATUS_NO_SUCH_DOMAIN),
        })
    }

    async fn query_information_domain(
        &self,
        call: &CallContext,
        request: QueryInformationDomainRequest,
    ) -> dcerpc::Result<Reply<QueryInformationDomainResponse>> {
        let SamObject::Domain(index) = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        let info = self
            .domains
            .get(index)
            .and_then(|domain| domain.read().information(request.information_class));
        Ok(match info {
            Some(info) => Reply::ok(QueryInformationDomainResponse {
                buffer: UniquePtr::new(info),
            }),
            None => Reply::error(STATUS_INVALID_INFO_CLASS),
        })
    }

    async fn enumerate_users(
        &self,
        call: &CallContext,
        request: EnumerateUsersRequest,
    ) -> dcerpc::Result<Reply<EnumerateResponse>> {
        let SamObject::Domain(index) = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        let Some(domain) = self.domains.get(index) else {
            return Ok(Reply::error(STATUS_NO_SUCH_DOMAIN));
        };
        let entries = domain
            .read()
            .users
            .values()
            .filter(|account| {
                request.user_account_control == 0
                    || account.account_control & request.user_account_control != 0
            })
            .map(|account| RidEnumeration::new(account.rid, &account.name))
            .collect();
        Ok(page(
            entries,
            request.enumeration_context,
            request.prefered_maximum_length,
        ))
    }

    async fn lookup_names(
        &self,
        call: &CallContext,
        request: LookupNamesRequest,
    ) -> dcerpc::Result<Reply<LookupNamesResponse>> {
        let SamObject::Domain(index) = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        let Some(domain) = self.domains.get(index) else {
            return Ok(Reply::error(STATUS_NO_SUCH_DOMAIN));
        };
        let domain = domain.read();

        let mut rids = Vec::with_capacity(request.names.len());
        let mut uses = Vec::with_capacity(request.names.len());
        for name in &request.names.elements {
            let name = name.to_string_lossy().unwrap_or_default();
            match domain.find(&name) {
                Some(account) => {
                    rids.push(account.rid);
                    uses.push(sid_name_use::USER);
                }
                None => {
                    rids.push(0);
                    uses.push(sid_name_use::UNKNOWN);
                }
            }
        }
        let mapped = uses.iter().filter(|&&u| u != sid_name_use::UNKNOWN).count();
        Ok(Reply::new(
            LookupNamesResponse {
                relative_ids: UlongArray::new(rids),
                use_: UlongArray::new(uses),
            },
            lookup_status(mapped, request.names.len()),
        ))
    }

    async fn lookup_ids(&self, call: &CallContext, request: LookupIdsRequest) -> dcerpc::Result<Reply<LookupIdsResponse>> {
        let SamObject::Domain(index) = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        let Some(domain) = self.domains.get(index) else {
            return Ok(Reply::error(STATUS_NO_SUCH_DOMAIN));
        };
        let domain = domain.read();

        let mut names = Vec::with_capacity(request.relative_ids.len());
        let mut uses = Vec::with_capacity(request.relative_ids.len());
        for rid in &request.relative_ids.elements {
            match domain.users.get(rid) {
                Some(account) => {
                    names.push(RpcUnicodeString::new(&account.name));
                    uses.push(sid_name_use::USER);
                }
                None => {
                    names.push(RpcUnicodeString::null());
                    uses.push(sid_name_use::UNKNOWN);
                }
            }
        }
        let mapped = uses.iter().filter(|&&u| u != sid_name_use::UNKNOWN).count();
        Ok(Reply::new(
            LookupIdsResponse {
                names: ReturnedUstringArray::new(names),
                use_: UlongArray::new(uses),
            },
            lookup_status(mapped, request.relative_ids.len()),
        ))
    }

    async fn open_user(&self, call: &CallContext, request: OpenUserRequest) -> dcerpc::Result<Reply<HandleResponse>> {
        let SamObject::Domain(index) = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        let exists = self
            .domains
            .get(index)
            .is_some_and(|domain| domain.read().users.contains_key(&request.user_id));
        if !exists {
            return Ok(Reply::error(STATUS_NO_SUCH_USER));
        }
        Ok(Self::open(
            call,
            SamObject::User {
                domain: index,
                rid: request.user_id,
            },
        ))
    }

    async fn query_information_user(
        &self,
        call: &CallContext,
        request: QueryInformationUserRequest,
    ) -> dcerpc::Result<Reply<QueryInformationUserResponse>> {
        let SamObject::User { domain, rid } = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        let Some(domain) = self.domains.get(domain) else {
            return Ok(Reply::error(STATUS_NO_SUCH_DOMAIN));
        };
        let domain = domain.read();
        let Some(account) = domain.users.get(&rid) else {
            return Ok(Reply::error(STATUS_NO_SUCH_USER));
        };
        Ok(match account.information(request.information_class, &domain.password) {
            Some(info) => Reply::ok(QueryInformationUserResponse {
                buffer: UniquePtr::new(info),
            }),
            None => Reply::error(STATUS_INVALID_INFO_CLASS),
        })
    }

    async fn set_information_user(
        &self,
        call: &CallContext,
        request: SetInformationUserRequest,
    ) -> dcerpc::Result<Reply<()>> {
        let SamObject::User { domain, rid } = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        let Some(domain) = self.domains.get(domain) else {
            return Ok(Reply::error(STATUS_NO_SUCH_DOMAIN));
        };
        let mut domain = domain.write();

        if let Some(name) = Account::renames_to(&request.buffer) {
            if domain.find(&name).is_some_and(|other| other.rid != rid) {
                return Ok(Reply::error(STATUS_USER_EXISTS));
            }
        }
        let Some(account) = domain.users.get_mut(&rid) else {
            return Ok(Reply::error(STATUS_NO_SUCH_USER));
        };
        if !account.apply(request.buffer) {
            return Ok(Reply::error(STATUS_INVALID_INFO_CLASS));
        }
        domain.modified_count += 1;
        debug!("updated user {} class {}", rid, request.information_class);
        Ok(Reply::ok(()))
    }

    async fn get_groups_for_user(
        &self,
        call: &CallContext,
        request: HandleRequest,
    ) -> dcerpc::Result<Reply<GetGroupsForUserResponse>> {
        let SamObject::User { domain, rid } = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        let groups = self
            .domains
            .get(domain)
            .and_then(|domain| domain.read().users.get(&rid).map(|account| account.groups.clone()));
        Ok(match groups {
            Some(groups) => Reply::ok(GetGroupsForUserResponse {
                groups: UniquePtr::new(GetGroupsBuffer::new(groups)),
            }),
            None => Reply::error(STATUS_NO_SUCH_USER),
        })
    }

    async fn get_user_domain_password_information(
        &self,
        call: &CallContext,
        request: HandleRequest,
    ) -> dcerpc::Result<Reply<PasswordInformationResponse>> {
        let SamObject::User { domain, .. } = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        Ok(match self.domains.get(domain) {
            Some(domain) => Reply::ok(PasswordInformationResponse {
                password_information: domain.read().user_password_information(),
            }),
            None => Reply::error(STATUS_NO_SUCH_DOMAIN),
        })
    }

    async fn get_domain_password_information(
        &self,
        _call: &CallContext,
        _request: GetDomainPasswordInformationRequest,
    ) -> dcerpc::Result<Reply<PasswordInformationResponse>> {
        // The account domain comes first
        Ok(match self.domains.first() {
            Some(domain) => Reply::ok(PasswordInformationResponse {
                password_information: domain.read().user_password_information(),
            }),
            None => Reply::error(STATUS_NO_SUCH_DOMAIN),
        })
    }

    async fn rid_to_sid(&self, call: &CallContext, request: RidToSidRequest) -> dcerpc::Result<Reply<RidToSidResponse>> {
        let SamObject::Domain(index) = Self::resolve(call, &request.handle)? else {
            return Ok(Reply::error(STATUS_OBJECT_TYPE_MISMATCH));
        };
        Ok(match self.domains.get(index) {
            Some(domain) => Reply::ok(RidToSidResponse {
                sid: UniquePtr::new(domain.read().sid.with_rid(request.rid)),
            }),
            None => Reply::error(STATUS_NO_SUCH_DOMAIN),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcerpc::{ContextHandleTable, FaultStatus, RpcError};
    use samr::user_properties::PropertyValue;
    use std::sync::Arc;

    fn call() -> CallContext {
        CallContext::new(0, samr::syntax(), Arc::new(ContextHandleTable::new()))
    }

    async fn open_account_domain(store: &SamStore, call: &CallContext) -> ContextHandle {
        let server = store.connect(call, 0).await.unwrap().out.handle;
        let sid = store.domain(0).unwrap().sid;
        store
            .open_domain(
                call,
                OpenDomainRequest {
                    handle: server,
                    desired_access: 0,
                    domain_id: sid,
                },
            )
            .await
            .unwrap()
            .out
            .handle
    }

    #[test]
    fn test_demo_store() {
        let store = SamStore::demo("CONTOSO").unwrap();
        assert_eq!(store.domain_count(), 2);
        let domain = store.domain(0).unwrap();
        assert_eq!(domain.name, "CONTOSO");
        assert_eq!(domain.find("ALICE").unwrap().rid, 1104);
        assert_eq!(store.domain(1).unwrap().sid, RpcSid::builtin());
    }

    #[test]
    fn test_credentials_decode() {
        let store = SamStore::demo("CONTOSO").unwrap();
        let properties = store.credentials(0, 1104).unwrap().unwrap();
        assert_eq!(
            properties.get("Primary:CLEARTEXT").unwrap().value,
            PropertyValue::Cleartext("Wonderland1".into())
        );
        assert!(store.credentials(0, 501).unwrap().is_none());
        assert!(store.credentials(7, 1104).unwrap().is_none());
    }

    #[test]
    fn test_paging() {
        let entries: Vec<_> = ["a", "bb", "ccc"]
            .iter()
            .enumerate()
            .map(|(i, name)| RidEnumeration::new(i as u32, name))
            .collect();

        // Room for the first entry only, then the rest
        let first = page(entries.clone(), 0, 14);
        assert_eq!(first.status, STATUS_MORE_ENTRIES);
        assert_eq!(first.out.count_returned, 1);
        assert_eq!(first.out.enumeration_context, 1);

        let rest = page(entries.clone(), 1, u32::MAX);
        assert_eq!(rest.status, STATUS_SUCCESS);
        assert_eq!(rest.out.count_returned, 2);

        // Always at least one entry
        let tiny = page(entries.clone(), 0, 0);
        assert_eq!(tiny.out.count_returned, 1);

        let past_end = page(entries, 9, u32::MAX);
        assert_eq!(past_end.out.count_returned, 0);
        assert_eq!(past_end.status, STATUS_SUCCESS);
    }

    #[tokio::test]
    async fn test_lookup_names_partial() {
        let store = SamStore::demo("CONTOSO").unwrap();
        let call = call();
        let domain = open_account_domain(&store, &call).await;

        let reply = store
            .lookup_names(&call, LookupNamesRequest::new(domain, &["bob", "mallory"]))
            .await
            .unwrap();
        assert_eq!(reply.status, STATUS_SOME_NOT_MAPPED);
        assert_eq!(reply.out.relative_ids.values(), &[1105, 0]);
        assert_eq!(reply.out.use_.values(), &[sid_name_use::USER, sid_name_use::UNKNOWN]);

        let reply = store
            .lookup_names(&call, LookupNamesRequest::new(domain, &["mallory"]))
            .await
            .unwrap();
        assert_eq!(reply.status, STATUS_NONE_MAPPED);
    }

    #[tokio::test]
    async fn test_wrong_handle_kind() {
        let store = SamStore::demo("CONTOSO").unwrap();
        let call = call();
        let server = store.connect(&call, 0).await.unwrap().out.handle;

        let reply = store
            .open_user(
                &call,
                OpenUserRequest {
                    handle: server,
                    desired_access: 0,
                    user_id: 500,
                },
            )
            .await
            .unwrap();
        assert_eq!(reply.status, STATUS_OBJECT_TYPE_MISMATCH);

        let err = store
            .open_user(
                &call,
                OpenUserRequest {
                    handle: ContextHandle::new([0xEE; 20]),
                    desired_access: 0,
                    user_id: 500,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ContextMismatch));
        assert_eq!(err.fault_status(), u32::from(FaultStatus::ContextMismatch));
    }

    #[tokio::test]
    async fn test_rename_and_collision() {
        let store = SamStore::demo("CONTOSO").unwrap();
        let call = call();
        let domain = open_account_domain(&store, &call).await;
        let user = store
            .open_user(
                &call,
                OpenUserRequest {
                    handle: domain,
                    desired_access: 0,
                    user_id: 1105,
                },
            )
            .await
            .unwrap()
            .out
            .handle;

        let collide = SetInformationUserRequest::new(user, UserInfo::AccountName(UserStringInformation::new("Alice")));
        let reply = store.set_information_user(&call, collide).await.unwrap();
        assert_eq!(reply.status, STATUS_USER_EXISTS);

        let rename = SetInformationUserRequest::new(user, UserInfo::AccountName(UserStringInformation::new("robert")));
        assert_eq!(store.set_information_user(&call, rename).await.unwrap().status, STATUS_SUCCESS);
        assert_eq!(store.domain(0).unwrap().find("robert").unwrap().rid, 1105);

        let read_only = SetInformationUserRequest::new(user, UserInfo::General(Default::default()));
        let reply = store.set_information_user(&call, read_only).await.unwrap();
        assert_eq!(reply.status, STATUS_INVALID_INFO_CLASS);
    }

    #[tokio::test]
    async fn test_security_descriptor_per_object() {
        let store = SamStore::demo("CONTOSO").unwrap();
        let call = call();
        let server = store.connect(&call, 0).await.unwrap().out.handle;

        let query = |handle| QuerySecurityObjectRequest {
            handle,
            security_information: 4,
        };
        let reply = store.query_security_object(&call, query(server)).await.unwrap();
        assert_eq!(
            reply.out.security_descriptor.as_ref().unwrap().as_bytes(),
            &DEFAULT_SECURITY_DESCRIPTOR
        );

        let mut descriptor = DEFAULT_SECURITY_DESCRIPTOR.to_vec();
        descriptor.extend_from_slice(&[0xAA; 8]);
        let set = SetSecurityObjectRequest {
            handle: server,
            security_information: 4,
            security_descriptor: SrSecurityDescriptor::new(descriptor.clone()),
        };
        assert_eq!(store.set_security_object(&call, set).await.unwrap().status, STATUS_SUCCESS);

        let reply = store.query_security_object(&call, query(server)).await.unwrap();
        assert_eq!(reply.out.security_descriptor.as_ref().unwrap().as_bytes(), &descriptor[..]);

        let bad = SetSecurityObjectRequest {
            handle: server,
            security_information: 4,
            security_descriptor: SrSecurityDescriptor {
                length: 99,
                security_descriptor: UniquePtr::null(),
            },
        };
        assert_eq!(
            store.set_security_object(&call, bad).await.unwrap().status,
            STATUS_INVALID_PARAMETER
        );
    }
}
