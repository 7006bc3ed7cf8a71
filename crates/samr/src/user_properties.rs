//! `USER_PROPERTIES`: the packed supplemental credentials blob
//!
//! Unlike the NDR types this blob is byte packed and little-endian:
//!
//! ```text
//! Reserved1: u32
//! Length: u32              # bytes of the property list below, 0 = no list
//! Reserved2: u16
//! Reserved3: u16
//! -- property list, present when Length > 0 --
//! Reserved4: [u8; 96]
//! PropertySignature: u16   # 0x50
//! PropertyCount: u16
//! USER_PROPERTY[PropertyCount]
//! -- end of property list --
//! Reserved5: u8
//!
//! USER_PROPERTY:
//! NameLength: u16          # bytes
//! ValueLength: u16         # bytes of hex text
//! Reserved: u16
//! PropertyName: UTF-16LE
//! PropertyValue: ASCII hex of the value bytes
//! ```
//!
//! Decoding runs in two passes. The first pass parses the layout and the
//! typed property headers. [`UserProperties::fixup`] then makes the property
//! list authoritative over the flat fields and slices each Kerberos key out
//! of its property's value bytes by offset and length.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ndr::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter};

pub const PROPERTY_SIGNATURE: u16 = 0x50;

/// Size of the fixed fields before the property list
const HEADER_SIZE: usize = 12;
const RESERVED4_SIZE: usize = 96;

pub const KERBEROS_NEWER_KEYS: &str = "Primary:Kerberos-Newer-Keys";
pub const KERBEROS: &str = "Primary:Kerberos";
pub const PACKAGES: &str = "Packages";
pub const CLEARTEXT: &str = "Primary:CLEARTEXT";

fn need(buf: &Bytes, n: usize) -> ndr::Result<()> {
    if buf.remaining() < n {
        return Err(NdrError::TruncatedInput {
            needed: n,
            have: buf.remaining(),
        });
    }
    Ok(())
}

fn get_u16(buf: &mut Bytes) -> ndr::Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16_le())
}

fn get_u32(buf: &mut Bytes) -> ndr::Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn to_u16(n: usize, field: &'static str) -> ndr::Result<u16> {
    u16::try_from(n).map_err(|_| NdrError::ValueOutOfRange(field))
}

fn to_u32(n: usize, field: &'static str) -> ndr::Result<u32> {
    u32::try_from(n).map_err(|_| NdrError::ValueOutOfRange(field))
}

fn take(buf: &mut Bytes, n: usize) -> ndr::Result<Bytes> {
    need(buf, n)?;
    Ok(buf.split_to(n))
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn utf16_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Slice `blob[offset..offset + length]`, failing instead of reading past it
fn slice_blob(blob: &Bytes, offset: u32, length: u32) -> ndr::Result<Bytes> {
    let (offset, length) = (offset as usize, length as usize);
    match offset.checked_add(length) {
        Some(end) if end <= blob.len() => Ok(blob.slice(offset..end)),
        _ => Err(NdrError::FixupOutOfRange {
            offset,
            length,
            len: blob.len(),
        }),
    }
}

/// `KERB_KEY_DATA` / `KERB_KEY_DATA_NEW`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KerbKeyData {
    pub reserved1: u16,
    pub reserved2: u16,
    pub reserved3: u32,
    /// Revision 4 only
    pub iteration_count: u32,
    pub key_type: u32,
    pub key_length: u32,
    pub key_offset: u32,
    /// Key material, filled in by fixup
    pub key: Bytes,
}

impl KerbKeyData {
    pub fn new(key_type: u32, key: impl Into<Bytes>) -> Self {
        let key = key.into();
        Self {
            key_type,
            key_length: key.len() as u32,
            key,
            ..Default::default()
        }
    }

    fn parse(buf: &mut Bytes, newer: bool) -> ndr::Result<Self> {
        let reserved1 = get_u16(buf)?;
        let reserved2 = get_u16(buf)?;
        let reserved3 = get_u32(buf)?;
        let iteration_count = if newer { get_u32(buf)? } else { 0 };
        Ok(Self {
            reserved1,
            reserved2,
            reserved3,
            iteration_count,
            key_type: get_u32(buf)?,
            key_length: get_u32(buf)?,
            key_offset: get_u32(buf)?,
            key: Bytes::new(),
        })
    }

    fn write(&self, out: &mut BytesMut, newer: bool) {
        out.put_u16_le(self.reserved1);
        out.put_u16_le(self.reserved2);
        out.put_u32_le(self.reserved3);
        if newer {
            out.put_u32_le(self.iteration_count);
        }
        out.put_u32_le(self.key_type);
        out.put_u32_le(self.key_length);
        out.put_u32_le(self.key_offset);
    }
}

/// `KERB_STORED_CREDENTIAL` (revision 3) and `KERB_STORED_CREDENTIAL_NEW`
/// (revision 4). Keys and salt are stored as offset/length pairs into the
/// value bytes of the property that holds the credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KerbStoredCredential {
    pub revision: u16,
    pub flags: u16,
    pub default_salt_length: u16,
    pub default_salt_maximum_length: u16,
    pub default_salt_offset: u32,
    /// Revision 4 only
    pub default_iteration_count: u32,
    pub credentials: Vec<KerbKeyData>,
    /// Revision 4 only
    pub service_credentials: Vec<KerbKeyData>,
    pub old_credentials: Vec<KerbKeyData>,
    /// Revision 4 only
    pub older_credentials: Vec<KerbKeyData>,
    /// Filled in by fixup
    pub default_salt: Bytes,
}

impl KerbStoredCredential {
    fn is_newer(&self) -> bool {
        self.revision >= 4
    }

    /// Parse the header and key entries. Key material is left empty.
    pub fn parse(mut buf: Bytes) -> ndr::Result<Self> {
        let buf = &mut buf;
        let revision = get_u16(buf)?;
        let flags = get_u16(buf)?;
        match revision {
            3 => {
                let credential_count = get_u16(buf)?;
                let old_credential_count = get_u16(buf)?;
                let mut cred = Self {
                    revision,
                    flags,
                    default_salt_length: get_u16(buf)?,
                    default_salt_maximum_length: get_u16(buf)?,
                    default_salt_offset: get_u32(buf)?,
                    ..Default::default()
                };
                cred.credentials = parse_keys(buf, credential_count, false)?;
                cred.old_credentials = parse_keys(buf, old_credential_count, false)?;
                Ok(cred)
            }
            4 => {
                let credential_count = get_u16(buf)?;
                let service_credential_count = get_u16(buf)?;
                let old_credential_count = get_u16(buf)?;
                let older_credential_count = get_u16(buf)?;
                let mut cred = Self {
                    revision,
                    flags,
                    default_salt_length: get_u16(buf)?,
                    default_salt_maximum_length: get_u16(buf)?,
                    default_salt_offset: get_u32(buf)?,
                    default_iteration_count: get_u32(buf)?,
                    ..Default::default()
                };
                cred.credentials = parse_keys(buf, credential_count, true)?;
                cred.service_credentials = parse_keys(buf, service_credential_count, true)?;
                cred.old_credentials = parse_keys(buf, old_credential_count, true)?;
                cred.older_credentials = parse_keys(buf, older_credential_count, true)?;
                Ok(cred)
            }
            other => Err(NdrError::InvalidEnumValue {
                name: "KERB_STORED_CREDENTIAL revision",
                value: u32::from(other),
            }),
        }
    }

    /// Materialize the salt and every key from `blob`
    pub fn fixup(&mut self, blob: &Bytes) -> ndr::Result<()> {
        self.default_salt = slice_blob(
            blob,
            self.default_salt_offset,
            u32::from(self.default_salt_length),
        )?;
        for key in self
            .credentials
            .iter_mut()
            .chain(self.service_credentials.iter_mut())
            .chain(self.old_credentials.iter_mut())
            .chain(self.older_credentials.iter_mut())
        {
            key.key = slice_blob(blob, key.key_offset, key.key_length)?;
        }
        Ok(())
    }

    /// Lay the credential out as property value bytes, assigning offsets
    /// for the salt and keys after the key entries.
    pub fn to_bytes(&self) -> ndr::Result<Bytes> {
        let newer = self.is_newer();
        let (header, entry) = if newer { (24, 24) } else { (16, 20) };
        let entries = self.credentials.len()
            + self.service_credentials.len()
            + self.old_credentials.len()
            + self.older_credentials.len();

        let mut offset = to_u32(header + entry * entries, "KERB_STORED_CREDENTIAL size")?;
        let salt_offset = offset;
        offset = offset
            .checked_add(to_u32(self.default_salt.len(), "DefaultSaltLength")?)
            .ok_or(NdrError::IntegerOverflow)?;

        let mut keys: Vec<KerbKeyData> = Vec::with_capacity(entries);
        for key in self
            .credentials
            .iter()
            .chain(&self.service_credentials)
            .chain(&self.old_credentials)
            .chain(&self.older_credentials)
        {
            let mut key = key.clone();
            key.key_offset = offset;
            key.key_length = to_u32(key.key.len(), "KeyLength")?;
            offset = offset.checked_add(key.key_length).ok_or(NdrError::IntegerOverflow)?;
            keys.push(key);
        }

        let mut out = BytesMut::with_capacity(offset as usize);
        out.put_u16_le(self.revision);
        out.put_u16_le(self.flags);
        out.put_u16_le(to_u16(self.credentials.len(), "CredentialCount")?);
        if newer {
            out.put_u16_le(to_u16(self.service_credentials.len(), "ServiceCredentialCount")?);
        }
        out.put_u16_le(to_u16(self.old_credentials.len(), "OldCredentialCount")?);
        if newer {
            out.put_u16_le(to_u16(self.older_credentials.len(), "OlderCredentialCount")?);
        }
        let salt_length = to_u16(self.default_salt.len(), "DefaultSaltLength")?;
        out.put_u16_le(salt_length);
        out.put_u16_le(salt_length);
        out.put_u32_le(salt_offset);
        if newer {
            out.put_u32_le(self.default_iteration_count);
        }
        for key in &keys {
            key.write(&mut out, newer);
        }
        out.put_slice(&self.default_salt);
        for key in &keys {
            out.put_slice(&key.key);
        }
        Ok(out.freeze())
    }
}

fn parse_keys(buf: &mut Bytes, count: u16, newer: bool) -> ndr::Result<Vec<KerbKeyData>> {
    (0..count).map(|_| KerbKeyData::parse(buf, newer)).collect()
}

/// Typed view of a property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    KerberosNewerKeys(KerbStoredCredential),
    Kerberos(KerbStoredCredential),
    /// Names of the credential packages present
    Packages(Vec<String>),
    /// Cleartext password
    Cleartext(String),
    /// Any other property
    Raw,
}

impl PropertyValue {
    fn parse(name: &str, raw: &Bytes) -> ndr::Result<Self> {
        Ok(match name {
            KERBEROS_NEWER_KEYS => Self::KerberosNewerKeys(KerbStoredCredential::parse(raw.clone())?),
            KERBEROS => Self::Kerberos(KerbStoredCredential::parse(raw.clone())?),
            PACKAGES => Self::Packages(
                String::from_utf16_lossy(&utf16_units(raw))
                    .split('\0')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            CLEARTEXT => Self::Cleartext(
                String::from_utf16(&utf16_units(raw))
                    .map_err(|_| NdrError::InvalidString("cleartext password is not UTF-16".into()))?,
            ),
            _ => Self::Raw,
        })
    }
}

/// `USER_PROPERTY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProperty {
    pub name: String,
    pub reserved: u16,
    /// Value bytes after hex decoding
    pub raw: Bytes,
    pub value: PropertyValue,
}

impl UserProperty {
    /// Build a property from its name and value bytes, parsing and fixing
    /// up the typed view.
    pub fn new(name: &str, raw: impl Into<Bytes>) -> ndr::Result<Self> {
        let raw = raw.into();
        let mut property = Self {
            name: name.to_string(),
            reserved: 0,
            value: PropertyValue::parse(name, &raw)?,
            raw,
        };
        property.fixup()?;
        Ok(property)
    }

    pub fn cleartext(password: &str) -> Self {
        Self {
            name: CLEARTEXT.to_string(),
            reserved: 0,
            raw: Bytes::from(utf16_bytes(password)),
            value: PropertyValue::Cleartext(password.to_string()),
        }
    }

    pub fn packages(names: &[&str]) -> Self {
        let raw = utf16_bytes(&names.join("\0"));
        Self {
            name: PACKAGES.to_string(),
            reserved: 0,
            raw: Bytes::from(raw),
            value: PropertyValue::Packages(names.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn parse(buf: &mut Bytes) -> ndr::Result<Self> {
        let name_length = get_u16(buf)? as usize;
        let value_length = get_u16(buf)? as usize;
        let reserved = get_u16(buf)?;
        let name = take(buf, name_length)?;
        let name = String::from_utf16(&utf16_units(&name))
            .map_err(|_| NdrError::InvalidString("property name is not UTF-16".into()))?;
        let hex_value = take(buf, value_length)?;
        let raw = hex::decode(&hex_value)
            .map_err(|e| NdrError::InvalidString(format!("property {name}: {e}")))?;
        let raw = Bytes::from(raw);
        Ok(Self {
            value: PropertyValue::parse(&name, &raw)?,
            name,
            reserved,
            raw,
        })
    }

    fn write(&self, out: &mut BytesMut) -> ndr::Result<()> {
        let name = utf16_bytes(&self.name);
        let value = hex::encode_upper(&self.raw);
        out.put_u16_le(u16::try_from(name.len()).map_err(|_| NdrError::ValueOutOfRange("USER_PROPERTY NameLength"))?);
        out.put_u16_le(u16::try_from(value.len()).map_err(|_| NdrError::ValueOutOfRange("USER_PROPERTY ValueLength"))?);
        out.put_u16_le(self.reserved);
        out.put_slice(&name);
        out.put_slice(value.as_bytes());
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        6 + self.name.encode_utf16().count() * 2 + self.raw.len() * 2
    }

    /// Slice key material out of this property's own value bytes
    pub fn fixup(&mut self) -> ndr::Result<()> {
        match &mut self.value {
            PropertyValue::KerberosNewerKeys(cred) | PropertyValue::Kerberos(cred) => {
                cred.fixup(&self.raw)
            }
            _ => Ok(()),
        }
    }
}

/// The property list that follows the header when `Length > 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPropertiesList {
    pub reserved4: [u8; RESERVED4_SIZE],
    pub property_signature: u16,
    pub property_count: u16,
    pub properties: Vec<UserProperty>,
}

impl UserPropertiesList {
    pub fn new(properties: Vec<UserProperty>) -> Self {
        let mut reserved4 = [0u8; RESERVED4_SIZE];
        // UTF-16 spaces
        for pair in reserved4.chunks_exact_mut(2) {
            pair[0] = 0x20;
        }
        Self {
            reserved4,
            property_signature: PROPERTY_SIGNATURE,
            property_count: properties.len() as u16,
            properties,
        }
    }

    fn parse(mut buf: Bytes) -> ndr::Result<Self> {
        let buf = &mut buf;
        let mut reserved4 = [0u8; RESERVED4_SIZE];
        reserved4.copy_from_slice(&take(buf, RESERVED4_SIZE)?);
        let property_signature = get_u16(buf)?;
        if property_signature != PROPERTY_SIGNATURE {
            return Err(NdrError::InvalidEnumValue {
                name: "USER_PROPERTIES PropertySignature",
                value: u32::from(property_signature),
            });
        }
        let property_count = get_u16(buf)?;
        let properties = (0..property_count)
            .map(|_| UserProperty::parse(buf))
            .collect::<ndr::Result<Vec<_>>>()?;
        Ok(Self {
            reserved4,
            property_signature,
            property_count,
            properties,
        })
    }

    fn encoded_len(&self) -> usize {
        RESERVED4_SIZE + 4 + self.properties.iter().map(UserProperty::encoded_len).sum::<usize>()
    }
}

/// `USER_PROPERTIES`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProperties {
    pub reserved1: u32,
    pub length: u32,
    pub reserved2: u16,
    pub reserved3: u16,
    pub property_signature: u16,
    pub property_count: u16,
    /// Flat view of the properties; replaced by the list's on fixup
    pub properties: Vec<UserProperty>,
    pub list: Option<UserPropertiesList>,
    pub reserved5: u8,
}

impl UserProperties {
    pub fn new(properties: Vec<UserProperty>) -> Self {
        let list = UserPropertiesList::new(properties);
        let mut props = Self {
            length: list.encoded_len() as u32,
            list: Some(list),
            ..Default::default()
        };
        props.apply_list();
        props
    }

    /// Decode and fix up a blob
    pub fn decode(data: impl Into<Bytes>) -> crate::Result<Self> {
        let mut props = Self::parse(data.into())?;
        props.fixup()?;
        Ok(props)
    }

    /// First pass: layout and typed headers, no key material
    pub fn parse(mut buf: Bytes) -> ndr::Result<Self> {
        let buf = &mut buf;
        need(buf, HEADER_SIZE)?;
        let reserved1 = buf.get_u32_le();
        let length = buf.get_u32_le();
        let reserved2 = buf.get_u16_le();
        let reserved3 = buf.get_u16_le();
        let list = if length > 0 {
            Some(UserPropertiesList::parse(take(buf, length as usize)?)?)
        } else {
            None
        };
        need(buf, 1)?;
        let reserved5 = buf.get_u8();
        Ok(Self {
            reserved1,
            length,
            reserved2,
            reserved3,
            list,
            reserved5,
            ..Default::default()
        })
    }

    /// Second pass. The property list, when present, overwrites the flat
    /// fields; then each property slices its keys from its value bytes.
    pub fn fixup(&mut self) -> ndr::Result<()> {
        self.apply_list();
        for property in &mut self.properties {
            property.fixup()?;
        }
        if let Some(list) = &mut self.list {
            for property in &mut list.properties {
                property.fixup()?;
            }
        }
        Ok(())
    }

    fn apply_list(&mut self) {
        if let Some(list) = &self.list {
            self.property_signature = list.property_signature;
            self.property_count = list.property_count;
            self.properties = list.properties.clone();
        }
    }

    pub fn get(&self, name: &str) -> Option<&UserProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn to_bytes(&self) -> ndr::Result<Bytes> {
        let list_len = self.list.as_ref().map_or(0, UserPropertiesList::encoded_len);
        let mut out = BytesMut::with_capacity(HEADER_SIZE + list_len + 1);
        out.put_u32_le(self.reserved1);
        out.put_u32_le(u32::try_from(list_len).map_err(|_| NdrError::ValueOutOfRange("USER_PROPERTIES Length"))?);
        out.put_u16_le(self.reserved2);
        out.put_u16_le(self.reserved3);
        if let Some(list) = &self.list {
            out.put_slice(&list.reserved4);
            out.put_u16_le(list.property_signature);
            out.put_u16_le(to_u16(list.properties.len(), "PropertyCount")?);
            for property in &list.properties {
                property.write(&mut out)?;
            }
        }
        out.put_u8(self.reserved5);
        Ok(out.freeze())
    }
}

/// Carried in NDR as a counted byte array
impl NdrEncode for UserProperties {
    fn ndr_encode(&self, w: &mut NdrWriter) -> ndr::Result<()> {
        let bytes = self.to_bytes()?;
        w.write_count(bytes.len(), "USER_PROPERTIES size")?;
        w.write_bytes(&bytes);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for UserProperties {
    fn ndr_decode(r: &mut NdrReader) -> ndr::Result<Self> {
        let size = r.read_u32()? as usize;
        let blob = r.read_bytes(size)?;
        Self::parse(blob)
    }

    fn ndr_fixup(&mut self, _r: &mut NdrReader) -> ndr::Result<()> {
        self.fixup()
    }

    fn ndr_align() -> usize {
        4
    }
}
