//! DCE RPC PDU (Protocol Data Unit) types
//!
//! This module implements the connection-oriented wire format as defined in:
//! - DCE 1.1: Remote Procedure Call (C706), chapter 12
//! - MS-RPCE: Remote Procedure Call Protocol Extensions
//!
//! DCE RPC PDU Header Format:
//! ```text
//! +--------+--------+--------+--------+
//! |  vers  |vers_min| ptype  | pflags |
//! +--------+--------+--------+--------+
//! |        data representation        |
//! +--------+--------+--------+--------+
//! |   frag_len      |   auth_len      |
//! +--------+--------+--------+--------+
//! |             call_id               |
//! +--------+--------+--------+--------+
//! ```
//!
//! PDU bodies are NDR-encoded in the byte order named by the header's data
//! representation, so they are built with [`NdrWriter`] and parsed with
//! [`NdrReader`]. Authentication verifiers are not interpreted; when present
//! they are stripped off the end of the body.

use crate::error::{Result, RpcError};
use bytes::{BufMut, Bytes, BytesMut};
use ndr::{NdrContext, NdrReader, NdrWriter};
use std::fmt;
use uuid::Uuid;

/// DCE RPC protocol version
pub const DCE_RPC_VERSION: u8 = 5;
/// DCE RPC protocol minor version
pub const DCE_RPC_VERSION_MINOR: u8 = 0;

/// Fragment size every implementation must accept
pub const DEFAULT_MAX_FRAG: u16 = 4280;

/// NDR Transfer Syntax UUID
pub const NDR_SYNTAX_UUID: Uuid = Uuid::from_u128(0x8a885d04_1ceb_11c9_9fe8_08002b104860);
pub const NDR_SYNTAX_VERSION: u32 = 2;

/// auth_type, auth_level, auth_pad_length, reserved, auth_context_id
pub const SEC_TRAILER_SIZE: usize = 8;

/// Connection-oriented packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 2,
    Fault = 3,
    Bind = 11,
    BindAck = 12,
    BindNak = 13,
    AlterContext = 14,
    AlterContextResp = 15,
    /// Third leg of an authenticated bind (MS-RPCE)
    Auth3 = 16,
    Shutdown = 17,
    CoCancel = 18,
    Orphaned = 19,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Fault),
            11 => Some(Self::Bind),
            12 => Some(Self::BindAck),
            13 => Some(Self::BindNak),
            14 => Some(Self::AlterContext),
            15 => Some(Self::AlterContextResp),
            16 => Some(Self::Auth3),
            17 => Some(Self::Shutdown),
            18 => Some(Self::CoCancel),
            19 => Some(Self::Orphaned),
            _ => None,
        }
    }
}

/// Packet flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// First fragment
    pub const FIRST_FRAG: u8 = 0x01;
    /// Last fragment
    pub const LAST_FRAG: u8 = 0x02;
    /// Cancel pending
    pub const PENDING_CANCEL: u8 = 0x04;
    /// Supports concurrent multiplexing
    pub const CONC_MPX: u8 = 0x10;
    /// Did not execute
    pub const DID_NOT_EXECUTE: u8 = 0x20;
    /// Maybe semantics requested
    pub const MAYBE: u8 = 0x40;
    /// Object UUID present
    pub const OBJECT_UUID: u8 = 0x80;

    pub fn new() -> Self {
        Self(0)
    }

    /// Create flags for a complete (non-fragmented) PDU
    pub fn complete() -> Self {
        Self(Self::FIRST_FRAG | Self::LAST_FRAG)
    }

    pub fn set_first_frag(&mut self) -> &mut Self {
        self.0 |= Self::FIRST_FRAG;
        self
    }

    pub fn set_last_frag(&mut self) -> &mut Self {
        self.0 |= Self::LAST_FRAG;
        self
    }

    pub fn set(&mut self, flag: u8) -> &mut Self {
        self.0 |= flag;
        self
    }

    pub fn contains(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub fn is_first_frag(&self) -> bool {
        self.contains(Self::FIRST_FRAG)
    }

    pub fn is_last_frag(&self) -> bool {
        self.contains(Self::LAST_FRAG)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

/// Data Representation Format Label
///
/// Byte 0 carries the integer representation in the upper nibble and the
/// character set in the lower nibble; byte 1 is the floating point format.
/// Only the integer representation changes how NDR data is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRepresentation(pub [u8; 4]);

impl DataRepresentation {
    /// Little-endian, ASCII, IEEE
    pub const LITTLE_ENDIAN: Self = Self([0x10, 0x00, 0x00, 0x00]);
    /// Big-endian, ASCII, IEEE
    pub const BIG_ENDIAN: Self = Self([0x00, 0x00, 0x00, 0x00]);

    pub fn is_little_endian(&self) -> bool {
        (self.0[0] & 0xF0) != 0
    }

    /// Codec settings for stub data carried under this label
    pub fn ndr_context(&self) -> NdrContext {
        NdrContext::with_byte_order(self.is_little_endian())
    }

    pub fn from_ndr_context(ctx: &NdrContext) -> Self {
        if ctx.little_endian {
            Self::LITTLE_ENDIAN
        } else {
            Self::BIG_ENDIAN
        }
    }
}

impl Default for DataRepresentation {
    fn default() -> Self {
        Self::LITTLE_ENDIAN
    }
}

pub(crate) fn encode_uuid(w: &mut NdrWriter, uuid: &Uuid) {
    let (d1, d2, d3, d4) = uuid.as_fields();
    w.write_u32(d1);
    w.write_u16(d2);
    w.write_u16(d3);
    w.write_bytes(d4);
}

pub(crate) fn decode_uuid(r: &mut NdrReader) -> Result<Uuid> {
    let d1 = r.read_u32()?;
    let d2 = r.read_u16()?;
    let d3 = r.read_u16()?;
    let tail = r.read_bytes(8)?;
    let mut d4 = [0u8; 8];
    d4.copy_from_slice(&tail);
    Ok(Uuid::from_fields(d1, d2, d3, &d4))
}

/// Syntax ID - interface UUID with version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntaxId {
    pub uuid: Uuid,
    /// major in lower 16 bits, minor in upper 16 bits
    pub version: u32,
}

impl SyntaxId {
    pub const NIL: SyntaxId = SyntaxId {
        uuid: Uuid::nil(),
        version: 0,
    };

    pub fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self {
            uuid,
            version: (major as u32) | ((minor as u32) << 16),
        }
    }

    /// NDR 2.0 transfer syntax
    pub fn ndr() -> Self {
        Self {
            uuid: NDR_SYNTAX_UUID,
            version: NDR_SYNTAX_VERSION,
        }
    }

    pub fn major_version(&self) -> u16 {
        self.version as u16
    }

    pub fn minor_version(&self) -> u16 {
        (self.version >> 16) as u16
    }

    pub fn encode(&self, w: &mut NdrWriter) {
        encode_uuid(w, &self.uuid);
        w.write_u32(self.version);
    }

    pub fn decode(r: &mut NdrReader) -> Result<Self> {
        let uuid = decode_uuid(r)?;
        let version = r.read_u32()?;
        Ok(Self { uuid, version })
    }
}

impl fmt::Display for SyntaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{}.{}",
            self.uuid,
            self.major_version(),
            self.minor_version()
        )
    }
}

/// Common PDU header (16 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduHeader {
    /// RPC version (always 5)
    pub version: u8,
    /// RPC minor version (0 or 1)
    pub version_minor: u8,
    pub packet_type: PacketType,
    pub packet_flags: PacketFlags,
    pub data_rep: DataRepresentation,
    /// Total length of the PDU fragment
    pub frag_length: u16,
    /// Length of authentication data
    pub auth_length: u16,
    pub call_id: u32,
}

impl PduHeader {
    /// PDU header size in bytes
    pub const SIZE: usize = 16;

    pub fn new(packet_type: PacketType, call_id: u32) -> Self {
        Self {
            version: DCE_RPC_VERSION,
            version_minor: DCE_RPC_VERSION_MINOR,
            packet_type,
            packet_flags: PacketFlags::complete(),
            data_rep: DataRepresentation::default(),
            frag_length: 0, // Will be set when encoding
            auth_length: 0,
            call_id,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.version_minor);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.packet_flags.as_u8());
        buf.put_slice(&self.data_rep.0);
        // frag_length and auth_length use endianness from data_rep
        if self.data_rep.is_little_endian() {
            buf.put_u16_le(self.frag_length);
            buf.put_u16_le(self.auth_length);
            buf.put_u32_le(self.call_id);
        } else {
            buf.put_u16(self.frag_length);
            buf.put_u16(self.auth_length);
            buf.put_u32(self.call_id);
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(RpcError::InvalidPdu(format!(
                "PDU header too short: {} bytes",
                data.len()
            )));
        }

        let (version, version_minor) = (data[0], data[1]);
        if version != DCE_RPC_VERSION || version_minor > 1 {
            return Err(RpcError::RpcVersionMismatch {
                major: version,
                minor: version_minor,
            });
        }

        let packet_type =
            PacketType::from_u8(data[2]).ok_or(RpcError::InvalidMessageType(data[2]))?;
        let packet_flags = PacketFlags::from_u8(data[3]);
        let data_rep = DataRepresentation([data[4], data[5], data[6], data[7]]);

        let mut r = NdrReader::with_context(Bytes::copy_from_slice(&data[8..16]), data_rep.ndr_context());
        let frag_length = r.read_u16()?;
        let auth_length = r.read_u16()?;
        let call_id = r.read_u32()?;

        Ok(Self {
            version,
            version_minor,
            packet_type,
            packet_flags,
            data_rep,
            frag_length,
            auth_length,
            call_id,
        })
    }

    fn body_writer(&self) -> NdrWriter {
        NdrWriter::with_context(self.data_rep.ndr_context())
    }

    /// Prefix `body` with this header, filling in the fragment length
    fn frame(&self, body: &[u8]) -> Result<Bytes> {
        let size = Self::SIZE + body.len();
        let frag_length = u16::try_from(size).map_err(|_| RpcError::PduTooLarge {
            size,
            max: u16::MAX as usize,
        })?;
        let mut header = self.clone();
        header.frag_length = frag_length;
        header.auth_length = 0;

        let mut buf = BytesMut::with_capacity(size);
        header.encode(&mut buf);
        buf.put_slice(body);
        Ok(buf.freeze())
    }

    /// Reader over the body, with any auth verifier and its padding removed
    fn body_reader(&self, data: &Bytes) -> Result<NdrReader> {
        let frag_length = self.frag_length as usize;
        if frag_length < Self::SIZE || data.len() < frag_length {
            return Err(RpcError::InvalidPdu(format!(
                "fragment length {} does not fit {} bytes",
                frag_length,
                data.len()
            )));
        }

        let mut end = frag_length;
        if self.auth_length > 0 {
            let trailer_start = end
                .checked_sub(SEC_TRAILER_SIZE + self.auth_length as usize)
                .filter(|start| *start >= Self::SIZE)
                .ok_or_else(|| RpcError::InvalidPdu("auth verifier exceeds fragment".into()))?;
            let auth_pad_length = data[trailer_start + 2] as usize;
            end = trailer_start
                .checked_sub(auth_pad_length)
                .filter(|end| *end >= Self::SIZE)
                .ok_or_else(|| RpcError::InvalidPdu("auth padding exceeds body".into()))?;
        }

        Ok(NdrReader::with_context(
            data.slice(Self::SIZE..end),
            self.data_rep.ndr_context(),
        ))
    }
}

fn count_u8(len: usize, what: &str) -> Result<u8> {
    u8::try_from(len).map_err(|_| RpcError::InvalidPdu(format!("too many {}: {}", what, len)))
}

/// Presentation context element of a bind or alter_context request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextElement {
    pub context_id: u16,
    pub abstract_syntax: SyntaxId,
    pub transfer_syntaxes: Vec<SyntaxId>,
}

impl ContextElement {
    pub fn new(context_id: u16, abstract_syntax: SyntaxId, transfer_syntax: SyntaxId) -> Self {
        Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes: vec![transfer_syntax],
        }
    }

    /// Context offering only NDR 2.0
    pub fn ndr(context_id: u16, abstract_syntax: SyntaxId) -> Self {
        Self::new(context_id, abstract_syntax, SyntaxId::ndr())
    }

    fn encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_u16(self.context_id);
        w.write_u8(count_u8(self.transfer_syntaxes.len(), "transfer syntaxes")?);
        w.write_u8(0); // reserved
        self.abstract_syntax.encode(w);
        for ts in &self.transfer_syntaxes {
            ts.encode(w);
        }
        Ok(())
    }

    fn decode(r: &mut NdrReader) -> Result<Self> {
        let context_id = r.read_u16()?;
        let num_transfer_syntaxes = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let abstract_syntax = SyntaxId::decode(r)?;
        let mut transfer_syntaxes = Vec::with_capacity(num_transfer_syntaxes as usize);
        for _ in 0..num_transfer_syntaxes {
            transfer_syntaxes.push(SyntaxId::decode(r)?);
        }
        Ok(Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes,
        })
    }
}

/// Per-context negotiation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContextResult {
    Acceptance = 0,
    UserRejection = 1,
    ProviderRejection = 2,
    NegotiateAck = 3,
}

impl ContextResult {
    fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Acceptance,
            1 => Self::UserRejection,
            3 => Self::NegotiateAck,
            _ => Self::ProviderRejection,
        }
    }
}

/// Why a presentation context was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProviderReason {
    NotSpecified = 0,
    AbstractSyntaxNotSupported = 1,
    ProposedTransferSyntaxesNotSupported = 2,
    LocalLimitExceeded = 3,
}

/// One entry of a bind_ack or alter_context_resp result list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextResultEntry {
    pub result: ContextResult,
    pub reason: u16,
    pub transfer_syntax: SyntaxId,
}

impl ContextResultEntry {
    pub fn accepted(transfer_syntax: SyntaxId) -> Self {
        Self {
            result: ContextResult::Acceptance,
            reason: 0,
            transfer_syntax,
        }
    }

    pub fn rejected(reason: ProviderReason) -> Self {
        Self {
            result: ContextResult::ProviderRejection,
            reason: reason as u16,
            transfer_syntax: SyntaxId::NIL,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == ContextResult::Acceptance
    }

    fn encode(&self, w: &mut NdrWriter) {
        w.write_u16(self.result as u16);
        w.write_u16(self.reason);
        self.transfer_syntax.encode(w);
    }

    fn decode(r: &mut NdrReader) -> Result<Self> {
        let result = ContextResult::from_u16(r.read_u16()?);
        let reason = r.read_u16()?;
        let transfer_syntax = SyntaxId::decode(r)?;
        Ok(Self {
            result,
            reason,
            transfer_syntax,
        })
    }
}

/// Bind PDU; alter_context shares the layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub context_list: Vec<ContextElement>,
}

impl BindPdu {
    pub fn new(call_id: u32, context_list: Vec<ContextElement>) -> Self {
        Self {
            header: PduHeader::new(PacketType::Bind, call_id),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id: 0,
            context_list,
        }
    }

    pub fn alter_context(call_id: u32, context_list: Vec<ContextElement>) -> Self {
        let mut pdu = Self::new(call_id, context_list);
        pdu.header.packet_type = PacketType::AlterContext;
        pdu
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = self.header.body_writer();
        w.write_u16(self.max_xmit_frag);
        w.write_u16(self.max_recv_frag);
        w.write_u32(self.assoc_group_id);

        // p_cont_list_t
        w.write_u8(count_u8(self.context_list.len(), "presentation contexts")?);
        w.write_u8(0); // reserved
        w.write_u16(0); // reserved2
        for ctx in &self.context_list {
            ctx.encode(&mut w)?;
        }
        self.header.frame(w.as_slice())
    }

    fn decode(header: PduHeader, r: &mut NdrReader) -> Result<Self> {
        let max_xmit_frag = r.read_u16()?;
        let max_recv_frag = r.read_u16()?;
        let assoc_group_id = r.read_u32()?;

        let num_contexts = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let _reserved2 = r.read_u16()?;
        let mut context_list = Vec::with_capacity(num_contexts as usize);
        for _ in 0..num_contexts {
            context_list.push(ContextElement::decode(r)?);
        }

        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            context_list,
        })
    }
}

/// Bind acknowledgment PDU; alter_context_resp shares the layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAckPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub secondary_addr: String,
    pub results: Vec<ContextResultEntry>,
}

impl BindAckPdu {
    pub fn new(call_id: u32, assoc_group_id: u32, results: Vec<ContextResultEntry>) -> Self {
        Self {
            header: PduHeader::new(PacketType::BindAck, call_id),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id,
            secondary_addr: String::new(),
            results,
        }
    }

    pub fn alter_context_resp(
        call_id: u32,
        assoc_group_id: u32,
        results: Vec<ContextResultEntry>,
    ) -> Self {
        let mut pdu = Self::new(call_id, assoc_group_id, results);
        pdu.header.packet_type = PacketType::AlterContextResp;
        pdu
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = self.header.body_writer();
        w.write_u16(self.max_xmit_frag);
        w.write_u16(self.max_recv_frag);
        w.write_u32(self.assoc_group_id);

        // port_any_t, null terminated unless empty
        if self.secondary_addr.is_empty() {
            w.write_u16(0);
        } else {
            let addr = self.secondary_addr.as_bytes();
            let length = u16::try_from(addr.len() + 1)
                .map_err(|_| RpcError::InvalidPdu("secondary address too long".into()))?;
            w.write_u16(length);
            w.write_bytes(addr);
            w.write_u8(0);
        }
        w.align(4);

        // p_result_list_t
        w.write_u8(count_u8(self.results.len(), "context results")?);
        w.write_u8(0); // reserved
        w.write_u16(0); // reserved2
        for result in &self.results {
            result.encode(&mut w);
        }
        self.header.frame(w.as_slice())
    }

    fn decode(header: PduHeader, r: &mut NdrReader) -> Result<Self> {
        let max_xmit_frag = r.read_u16()?;
        let max_recv_frag = r.read_u16()?;
        let assoc_group_id = r.read_u32()?;

        let sec_addr_len = r.read_u16()? as usize;
        let raw = r.read_bytes(sec_addr_len)?;
        let addr = raw.strip_suffix(&[0]).unwrap_or(&raw[..]);
        let secondary_addr = String::from_utf8_lossy(addr).into_owned();
        r.align(4)?;

        let num_results = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let _reserved2 = r.read_u16()?;
        let mut results = Vec::with_capacity(num_results as usize);
        for _ in 0..num_results {
            results.push(ContextResultEntry::decode(r)?);
        }

        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            secondary_addr,
            results,
        })
    }
}

/// Reasons carried by bind_nak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BindNakReason {
    NotSpecified = 0,
    TemporaryCongestion = 1,
    LocalLimitExceeded = 2,
    CalledPaddrUnknown = 3,
    ProtocolVersionNotSupported = 4,
    DefaultContextNotSupported = 5,
    UserDataNotReadable = 6,
    NoPsapAvailable = 7,
}

/// Bind rejection PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindNakPdu {
    pub header: PduHeader,
    pub reason: u16,
    /// Supported (major, minor) protocol versions
    pub versions: Vec<(u8, u8)>,
}

impl BindNakPdu {
    pub fn new(call_id: u32, reason: BindNakReason) -> Self {
        Self {
            header: PduHeader::new(PacketType::BindNak, call_id),
            reason: reason as u16,
            versions: vec![(DCE_RPC_VERSION, DCE_RPC_VERSION_MINOR)],
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = self.header.body_writer();
        w.write_u16(self.reason);
        w.write_u8(count_u8(self.versions.len(), "protocol versions")?);
        for (major, minor) in &self.versions {
            w.write_u8(*major);
            w.write_u8(*minor);
        }
        self.header.frame(w.as_slice())
    }

    fn decode(header: PduHeader, r: &mut NdrReader) -> Result<Self> {
        let reason = r.read_u16()?;
        let mut versions = Vec::new();
        if r.remaining() > 0 {
            let n = r.read_u8()?;
            for _ in 0..n {
                versions.push((r.read_u8()?, r.read_u8()?));
            }
        }
        Ok(Self {
            header,
            reason,
            versions,
        })
    }
}

/// Request PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub opnum: u16,
    pub object_uuid: Option<Uuid>,
    pub stub_data: Bytes,
}

impl RequestPdu {
    /// Request header size (after common header): alloc_hint(4) + context_id(2) + opnum(2)
    pub const BODY_HEADER_SIZE: usize = 8;

    pub fn new(call_id: u32, opnum: u16, stub_data: Bytes) -> Self {
        Self {
            header: PduHeader::new(PacketType::Request, call_id),
            alloc_hint: stub_data.len() as u32,
            context_id: 0,
            opnum,
            object_uuid: None,
            stub_data,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut header = self.header.clone();
        let mut w = header.body_writer();
        w.write_u32(self.alloc_hint);
        w.write_u16(self.context_id);
        w.write_u16(self.opnum);
        if let Some(uuid) = &self.object_uuid {
            header.packet_flags.set(PacketFlags::OBJECT_UUID);
            encode_uuid(&mut w, uuid);
        }
        w.write_bytes(&self.stub_data);
        header.frame(w.as_slice())
    }

    fn decode(header: PduHeader, r: &mut NdrReader) -> Result<Self> {
        let alloc_hint = r.read_u32()?;
        let context_id = r.read_u16()?;
        let opnum = r.read_u16()?;
        let object_uuid = if header.packet_flags.contains(PacketFlags::OBJECT_UUID) {
            Some(decode_uuid(r)?)
        } else {
            None
        };
        let stub_data = r.read_remaining();
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            opnum,
            object_uuid,
            stub_data,
        })
    }
}

/// Response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub stub_data: Bytes,
}

impl ResponsePdu {
    /// alloc_hint(4) + context_id(2) + cancel_count(1) + reserved(1)
    pub const BODY_HEADER_SIZE: usize = 8;

    pub fn new(call_id: u32, stub_data: Bytes) -> Self {
        Self {
            header: PduHeader::new(PacketType::Response, call_id),
            alloc_hint: stub_data.len() as u32,
            context_id: 0,
            cancel_count: 0,
            stub_data,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = self.header.body_writer();
        w.write_u32(self.alloc_hint);
        w.write_u16(self.context_id);
        w.write_u8(self.cancel_count);
        w.write_u8(0); // reserved
        w.write_bytes(&self.stub_data);
        self.header.frame(w.as_slice())
    }

    fn decode(header: PduHeader, r: &mut NdrReader) -> Result<Self> {
        let alloc_hint = r.read_u32()?;
        let context_id = r.read_u16()?;
        let cancel_count = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let stub_data = r.read_remaining();
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
            stub_data,
        })
    }
}

/// Fault status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultStatus {
    /// nca_s_op_rng_error: opnum out of range for the interface
    OpRngError = 0x1c01_0002,
    /// nca_s_unk_if: unknown interface or presentation context
    UnkIf = 0x1c01_0003,
    /// nca_s_proto_error
    ProtoError = 0x1c01_000b,
    /// nca_s_server_too_busy
    ServerTooBusy = 0x1c01_0014,
    /// nca_s_rpc_version_mismatch
    RpcVersionMismatch = 0x1c00_0008,
    /// nca_s_fault_cancel
    FaultCancel = 0x1c00_000d,
    /// nca_s_fault_unspec
    FaultUnspec = 0x1c00_0012,
    /// nca_s_fault_context_mismatch
    ContextMismatch = 0x1c00_001a,
    /// rpc_x_bad_stub_data
    BadStubData = 0x0000_06f7,
    AccessDenied = 0x0000_0005,
}

impl From<FaultStatus> for u32 {
    fn from(status: FaultStatus) -> u32 {
        status as u32
    }
}

/// Fault PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub status: u32,
}

impl FaultPdu {
    pub fn new(call_id: u32, status: impl Into<u32>) -> Self {
        Self {
            header: PduHeader::new(PacketType::Fault, call_id),
            alloc_hint: 0,
            context_id: 0,
            cancel_count: 0,
            status: status.into(),
        }
    }

    /// Mark the call as never having reached the server stub
    pub fn did_not_execute(mut self) -> Self {
        self.header.packet_flags.set(PacketFlags::DID_NOT_EXECUTE);
        self
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = self.header.body_writer();
        w.write_u32(self.alloc_hint);
        w.write_u16(self.context_id);
        w.write_u8(self.cancel_count);
        w.write_u8(0); // reserved
        w.write_u32(self.status);
        w.write_u32(0); // reserved
        self.header.frame(w.as_slice())
    }

    fn decode(header: PduHeader, r: &mut NdrReader) -> Result<Self> {
        let alloc_hint = r.read_u32()?;
        let context_id = r.read_u16()?;
        let cancel_count = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let status = r.read_u32()?;
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
            status,
        })
    }
}

/// Any connection-oriented PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Bind(BindPdu),
    BindAck(BindAckPdu),
    BindNak(BindNakPdu),
    AlterContext(BindPdu),
    AlterContextResp(BindAckPdu),
    Request(RequestPdu),
    Response(ResponsePdu),
    Fault(FaultPdu),
    Auth3(PduHeader),
    Shutdown(PduHeader),
    CoCancel(PduHeader),
    Orphaned(PduHeader),
}

impl Pdu {
    /// Decode one complete fragment
    pub fn decode(data: Bytes) -> Result<Self> {
        let header = PduHeader::decode(&data)?;
        let mut r = header.body_reader(&data)?;
        let pdu = match header.packet_type {
            PacketType::Bind => Pdu::Bind(BindPdu::decode(header, &mut r)?),
            PacketType::AlterContext => Pdu::AlterContext(BindPdu::decode(header, &mut r)?),
            PacketType::BindAck => Pdu::BindAck(BindAckPdu::decode(header, &mut r)?),
            PacketType::AlterContextResp => {
                Pdu::AlterContextResp(BindAckPdu::decode(header, &mut r)?)
            }
            PacketType::BindNak => Pdu::BindNak(BindNakPdu::decode(header, &mut r)?),
            PacketType::Request => Pdu::Request(RequestPdu::decode(header, &mut r)?),
            PacketType::Response => Pdu::Response(ResponsePdu::decode(header, &mut r)?),
            PacketType::Fault => Pdu::Fault(FaultPdu::decode(header, &mut r)?),
            PacketType::Auth3 => Pdu::Auth3(header),
            PacketType::Shutdown => Pdu::Shutdown(header),
            PacketType::CoCancel => Pdu::CoCancel(header),
            PacketType::Orphaned => Pdu::Orphaned(header),
        };
        Ok(pdu)
    }

    /// Encode the PDU to bytes
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Pdu::Bind(pdu) | Pdu::AlterContext(pdu) => pdu.encode(),
            Pdu::BindAck(pdu) | Pdu::AlterContextResp(pdu) => pdu.encode(),
            Pdu::BindNak(pdu) => pdu.encode(),
            Pdu::Request(pdu) => pdu.encode(),
            Pdu::Response(pdu) => pdu.encode(),
            Pdu::Fault(pdu) => pdu.encode(),
            // auth3 carries four pad bytes before its (absent) verifier
            Pdu::Auth3(header) => header.frame(&[0; 4]),
            Pdu::Shutdown(header) | Pdu::CoCancel(header) | Pdu::Orphaned(header) => {
                header.frame(&[])
            }
        }
    }

    pub fn header(&self) -> &PduHeader {
        match self {
            Pdu::Bind(pdu) | Pdu::AlterContext(pdu) => &pdu.header,
            Pdu::BindAck(pdu) | Pdu::AlterContextResp(pdu) => &pdu.header,
            Pdu::BindNak(pdu) => &pdu.header,
            Pdu::Request(pdu) => &pdu.header,
            Pdu::Response(pdu) => &pdu.header,
            Pdu::Fault(pdu) => &pdu.header,
            Pdu::Auth3(header)
            | Pdu::Shutdown(header)
            | Pdu::CoCancel(header)
            | Pdu::Orphaned(header) => header,
        }
    }

    /// Get the call ID from the PDU header
    pub fn call_id(&self) -> u32 {
        self.header().call_id
    }

    pub fn co_cancel(call_id: u32) -> Self {
        Pdu::CoCancel(PduHeader::new(PacketType::CoCancel, call_id))
    }

    pub fn orphaned(call_id: u32) -> Self {
        Pdu::Orphaned(PduHeader::new(PacketType::Orphaned, call_id))
    }

    pub fn shutdown() -> Self {
        Pdu::Shutdown(PduHeader::new(PacketType::Shutdown, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndr::NdrError;

    fn samr_syntax() -> SyntaxId {
        SyntaxId::new(
            Uuid::parse_str("12345778-1234-abcd-ef00-0123456789ac").unwrap(),
            1,
            0,
        )
    }

    #[test]
    fn test_ndr_syntax_wire_bytes() {
        let mut w = NdrWriter::new();
        SyntaxId::ndr().encode(&mut w);
        assert_eq!(
            w.as_slice(),
            &[
                0x04, 0x5d, 0x88, 0x8a, 0xeb, 0x1c, 0xc9, 0x11, 0x9f, 0xe8, 0x08, 0x00, 0x2b,
                0x10, 0x48, 0x60, 0x02, 0x00, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_header_encode_decode() {
        let header = PduHeader::new(PacketType::Request, 12345);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(buf.len(), PduHeader::SIZE);
        assert_eq!(buf[0], DCE_RPC_VERSION);
        assert_eq!(buf[2], PacketType::Request as u8);
        assert_eq!(&buf[4..8], &[0x10, 0, 0, 0]);

        let decoded = PduHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_rejects_bad_version_and_type() {
        let mut buf = BytesMut::new();
        PduHeader::new(PacketType::Request, 1).encode(&mut buf);

        let mut bad_version = buf.clone();
        bad_version[0] = 4;
        assert!(matches!(
            PduHeader::decode(&bad_version),
            Err(RpcError::RpcVersionMismatch { major: 4, .. })
        ));

        let mut connectionless = buf.clone();
        connectionless[2] = 1; // ping
        assert!(matches!(
            PduHeader::decode(&connectionless),
            Err(RpcError::InvalidMessageType(1))
        ));
    }

    #[test]
    fn test_request_roundtrip() {
        let mut request = RequestPdu::new(42, 5, Bytes::from_static(b"test data"));
        request.context_id = 3;
        let encoded = request.encode().unwrap();
        assert_eq!(encoded.len(), 16 + 8 + 9);

        match Pdu::decode(encoded).unwrap() {
            Pdu::Request(decoded) => {
                assert_eq!(decoded.header.call_id, 42);
                assert_eq!(decoded.context_id, 3);
                assert_eq!(decoded.opnum, 5);
                assert_eq!(decoded.stub_data.as_ref(), b"test data");
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_request_with_object_uuid() {
        let object = Uuid::from_u128(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10);
        let mut request = RequestPdu::new(1, 0, Bytes::from_static(b"x"));
        request.object_uuid = Some(object);
        let encoded = request.encode().unwrap();
        assert_ne!(encoded[3] & PacketFlags::OBJECT_UUID, 0);

        let Pdu::Request(decoded) = Pdu::decode(encoded).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(decoded.object_uuid, Some(object));
        assert_eq!(decoded.stub_data.as_ref(), b"x");
    }

    #[test]
    fn test_big_endian_request() {
        let mut request = RequestPdu::new(0x0102_0304, 7, Bytes::from_static(b"be"));
        request.header.data_rep = DataRepresentation::BIG_ENDIAN;
        let encoded = request.encode().unwrap();
        assert_eq!(&encoded[8..10], &[0, 26]);
        assert_eq!(&encoded[12..16], &[1, 2, 3, 4]);

        let Pdu::Request(decoded) = Pdu::decode(encoded).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(decoded.opnum, 7);
        assert!(!decoded.header.data_rep.ndr_context().little_endian);
    }

    #[test]
    fn test_response_roundtrip() {
        let response = ResponsePdu::new(42, Bytes::from_static(b"result"));
        let encoded = response.encode().unwrap();
        let Pdu::Response(decoded) = Pdu::decode(encoded).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(decoded.header.call_id, 42);
        assert_eq!(decoded.alloc_hint, 6);
        assert_eq!(decoded.stub_data.as_ref(), b"result");
    }

    #[test]
    fn test_bind_roundtrip() {
        let other = SyntaxId::new(Uuid::from_u128(7), 2, 1);
        let bind = BindPdu::new(
            1,
            vec![
                ContextElement::ndr(0, samr_syntax()),
                ContextElement {
                    context_id: 1,
                    abstract_syntax: other,
                    transfer_syntaxes: vec![SyntaxId::new(Uuid::from_u128(9), 1, 0), SyntaxId::ndr()],
                },
            ],
        );
        let encoded = bind.encode().unwrap();
        // header + 12 + (4 + 20 + 20) + (4 + 20 + 40)
        assert_eq!(encoded.len(), 16 + 12 + 44 + 64);

        match Pdu::decode(encoded).unwrap() {
            Pdu::Bind(decoded) => assert_eq!(decoded, {
                let mut expected = bind.clone();
                expected.header.frag_length = 136;
                expected
            }),
            other => panic!("expected bind, got {:?}", other),
        }
    }

    #[test]
    fn test_alter_context_type() {
        let pdu = BindPdu::alter_context(9, vec![ContextElement::ndr(1, samr_syntax())]);
        let encoded = pdu.encode().unwrap();
        assert_eq!(encoded[2], PacketType::AlterContext as u8);
        assert!(matches!(Pdu::decode(encoded).unwrap(), Pdu::AlterContext(_)));
    }

    #[test]
    fn test_bind_ack_secondary_addr_alignment() {
        let mut ack = BindAckPdu::new(
            1,
            0x1234,
            vec![
                ContextResultEntry::accepted(SyntaxId::ndr()),
                ContextResultEntry::rejected(ProviderReason::AbstractSyntaxNotSupported),
            ],
        );
        ack.secondary_addr = "49152".to_string();
        let encoded = ack.encode().unwrap();
        // 8 fixed + 2 length + 6 address = 16, already aligned
        assert_eq!(&encoded[24..26], &[6, 0]);
        assert_eq!(&encoded[26..32], b"49152\0");
        assert_eq!(encoded[32], 2);

        let Pdu::BindAck(decoded) = Pdu::decode(encoded).unwrap() else {
            panic!("expected bind_ack");
        };
        assert_eq!(decoded.secondary_addr, "49152");
        assert_eq!(decoded.assoc_group_id, 0x1234);
        assert!(decoded.results[0].is_accepted());
        assert_eq!(decoded.results[1].reason, 1);
    }

    #[test]
    fn test_alter_context_resp_empty_addr() {
        let resp = BindAckPdu::alter_context_resp(
            4,
            1,
            vec![ContextResultEntry::accepted(SyntaxId::ndr())],
        );
        let encoded = resp.encode().unwrap();
        let Pdu::AlterContextResp(decoded) = Pdu::decode(encoded).unwrap() else {
            panic!("expected alter_context_resp");
        };
        assert!(decoded.secondary_addr.is_empty());
        assert_eq!(decoded.results.len(), 1);
    }

    #[test]
    fn test_bind_nak_roundtrip() {
        let nak = BindNakPdu::new(3, BindNakReason::ProtocolVersionNotSupported);
        let encoded = nak.encode().unwrap();
        let Pdu::BindNak(decoded) = Pdu::decode(encoded).unwrap() else {
            panic!("expected bind_nak");
        };
        assert_eq!(decoded.reason, 4);
        assert_eq!(decoded.versions, vec![(5, 0)]);
    }

    #[test]
    fn test_fault_layout() {
        let fault = FaultPdu::new(8, FaultStatus::OpRngError).did_not_execute();
        let encoded = fault.encode().unwrap();
        assert_eq!(encoded.len(), 32);
        assert_eq!(&encoded[24..28], &[0x02, 0x00, 0x01, 0x1c]);
        assert_ne!(encoded[3] & PacketFlags::DID_NOT_EXECUTE, 0);

        let Pdu::Fault(decoded) = Pdu::decode(encoded).unwrap() else {
            panic!("expected fault");
        };
        assert_eq!(decoded.status, 0x1c01_0002);
    }

    #[test]
    fn test_header_only_pdus() {
        for pdu in [Pdu::co_cancel(5), Pdu::orphaned(6), Pdu::shutdown()] {
            let encoded = pdu.encode().unwrap();
            assert_eq!(encoded.len(), PduHeader::SIZE);
            let decoded = Pdu::decode(encoded).unwrap();
            assert_eq!(decoded.call_id(), pdu.call_id());
            assert_eq!(decoded.header().packet_type, pdu.header().packet_type);
        }
    }

    #[test]
    fn test_auth_verifier_is_stripped() {
        let request = RequestPdu::new(1, 2, Bytes::from_static(b"abcde"));
        let plain = request.encode().unwrap();

        // Append 3 bytes of auth padding, an 8-byte sec_trailer and a 16-byte verifier
        let mut buf = BytesMut::from(&plain[..]);
        buf.put_slice(&[0; 3]);
        buf.put_slice(&[10, 2, 3, 0, 0, 0, 0, 0]);
        buf.put_slice(&[0xEE; 16]);
        let total = buf.len() as u16;
        buf[8..10].copy_from_slice(&total.to_le_bytes());
        buf[10..12].copy_from_slice(&16u16.to_le_bytes());

        let Pdu::Request(decoded) = Pdu::decode(buf.freeze()).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(decoded.stub_data.as_ref(), b"abcde");
    }

    #[test]
    fn test_truncated_body() {
        let bind = BindPdu::new(1, vec![ContextElement::ndr(0, samr_syntax())]);
        let encoded = bind.encode().unwrap();
        let mut short = BytesMut::from(&encoded[..40]);
        short[8..10].copy_from_slice(&40u16.to_le_bytes());
        assert!(matches!(
            Pdu::decode(short.freeze()),
            Err(RpcError::Ndr(NdrError::TruncatedInput { .. }))
        ));
    }

    #[test]
    fn test_fragment_length_past_buffer() {
        let encoded = ResponsePdu::new(1, Bytes::from_static(b"abc")).encode().unwrap();
        assert!(matches!(
            Pdu::decode(encoded.slice(..encoded.len() - 1)),
            Err(RpcError::InvalidPdu(_))
        ));
    }
}
