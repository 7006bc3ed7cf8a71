//! DCE RPC PDU Fragmentation Support
//!
//! When stub data exceeds the negotiated `max_xmit_frag`/`max_recv_frag`
//! limits, a request or response is split into several fragments. Each
//! fragment carries:
//! - The same call_id
//! - FIRST_FRAG flag on the first fragment
//! - LAST_FRAG flag on the last fragment
//! - alloc_hint set to the total stub size
//!
//! # Fragment Structure
//!
//! ```text
//! max_frag size limit (e.g., 4280 bytes)
//! ├── PDU Header (16 bytes)
//! ├── Request/Response body header (8 bytes)
//! ├── Object UUID (16 bytes, optional, request only)
//! └── Stub data fragment (variable)
//! ```

use crate::error::{Result, RpcError};
use crate::pdu::{PacketFlags, PduHeader, RequestPdu, ResponsePdu};
use bytes::{Bytes, BytesMut};

/// Largest reassembled stub accepted by default
pub const DEFAULT_MAX_STUB_SIZE: usize = 4 * 1024 * 1024;

/// Splits outgoing requests and responses into fragments.
pub struct FragmentGenerator;

impl FragmentGenerator {
    /// Maximum bytes of stub data per fragment for a given `max_frag`
    pub fn max_stub_size(max_frag: u16, has_object_uuid: bool) -> usize {
        let object_uuid_size = if has_object_uuid { 16 } else { 0 };
        let overhead = PduHeader::SIZE + RequestPdu::BODY_HEADER_SIZE + object_uuid_size;
        (max_frag as usize).saturating_sub(overhead)
    }

    /// Split `total_len` bytes into `(range, flags)` chunks of at most `max_stub`
    fn chunks(total_len: usize, max_stub: usize) -> Vec<(std::ops::Range<usize>, PacketFlags)> {
        if total_len <= max_stub || max_stub == 0 {
            return vec![(0..total_len, PacketFlags::complete())];
        }

        let mut chunks = Vec::with_capacity(total_len.div_ceil(max_stub));
        let mut offset = 0;
        while offset < total_len {
            let end = (offset + max_stub).min(total_len);
            let mut flags = PacketFlags::new();
            if offset == 0 {
                flags.set_first_frag();
            }
            if end == total_len {
                flags.set_last_frag();
            }
            chunks.push((offset..end, flags));
            offset = end;
        }
        chunks
    }

    /// Fragment a Request PDU. A request that fits is returned as a single
    /// complete fragment.
    pub fn fragment_request(request: &RequestPdu, max_frag: u16) -> Vec<RequestPdu> {
        let max_stub = Self::max_stub_size(max_frag, request.object_uuid.is_some());
        let total_len = request.stub_data.len();

        Self::chunks(total_len, max_stub)
            .into_iter()
            .map(|(range, flags)| {
                let mut frag = request.clone();
                frag.header.packet_flags = flags;
                frag.alloc_hint = total_len as u32;
                frag.stub_data = request.stub_data.slice(range);
                frag
            })
            .collect()
    }

    /// Fragment a Response PDU. A response that fits is returned as a single
    /// complete fragment.
    pub fn fragment_response(response: &ResponsePdu, max_frag: u16) -> Vec<ResponsePdu> {
        let max_stub = Self::max_stub_size(max_frag, false);
        let total_len = response.stub_data.len();

        Self::chunks(total_len, max_stub)
            .into_iter()
            .map(|(range, flags)| {
                let mut frag = response.clone();
                frag.header.packet_flags = flags;
                frag.alloc_hint = total_len as u32;
                frag.stub_data = response.stub_data.slice(range);
                frag
            })
            .collect()
    }
}

/// Fragments' worth of space reserved up front when `alloc_hint` is larger
const RESERVE_FRAGMENTS: usize = 4;

/// Collects the fragments of one call (FIRST_FRAG through LAST_FRAG) and
/// returns the complete stub data.
#[derive(Debug)]
pub struct FragmentAssembler {
    call_id: u32,
    stub_data: BytesMut,
    context_id: u16,
    /// Operation number (requests only)
    opnum: Option<u16>,
    received_first: bool,
    received_last: bool,
    max_size: usize,
}

impl FragmentAssembler {
    pub fn new(call_id: u32) -> Self {
        Self {
            call_id,
            stub_data: BytesMut::new(),
            context_id: 0,
            opnum: None,
            received_first: false,
            received_last: false,
            max_size: DEFAULT_MAX_STUB_SIZE,
        }
    }

    /// Cap the reassembled stub size
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    pub fn context_id(&self) -> u16 {
        self.context_id
    }

    pub fn opnum(&self) -> Option<u16> {
        self.opnum
    }

    pub fn is_complete(&self) -> bool {
        self.received_first && self.received_last
    }

    /// Add a fragment.
    ///
    /// Returns `Ok(Some(stub))` once the last fragment arrives, `Ok(None)`
    /// while more are expected.
    pub fn add_fragment(
        &mut self,
        header: &PduHeader,
        stub: &[u8],
        ctx_id: u16,
        opnum: Option<u16>,
        alloc_hint: u32,
    ) -> Result<Option<Bytes>> {
        if header.call_id != self.call_id {
            return Err(RpcError::CallIdMismatch {
                expected: self.call_id,
                got: header.call_id,
            });
        }
        if self.is_complete() {
            return Err(RpcError::FragmentAssemblyError(
                "fragment after last fragment".to_string(),
            ));
        }

        if header.packet_flags.is_first_frag() {
            if self.received_first {
                return Err(RpcError::FragmentAssemblyError(
                    "received duplicate first fragment".to_string(),
                ));
            }
            self.received_first = true;
            self.context_id = ctx_id;
            self.opnum = opnum;
            // alloc_hint is advisory; the buffer grows with the fragments that arrive
            let reserve = (alloc_hint as usize)
                .min(self.max_size)
                .min(stub.len().saturating_mul(RESERVE_FRAGMENTS));
            self.stub_data.reserve(reserve);
        } else if !self.received_first {
            return Err(RpcError::FragmentOutOfOrder);
        }

        if ctx_id != self.context_id || opnum != self.opnum {
            return Err(RpcError::FragmentAssemblyError(
                "context or opnum changed between fragments".to_string(),
            ));
        }

        let size = self.stub_data.len() + stub.len();
        if size > self.max_size {
            return Err(RpcError::PduTooLarge {
                size,
                max: self.max_size,
            });
        }
        self.stub_data.extend_from_slice(stub);

        if header.packet_flags.is_last_frag() {
            self.received_last = true;
            return Ok(Some(self.stub_data.split().freeze()));
        }
        Ok(None)
    }
}
