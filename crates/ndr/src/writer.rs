//! Append-only NDR byte cursor
//!
//! An [`NdrWriter`] owns the output buffer of one operation frame together
//! with the referent bookkeeping for that frame: the monotonically increasing
//! referent ID counter and the identity map used by full pointers.

use crate::context::{NdrContext, REFERENT_ID_BASE, REFERENT_ID_STEP};
use crate::{NdrEncode, NdrError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// State of a full-pointer referent within one encode.
#[derive(Debug, Clone, Copy)]
struct FullReferent {
    id: u32,
    written: bool,
}

/// NDR writer for a single operation frame
#[derive(Debug)]
pub struct NdrWriter {
    buf: BytesMut,
    ctx: NdrContext,
    next_referent: u32,
    full: HashMap<usize, FullReferent>,
}

impl NdrWriter {
    /// Create a little-endian writer
    pub fn new() -> Self {
        Self::with_context(NdrContext::new())
    }

    /// Create a writer using the given context
    pub fn with_context(ctx: NdrContext) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            ctx,
            next_referent: REFERENT_ID_BASE,
            full: HashMap::new(),
        }
    }

    pub fn context(&self) -> &NdrContext {
        &self.ctx
    }

    /// Current offset from the start of the frame
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Insert zero padding up to the next multiple of `alignment`
    pub fn align(&mut self, alignment: usize) {
        let padding = NdrContext::align_padding(self.buf.len(), alignment);
        self.buf.put_bytes(0, padding);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.align(2);
        if self.ctx.little_endian {
            self.buf.put_u16_le(value);
        } else {
            self.buf.put_u16(value);
        }
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.align(4);
        if self.ctx.little_endian {
            self.buf.put_u32_le(value);
        } else {
            self.buf.put_u32(value);
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.align(8);
        if self.ctx.little_endian {
            self.buf.put_u64_le(value);
        } else {
            self.buf.put_u64(value);
        }
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_u64(value as u64);
    }

    /// Write raw bytes with no alignment
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Write a length or count field, failing if it does not fit in a u32
    pub fn write_count(&mut self, count: usize, field: &'static str) -> Result<()> {
        let count = u32::try_from(count).map_err(|_| NdrError::ValueOutOfRange(field))?;
        self.write_u32(count);
        Ok(())
    }

    /// Allocate a fresh referent ID and write it
    pub fn write_referent(&mut self) -> u32 {
        let id = self.allocate_referent();
        self.write_u32(id);
        id
    }

    fn allocate_referent(&mut self) -> u32 {
        let id = self.next_referent;
        self.next_referent = self.next_referent.wrapping_add(REFERENT_ID_STEP);
        id
    }

    /// Write the referent ID for a full pointer, keyed by object identity.
    ///
    /// The same identity always gets the same ID within one writer.
    pub(crate) fn write_full_referent(&mut self, identity: usize) -> u32 {
        let id = match self.full.get(&identity) {
            Some(referent) => referent.id,
            None => {
                let id = self.allocate_referent();
                self.full.insert(identity, FullReferent { id, written: false });
                id
            }
        };
        self.write_u32(id);
        id
    }

    /// Claim the right to marshal the pointee for `identity`.
    ///
    /// Returns true exactly once per identity.
    pub(crate) fn claim_full_pointee(&mut self, identity: usize) -> bool {
        match self.full.get_mut(&identity) {
            Some(referent) if !referent.written => {
                referent.written = true;
                true
            }
            _ => false,
        }
    }

    /// Encode one top-level value followed by everything it deferred
    pub fn write_top<T: NdrEncode + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.ndr_encode(self)?;
        value.ndr_encode_deferred(self)
    }

    /// Borrow the bytes written so far
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finish the frame
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for NdrWriter {
    fn default() -> Self {
        Self::new()
    }
}
