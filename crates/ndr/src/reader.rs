//! Position-tracked NDR byte cursor
//!
//! An [`NdrReader`] walks one operation frame. Besides the cursor it owns the
//! referent table for that frame: full-pointer referent IDs map to the shared
//! object they were first decoded into, so a repeated ID yields the same
//! object instead of a copy. The table is dropped with the reader.

use crate::context::NdrContext;
use crate::{NdrDecode, NdrError, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// NDR reader for a single operation frame
pub struct NdrReader {
    data: Bytes,
    pos: usize,
    ctx: NdrContext,
    referents: HashMap<u32, Box<dyn Any + Send + Sync>>,
    pending: HashSet<usize>,
    fixed_up: HashSet<usize>,
}

impl NdrReader {
    /// Create a little-endian reader over `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_context(data, NdrContext::new())
    }

    pub fn with_context(data: impl Into<Bytes>, ctx: NdrContext) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            ctx,
            referents: HashMap::new(),
            pending: HashSet::new(),
            fixed_up: HashSet::new(),
        }
    }

    pub fn context(&self) -> &NdrContext {
        &self.ctx
    }

    /// Current offset from the start of the frame
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(NdrError::TruncatedInput {
                needed,
                have: self.remaining(),
            });
        }
        Ok(())
    }

    /// Skip padding up to the next multiple of `alignment`
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = NdrContext::align_padding(self.pos, alignment);
        self.ensure(padding)?;
        self.pos += padding;
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.align(N)?;
        self.ensure(N)?;
        let mut raw = [0u8; N];
        raw.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        if !self.ctx.little_endian {
            raw.reverse();
        }
        Ok(raw)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.take::<2>().map(i16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.take::<4>().map(i32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.take::<8>().map(i64::from_le_bytes)
    }

    /// Read `n` raw bytes with no alignment
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.ensure(n)?;
        let bytes = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(bytes)
    }

    /// Consume everything after the cursor
    pub fn read_remaining(&mut self) -> Bytes {
        let bytes = self.data.slice(self.pos..);
        self.pos = self.data.len();
        bytes
    }

    /// Validate an element count read from the wire before allocating for it
    pub fn check_count(&self, count: usize) -> Result<usize> {
        if count > self.ctx.max_array_elements {
            return Err(NdrError::AllocationLimitExceeded {
                requested: count,
                limit: self.ctx.max_array_elements,
            });
        }
        Ok(count)
    }

    /// Look up or create the shared object behind a full-pointer referent ID.
    ///
    /// A new ID registers an empty slot whose contents are decoded when the
    /// pointer's deferred phase runs. A known ID returns the existing slot;
    /// if that slot holds a different type the frame is rejected.
    pub(crate) fn full_referent<T>(&mut self, referent_id: u32) -> Result<Arc<RwLock<T>>>
    where
        T: Default + Send + Sync + 'static,
    {
        if let Some(existing) = self.referents.get(&referent_id) {
            return existing
                .downcast_ref::<Arc<RwLock<T>>>()
                .cloned()
                .ok_or(NdrError::AliasingViolation { referent_id });
        }
        let slot = Arc::new(RwLock::new(T::default()));
        self.referents.insert(referent_id, Box::new(Arc::clone(&slot)));
        self.pending.insert(identity(&slot));
        Ok(slot)
    }

    /// Claim the right to decode the pointee of a full pointer slot.
    ///
    /// Returns true exactly once per slot.
    pub(crate) fn claim_full_pointee<T>(&mut self, slot: &Arc<RwLock<T>>) -> bool {
        self.pending.remove(&identity(slot))
    }

    /// Claim the right to run fixup on a shared slot. Returns true once.
    pub(crate) fn claim_fixup<T>(&mut self, slot: &Arc<RwLock<T>>) -> bool {
        self.fixed_up.insert(identity(slot))
    }

    /// Decode one top-level value: inline part, deferred pointees, then fixup
    pub fn read_top<T: NdrDecode>(&mut self) -> Result<T> {
        let mut value = T::ndr_decode(self)?;
        value.ndr_decode_deferred(self)?;
        value.ndr_fixup(self)?;
        Ok(value)
    }
}

impl std::fmt::Debug for NdrReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdrReader")
            .field("len", &self.data.len())
            .field("pos", &self.pos)
            .field("ctx", &self.ctx)
            .field("referents", &self.referents.len())
            .finish()
    }
}

pub(crate) fn identity<T>(slot: &Arc<RwLock<T>>) -> usize {
    Arc::as_ptr(slot) as *const () as usize
}
