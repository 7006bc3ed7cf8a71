//! NDR pointer types
//!
//! NDR supports three pointer semantics:
//!
//! - Reference (`[ref]`): Non-null, no wire representation at the top level.
//!   A top-level `[ref]` argument is modelled as the pointee type itself.
//! - Unique (`[unique]`): Nullable, 4-byte referent ID, no aliasing
//! - Full (`[ptr]`): Nullable, 4-byte referent ID, aliasing allowed
//!
//! The referent ID is written inline; the pointee is written in the deferred
//! phase of the enclosing construct.

use crate::reader::identity;
use crate::{NdrDecode, NdrEncode, NdrReader, NdrWriter, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Unique pointer - nullable, never aliased
///
/// Every non-null unique pointer gets a fresh referent ID on encode. On
/// decode the referent ID only signals presence; the pointee bytes are read
/// in the deferred phase.
#[derive(Clone)]
pub struct UniquePtr<T> {
    inner: Option<Box<T>>,
    // Set between the inline and deferred decode phases of a non-null pointer.
    referent: u32,
}

impl<T> UniquePtr<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Some(Box::new(value)),
            referent: 0,
        }
    }

    pub fn null() -> Self {
        Self {
            inner: None,
            referent: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    pub fn as_ref(&self) -> Option<&T> {
        self.inner.as_deref()
    }

    pub fn as_mut(&mut self) -> Option<&mut T> {
        self.inner.as_deref_mut()
    }

    pub fn into_option(self) -> Option<T> {
        self.inner.map(|b| *b)
    }
}

impl<T> Default for UniquePtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<Option<T>> for UniquePtr<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(value) => Self::new(value),
            None => Self::null(),
        }
    }
}

impl<T: PartialEq> PartialEq for UniquePtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: Eq> Eq for UniquePtr<T> {}

impl<T: fmt::Debug> fmt::Debug for UniquePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(value) => f.debug_tuple("UniquePtr").field(value).finish(),
            None => f.write_str("UniquePtr(null)"),
        }
    }
}

impl<T: NdrEncode> NdrEncode for UniquePtr<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        if self.inner.is_some() {
            w.write_referent();
        } else {
            w.write_u32(0);
        }
        Ok(())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        if let Some(value) = &self.inner {
            value.ndr_encode(w)?;
            value.ndr_encode_deferred(w)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrDecode> NdrDecode for UniquePtr<T> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let referent = r.read_u32()?;
        Ok(Self {
            inner: None,
            referent,
        })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        if self.referent != 0 {
            let mut value = T::ndr_decode(r)?;
            value.ndr_decode_deferred(r)?;
            self.inner = Some(Box::new(value));
            self.referent = 0;
        }
        Ok(())
    }

    fn ndr_fixup(&mut self, r: &mut NdrReader) -> Result<()> {
        match &mut self.inner {
            Some(value) => value.ndr_fixup(r),
            None => Ok(()),
        }
    }

    fn ndr_align() -> usize {
        4
    }
}

/// Full pointer - nullable, aliasing allowed
///
/// The pointee lives behind an `Arc<RwLock<T>>`. Two full pointers holding
/// the same `Arc` encode to the same referent ID and the pointee is written
/// once. Decoding gives every occurrence of a referent ID the same `Arc`, so
/// a write through one alias is visible through the others.
pub struct FullPtr<T>(pub Option<Arc<RwLock<T>>>);

impl<T> FullPtr<T> {
    pub fn new(value: T) -> Self {
        Self(Some(Arc::new(RwLock::new(value))))
    }

    pub fn null() -> Self {
        Self(None)
    }

    /// Another pointer to the same object
    pub fn alias(&self) -> Self {
        Self(self.0.clone())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn shared(&self) -> Option<&Arc<RwLock<T>>> {
        self.0.as_ref()
    }

    /// Whether both pointers refer to the same object (or are both null)
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T> Default for FullPtr<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> Clone for FullPtr<T> {
    fn clone(&self) -> Self {
        self.alias()
    }
}

impl<T: PartialEq> PartialEq for FullPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || *a.read_recursive() == *b.read_recursive(),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for FullPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => f.debug_tuple("FullPtr").field(&*value.read_recursive()).finish(),
            None => f.write_str("FullPtr(null)"),
        }
    }
}

impl<T: NdrEncode> NdrEncode for FullPtr<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        match &self.0 {
            Some(shared) => {
                w.write_full_referent(identity(shared));
            }
            None => w.write_u32(0),
        }
        Ok(())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        if let Some(shared) = &self.0 {
            if w.claim_full_pointee(identity(shared)) {
                let value = shared.read_recursive();
                value.ndr_encode(w)?;
                value.ndr_encode_deferred(w)?;
            }
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T> NdrDecode for FullPtr<T>
where
    T: NdrDecode + Default + Send + Sync + 'static,
{
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let referent_id = r.read_u32()?;
        if referent_id == 0 {
            return Ok(Self(None));
        }
        Ok(Self(Some(r.full_referent::<T>(referent_id)?)))
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        if let Some(shared) = &self.0 {
            if r.claim_full_pointee(shared) {
                let mut value = T::ndr_decode(r)?;
                value.ndr_decode_deferred(r)?;
                *shared.write() = value;
            }
        }
        Ok(())
    }

    fn ndr_fixup(&mut self, r: &mut NdrReader) -> Result<()> {
        if let Some(shared) = &self.0 {
            if r.claim_fixup(shared) {
                shared.write().ndr_fixup(r)?;
            }
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}
