//! Context handles
//!
//! A context handle is a 20-byte token issued by a server and presented back
//! by the client on later calls. The codec moves it as an opaque fixed-size
//! value; the meaning of the bytes belongs to whoever issued it.

use crate::{NdrDecode, NdrEncode, NdrReader, NdrWriter, Result};
use std::fmt;

/// Opaque 20-byte context handle
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextHandle(pub [u8; ContextHandle::SIZE]);

impl ContextHandle {
    pub const SIZE: usize = 20;

    /// The all-zero handle
    pub const NULL: ContextHandle = ContextHandle([0; Self::SIZE]);

    pub fn new(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0; Self::SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextHandle(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl NdrEncode for ContextHandle {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.align(4);
        w.write_bytes(&self.0);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for ContextHandle {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        r.align(4)?;
        let bytes = r.read_bytes(Self::SIZE)?;
        let mut raw = [0u8; Self::SIZE];
        raw.copy_from_slice(&bytes);
        Ok(Self(raw))
    }

    fn ndr_align() -> usize {
        4
    }
}
