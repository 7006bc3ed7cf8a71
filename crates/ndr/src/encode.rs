//! NDR encoding trait

use crate::{NdrWriter, Result};

/// Trait for types that can be encoded to NDR format
///
/// Encoding happens in two phases. [`ndr_encode`](NdrEncode::ndr_encode)
/// writes the inline part of a value: scalars, fixed fields and the referent
/// IDs of embedded pointers. [`ndr_encode_deferred`](NdrEncode::ndr_encode_deferred)
/// then writes the pointees those IDs stand for, in the order the pointers
/// were written. Each pointee is written inline followed by its own deferred
/// part, so nested pointees land right after their parent.
pub trait NdrEncode {
    /// Write the inline representation.
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()>;

    /// Write the pointees deferred by `ndr_encode`.
    fn ndr_encode_deferred(&self, _w: &mut NdrWriter) -> Result<()> {
        Ok(())
    }

    /// Get the NDR alignment requirement for this type
    fn ndr_align() -> usize
    where
        Self: Sized,
    {
        1
    }
}
