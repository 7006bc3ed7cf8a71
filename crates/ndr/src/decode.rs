//! NDR decoding trait

use crate::{NdrReader, Result};

/// Trait for types that can be decoded from NDR format
///
/// Mirrors [`NdrEncode`](crate::NdrEncode): `ndr_decode` consumes the inline
/// part and `ndr_decode_deferred` fills in the pointees. Once a whole
/// top-level value is decoded, `ndr_fixup` runs over it a single time to
/// derive fields that depend on other, already decoded fields.
pub trait NdrDecode: Sized {
    /// Read the inline representation.
    fn ndr_decode(r: &mut NdrReader) -> Result<Self>;

    /// Read the pointees deferred by `ndr_decode`.
    fn ndr_decode_deferred(&mut self, _r: &mut NdrReader) -> Result<()> {
        Ok(())
    }

    /// Recompute derived fields. Containers run before their contents.
    fn ndr_fixup(&mut self, _r: &mut NdrReader) -> Result<()> {
        Ok(())
    }

    /// Get the NDR alignment requirement for this type
    fn ndr_align() -> usize {
        1
    }
}
