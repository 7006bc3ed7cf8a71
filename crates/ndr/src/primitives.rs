//! NDR primitive type implementations
//!
//! NDR primitive types and their encodings:
//!
//! | IDL Type       | Rust Type | Size | Alignment |
//! |----------------|-----------|------|-----------|
//! | boolean        | bool      | 1    | 1         |
//! | byte/char      | u8        | 1    | 1         |
//! | small          | i8        | 1    | 1         |
//! | short          | i16       | 2    | 2         |
//! | long           | i32       | 4    | 4         |
//! | hyper          | i64       | 8    | 8         |
//! | unsigned short | u16       | 2    | 2         |
//! | unsigned long  | u32       | 4    | 4         |
//! | unsigned hyper | u64       | 8    | 8         |
//! | wchar_t        | u16       | 2    | 2         |
//!
//! Fixed-size arrays (`T[N]`) map to `[T; N]`: the elements back to back with
//! no header.

use crate::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter, Result};

macro_rules! impl_ndr_primitive {
    ($ty:ty, $align:expr, $write:ident, $read:ident) => {
        impl NdrEncode for $ty {
            fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
                w.$write(*self);
                Ok(())
            }

            fn ndr_align() -> usize {
                $align
            }
        }

        impl NdrDecode for $ty {
            fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
                r.$read()
            }

            fn ndr_align() -> usize {
                $align
            }
        }
    };
}

impl_ndr_primitive!(u8, 1, write_u8, read_u8);
impl_ndr_primitive!(i8, 1, write_i8, read_i8);
impl_ndr_primitive!(bool, 1, write_bool, read_bool);
impl_ndr_primitive!(u16, 2, write_u16, read_u16);
impl_ndr_primitive!(i16, 2, write_i16, read_i16);
impl_ndr_primitive!(u32, 4, write_u32, read_u32);
impl_ndr_primitive!(i32, 4, write_i32, read_i32);
impl_ndr_primitive!(u64, 8, write_u64, read_u64);
impl_ndr_primitive!(i64, 8, write_i64, read_i64);

/// Empty argument list
impl NdrEncode for () {
    fn ndr_encode(&self, _w: &mut NdrWriter) -> Result<()> {
        Ok(())
    }
}

impl NdrDecode for () {
    fn ndr_decode(_r: &mut NdrReader) -> Result<Self> {
        Ok(())
    }
}

impl<T: NdrEncode, const N: usize> NdrEncode for [T; N] {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        for elem in self {
            elem.ndr_encode(w)?;
        }
        Ok(())
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        for elem in self {
            elem.ndr_encode_deferred(w)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        <T as NdrEncode>::ndr_align()
    }
}

impl<T: NdrDecode, const N: usize> NdrDecode for [T; N] {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let mut elements = Vec::with_capacity(N);
        for _ in 0..N {
            elements.push(T::ndr_decode(r)?);
        }
        elements
            .try_into()
            .map_err(|_| NdrError::ValueOutOfRange("fixed array"))
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        for elem in self.iter_mut() {
            elem.ndr_decode_deferred(r)?;
        }
        Ok(())
    }

    fn ndr_fixup(&mut self, r: &mut NdrReader) -> Result<()> {
        for elem in self.iter_mut() {
            elem.ndr_fixup(r)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        <T as NdrDecode>::ndr_align()
    }
}
