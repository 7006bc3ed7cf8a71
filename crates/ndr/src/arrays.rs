//! NDR array types
//!
//! NDR supports several array types:
//!
//! - Fixed arrays: size known at compile time (`[T; N]`, see `primitives`)
//! - Conformant arrays: size determined at runtime, transmitted as prefix
//! - Varying arrays: subset of a fixed-size array transmitted
//! - Conformant varying arrays: both conformant and varying
//!
//! Every decoder validates `offset + actual_count <= max_count` before it
//! allocates, and rejects element counts above the context limit.

use crate::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter, Result};

/// Read a varying header (`offset`, `actual_count`) and check it against `max_count`.
pub fn read_variance(r: &mut NdrReader, max_count: usize) -> Result<(usize, usize)> {
    let offset = r.read_u32()?;
    let actual_count = r.read_u32()?;
    let end = (offset as usize)
        .checked_add(actual_count as usize)
        .ok_or(NdrError::IntegerOverflow)?;
    if end > max_count {
        return Err(NdrError::MalformedArray {
            max_count: u32::try_from(max_count).unwrap_or(u32::MAX),
            offset,
            actual_count,
        });
    }
    let actual_count = r.check_count(actual_count as usize)?;
    Ok((offset as usize, actual_count))
}

/// Encode each element inline, back to back.
pub fn encode_elements<T: NdrEncode>(elements: &[T], w: &mut NdrWriter) -> Result<()> {
    for elem in elements {
        elem.ndr_encode(w)?;
    }
    Ok(())
}

/// Encode the deferred part of each element, in element order.
pub fn encode_elements_deferred<T: NdrEncode>(elements: &[T], w: &mut NdrWriter) -> Result<()> {
    for elem in elements {
        elem.ndr_encode_deferred(w)?;
    }
    Ok(())
}

/// Decode `count` elements inline.
pub fn decode_elements<T: NdrDecode>(r: &mut NdrReader, count: usize) -> Result<Vec<T>> {
    let count = r.check_count(count)?;
    let mut elements = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        elements.push(T::ndr_decode(r)?);
    }
    Ok(elements)
}

pub fn decode_elements_deferred<T: NdrDecode>(elements: &mut [T], r: &mut NdrReader) -> Result<()> {
    for elem in elements {
        elem.ndr_decode_deferred(r)?;
    }
    Ok(())
}

pub fn fixup_elements<T: NdrDecode>(elements: &mut [T], r: &mut NdrReader) -> Result<()> {
    for elem in elements {
        elem.ndr_fixup(r)?;
    }
    Ok(())
}

/// Conformant array - size determined at runtime
///
/// Wire format:
/// ```text
/// max_count: u32      # Maximum elements
/// elements[max_count] # Element data
/// ```
///
/// Note: In struct context, max_count may be at struct start while
/// elements are at end (conformant data comes last). Such structs write the
/// count themselves and use [`encode_elements`]/[`decode_elements`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConformantArray<T> {
    pub elements: Vec<T>,
}

impl<T> ConformantArray<T> {
    pub fn new(elements: Vec<T>) -> Self {
        Self { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.elements
    }
}

impl<T> From<Vec<T>> for ConformantArray<T> {
    fn from(elements: Vec<T>) -> Self {
        Self { elements }
    }
}

impl<T: NdrEncode> NdrEncode for ConformantArray<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_count(self.elements.len(), "conformant array max_count")?;
        encode_elements(&self.elements, w)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        encode_elements_deferred(&self.elements, w)
    }

    fn ndr_align() -> usize {
        4.max(<T as NdrEncode>::ndr_align())
    }
}

impl<T: NdrDecode> NdrDecode for ConformantArray<T> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let max_count = r.read_u32()? as usize;
        let elements = decode_elements(r, max_count)?;
        Ok(Self { elements })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        decode_elements_deferred(&mut self.elements, r)
    }

    fn ndr_fixup(&mut self, r: &mut NdrReader) -> Result<()> {
        fixup_elements(&mut self.elements, r)
    }

    fn ndr_align() -> usize {
        4.max(<T as NdrDecode>::ndr_align())
    }
}

/// Varying array - subset of a fixed array of `N` elements transmitted
///
/// Wire format:
/// ```text
/// offset: u32       # First transmitted element
/// actual_count: u32 # Number of transmitted elements
/// elements[actual_count]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaryingArray<T, const N: usize> {
    pub offset: usize,
    pub elements: Vec<T>,
}

impl<T, const N: usize> Default for VaryingArray<T, N> {
    fn default() -> Self {
        Self {
            offset: 0,
            elements: Vec::new(),
        }
    }
}

impl<T, const N: usize> VaryingArray<T, N> {
    pub fn new(elements: Vec<T>) -> Self {
        Self {
            offset: 0,
            elements,
        }
    }

    pub fn with_offset(offset: usize, elements: Vec<T>) -> Self {
        Self { offset, elements }
    }
}

impl<T: NdrEncode, const N: usize> NdrEncode for VaryingArray<T, N> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        if self.offset + self.elements.len() > N {
            return Err(NdrError::ValueOutOfRange("varying array bounds"));
        }
        w.write_count(self.offset, "varying array offset")?;
        w.write_count(self.elements.len(), "varying array actual_count")?;
        encode_elements(&self.elements, w)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        encode_elements_deferred(&self.elements, w)
    }

    fn ndr_align() -> usize {
        4.max(<T as NdrEncode>::ndr_align())
    }
}

impl<T: NdrDecode, const N: usize> NdrDecode for VaryingArray<T, N> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let (offset, actual_count) = read_variance(r, N)?;
        let elements = decode_elements(r, actual_count)?;
        Ok(Self { offset, elements })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        decode_elements_deferred(&mut self.elements, r)
    }

    fn ndr_fixup(&mut self, r: &mut NdrReader) -> Result<()> {
        fixup_elements(&mut self.elements, r)
    }

    fn ndr_align() -> usize {
        4.max(<T as NdrDecode>::ndr_align())
    }
}

/// Conformant varying array - size and subset determined at runtime
///
/// Wire format:
/// ```text
/// max_count: u32    # Maximum elements (conformance)
/// offset: u32       # First transmitted element
/// actual_count: u32 # Number of transmitted elements
/// elements[actual_count]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConformantVaryingArray<T> {
    pub max_count: usize,
    pub offset: usize,
    pub elements: Vec<T>,
}

impl<T> ConformantVaryingArray<T> {
    pub fn new(elements: Vec<T>) -> Self {
        let len = elements.len();
        Self {
            max_count: len,
            offset: 0,
            elements,
        }
    }

    pub fn with_max(max_count: usize, elements: Vec<T>) -> Self {
        Self {
            max_count,
            offset: 0,
            elements,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<T: NdrEncode> NdrEncode for ConformantVaryingArray<T> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        let end = self
            .offset
            .checked_add(self.elements.len())
            .ok_or(NdrError::IntegerOverflow)?;
        if end > self.max_count {
            return Err(NdrError::ValueOutOfRange("conformant varying array bounds"));
        }
        w.write_count(self.max_count, "conformant varying array max_count")?;
        w.write_count(self.offset, "conformant varying array offset")?;
        w.write_count(self.elements.len(), "conformant varying array actual_count")?;
        encode_elements(&self.elements, w)
    }

    fn ndr_encode_deferred(&self, w: &mut NdrWriter) -> Result<()> {
        encode_elements_deferred(&self.elements, w)
    }

    fn ndr_align() -> usize {
        4.max(<T as NdrEncode>::ndr_align())
    }
}

impl<T: NdrDecode> NdrDecode for ConformantVaryingArray<T> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let max_count = r.read_u32()? as usize;
        let (offset, actual_count) = read_variance(r, max_count)?;
        let elements = decode_elements(r, actual_count)?;
        Ok(Self {
            max_count,
            offset,
            elements,
        })
    }

    fn ndr_decode_deferred(&mut self, r: &mut NdrReader) -> Result<()> {
        decode_elements_deferred(&mut self.elements, r)
    }

    fn ndr_fixup(&mut self, r: &mut NdrReader) -> Result<()> {
        fixup_elements(&mut self.elements, r)
    }

    fn ndr_align() -> usize {
        4.max(<T as NdrDecode>::ndr_align())
    }
}
