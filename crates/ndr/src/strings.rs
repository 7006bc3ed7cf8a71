//! NDR string types
//!
//! `[string] wchar_t*` data is a conformant varying array of UTF-16 code
//! units whose counts include the terminating null unit:
//!
//! ```text
//! max_count: u32     # code units, including the terminator
//! offset: u32        # always 0
//! actual_count: u32  # code units, including the terminator
//! data[actual_count]
//! ```
//!
//! The Rust value holds the text without the terminator; it is added on
//! encode and required on decode. `[string] char*` data ([`NdrString`]) has
//! the same layout with single-byte units.

use crate::arrays::read_variance;
use crate::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter, Result};
use std::fmt;

/// Null-terminated wide string (`[string] wchar_t*` pointee)
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct NdrWString(pub String);

impl NdrWString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for NdrWString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NdrWString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for NdrWString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl NdrEncode for NdrWString {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        let units: Vec<u16> = self.0.encode_utf16().collect();
        if units.contains(&0) {
            return Err(NdrError::InvalidString("embedded null".to_string()));
        }
        let len_with_null = units.len() + 1;

        w.write_count(len_with_null, "string max_count")?;
        w.write_u32(0);
        w.write_count(len_with_null, "string actual_count")?;
        for unit in units {
            w.write_u16(unit);
        }
        w.write_u16(0);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for NdrWString {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let max_count = r.read_u32()? as usize;
        let (offset, actual_count) = read_variance(r, max_count)?;
        if offset != 0 {
            return Err(NdrError::InvalidString("non-zero offset".to_string()));
        }

        let mut units = Vec::with_capacity(actual_count.min(r.remaining() / 2));
        for _ in 0..actual_count {
            units.push(r.read_u16()?);
        }

        match units.pop() {
            Some(0) => {}
            _ => return Err(NdrError::InvalidString("missing terminator".to_string())),
        }

        String::from_utf16(&units)
            .map(Self)
            .map_err(|e| NdrError::InvalidString(e.to_string()))
    }

    fn ndr_align() -> usize {
        4
    }
}

/// Null-terminated narrow string (`[string] char*` pointee)
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct NdrString(pub Vec<u8>);

impl NdrString {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for NdrString {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl NdrEncode for NdrString {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        if self.0.contains(&0) {
            return Err(NdrError::InvalidString("embedded null".to_string()));
        }
        let len_with_null = self.0.len() + 1;

        w.write_count(len_with_null, "string max_count")?;
        w.write_u32(0);
        w.write_count(len_with_null, "string actual_count")?;
        w.write_bytes(&self.0);
        w.write_u8(0);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for NdrString {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let max_count = r.read_u32()? as usize;
        let (offset, actual_count) = read_variance(r, max_count)?;
        if offset != 0 {
            return Err(NdrError::InvalidString("non-zero offset".to_string()));
        }

        let raw = r.read_bytes(actual_count)?;
        match raw.split_last() {
            Some((0, text)) => Ok(Self(text.to_vec())),
            _ => Err(NdrError::InvalidString("missing terminator".to_string())),
        }
    }

    fn ndr_align() -> usize {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wstring_counts_include_terminator() {
        let s = NdrWString::new("Hi");
        let mut w = NdrWriter::new();
        w.write_top(&s).unwrap();

        assert_eq!(
            w.as_slice(),
            &[
                3, 0, 0, 0, // max_count
                0, 0, 0, 0, // offset
                3, 0, 0, 0, // actual_count
                b'H', 0, b'i', 0, 0, 0,
            ][..]
        );

        let decoded: NdrWString = NdrReader::new(w.into_bytes()).read_top().unwrap();
        assert_eq!(decoded, s);
    }

    #[test]
    fn test_wstring_empty() {
        let mut w = NdrWriter::new();
        w.write_top(&NdrWString::default()).unwrap();
        assert_eq!(w.as_slice().len(), 14);

        let decoded: NdrWString = NdrReader::new(w.into_bytes()).read_top().unwrap();
        assert_eq!(decoded.as_str(), "");
    }

    #[test]
    fn test_wstring_non_bmp() {
        let s = NdrWString::new("domain\u{1F600}");
        let mut w = NdrWriter::new();
        w.write_top(&s).unwrap();
        let decoded: NdrWString = NdrReader::new(w.into_bytes()).read_top().unwrap();
        assert_eq!(decoded, s);
    }

    #[test]
    fn test_wstring_missing_terminator() {
        let bytes = vec![2u8, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, b'a', 0, b'b', 0];
        let result = NdrReader::new(bytes).read_top::<NdrWString>();
        assert!(matches!(result, Err(NdrError::InvalidString(_))));
    }

    #[test]
    fn test_wstring_actual_above_max() {
        let bytes = vec![1u8, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, b'a', 0, 0, 0];
        let result = NdrReader::new(bytes).read_top::<NdrWString>();
        assert_eq!(
            result,
            Err(NdrError::MalformedArray {
                max_count: 1,
                offset: 0,
                actual_count: 2
            })
        );
    }

    #[test]
    fn test_wstring_embedded_null_rejected() {
        let mut w = NdrWriter::new();
        assert!(w.write_top(&NdrWString::new("a\0b")).is_err());
    }

    #[test]
    fn test_narrow_string() {
        let s = NdrString::from("ab");
        let mut w = NdrWriter::new();
        w.write_top(&s).unwrap();
        assert_eq!(
            w.as_slice(),
            &[3, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, b'a', b'b', 0][..]
        );

        let decoded: NdrString = NdrReader::new(w.into_bytes()).read_top().unwrap();
        assert_eq!(decoded, s);

        let unterminated = vec![1u8, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, b'a'];
        assert!(matches!(
            NdrReader::new(unterminated).read_top::<NdrString>(),
            Err(NdrError::InvalidString(_))
        ));
    }
}
