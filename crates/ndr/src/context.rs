//! NDR encoding/decoding context
//!
//! The context carries the negotiated byte order and the decode limits. It is
//! copied into every writer and reader; nothing in it changes during a call.

use crate::error::MAX_NDR_ARRAY_ELEMENTS;

/// First referent ID handed out by a writer, matching MIDL-generated stubs.
pub const REFERENT_ID_BASE: u32 = 0x0002_0000;

/// Distance between consecutive referent IDs.
pub const REFERENT_ID_STEP: u32 = 4;

/// NDR encoding/decoding context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdrContext {
    /// Whether to use little-endian byte order
    pub little_endian: bool,
    /// Largest element count accepted for one array or string
    pub max_array_elements: usize,
}

impl NdrContext {
    /// Create a new NDR context with little-endian byte order (default)
    pub fn new() -> Self {
        Self {
            little_endian: true,
            max_array_elements: MAX_NDR_ARRAY_ELEMENTS,
        }
    }

    /// Create a context with big-endian byte order
    pub fn big_endian() -> Self {
        Self {
            little_endian: false,
            ..Self::new()
        }
    }

    /// Create a context with specified byte order
    pub fn with_byte_order(little_endian: bool) -> Self {
        Self {
            little_endian,
            ..Self::new()
        }
    }

    /// Override the per-array element limit
    pub fn with_max_array_elements(mut self, limit: usize) -> Self {
        self.max_array_elements = limit;
        self
    }

    /// Calculate padding needed to align to the given boundary
    #[inline]
    pub fn align_padding(position: usize, alignment: usize) -> usize {
        if alignment <= 1 {
            return 0;
        }
        (alignment - position % alignment) % alignment
    }
}

impl Default for NdrContext {
    fn default() -> Self {
        Self::new()
    }
}
