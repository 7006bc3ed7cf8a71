//! NDR error types

use thiserror::Error;

/// Default ceiling on the element count of a single decoded array or string.
pub const MAX_NDR_ARRAY_ELEMENTS: usize = 1 << 20;

/// NDR encoding/decoding errors
///
/// Every variant aborts the current operation frame. Nothing decoded before the
/// error is handed back to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NdrError {
    /// Fewer bytes remain than the next field requires
    #[error("truncated input: needed {needed} bytes, have {have}")]
    TruncatedInput { needed: usize, have: usize },

    /// Conformance/variance triad violates `offset + actual_count <= max_count`
    #[error("malformed array: max_count={max_count}, offset={offset}, actual_count={actual_count}")]
    MalformedArray {
        max_count: u32,
        offset: u32,
        actual_count: u32,
    },

    /// A full-pointer referent ID was reused for an object of a different type
    #[error("aliasing violation: referent {referent_id:#010x} reused with an incompatible type")]
    AliasingViolation { referent_id: u32 },

    /// Selector not present in a strict union's arm table
    #[error("unknown selector {selector} for union {union}")]
    UnknownUnionVariant { union: &'static str, selector: u32 },

    /// An offset/length pair points outside the blob it indexes
    #[error("fixup out of range: offset {offset} + length {length} exceeds blob of {len} bytes")]
    FixupOutOfRange {
        offset: usize,
        length: usize,
        len: usize,
    },

    /// Invalid string - missing terminator or invalid encoding
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// Invalid enum value
    #[error("invalid value {value} for {name}")]
    InvalidEnumValue { name: &'static str, value: u32 },

    /// Declared element count exceeds the configured limit
    #[error("allocation limit exceeded: requested {requested}, limit {limit}")]
    AllocationLimitExceeded { requested: usize, limit: usize },

    /// Size computation overflowed
    #[error("integer overflow in size computation")]
    IntegerOverflow,

    /// A value does not fit the wire field that carries it
    #[error("value out of range for {0}")]
    ValueOutOfRange(&'static str),

    /// No operation is registered under this opnum
    #[error("no operation registered for opnum {0}")]
    UnknownOpnum(u16),

    /// Type-erased arguments handed to the wrong operation schema
    #[error("argument type mismatch for operation {0}")]
    ArgumentTypeMismatch(&'static str),
}

/// Result type for NDR operations
pub type Result<T> = std::result::Result<T, NdrError>;
