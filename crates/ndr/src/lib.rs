//! NDR (Network Data Representation) codec
//!
//! This crate implements the NDR wire format used by DCE RPC and MS-RPCE
//! interfaces, together with the operation envelope that RPC servers use to
//! turn a request stub into typed arguments and a reply back into bytes.
//!
//! # NDR Wire Format
//!
//! NDR is the standard encoding for DCE RPC data. Key characteristics:
//! - Primitives align to their natural size (1, 2, 4, or 8 bytes)
//! - Structures align to their largest member
//! - Pointers are 4-byte referent IDs; the pointee follows later, after the
//!   enclosing construct (deferral)
//! - Full pointers with equal referent IDs are the same object
//! - Strings are conformant varying arrays with null terminator
//!
//! # Encoding and decoding
//!
//! Every frame is written through one [`NdrWriter`] and read through one
//! [`NdrReader`]. Each owns the referent bookkeeping for its frame, so
//! concurrent calls never share state.

mod arrays;
mod compose;
mod context;
mod context_handle;
mod decode;
mod encode;
mod error;
mod operation;
mod pointers;
mod primitives;
mod reader;
mod strings;
mod union;
mod writer;

pub use arrays::{
    decode_elements, decode_elements_deferred, encode_elements, encode_elements_deferred,
    fixup_elements, read_variance, ConformantArray, ConformantVaryingArray, VaryingArray,
};
pub use context::{NdrContext, REFERENT_ID_BASE, REFERENT_ID_STEP};
pub use context_handle::ContextHandle;
pub use decode::NdrDecode;
pub use encode::NdrEncode;
pub use error::{NdrError, Result, MAX_NDR_ARRAY_ELEMENTS};
pub use operation::{
    decode_request, decode_response, encode_request, encode_response, Args, Operation,
    OperationRegistry, OperationSchema, Reply,
};
pub use pointers::{FullPtr, UniquePtr};
pub use reader::NdrReader;
pub use strings::{NdrString, NdrWString};
pub use union::{
    decode_union, encode_union, union_align, NdrUnion, Selector, SelectorWidth, UnionArm,
    UnionPolicy,
};
pub use writer::NdrWriter;

/// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};
/// Lock type behind [`FullPtr`]
pub use parking_lot::RwLock;
