//! Operation envelope
//!
//! An [`Operation`] ties an opnum to the argument lists of its request and
//! response. The response always ends with the operation's 32-bit return
//! code, carried by [`Reply`].
//!
//! The typed entry points ([`decode_request`], [`encode_response`] and their
//! client-side mirrors) work on one operation. [`OperationRegistry`] erases
//! the types so a dispatcher can decode and encode by opnum alone. Codec
//! errors pass through both unchanged.

use crate::{NdrContext, NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter, Result};
use bytes::Bytes;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// One remote operation of an interface
pub trait Operation: Send + Sync + 'static {
    const OPNUM: u16;
    const NAME: &'static str;

    /// `[in]` arguments, in wire order
    type Request: NdrEncode + NdrDecode + Send + 'static;

    /// `[out]` arguments, in wire order, without the return code
    type Response: NdrEncode + NdrDecode + Send + 'static;
}

/// Response arguments followed by the return code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply<R> {
    pub out: R,
    pub status: u32,
}

impl<R> Reply<R> {
    pub fn new(out: R, status: u32) -> Self {
        Self { out, status }
    }

    pub fn ok(out: R) -> Self {
        Self { out, status: 0 }
    }
}

impl<R: Default> Reply<R> {
    /// Default out arguments with a failure status
    pub fn error(status: u32) -> Self {
        Self {
            out: R::default(),
            status,
        }
    }
}

impl<R: NdrEncode> NdrEncode for Reply<R> {
    fn ndr_encode(&self, w: &mut NdrWriter) -> Result<()> {
        w.write_top(&self.out)?;
        w.write_u32(self.status);
        Ok(())
    }
}

impl<R: NdrDecode> NdrDecode for Reply<R> {
    fn ndr_decode(r: &mut NdrReader) -> Result<Self> {
        let mut out = R::ndr_decode(r)?;
        out.ndr_decode_deferred(r)?;
        let status = r.read_u32()?;
        Ok(Self { out, status })
    }

    fn ndr_fixup(&mut self, r: &mut NdrReader) -> Result<()> {
        self.out.ndr_fixup(r)
    }
}

/// Decode the `[in]` arguments of `O` from a request stub
pub fn decode_request<O: Operation>(stub: impl Into<Bytes>, ctx: NdrContext) -> Result<O::Request> {
    NdrReader::with_context(stub, ctx).read_top()
}

/// Encode the `[out]` arguments and return code of `O`
pub fn encode_response<O: Operation>(reply: &Reply<O::Response>, ctx: NdrContext) -> Result<Bytes> {
    let mut w = NdrWriter::with_context(ctx);
    w.write_top(reply)?;
    Ok(w.into_bytes())
}

/// Encode the `[in]` arguments of `O` into a request stub
pub fn encode_request<O: Operation>(request: &O::Request, ctx: NdrContext) -> Result<Bytes> {
    let mut w = NdrWriter::with_context(ctx);
    w.write_top(request)?;
    Ok(w.into_bytes())
}

/// Decode the `[out]` arguments and return code of `O`
pub fn decode_response<O: Operation>(
    stub: impl Into<Bytes>,
    ctx: NdrContext,
) -> Result<Reply<O::Response>> {
    NdrReader::with_context(stub, ctx).read_top()
}

/// Type-erased decoded arguments
pub type Args = Box<dyn Any + Send>;

/// Per-operation schema, usable without knowing the operation's types
pub trait OperationSchema: Send + Sync {
    fn opnum(&self) -> u16;

    fn name(&self) -> &'static str;

    /// Decode the request; the result downcasts to the operation's `Request`
    fn decode_request(&self, r: &mut NdrReader) -> Result<Args>;

    /// Encode a `Reply<Response>` for this operation
    fn encode_response(&self, reply: &(dyn Any + Send), w: &mut NdrWriter) -> Result<()>;
}

struct Schema<O>(PhantomData<fn() -> O>);

impl<O: Operation> OperationSchema for Schema<O> {
    fn opnum(&self) -> u16 {
        O::OPNUM
    }

    fn name(&self) -> &'static str {
        O::NAME
    }

    fn decode_request(&self, r: &mut NdrReader) -> Result<Args> {
        let request: O::Request = r.read_top()?;
        Ok(Box::new(request))
    }

    fn encode_response(&self, reply: &(dyn Any + Send), w: &mut NdrWriter) -> Result<()> {
        let reply = reply
            .downcast_ref::<Reply<O::Response>>()
            .ok_or(NdrError::ArgumentTypeMismatch(O::NAME))?;
        w.write_top(reply)
    }
}

#[derive(Clone)]
enum Slot {
    Schema(Arc<dyn OperationSchema>),
    NotUsedOnWire(&'static str),
}

/// Opnum-keyed table of operation schemas for one interface
#[derive(Clone, Default)]
pub struct OperationRegistry {
    slots: BTreeMap<u16, Slot>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the schema of `O` under its opnum
    pub fn register<O: Operation>(&mut self) -> &mut Self {
        self.slots
            .insert(O::OPNUM, Slot::Schema(Arc::new(Schema::<O>(PhantomData))));
        self
    }

    /// Mark an opnum as reserved: it exists in the interface but is never sent
    pub fn reserve(&mut self, opnum: u16, name: &'static str) -> &mut Self {
        self.slots.insert(opnum, Slot::NotUsedOnWire(name));
        self
    }

    pub fn get(&self, opnum: u16) -> Option<&dyn OperationSchema> {
        match self.slots.get(&opnum) {
            Some(Slot::Schema(schema)) => Some(schema.as_ref()),
            _ => None,
        }
    }

    pub fn is_reserved(&self, opnum: u16) -> bool {
        matches!(self.slots.get(&opnum), Some(Slot::NotUsedOnWire(_)))
    }

    /// Name of the operation or reserved slot at `opnum`
    pub fn name(&self, opnum: u16) -> Option<&'static str> {
        match self.slots.get(&opnum)? {
            Slot::Schema(schema) => Some(schema.name()),
            Slot::NotUsedOnWire(name) => Some(name),
        }
    }

    /// Opnums with a registered schema, ascending
    pub fn opnums(&self) -> impl Iterator<Item = u16> + '_ {
        self.slots.iter().filter_map(|(opnum, slot)| match slot {
            Slot::Schema(_) => Some(*opnum),
            Slot::NotUsedOnWire(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Decode the request arguments of the operation at `opnum`
    pub fn decode_request(&self, opnum: u16, r: &mut NdrReader) -> Result<Args> {
        self.get(opnum)
            .ok_or(NdrError::UnknownOpnum(opnum))?
            .decode_request(r)
    }

    /// Encode a reply for the operation at `opnum`
    pub fn encode_response(
        &self,
        opnum: u16,
        reply: &(dyn Any + Send),
        ctx: NdrContext,
    ) -> Result<Bytes> {
        let schema = self.get(opnum).ok_or(NdrError::UnknownOpnum(opnum))?;
        let mut w = NdrWriter::with_context(ctx);
        schema.encode_response(reply, &mut w)?;
        Ok(w.into_bytes())
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.slots.keys().map(|opnum| (opnum, self.name(*opnum))))
            .finish()
    }
}
