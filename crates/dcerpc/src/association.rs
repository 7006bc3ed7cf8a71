//! Association state
//!
//! An association is the server's view of one connection after bind: the
//! negotiated fragment sizes, the presentation contexts accepted so far and
//! the context handles issued on it. Bind and alter-context both feed
//! [`Association::negotiate`], which answers each proposed context in order.

use crate::context_handle::ContextHandleTable;
use crate::pdu::{ContextElement, ContextResultEntry, ProviderReason, SyntaxId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Fragment size every implementation must accept (MustRecvFragSize).
/// Smaller sizes offered by a peer are raised to it.
pub const MUST_RECV_FRAG_SIZE: u16 = 1432;

/// An accepted presentation context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationContext {
    pub context_id: u16,
    /// Interface as registered on the server
    pub interface: SyntaxId,
    pub transfer_syntax: SyntaxId,
}

/// Server-side state of one association
#[derive(Debug)]
pub struct Association {
    pub assoc_group_id: u32,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    contexts: HashMap<u16, PresentationContext>,
    handles: Arc<ContextHandleTable>,
}

impl Association {
    pub fn new(assoc_group_id: u32, max_xmit_frag: u16, max_recv_frag: u16) -> Self {
        Self {
            assoc_group_id,
            max_xmit_frag,
            max_recv_frag,
            contexts: HashMap::new(),
            handles: Arc::new(ContextHandleTable::new()),
        }
    }

    /// Answer each proposed context, recording the accepted ones.
    ///
    /// `lookup` returns the registered syntax for an interface UUID. A context
    /// is accepted when the major versions match, the client's minor version
    /// is not newer than the server's and NDR 2.0 is among the offered
    /// transfer syntaxes.
    pub fn negotiate<F>(&mut self, proposed: &[ContextElement], lookup: F) -> Vec<ContextResultEntry>
    where
        F: Fn(&Uuid) -> Option<SyntaxId>,
    {
        let ndr = SyntaxId::ndr();
        proposed
            .iter()
            .map(|element| {
                let requested = element.abstract_syntax;
                let interface = match lookup(&requested.uuid) {
                    Some(registered)
                        if registered.major_version() == requested.major_version()
                            && requested.minor_version() <= registered.minor_version() =>
                    {
                        registered
                    }
                    _ => {
                        debug!("rejecting context {}: {}", element.context_id, requested);
                        return ContextResultEntry::rejected(
                            ProviderReason::AbstractSyntaxNotSupported,
                        );
                    }
                };

                if !element.transfer_syntaxes.contains(&ndr) {
                    debug!(
                        "rejecting context {}: no supported transfer syntax",
                        element.context_id
                    );
                    return ContextResultEntry::rejected(
                        ProviderReason::ProposedTransferSyntaxesNotSupported,
                    );
                }

                debug!("accepted context {}: {}", element.context_id, interface);
                self.contexts.insert(
                    element.context_id,
                    PresentationContext {
                        context_id: element.context_id,
                        interface,
                        transfer_syntax: ndr,
                    },
                );
                ContextResultEntry::accepted(ndr)
            })
            .collect()
    }

    pub fn context(&self, context_id: u16) -> Option<&PresentationContext> {
        self.contexts.get(&context_id)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &PresentationContext> {
        self.contexts.values()
    }

    pub fn handles(&self) -> &Arc<ContextHandleTable> {
        &self.handles
    }

    /// Fragment sizes for the ack: the smaller of ours and the client's,
    /// with the client's raised to [`MUST_RECV_FRAG_SIZE`] first
    pub fn clamp_fragments(&mut self, client_xmit: u16, client_recv: u16) {
        // The client's receive limit bounds what we transmit and vice versa
        self.max_xmit_frag = self.max_xmit_frag.min(client_recv.max(MUST_RECV_FRAG_SIZE));
        self.max_recv_frag = self.max_recv_frag.min(client_xmit.max(MUST_RECV_FRAG_SIZE));
    }
}

impl Drop for Association {
    fn drop(&mut self) {
        self.handles.clear();
    }
}
