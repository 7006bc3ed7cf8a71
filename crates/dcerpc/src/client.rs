//! DCE RPC Client
//!
//! A client for connection-oriented DCE RPC over any byte stream. One
//! connection carries one association; further interfaces are added to it
//! with alter-context. Calls on one client are serialized.

use crate::error::{Result, RpcError};
use crate::fragmentation::{FragmentAssembler, FragmentGenerator};
use crate::pdu::{
    BindPdu, ContextElement, DataRepresentation, Pdu, RequestPdu, SyntaxId, DEFAULT_MAX_FRAG,
};
use crate::transport::{DceRpcTransport, DEFAULT_MAX_PDU_SIZE};
use bytes::Bytes;
use ndr::{NdrContext, Operation, Reply};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

/// DCE RPC Client for making calls to a DCE RPC server
#[derive(Debug)]
pub struct DceRpcClient<S = TcpStream> {
    transport: Mutex<DceRpcTransport<S>>,
    call_id_counter: AtomicU32,
    interface: SyntaxId,
    context_id: u16,
    contexts: HashMap<u16, SyntaxId>,
    next_context_id: u16,
    max_xmit_frag: u16,
    max_recv_frag: u16,
    assoc_group_id: u32,
    timeout: Option<Duration>,
    ndr: NdrContext,
    is_bound: bool,
}

impl DceRpcClient<TcpStream> {
    /// Connect to a DCE RPC server and bind to the specified interface
    pub async fn connect(addr: SocketAddr, interface: SyntaxId) -> Result<Self> {
        DceRpcClientBuilder::from_syntax(interface).connect(addr).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> DceRpcClient<S> {
    /// Create a client over an existing stream (unbound)
    pub fn from_stream(stream: S, interface: SyntaxId) -> Self {
        Self::with_transport(DceRpcTransport::new(stream), interface)
    }

    fn with_transport(transport: DceRpcTransport<S>, interface: SyntaxId) -> Self {
        Self {
            transport: Mutex::new(transport),
            call_id_counter: AtomicU32::new(1),
            interface,
            context_id: 0,
            contexts: HashMap::new(),
            next_context_id: 0,
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id: 0,
            timeout: None,
            ndr: NdrContext::new(),
            is_bound: false,
        }
    }

    fn next_call_id(&self) -> u32 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Perform the bind handshake with the server
    pub async fn bind(&mut self) -> Result<()> {
        let call_id = self.next_call_id();
        let context_id = self.next_context_id;
        let mut bind = BindPdu::new(call_id, vec![ContextElement::ndr(context_id, self.interface)]);
        bind.max_xmit_frag = self.max_xmit_frag;
        bind.max_recv_frag = self.max_recv_frag;

        debug!(
            "Sending bind request: call_id={}, interface={}",
            call_id, self.interface
        );

        let pdu = {
            let mut transport = self.transport.lock().await;
            transport.write_pdu(&bind.encode()?).await?;
            transport.read_pdu_decoded().await?
        };

        match pdu {
            Pdu::BindAck(ack) => {
                if ack.header.call_id != call_id {
                    return Err(RpcError::CallIdMismatch {
                        expected: call_id,
                        got: ack.header.call_id,
                    });
                }
                match ack.results.first() {
                    Some(result) if result.is_accepted() => {}
                    Some(result) => return Err(RpcError::BindRejected(result.reason)),
                    None => return Err(RpcError::CallRejected("no bind result".to_string())),
                }

                self.max_xmit_frag = ack.max_xmit_frag;
                self.max_recv_frag = ack.max_recv_frag;
                self.assoc_group_id = ack.assoc_group_id;
                self.context_id = context_id;
                self.contexts.insert(context_id, self.interface);
                self.next_context_id = context_id + 1;
                self.is_bound = true;

                debug!(
                    "Bind successful: max_xmit={}, max_recv={}, assoc_group={}",
                    self.max_xmit_frag, self.max_recv_frag, self.assoc_group_id
                );
                Ok(())
            }
            Pdu::BindNak(nak) => Err(RpcError::BindRejected(nak.reason)),
            Pdu::Fault(fault) => Err(RpcError::Fault(fault.status)),
            other => Err(RpcError::InvalidMessageType(other.header().packet_type as u8)),
        }
    }

    /// Add a presentation context for another interface on this connection.
    ///
    /// Returns the context ID to pass to [`call_on`](Self::call_on).
    pub async fn alter_context(&mut self, interface: SyntaxId) -> Result<u16> {
        if !self.is_bound {
            return Err(RpcError::CallRejected("not bound".to_string()));
        }
        let call_id = self.next_call_id();
        let context_id = self.next_context_id;
        let alter = BindPdu::alter_context(call_id, vec![ContextElement::ndr(context_id, interface)]);

        debug!(
            "Sending alter_context: call_id={}, context_id={}, interface={}",
            call_id, context_id, interface
        );

        let pdu = {
            let mut transport = self.transport.lock().await;
            transport.write_pdu(&alter.encode()?).await?;
            transport.read_pdu_decoded().await?
        };

        match pdu {
            Pdu::AlterContextResp(resp) => {
                match resp.results.first() {
                    Some(result) if result.is_accepted() => {}
                    Some(result) => return Err(RpcError::BindRejected(result.reason)),
                    None => return Err(RpcError::CallRejected("no context result".to_string())),
                }
                self.contexts.insert(context_id, interface);
                self.next_context_id = context_id + 1;
                Ok(context_id)
            }
            Pdu::Fault(fault) => Err(RpcError::Fault(fault.status)),
            other => Err(RpcError::InvalidMessageType(other.header().packet_type as u8)),
        }
    }

    /// Make an RPC call on the primary context
    ///
    /// # Fragmentation
    /// If the stub data exceeds the negotiated `max_xmit_frag` limit,
    /// the request is automatically split into multiple fragments.
    /// Similarly, fragmented responses are automatically reassembled.
    pub async fn call(&self, opnum: u16, stub_data: Bytes) -> Result<Bytes> {
        self.call_on(self.context_id, opnum, stub_data).await
    }

    /// Make an RPC call on a specific presentation context
    pub async fn call_on(&self, context_id: u16, opnum: u16, stub_data: Bytes) -> Result<Bytes> {
        if !self.is_bound {
            return Err(RpcError::CallRejected("not bound".to_string()));
        }

        let call = self.send_and_receive(context_id, opnum, stub_data);
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| RpcError::Timeout)?,
            None => call.await,
        }
    }

    /// Call a typed operation on the primary context
    pub async fn call_op<O: Operation>(&self, request: &O::Request) -> Result<Reply<O::Response>> {
        self.call_op_on::<O>(self.context_id, request).await
    }

    /// Call a typed operation on a specific presentation context
    pub async fn call_op_on<O: Operation>(
        &self,
        context_id: u16,
        request: &O::Request,
    ) -> Result<Reply<O::Response>> {
        let stub = ndr::encode_request::<O>(request, self.ndr)?;
        trace!("calling {} ({} stub bytes)", O::NAME, stub.len());
        let out = self.call_on(context_id, O::OPNUM, stub).await?;
        Ok(ndr::decode_response::<O>(out, self.ndr)?)
    }

    async fn send_and_receive(&self, context_id: u16, opnum: u16, stub_data: Bytes) -> Result<Bytes> {
        let call_id = self.next_call_id();
        let mut request = RequestPdu::new(call_id, opnum, stub_data);
        request.context_id = context_id;
        request.header.data_rep = DataRepresentation::from_ndr_context(&self.ndr);

        let fragments = FragmentGenerator::fragment_request(&request, self.max_xmit_frag);
        debug!(
            "Sending request: call_id={}, opnum={}, stub_len={}, fragments={}",
            call_id,
            opnum,
            request.stub_data.len(),
            fragments.len()
        );

        let mut transport = self.transport.lock().await;
        for frag in &fragments {
            transport.write_pdu(&frag.encode()?).await?;
        }
        receive_response(&mut transport, call_id).await
    }

    /// Get the interface this client is bound to
    pub fn interface(&self) -> &SyntaxId {
        &self.interface
    }

    /// Interface bound to a presentation context
    pub fn context_interface(&self, context_id: u16) -> Option<&SyntaxId> {
        self.contexts.get(&context_id)
    }

    /// Check if the client is bound to the server
    pub fn is_bound(&self) -> bool {
        self.is_bound
    }

    pub fn max_xmit_frag(&self) -> u16 {
        self.max_xmit_frag
    }

    pub fn assoc_group_id(&self) -> u32 {
        self.assoc_group_id
    }

    /// Tell the server the association is finished and close the stream
    pub async fn close(self) -> Result<()> {
        let mut transport = self.transport.into_inner();
        transport.shutdown().await
    }
}

/// Receive a response, handling fragmentation if needed
async fn receive_response<S: AsyncRead + Unpin>(
    transport: &mut DceRpcTransport<S>,
    call_id: u32,
) -> Result<Bytes> {
    let mut assembler: Option<FragmentAssembler> = None;

    loop {
        match transport.read_pdu_decoded().await? {
            Pdu::Response(response) => {
                if response.header.call_id != call_id {
                    return Err(RpcError::CallIdMismatch {
                        expected: call_id,
                        got: response.header.call_id,
                    });
                }

                let flags = response.header.packet_flags;
                if flags.is_first_frag() && flags.is_last_frag() && assembler.is_none() {
                    trace!("Call succeeded: {} bytes result", response.stub_data.len());
                    return Ok(response.stub_data);
                }

                let asm = assembler.get_or_insert_with(|| FragmentAssembler::new(call_id));
                if let Some(complete) = asm.add_fragment(
                    &response.header,
                    &response.stub_data,
                    response.context_id,
                    None,
                    response.alloc_hint,
                )? {
                    trace!("Reassembled response: {} bytes", complete.len());
                    return Ok(complete);
                }
            }
            Pdu::Fault(fault) => {
                if fault.header.call_id != call_id {
                    return Err(RpcError::CallIdMismatch {
                        expected: call_id,
                        got: fault.header.call_id,
                    });
                }
                debug!("call {} faulted: 0x{:08x}", call_id, fault.status);
                return Err(RpcError::Fault(fault.status));
            }
            other => return Err(RpcError::InvalidMessageType(other.header().packet_type as u8)),
        }
    }
}

/// Builder for DCE RPC clients
pub struct DceRpcClientBuilder {
    interface: SyntaxId,
    timeout: Option<Duration>,
    max_pdu_size: usize,
    max_frag: u16,
    ndr: NdrContext,
}

impl DceRpcClientBuilder {
    /// Create a builder for the specified interface
    pub fn new(interface_uuid: Uuid, major_version: u16, minor_version: u16) -> Self {
        Self::from_syntax(SyntaxId::new(interface_uuid, major_version, minor_version))
    }

    /// Create a builder from a SyntaxId
    pub fn from_syntax(interface: SyntaxId) -> Self {
        Self {
            interface,
            timeout: None,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            max_frag: DEFAULT_MAX_FRAG,
            ndr: NdrContext::new(),
        }
    }

    /// Set connection and per-call timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set maximum PDU size
    pub fn max_pdu_size(mut self, size: usize) -> Self {
        self.max_pdu_size = size;
        self
    }

    /// Fragment size proposed in the bind
    pub fn max_frag(mut self, size: u16) -> Self {
        self.max_frag = size;
        self
    }

    /// Byte order and limits for marshalled arguments
    pub fn ndr_context(mut self, ndr: NdrContext) -> Self {
        self.ndr = ndr;
        self
    }

    /// Wrap `stream` and perform the bind
    pub async fn bind<S: AsyncRead + AsyncWrite + Unpin>(self, stream: S) -> Result<DceRpcClient<S>> {
        let transport = DceRpcTransport::new(stream).with_max_pdu_size(self.max_pdu_size);
        let mut client = DceRpcClient::with_transport(transport, self.interface);
        client.timeout = self.timeout;
        client.max_xmit_frag = self.max_frag;
        client.max_recv_frag = self.max_frag;
        client.ndr = self.ndr;

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, client.bind())
                .await
                .map_err(|_| RpcError::Timeout)??,
            None => client.bind().await?,
        }
        Ok(client)
    }

    /// Connect to the server and perform bind
    pub async fn connect(self, addr: SocketAddr) -> Result<DceRpcClient> {
        let stream = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| RpcError::Timeout)??,
            None => TcpStream::connect(addr).await?,
        };
        stream.set_nodelay(true)?;
        self.bind(stream).await
    }
}
