//! DCE RPC Server
//!
//! A connection-oriented server runtime for NDR interfaces.
//!
//! # Scalability Features
//!
//! - Each connection handled in a separate Tokio task
//! - Semaphore-based connection limiting
//! - Requests on one connection run as their own tasks, bounded per
//!   connection, with responses serialized through a single writer task
//! - Server statistics tracking
//! - Graceful shutdown support
//!
//! # Dispatch
//!
//! An [`Interface`] owns an [`OperationRegistry`]. For a typed operation the
//! server decodes the request stub through the registry, hands the decoded
//! arguments to the handler and encodes the [`Reply`] it returns. Codec
//! errors and handler errors become fault PDUs; the connection stays up.

use crate::association::Association;
use crate::context_handle::ContextHandleTable;
use crate::error::{Result, RpcError};
use crate::fragmentation::{FragmentAssembler, FragmentGenerator, DEFAULT_MAX_STUB_SIZE};
use crate::pdu::{
    BindAckPdu, BindNakPdu, BindNakReason, BindPdu, DataRepresentation, FaultPdu, FaultStatus, Pdu,
    PduHeader, RequestPdu, ResponsePdu, SyntaxId, DEFAULT_MAX_FRAG,
};
use crate::transport::{DceRpcTransport, DEFAULT_MAX_PDU_SIZE};
use bytes::Bytes;
use futures::future::BoxFuture;
use ndr::{Args, ContextHandle, NdrContext, NdrError, NdrReader, Operation, OperationRegistry, Reply};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Boxed future returned by operation handlers
pub type HandlerFuture<T> = BoxFuture<'static, Result<T>>;

type TypedHandler = Arc<dyn Fn(CallContext, Args) -> HandlerFuture<Args> + Send + Sync>;
type RawHandler = Arc<dyn Fn(CallContext, Bytes) -> HandlerFuture<Bytes> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Typed(TypedHandler),
    Raw(RawHandler),
}

/// Per-call information handed to operation handlers
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: u32,
    pub opnum: u16,
    pub context_id: u16,
    /// Interface bound to the presentation context
    pub interface: SyntaxId,
    /// Byte order of the request, used for the response as well
    pub ndr: NdrContext,
    pub assoc_group_id: u32,
    handles: Arc<ContextHandleTable>,
}

impl CallContext {
    pub fn new(opnum: u16, interface: SyntaxId, handles: Arc<ContextHandleTable>) -> Self {
        Self {
            call_id: 0,
            opnum,
            context_id: 0,
            interface,
            ndr: NdrContext::new(),
            assoc_group_id: 0,
            handles,
        }
    }

    /// Context handles of the calling association
    pub fn handles(&self) -> &Arc<ContextHandleTable> {
        &self.handles
    }

    /// Issue a context handle for `object` on this association
    pub fn create_handle<T: Any + Send + Sync>(&self, object: T) -> ContextHandle {
        self.handles.create(self.interface.uuid, object)
    }

    /// Resolve a handle the client presented
    pub fn lookup_handle<T: Any + Send + Sync>(&self, handle: &ContextHandle) -> Result<Arc<T>> {
        self.handles.get(handle, self.interface.uuid)
    }

    pub fn close_handle(&self, handle: &ContextHandle) -> Result<()> {
        self.handles.close(handle, self.interface.uuid).map(|_| ())
    }
}

/// Interface definition - operations for a specific interface version
pub struct Interface {
    pub syntax: SyntaxId,
    registry: OperationRegistry,
    handlers: HashMap<u16, Handler>,
}

impl Interface {
    pub fn new(uuid: Uuid, major_version: u16, minor_version: u16) -> Self {
        Self::from_syntax(SyntaxId::new(uuid, major_version, minor_version))
    }

    pub fn from_syntax(syntax: SyntaxId) -> Self {
        Self {
            syntax,
            registry: OperationRegistry::new(),
            handlers: HashMap::new(),
        }
    }

    /// Start from a registry that already lists the interface's opnums
    pub fn with_registry(mut self, registry: OperationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Register a typed handler for `O`, adding its schema to the registry
    pub fn register_operation<O, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        O: Operation,
        F: Fn(CallContext, O::Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply<O::Response>>> + Send + 'static,
    {
        self.registry.register::<O>();
        let erased = move |call: CallContext, args: Args| -> HandlerFuture<Args> {
            match args.downcast::<O::Request>() {
                Ok(request) => {
                    let reply = handler(call, *request);
                    Box::pin(async move { Ok::<Args, RpcError>(Box::new(reply.await?)) })
                }
                Err(_) => Box::pin(async {
                    Err::<Args, RpcError>(NdrError::ArgumentTypeMismatch(O::NAME).into())
                }),
            }
        };
        self.handlers
            .insert(O::OPNUM, Handler::Typed(Arc::new(erased)));
        self
    }

    /// Register a handler that works on the raw request stub
    pub fn register_raw<F, Fut>(&mut self, opnum: u16, handler: F) -> &mut Self
    where
        F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.handlers.insert(
            opnum,
            Handler::Raw(Arc::new(
                move |call: CallContext, stub: Bytes| -> HandlerFuture<Bytes> {
                    Box::pin(handler(call, stub))
                },
            )),
        );
        self
    }

    pub fn has_operation(&self, opnum: u16) -> bool {
        self.handlers.contains_key(&opnum)
    }

    /// Run one call: decode, invoke the handler, encode the reply
    pub async fn dispatch(&self, call: CallContext, stub: Bytes) -> Result<Bytes> {
        let opnum = call.opnum;
        let handler = match self.handlers.get(&opnum) {
            Some(handler) => handler.clone(),
            None => {
                if self.registry.is_reserved(opnum) {
                    debug!("opnum {} is not used on the wire", opnum);
                }
                return Err(RpcError::OperationUnavailable(opnum));
            }
        };

        match handler {
            Handler::Typed(handler) => {
                let ndr = call.ndr;
                let mut r = NdrReader::with_context(stub, ndr);
                let args = self.registry.decode_request(opnum, &mut r)?;
                if r.remaining() > 0 {
                    trace!("opnum {}: {} trailing stub bytes", opnum, r.remaining());
                }
                let reply = handler(call, args).await?;
                Ok(self.registry.encode_response(opnum, &*reply, ndr)?)
            }
            Handler::Raw(handler) => handler(call, stub).await,
        }
    }
}

/// Builder for creating DCE RPC interfaces with a fluent API
pub struct InterfaceBuilder {
    interface: Interface,
}

impl InterfaceBuilder {
    pub fn new(uuid: Uuid, major_version: u16, minor_version: u16) -> Self {
        Self {
            interface: Interface::new(uuid, major_version, minor_version),
        }
    }

    pub fn from_syntax(syntax: SyntaxId) -> Self {
        Self {
            interface: Interface::from_syntax(syntax),
        }
    }

    pub fn registry(mut self, registry: OperationRegistry) -> Self {
        self.interface = self.interface.with_registry(registry);
        self
    }

    pub fn operation<O, F, Fut>(mut self, handler: F) -> Self
    where
        O: Operation,
        F: Fn(CallContext, O::Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply<O::Response>>> + Send + 'static,
    {
        self.interface.register_operation::<O, F, Fut>(handler);
        self
    }

    pub fn raw_operation<F, Fut>(mut self, opnum: u16, handler: F) -> Self
    where
        F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.interface.register_raw(opnum, handler);
        self
    }

    pub fn build(self) -> Interface {
        self.interface
    }
}

/// DCE RPC Server configuration
#[derive(Debug, Clone)]
pub struct DceRpcServerConfig {
    pub max_pdu_size: usize,
    pub max_connections: usize,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    /// In-flight calls allowed on one connection
    pub max_concurrent_calls: usize,
    /// Largest reassembled request stub
    pub max_call_size: usize,
}

impl Default for DceRpcServerConfig {
    fn default() -> Self {
        Self {
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            max_connections: 10000,
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            max_concurrent_calls: 16,
            max_call_size: DEFAULT_MAX_STUB_SIZE,
        }
    }
}

impl DceRpcServerConfig {
    pub fn with_max_pdu_size(mut self, size: usize) -> Self {
        self.max_pdu_size = size;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_max_frag(mut self, max_xmit_frag: u16, max_recv_frag: u16) -> Self {
        self.max_xmit_frag = max_xmit_frag;
        self.max_recv_frag = max_recv_frag;
        self
    }

    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max.max(1);
        self
    }

    pub fn with_max_call_size(mut self, size: usize) -> Self {
        self.max_call_size = size;
        self
    }
}

/// Server statistics
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub requests_received: AtomicU64,
    pub requests_processed: AtomicU64,
    pub requests_failed: AtomicU64,
    pub faults_sent: AtomicU64,
    pub calls_cancelled: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            faults_sent: self.faults_sent.load(Ordering::Relaxed),
            calls_cancelled: self.calls_cancelled.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of server statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub requests_received: u64,
    pub requests_processed: u64,
    pub requests_failed: u64,
    pub faults_sent: u64,
    pub calls_cancelled: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

type InterfaceMap = Arc<RwLock<HashMap<Uuid, Arc<Interface>>>>;

/// Everything a connection task needs from the server
#[derive(Clone)]
struct Shared {
    interfaces: InterfaceMap,
    config: DceRpcServerConfig,
    stats: Arc<ServerStats>,
}

/// DCE RPC Server
///
/// # Scalability
///
/// - Each connection runs in its own Tokio task
/// - A semaphore limits maximum concurrent connections
/// - Interfaces are shared via `Arc<RwLock>`; the lock is released before
///   any handler runs
pub struct DceRpcServer {
    interfaces: InterfaceMap,
    config: DceRpcServerConfig,
    assoc_group_counter: AtomicU32,
    stats: Arc<ServerStats>,
}

impl DceRpcServer {
    pub fn new() -> Self {
        Self::with_config(DceRpcServerConfig::default())
    }

    pub fn with_config(config: DceRpcServerConfig) -> Self {
        Self {
            interfaces: Arc::new(RwLock::new(HashMap::new())),
            config,
            assoc_group_counter: AtomicU32::new(1),
            stats: Arc::new(ServerStats::default()),
        }
    }

    pub fn config(&self) -> &DceRpcServerConfig {
        &self.config
    }

    /// Get server statistics
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Register an interface with the server
    pub async fn register_interface(&self, interface: Interface) {
        let mut interfaces = self.interfaces.write().await;
        info!(
            "Registering interface: {} ({} opnums)",
            interface.syntax,
            interface.registry.len()
        );
        interfaces.insert(interface.syntax.uuid, Arc::new(interface));
    }

    fn shared(&self) -> Shared {
        Shared {
            interfaces: Arc::clone(&self.interfaces),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Run the server on the given address
    pub async fn run(&self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F: Future<Output = ()>>(&self, addr: SocketAddr, shutdown: F) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Accept connections from `listener` until `shutdown` resolves, then
    /// wait for the open connections to finish.
    pub async fn serve_listener<F: Future<Output = ()>>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<()> {
        info!(
            "DCE RPC server listening on {} (max_connections: {})",
            listener.local_addr()?,
            self.config.max_connections
        );

        // Semaphore to limit concurrent connections
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Server shutting down gracefully");
                    let _ = semaphore
                        .acquire_many(self.config.max_connections as u32)
                        .await;
                    info!("All connections closed");
                    return Ok(());
                }

                result = listener.accept() => {
                    let (stream, peer_addr) = result?;

                    let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                            warn!("Connection limit reached, rejecting connection from {}", peer_addr);
                            drop(stream);
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    debug!("Accepted connection from {}", peer_addr);

                    let shared = self.shared();
                    let assoc_group_id = self.next_assoc_group();

                    tokio::spawn(async move {
                        // Permit is held until this task completes
                        let _permit = permit;
                        match serve(stream, shared, assoc_group_id).await {
                            Ok(()) => debug!("Connection closed from {}", peer_addr),
                            Err(e) => warn!("Connection error from {}: {}", peer_addr, e),
                        }
                    });
                }
            }
        }
    }

    /// Serve a single already-established connection until it closes
    pub async fn serve_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        serve(stream, self.shared(), self.next_assoc_group()).await
    }

    fn next_assoc_group(&self) -> u32 {
        self.assoc_group_counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for DceRpcServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn serve<S>(stream: S, shared: Shared, assoc_group_id: u32) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let stats = Arc::clone(&shared.stats);
    stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
    stats.connections_active.fetch_add(1, Ordering::Relaxed);

    let (reader, writer) = tokio::io::split(stream);
    let mut read_transport = DceRpcTransport::new(reader).with_max_pdu_size(shared.config.max_pdu_size);
    let (tx, rx) = mpsc::channel(shared.config.max_concurrent_calls.max(1) * 2);
    let writer_task = tokio::spawn(write_loop(DceRpcTransport::new(writer), rx, Arc::clone(&stats)));

    let mut connection = Connection::new(shared, assoc_group_id, tx);
    let result = connection.run(&mut read_transport).await;

    // Aborts in-flight calls and drops the association's handles
    drop(connection);
    let writer_result = writer_task.await;

    stats.connections_active.fetch_sub(1, Ordering::Relaxed);

    match result {
        Ok(()) | Err(RpcError::ConnectionClosed) => {}
        Err(e) => return Err(e),
    }
    match writer_result {
        Ok(Ok(())) | Ok(Err(RpcError::ConnectionClosed)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(e.into()),
    }
}

/// Sole writer of a connection. Each message is the complete set of
/// fragments for one PDU, so fragments of different calls never interleave.
async fn write_loop<S: AsyncWrite>(
    mut transport: DceRpcTransport<WriteHalf<S>>,
    mut rx: mpsc::Receiver<Vec<Bytes>>,
    stats: Arc<ServerStats>,
) -> Result<()> {
    while let Some(frames) = rx.recv().await {
        for frame in frames {
            stats
                .bytes_sent
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
            transport.write_pdu(&frame).await?;
        }
    }
    let _ = transport.shutdown().await;
    Ok(())
}

/// Calls that may wait for an in-flight slot, per slot
const QUEUED_CALLS_PER_SLOT: usize = 4;

/// Per-connection state, owned by the connection's reader loop
struct Connection {
    shared: Shared,
    assoc_group_id: u32,
    association: Option<Association>,
    assemblers: HashMap<u32, FragmentAssembler>,
    calls: JoinSet<u32>,
    in_flight: HashMap<u32, AbortHandle>,
    call_slots: Arc<Semaphore>,
    tx: mpsc::Sender<Vec<Bytes>>,
}

impl Connection {
    fn new(shared: Shared, assoc_group_id: u32, tx: mpsc::Sender<Vec<Bytes>>) -> Self {
        let call_slots = Arc::new(Semaphore::new(shared.config.max_concurrent_calls.max(1)));
        Self {
            shared,
            assoc_group_id,
            association: None,
            assemblers: HashMap::new(),
            calls: JoinSet::new(),
            in_flight: HashMap::new(),
            call_slots,
            tx,
        }
    }

    async fn run<S: AsyncRead>(&mut self, transport: &mut DceRpcTransport<ReadHalf<S>>) -> Result<()> {
        loop {
            tokio::select! {
                data = transport.read_pdu() => {
                    let data = data?;
                    self.shared
                        .stats
                        .bytes_received
                        .fetch_add(data.len() as u64, Ordering::Relaxed);
                    self.handle_pdu(data).await?;
                }
                Some(joined) = self.calls.join_next(), if !self.calls.is_empty() => {
                    match joined {
                        Ok(call_id) => {
                            if self.in_flight.get(&call_id).is_some_and(AbortHandle::is_finished) {
                                self.in_flight.remove(&call_id);
                            }
                        }
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => warn!("call task failed: {}", e),
                    }
                }
            }
        }
    }

    async fn send(&self, frames: Vec<Bytes>) -> Result<()> {
        self.tx
            .send(frames)
            .await
            .map_err(|_| RpcError::ConnectionClosed)
    }

    async fn send_pdu(&self, pdu: Pdu) -> Result<()> {
        self.send(vec![pdu.encode()?]).await
    }

    async fn send_fault(&self, header: &PduHeader, context_id: u16, status: u32) -> Result<()> {
        self.shared.stats.faults_sent.fetch_add(1, Ordering::Relaxed);
        self.send(fault_frames(header.call_id, context_id, header.data_rep, status, true))
            .await
    }

    async fn handle_pdu(&mut self, data: Bytes) -> Result<()> {
        let pdu = match Pdu::decode(data.clone()) {
            Ok(pdu) => pdu,
            Err(e) => {
                // Without a readable header there is nothing to answer
                let header = PduHeader::decode(&data)?;
                warn!("undecodable {:?} PDU: {}", header.packet_type, e);
                return self.send_fault(&header, 0, e.fault_status()).await;
            }
        };

        match pdu {
            Pdu::Bind(bind) => self.handle_bind(bind).await,
            Pdu::AlterContext(alter) => self.handle_alter_context(alter).await,
            Pdu::Request(request) => self.handle_request(request).await,
            Pdu::CoCancel(header) => {
                debug!("co_cancel for call {}", header.call_id);
                if self.cancel(header.call_id) {
                    self.send_fault(&header, 0, FaultStatus::FaultCancel.into())
                        .await?;
                }
                Ok(())
            }
            Pdu::Orphaned(header) => {
                debug!("call {} orphaned", header.call_id);
                self.cancel(header.call_id);
                Ok(())
            }
            Pdu::Auth3(_) => {
                trace!("ignoring auth3");
                Ok(())
            }
            Pdu::Shutdown(_) => {
                trace!("ignoring shutdown");
                Ok(())
            }
            other => {
                warn!(
                    "Received unexpected {:?} PDU from client",
                    other.header().packet_type
                );
                Ok(())
            }
        }
    }

    async fn handle_bind(&mut self, bind: BindPdu) -> Result<()> {
        let call_id = bind.header.call_id;
        debug!(
            "Received bind: call_id={}, contexts={}",
            call_id,
            bind.context_list.len()
        );

        if self.association.is_some() {
            warn!("second bind on an established association");
            return self
                .send_pdu(Pdu::BindNak(BindNakPdu::new(call_id, BindNakReason::NotSpecified)))
                .await;
        }

        let config = &self.shared.config;
        let mut association =
            Association::new(self.assoc_group_id, config.max_xmit_frag, config.max_recv_frag);
        association.clamp_fragments(bind.max_xmit_frag, bind.max_recv_frag);
        let results = {
            let interfaces = self.shared.interfaces.read().await;
            association.negotiate(&bind.context_list, |uuid| {
                interfaces.get(uuid).map(|iface| iface.syntax)
            })
        };

        if !results.iter().any(|result| result.is_accepted()) {
            debug!("bind {} has no acceptable context", call_id);
            return self
                .send_pdu(Pdu::BindNak(BindNakPdu::new(
                    call_id,
                    BindNakReason::DefaultContextNotSupported,
                )))
                .await;
        }

        let mut ack = BindAckPdu::new(call_id, association.assoc_group_id, results);
        ack.max_xmit_frag = association.max_xmit_frag;
        ack.max_recv_frag = association.max_recv_frag;
        self.association = Some(association);
        self.send_pdu(Pdu::BindAck(ack)).await
    }

    async fn handle_alter_context(&mut self, alter: BindPdu) -> Result<()> {
        let call_id = alter.header.call_id;
        if self.association.is_none() {
            warn!("alter_context before bind");
            let status = FaultStatus::ProtoError.into();
            return self.send_fault(&alter.header, 0, status).await;
        }
        let Some(association) = self.association.as_mut() else {
            return Ok(());
        };

        let results = {
            let interfaces = self.shared.interfaces.read().await;
            association.negotiate(&alter.context_list, |uuid| {
                interfaces.get(uuid).map(|iface| iface.syntax)
            })
        };
        debug!("alter_context {}: {} results", call_id, results.len());

        let mut resp = BindAckPdu::alter_context_resp(call_id, association.assoc_group_id, results);
        resp.max_xmit_frag = association.max_xmit_frag;
        resp.max_recv_frag = association.max_recv_frag;
        self.send_pdu(Pdu::AlterContextResp(resp)).await
    }

    async fn handle_request(&mut self, request: RequestPdu) -> Result<()> {
        let call_id = request.header.call_id;
        trace!(
            "Received request fragment: call_id={}, opnum={}, stub_len={}",
            call_id,
            request.opnum,
            request.stub_data.len()
        );

        let Some(stub) = self.reassemble(&request).await? else {
            return Ok(());
        };

        let stats = Arc::clone(&self.shared.stats);
        stats.requests_received.fetch_add(1, Ordering::Relaxed);

        let resolved = self.association.as_ref().and_then(|association| {
            association.context(request.context_id).map(|presentation| {
                (
                    *presentation,
                    Arc::clone(association.handles()),
                    association.max_xmit_frag,
                )
            })
        });

        let Some((presentation, handles, max_xmit_frag)) = resolved else {
            debug!(
                "call {}: unknown presentation context {}",
                call_id, request.context_id
            );
            stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            let status = RpcError::UnknownContext(request.context_id).fault_status();
            return self
                .send_fault(&request.header, request.context_id, status)
                .await;
        };

        let interface = self
            .shared
            .interfaces
            .read()
            .await
            .get(&presentation.interface.uuid)
            .cloned();
        let Some(interface) = interface else {
            stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            let status = FaultStatus::UnkIf.into();
            return self
                .send_fault(&request.header, request.context_id, status)
                .await;
        };

        let call = CallContext {
            call_id,
            opnum: request.opnum,
            context_id: request.context_id,
            interface: presentation.interface,
            ndr: request.header.data_rep.ndr_context(),
            assoc_group_id: self.assoc_group_id,
            handles,
        };

        // Calls past the in-flight limit wait for a slot inside their task,
        // up to a bounded backlog, so cancels keep being read meanwhile
        let backlog = self.shared.config.max_concurrent_calls.max(1) * QUEUED_CALLS_PER_SLOT;
        if self.calls.len() >= backlog {
            debug!("call {}: {} calls already queued", call_id, self.calls.len());
            stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            let status = FaultStatus::ServerTooBusy.into();
            return self
                .send_fault(&request.header, request.context_id, status)
                .await;
        }

        let call_slots = Arc::clone(&self.call_slots);
        let tx = self.tx.clone();
        let data_rep = request.header.data_rep;
        let context_id = request.context_id;

        let abort = self.calls.spawn(async move {
            let Ok(_permit) = call_slots.acquire_owned().await else {
                return call_id;
            };
            let opnum = call.opnum;
            let frames = match interface.dispatch(call, stub).await {
                Ok(out) => {
                    stats.requests_processed.fetch_add(1, Ordering::Relaxed);
                    response_frames(call_id, context_id, data_rep, out, max_xmit_frag)
                }
                Err(e) => Err(e),
            };
            let frames = frames.unwrap_or_else(|e| {
                debug!("call {} opnum {} failed: {}", call_id, opnum, e);
                stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                stats.faults_sent.fetch_add(1, Ordering::Relaxed);
                fault_frames(call_id, context_id, data_rep, e.fault_status(), false)
            });
            // A closed channel means the connection is gone
            let _ = tx.send(frames).await;
            call_id
        });
        self.in_flight.insert(call_id, abort);
        Ok(())
    }

    /// Feed a request fragment to its call's assembler.
    ///
    /// Returns the full stub once the last fragment is in.
    async fn reassemble(&mut self, request: &RequestPdu) -> Result<Option<Bytes>> {
        let call_id = request.header.call_id;
        let flags = request.header.packet_flags;
        if flags.is_first_frag() && flags.is_last_frag() && !self.assemblers.contains_key(&call_id) {
            return Ok(Some(request.stub_data.clone()));
        }

        let max_calls = self.shared.config.max_concurrent_calls.max(1);
        if !self.assemblers.contains_key(&call_id) && self.assemblers.len() >= max_calls {
            warn!(
                "call {}: {} calls already being reassembled",
                call_id,
                self.assemblers.len()
            );
            self.shared.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            let status = FaultStatus::ServerTooBusy.into();
            self.send_fault(&request.header, request.context_id, status)
                .await?;
            return Ok(None);
        }

        let max_call_size = self.shared.config.max_call_size;
        let assembler = self
            .assemblers
            .entry(call_id)
            .or_insert_with(|| FragmentAssembler::new(call_id).with_max_size(max_call_size));
        let added = assembler.add_fragment(
            &request.header,
            &request.stub_data,
            request.context_id,
            Some(request.opnum),
            request.alloc_hint,
        );

        match added {
            Ok(None) => Ok(None),
            Ok(Some(stub)) => {
                self.assemblers.remove(&call_id);
                debug!("call {}: reassembled {} bytes", call_id, stub.len());
                Ok(Some(stub))
            }
            Err(e) => {
                self.assemblers.remove(&call_id);
                warn!("call {}: fragment rejected: {}", call_id, e);
                self.shared.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                let status = match &e {
                    RpcError::PduTooLarge { .. } => FaultStatus::ServerTooBusy.into(),
                    other => other.fault_status(),
                };
                self.send_fault(&request.header, request.context_id, status)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Abort the named call. Returns true when a running call was stopped.
    fn cancel(&mut self, call_id: u32) -> bool {
        self.assemblers.remove(&call_id);
        match self.in_flight.remove(&call_id) {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                self.shared
                    .stats
                    .calls_cancelled
                    .fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }
}

fn response_frames(
    call_id: u32,
    context_id: u16,
    data_rep: DataRepresentation,
    stub: Bytes,
    max_xmit_frag: u16,
) -> Result<Vec<Bytes>> {
    let mut response = ResponsePdu::new(call_id, stub);
    response.context_id = context_id;
    response.header.data_rep = data_rep;
    let fragments = FragmentGenerator::fragment_response(&response, max_xmit_frag);
    if fragments.len() > 1 {
        debug!("call {}: response in {} fragments", call_id, fragments.len());
    }
    fragments.iter().map(ResponsePdu::encode).collect()
}

fn fault_frames(
    call_id: u32,
    context_id: u16,
    data_rep: DataRepresentation,
    status: u32,
    did_not_execute: bool,
) -> Vec<Bytes> {
    let mut fault = FaultPdu::new(call_id, status);
    fault.context_id = context_id;
    fault.header.data_rep = data_rep;
    if did_not_execute {
        fault = fault.did_not_execute();
    }
    match fault.encode() {
        Ok(frame) => vec![frame],
        Err(e) => {
            warn!("call {}: failed to encode fault: {}", call_id, e);
            Vec::new()
        }
    }
}
