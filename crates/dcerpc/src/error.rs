//! Error types for DCE RPC

use crate::pdu::FaultStatus;
use ndr::NdrError;
use thiserror::Error;

/// RPC error types
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NDR error: {0}")]
    Ndr(#[from] NdrError),

    #[error("RPC version mismatch: {major}.{minor}")]
    RpcVersionMismatch { major: u8, minor: u8 },

    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("unknown presentation context: {0}")]
    UnknownContext(u16),

    #[error("operation unavailable: {0}")]
    OperationUnavailable(u16),

    #[error("invalid PDU: {0}")]
    InvalidPdu(String),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("call rejected: {0}")]
    CallRejected(String),

    #[error("bind rejected: reason {0}")]
    BindRejected(u16),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("call cancelled")]
    Cancelled,

    #[error("fault: status 0x{0:08x}")]
    Fault(u32),

    #[error("context handle mismatch")]
    ContextMismatch,

    #[error("call ID mismatch: expected {expected}, got {got}")]
    CallIdMismatch { expected: u32, got: u32 },

    #[error("PDU too large: {size} bytes exceeds maximum {max}")]
    PduTooLarge { size: usize, max: usize },

    #[error("fragment received out of order")]
    FragmentOutOfOrder,

    #[error("fragment assembly error: {0}")]
    FragmentAssemblyError(String),

    #[error("task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl RpcError {
    /// Status carried by the fault PDU sent in place of a response
    pub fn fault_status(&self) -> u32 {
        let status = match self {
            RpcError::Fault(status) => return *status,
            RpcError::Ndr(NdrError::UnknownOpnum(_)) => FaultStatus::OpRngError,
            RpcError::Ndr(_) => FaultStatus::BadStubData,
            RpcError::UnknownContext(_) | RpcError::InterfaceNotFound(_) => FaultStatus::UnkIf,
            RpcError::OperationUnavailable(_) => FaultStatus::OpRngError,
            RpcError::ContextMismatch => FaultStatus::ContextMismatch,
            RpcError::Cancelled => FaultStatus::FaultCancel,
            RpcError::RpcVersionMismatch { .. } => FaultStatus::RpcVersionMismatch,
            RpcError::InvalidPdu(_)
            | RpcError::InvalidMessageType(_)
            | RpcError::CallIdMismatch { .. }
            | RpcError::FragmentOutOfOrder
            | RpcError::FragmentAssemblyError(_) => FaultStatus::ProtoError,
            _ => FaultStatus::FaultUnspec,
        };
        status.into()
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_mapping() {
        let truncated = RpcError::Ndr(NdrError::TruncatedInput { needed: 4, have: 1 });
        assert_eq!(truncated.fault_status(), 0x0000_06f7);
        assert_eq!(RpcError::UnknownContext(3).fault_status(), 0x1c01_0003);
        assert_eq!(RpcError::OperationUnavailable(4).fault_status(), 0x1c01_0002);
        assert_eq!(RpcError::ContextMismatch.fault_status(), 0x1c00_001a);
        assert_eq!(RpcError::Fault(0xC000_0002).fault_status(), 0xC000_0002);
        assert_eq!(RpcError::Timeout.fault_status(), 0x1c00_0012);
    }
}
