//! SAMR error types

use ndr::NdrError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SamrError {
    #[error("invalid SID string: {0}")]
    InvalidSid(String),

    #[error("NDR error: {0}")]
    Ndr(#[from] NdrError),
}

pub type Result<T> = std::result::Result<T, SamrError>;
