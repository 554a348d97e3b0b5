use std::io;
use std::sync::mpsc;

use thiserror::Error;

use crate::prep::DataKind;

pub type MpcResult<T> = Result<T, MpcError>;

#[derive(Debug, Error)]
pub enum MpcError {
    #[error("public value {value} does not fit into {n_bits} bits")]
    OutOfRange { value: i128, n_bits: usize },
    #[error("MAC check failed")]
    MacCheckFailed,
    #[error("MAC failure: redundant reconstruction disagrees with the minimal one")]
    ReconstructionMismatch,
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("purging preprocessed data failed; no security guarantee remains")]
    UnrecoverableSecurityFailure,
    #[error("broadcast check failed")]
    Broadcast,
    #[error("commitment does not open")]
    Commitment,
    #[error("sacrifice check failed")]
    Sacrifice,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("receive failed; the sender was dropped")]
    Receive,
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("not enough preprocessed {kind:?}: requested {requested}, available {available}")]
    InsufficientPreprocessing { kind: DataKind, requested: usize, available: usize },
    #[error("preprocessed material was purged")]
    Purged,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("worker thread {0} panicked")]
    Panicked(usize),
}

impl MpcError {
    /// Returns false for errors that cannot stem from a deviating party or a tampered transport.
    pub fn is_security_relevant(&self) -> bool {
        !matches!(
            self,
            MpcError::OutOfRange { .. }
                | MpcError::NotImplemented(_)
                | MpcError::InvalidParameters(_)
                | MpcError::Config(_)
        )
    }
}

impl From<oneshot::RecvError> for MpcError {
    fn from(_err: oneshot::RecvError) -> Self {
        Self::Receive
    }
}

impl From<mpsc::RecvError> for MpcError {
    fn from(_err: mpsc::RecvError) -> Self {
        Self::Receive
    }
}
