// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error as DeriveError;

/// Everything a transactional primitive can report.
///
/// The variants fall into two disjoint groups. Conflicts are the engine's own
/// control flow: the current attempt is aborted and retried, and user code
/// only ever forwards them with `?`. Fatal variants are programmer errors or
/// exhausted retry limits and reach the caller of
/// [`Stm::read_write`](crate::Stm::read_write) unchanged.
#[derive(Debug, DeriveError, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction failed")]
    Failed,

    #[error("atom is locked")]
    LockPresent,

    #[error("object is stale")]
    StaleObject,

    #[error("payload size mismatch: atom holds {expected} bytes, value has {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("transaction gave up after {0} aborted attempts")]
    RetriesExceeded(usize),

    #[error("busy breaker reached its spin limit")]
    BreakerTripped,

    #[error("engine has already been initialized")]
    AlreadyInitialized,

    #[error("engine has not been initialized")]
    Uninitialized,

    #[error("write staged inside a read-only transaction")]
    WriteInReadOnly,
}

impl TxError {
    /// `true` for errors that abort the current attempt and trigger a retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TxError::Failed | TxError::LockPresent | TxError::StaleObject)
    }
}
