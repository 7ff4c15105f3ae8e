use thiserror::Error;

use tourney_core::TournamentStatus;

use crate::executor::ApiError;
use crate::wallet::agent::AgentError;

/// Failure of a user-intent action (join, enter, connect, switch network).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Please connect your wallet first")]
    WalletNotConnected,

    #[error("Tournament {0} not found")]
    TournamentNotFound(u64),

    #[error("Tournament Full")]
    TournamentFull,

    #[error("Registration Closed")]
    LobbyClosed,

    #[error("Tournament is {0} and cannot be joined")]
    NotJoinable(TournamentStatus),

    #[error("Invalid entry fee: {0}")]
    InvalidEntryFee(String),

    #[error("Wrong network: expected chain {expected}, connected to {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// Entry-fee contract refused the payment.
    #[error("{0}")]
    Contract(String),
}

/// Coarse classes used to decide how a failure is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout, unreachable or server error after retries.
    NetworkFailure,
    /// The backend or contract answered with a structured refusal.
    RemoteRejection,
    /// The user declined in the signing agent.
    UserRejection,
    ChainMismatch,
    /// Rejected client-side before any network call.
    Validation,
    /// Signing agent missing or misbehaving.
    AgentFailure,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(e) if e.is_network_failure() => ErrorKind::NetworkFailure,
            Self::Api(_) => ErrorKind::RemoteRejection,
            Self::Agent(AgentError::UserRejected) => ErrorKind::UserRejection,
            Self::Agent(AgentError::UnknownChain(_)) => ErrorKind::ChainMismatch,
            Self::Agent(_) => ErrorKind::AgentFailure,
            Self::ChainMismatch { .. } => ErrorKind::ChainMismatch,
            Self::Contract(_) => ErrorKind::RemoteRejection,
            Self::WalletNotConnected
            | Self::TournamentNotFound(_)
            | Self::TournamentFull
            | Self::LobbyClosed
            | Self::NotJoinable(_)
            | Self::InvalidEntryFee(_) => ErrorKind::Validation,
        }
    }
}
