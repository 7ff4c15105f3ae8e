// Client-side synchronization for the tournament backend: resilient REST
// calls, the shared push channel, the wallet session, and the coordinator
// that keeps cached tournaments and scoreboards converging.

pub mod coordinator;
pub mod error;
pub mod executor;
pub mod live;
pub mod service;
pub mod wallet;

#[cfg(test)]
mod test_support;

pub use coordinator::board::TournamentBoard;
pub use coordinator::join::{AgentEntryFeeContract, EntryFeeContract, JoinFlow};
pub use coordinator::watch::{TournamentView, TournamentWatch};
pub use coordinator::SyncCoordinator;
pub use error::{ErrorKind, SyncError};
pub use executor::{ApiError, ReqwestTransport, RequestExecutor, RetryPolicy};
pub use live::socket::WebSocketConnector;
pub use live::{ChannelStatus, LiveChannel, LiveEvent};
pub use service::TournamentService;
pub use wallet::agent::{AgentError, SigningAgent};
pub use wallet::SessionMachine;
