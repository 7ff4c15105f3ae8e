// Joining and entering tournaments.
//
// Client-side gates run first and fail without touching the network. Only
// then is the entry fee paid on-chain, the backend told, and the cached
// tournament replaced with the backend's player count.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use tourney_core::JoinReceipt;

use crate::error::SyncError;
use crate::wallet::agent::{AgentError, SigningAgent, TransactionRequest};
use crate::wallet::SessionMachine;

use super::board::TournamentBoard;

/// `keccak256("joinTournament(uint256)")[..4]`.
const JOIN_TOURNAMENT_SELECTOR: &str = "d115cac6";
/// `keccak256("registerPlayer(string)")[..4]`.
const REGISTER_PLAYER_SELECTOR: &str = "b3446f85";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
}

/// The on-chain side of joining. Opaque to the sync layer.
#[async_trait]
pub trait EntryFeeContract: Send + Sync {
    async fn pay_entry_fee(
        &self,
        from: &str,
        tournament_id: u64,
        entry_fee_wei: u128,
    ) -> Result<TxReceipt, SyncError>;

    async fn register_player(&self, from: &str, username: &str) -> Result<TxReceipt, SyncError>;
}

/// Calldata for `joinTournament(uint256)`.
pub fn join_tournament_calldata(tournament_id: u64) -> String {
    format!("0x{JOIN_TOURNAMENT_SELECTOR}{tournament_id:064x}")
}

/// Calldata for `registerPlayer(string)`: head offset, length, padded bytes.
pub fn register_player_calldata(username: &str) -> String {
    let bytes = username.as_bytes();
    let mut data = format!("0x{REGISTER_PLAYER_SELECTOR}{:064x}{:064x}", 32, bytes.len());
    for b in bytes {
        data.push_str(&format!("{b:02x}"));
    }
    let padding = (32 - bytes.len() % 32) % 32;
    data.push_str(&"00".repeat(padding));
    data
}

/// Translate a contract revert into the message shown to the user.
pub fn revert_message(raw: &str) -> Option<&'static str> {
    const REVERTS: &[(&str, &str)] = &[
        ("Tournament not open for joining", "Tournament is not open for joining"),
        ("Registration period ended", "Registration period has ended"),
        ("Tournament is full", "Tournament is full"),
        ("Incorrect ETH amount sent", "Incorrect entry fee amount"),
        ("Already joined this tournament", "You have already joined this tournament"),
        ("onlyRegisteredPlayer", "You must register as a player first"),
    ];
    REVERTS
        .iter()
        .find(|(needle, _)| raw.contains(needle))
        .map(|(_, message)| *message)
}

fn map_agent_error(e: AgentError) -> SyncError {
    match e {
        AgentError::Other(raw) => match revert_message(&raw) {
            Some(message) => SyncError::Contract(message.to_string()),
            None => SyncError::Agent(AgentError::Other(raw)),
        },
        other => SyncError::Agent(other),
    }
}

/// Entry-fee contract driven through the signing agent's `send_transaction`.
pub struct AgentEntryFeeContract {
    agent: Arc<dyn SigningAgent>,
    contract_address: String,
}

impl AgentEntryFeeContract {
    pub fn new(agent: Arc<dyn SigningAgent>, contract_address: impl Into<String>) -> Self {
        Self {
            agent,
            contract_address: contract_address.into(),
        }
    }
}

#[async_trait]
impl EntryFeeContract for AgentEntryFeeContract {
    async fn pay_entry_fee(
        &self,
        from: &str,
        tournament_id: u64,
        entry_fee_wei: u128,
    ) -> Result<TxReceipt, SyncError> {
        let tx = TransactionRequest {
            from: from.to_string(),
            to: self.contract_address.clone(),
            value: Some(format!("{entry_fee_wei:#x}")),
            data: Some(join_tournament_calldata(tournament_id)),
        };
        let tx_hash = self.agent.send_transaction(tx).await.map_err(map_agent_error)?;
        info!("Entry fee for tournament {} sent: {}", tournament_id, tx_hash);
        Ok(TxReceipt { tx_hash })
    }

    async fn register_player(&self, from: &str, username: &str) -> Result<TxReceipt, SyncError> {
        let tx = TransactionRequest {
            from: from.to_string(),
            to: self.contract_address.clone(),
            value: None,
            data: Some(register_player_calldata(username)),
        };
        let tx_hash = self.agent.send_transaction(tx).await.map_err(map_agent_error)?;
        info!("Player registration sent: {}", tx_hash);
        Ok(TxReceipt { tx_hash })
    }
}

pub struct JoinFlow {
    board: Arc<TournamentBoard>,
    wallet: Arc<SessionMachine>,
    contract: Arc<dyn EntryFeeContract>,
}

impl JoinFlow {
    pub fn new(
        board: Arc<TournamentBoard>,
        wallet: Arc<SessionMachine>,
        contract: Arc<dyn EntryFeeContract>,
    ) -> Self {
        Self {
            board,
            wallet,
            contract,
        }
    }

    fn verified_address(&self) -> Result<String, SyncError> {
        self.wallet
            .session()
            .verified_address()
            .map(str::to_string)
            .ok_or(SyncError::WalletNotConnected)
    }

    /// Pay the entry fee and register with the backend. One call is one
    /// attempt; nothing here retries.
    pub async fn join(&self, tournament_id: u64) -> Result<JoinReceipt, SyncError> {
        let address = self.verified_address()?;
        let tournament = self
            .board
            .find(tournament_id)
            .ok_or(SyncError::TournamentNotFound(tournament_id))?;

        if tournament.status.is_terminal() {
            return Err(SyncError::NotJoinable(tournament.status));
        }
        if !tournament.is_lobby_open() {
            return Err(SyncError::LobbyClosed);
        }
        if tournament.is_full() {
            return Err(SyncError::TournamentFull);
        }

        let session = self.wallet.session();
        let target = self.wallet.config().target_chain.chain_id;
        if let Some(actual) = session.chain_id.filter(|id| *id != target) {
            return Err(SyncError::ChainMismatch {
                expected: target,
                actual,
            });
        }

        let fee = tournament
            .entry_fee
            .trim()
            .parse::<u128>()
            .map_err(|_| SyncError::InvalidEntryFee(tournament.entry_fee.clone()))?;

        self.contract
            .pay_entry_fee(&address, tournament_id, fee)
            .await?;

        let receipt = self.board.api().join(tournament_id, &address).await?;
        info!(
            "Joined tournament {} ({}/{} players)",
            tournament_id, receipt.current_players, receipt.max_players
        );

        if let Some(current) = self.board.find(tournament_id) {
            match current.with_player_count(receipt.current_players, receipt.max_players) {
                Some(next) => {
                    self.board.replace(next);
                }
                None => warn!(
                    "Ignoring player count {}/{} for tournament {}",
                    receipt.current_players, receipt.max_players, tournament_id
                ),
            }
        }
        self.board.refresh().await;

        Ok(receipt)
    }

    /// Enter a joined tournament's game. Failures propagate.
    pub async fn enter(&self, tournament_id: u64) -> Result<bool, SyncError> {
        let address = self.verified_address()?;
        let entered = self.board.api().enter(tournament_id, &address).await?;
        Ok(entered)
    }

    /// Register the connected address as a player on the contract.
    pub async fn register_player(&self, username: &str) -> Result<TxReceipt, SyncError> {
        let address = self.verified_address()?;
        self.contract.register_player(&address, username).await
    }
}
