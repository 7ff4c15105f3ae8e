// Contract with the external signing agent (browser wallet, hardware signer,
// or a test double). The agent owns the keys; the client only asks.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;

use tourney_core::config::ChainParams;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("No signing agent installed")]
    NotInstalled,

    #[error("User rejected the request")]
    UserRejected,

    /// The agent has never heard of the chain it was asked to switch to.
    #[error("chain {0} is not known to the signing agent")]
    UnknownChain(u64),

    #[error("{0}")]
    Other(String),
}

/// Notifications the agent emits on its own initiative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: String,
    pub to: String,
    /// Wei, `0x`-prefixed hex.
    pub value: Option<String>,
    /// ABI-encoded calldata, `0x`-prefixed hex.
    pub data: Option<String>,
}

#[async_trait]
pub trait SigningAgent: Send + Sync {
    /// Ask the user to expose accounts. The first entry is the active one.
    async fn request_accounts(&self) -> Result<Vec<String>, AgentError>;

    async fn chain_id(&self) -> Result<u64, AgentError>;

    /// Native balance of `address` in wei.
    async fn balance(&self, address: &str) -> Result<u128, AgentError>;

    async fn sign_message(&self, address: &str, message: &str) -> Result<String, AgentError>;

    /// Submit a transaction and return its hash.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<String, AgentError>;

    /// Fails with [`AgentError::UnknownChain`] when the chain must be added first.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), AgentError>;

    async fn add_chain(&self, params: &ChainParams) -> Result<(), AgentError>;

    /// Stream of account/chain notifications. Callers subscribe once.
    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<AgentEvent>;
}

/// Wei to an ether-denominated decimal string: `1500000000000000000` -> `"1.5"`.
pub fn format_ether(wei: u128) -> String {
    let formatted = i128::try_from(wei)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, 18).ok())
        .map(|d| d.normalize().to_string());

    match formatted {
        Some(s) if s.contains('.') => s,
        Some(s) => format!("{s}.0"),
        // Beyond Decimal's 96-bit mantissa; fall back to integer division.
        None => {
            let unit = 10u128.pow(18);
            let whole = wei / unit;
            let frac = format!("{:018}", wei % unit);
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                format!("{whole}.0")
            } else {
                format!("{whole}.{frac}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_wei_as_ether() {
        assert_eq!(format_ether(0), "0.0");
        assert_eq!(format_ether(1_000_000_000_000_000_000), "1.0");
        assert_eq!(format_ether(1_500_000_000_000_000_000), "1.5");
        assert_eq!(format_ether(1), "0.000000000000000001");
        assert_eq!(format_ether(123_450_000_000_000_000_000), "123.45");
    }

    #[test]
    fn formats_huge_balances() {
        assert_eq!(format_ether(u128::MAX / 10u128.pow(18) * 10u128.pow(18)), "340282366920938463463.0");
    }
}
