// Wallet session state machine.
//
// Disconnected -> Connecting -> Connected | Errored, with Connected refreshed
// in place by agent notifications and a periodic balance poll. Every state
// reached is persisted; on startup the last one is restored optimistically
// and flagged unverified until a live handshake confirms it.

pub mod agent;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tourney_core::config::WalletConfig;
use tourney_core::{Database, SessionStatus, WalletSession};

use crate::error::SyncError;
use crate::service::TournamentService;
use agent::{format_ether, AgentError, SigningAgent};

pub const BACKEND_SYNC_ADVISORY: &str = "Connected to wallet, but backend sync failed";

pub struct SessionMachine {
    agent: Arc<dyn SigningAgent>,
    api: TournamentService,
    db: Arc<Database>,
    config: WalletConfig,
    state: watch::Sender<WalletSession>,
    events_started: AtomicBool,
}

impl SessionMachine {
    pub fn new(
        agent: Arc<dyn SigningAgent>,
        api: TournamentService,
        db: Arc<Database>,
        config: WalletConfig,
    ) -> Self {
        let (state, _) = watch::channel(WalletSession::disconnected());
        Self {
            agent,
            api,
            db,
            config,
            state,
            events_started: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> WalletSession {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletSession> {
        self.state.subscribe()
    }

    pub fn agent(&self) -> &Arc<dyn SigningAgent> {
        &self.agent
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Publish the last persisted session as-is. The address may be stale
    /// until [`resume`](Self::resume) reconciles it.
    pub fn restore(&self) -> WalletSession {
        let restored = match self.db.load_session(&self.config.storage_key) {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to load persisted wallet session: {:#}", e);
                WalletSession::disconnected()
            }
        };
        if restored.address.is_some() {
            info!("Restored wallet session (unverified)");
        }
        self.state.send_replace(restored.clone());
        restored
    }

    /// Re-run the handshake when a restored session carries an address.
    pub async fn resume(&self) -> Option<Result<WalletSession, SyncError>> {
        if self.state.borrow().address.is_none() {
            return None;
        }
        Some(self.connect().await)
    }

    /// Full handshake: accounts, chain, balance, signed nonce, backend
    /// registration. Backend failure is recorded as an advisory only.
    pub async fn connect(&self) -> Result<WalletSession, SyncError> {
        self.state.send_modify(|s| {
            s.is_connecting = true;
            s.error = None;
        });

        match self.handshake().await {
            Ok(session) => {
                info!("Wallet connected: {}", session.address.as_deref().unwrap_or_default());
                self.persist(&session);
                self.state.send_replace(session.clone());
                Ok(session)
            }
            Err(e) => {
                warn!("Wallet connect failed: {}", e);
                let errored = WalletSession::errored(e.to_string());
                self.persist(&errored);
                self.state.send_replace(errored);
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<WalletSession, SyncError> {
        let address = self
            .agent
            .request_accounts()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Other("No accounts available".into()))?;
        let chain_id = self.agent.chain_id().await?;
        let balance = format_ether(self.agent.balance(&address).await?);

        let nonce = Uuid::new_v4().simple().to_string();
        let message = format!("{} {}", self.config.sign_in_prefix, nonce);
        let signature = self.agent.sign_message(&address, &message).await?;

        let advisory = match self.api.register_wallet(&address, &signature, &message).await {
            Ok(true) => None,
            Ok(false) => {
                warn!("Backend declined wallet registration");
                Some(BACKEND_SYNC_ADVISORY.to_string())
            }
            Err(e) => {
                warn!("Backend wallet registration failed: {}", e);
                Some(BACKEND_SYNC_ADVISORY.to_string())
            }
        };

        Ok(WalletSession::connected(address, chain_id, balance, advisory))
    }

    /// Re-read chain id and balance without re-signing. Applies only if the
    /// session still holds the same address once the reads complete.
    pub async fn refresh_balance(&self) -> Result<(), SyncError> {
        let address = {
            let current = self.state.borrow();
            if current.status() != SessionStatus::Connected {
                return Ok(());
            }
            match current.address.clone() {
                Some(address) => address,
                None => return Ok(()),
            }
        };

        let chain_id = self.agent.chain_id().await?;
        let balance = format_ether(self.agent.balance(&address).await?);

        let changed = self.state.send_if_modified(|s| {
            if s.is_connecting || s.address.as_deref() != Some(address.as_str()) {
                return false;
            }
            if s.chain_id == Some(chain_id) && s.balance.as_deref() == Some(balance.as_str()) {
                return false;
            }
            s.chain_id = Some(chain_id);
            s.balance = Some(balance.clone());
            true
        });
        if changed {
            debug!("Wallet balance refreshed: {} on chain {}", balance, chain_id);
            self.persist(&self.session());
        }
        Ok(())
    }

    /// Forget the session here and in storage.
    pub fn disconnect(&self) {
        self.state.send_replace(WalletSession::disconnected());
        if let Err(e) = self.db.clear_state(&self.config.storage_key) {
            warn!("Failed to clear persisted wallet session: {:#}", e);
        }
        info!("Wallet disconnected");
    }

    /// Connected to a chain other than the configured target.
    pub fn needs_network_switch(&self) -> bool {
        self.state
            .borrow()
            .chain_id
            .is_some_and(|id| id != self.config.target_chain.chain_id)
    }

    /// Ask the agent to switch to the target chain, adding it first when the
    /// agent does not know it. A failed add is recorded as an advisory.
    pub async fn switch_network(&self) -> Result<(), SyncError> {
        let target = &self.config.target_chain;
        match self.agent.switch_chain(target.chain_id).await {
            Ok(()) => {}
            Err(AgentError::UnknownChain(_)) => {
                info!("Adding {} to signing agent", target.chain_name);
                if let Err(e) = self.agent.add_chain(target).await {
                    warn!("Failed to add {}: {}", target.chain_name, e);
                    self.record_advisory(format!("Failed to add {}", target.chain_name));
                    return Ok(());
                }
            }
            Err(e) => return Err(e.into()),
        }
        self.refresh_balance().await
    }

    fn record_advisory(&self, message: String) {
        self.state.send_modify(|s| s.error = Some(message));
        self.persist(&self.session());
    }

    fn persist(&self, session: &WalletSession) {
        if let Err(e) = self.db.save_session(&self.config.storage_key, session) {
            warn!("Failed to persist wallet session: {:#}", e);
        }
    }

    /// Subscribe to agent notifications (once per process) and start the
    /// periodic balance refresh. Stops when the machine is dropped.
    pub fn start(self: &Arc<Self>) {
        if self.events_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut events = self.agent.subscribe_events();
        let machine = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.balance_refresh_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut events_open = true;

            loop {
                tokio::select! {
                    event = events.recv(), if events_open => {
                        let Some(event) = event else {
                            events_open = false;
                            continue;
                        };
                        let Some(machine) = machine.upgrade() else { break };
                        info!("Signing agent reported {:?}; reconnecting", event);
                        let _ = machine.connect().await;
                    }
                    _ = ticker.tick() => {
                        let Some(machine) = machine.upgrade() else { break };
                        if let Err(e) = machine.refresh_balance().await {
                            debug!("Balance refresh failed: {}", e);
                        }
                    }
                }
            }
        });
    }
}
