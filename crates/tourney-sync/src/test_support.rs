// Hand-written fakes shared by the unit tests in this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use tourney_core::config::ChainParams;
use tourney_core::{Tournament, TournamentStatus};

use crate::executor::{
    ApiRequest, ApiResponse, HttpMethod, HttpTransport, RequestExecutor, RetryPolicy,
    TransportError,
};
use crate::service::TournamentService;
use crate::wallet::agent::{AgentError, AgentEvent, SigningAgent, TransactionRequest};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Routes `METHOD path` to a canned response; anything else is refused.
/// Routes can be swapped while a test runs.
#[derive(Default)]
pub struct RoutedTransport {
    routes: Mutex<HashMap<String, (u16, String)>>,
    hits: Mutex<Vec<String>>,
}

impl RoutedTransport {
    pub fn with(self, method: &str, path: &str, status: u16, body: Value) -> Self {
        self.route(method, path, status, body);
        self
    }

    pub fn route(&self, method: &str, path: &str, status: u16, body: Value) {
        self.routes
            .lock()
            .unwrap()
            .insert(format!("{method} {path}"), (status, body.to_string()));
    }

    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for RoutedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        };
        let key = format!("{method} {}", request.path);
        self.hits.lock().unwrap().push(key.clone());
        let route = self.routes.lock().unwrap().get(&key).cloned();
        match route {
            Some((status, body)) => Ok(ApiResponse { status, body }),
            None => Err(TransportError::Connect("connection refused".into())),
        }
    }
}

pub fn service(transport: Arc<RoutedTransport>) -> TournamentService {
    TournamentService::new(RequestExecutor::new(transport, RetryPolicy::default()))
}

pub fn tournament(id: u64, status: TournamentStatus) -> Tournament {
    Tournament {
        id,
        name: format!("Cup {id}"),
        entry_fee: "10000000000000000".into(),
        max_players: 10,
        current_players: 3,
        start_time: 2_000_000_000,
        end_time: 2_000_003_600,
        lobby_close_time: 1_999_999_000,
        game_type: 0,
        status,
        created_at: None,
        updated_at: None,
        winners: None,
    }
}

pub fn envelope(data: Value) -> Value {
    json!({ "success": true, "data": data })
}

// ---------------------------------------------------------------------------
// Signing agent
// ---------------------------------------------------------------------------

pub const ALICE: &str = "0xa11ce00000000000000000000000000000000001";

pub struct FakeAgent {
    pub accounts: Mutex<Result<Vec<String>, AgentError>>,
    pub chain: AtomicU64,
    pub balance_wei: Mutex<u128>,
    pub sign_result: Mutex<Result<String, AgentError>>,
    pub switch_result: Mutex<Result<(), AgentError>>,
    pub add_result: Mutex<Result<(), AgentError>>,
    pub send_result: Mutex<Result<String, AgentError>>,
    pub sent: Mutex<Vec<TransactionRequest>>,
    pub added: AtomicUsize,
    pub subscriptions: AtomicUsize,
    pub events: Mutex<Option<mpsc::UnboundedSender<AgentEvent>>>,
}

impl FakeAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(Ok(vec![ALICE.to_string()])),
            chain: AtomicU64::new(97),
            balance_wei: Mutex::new(1_500_000_000_000_000_000),
            sign_result: Mutex::new(Ok("0xsigned".into())),
            switch_result: Mutex::new(Ok(())),
            add_result: Mutex::new(Ok(())),
            send_result: Mutex::new(Ok("0xtxhash".into())),
            sent: Mutex::new(Vec::new()),
            added: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            events: Mutex::new(None),
        })
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl SigningAgent for FakeAgent {
    async fn request_accounts(&self) -> Result<Vec<String>, AgentError> {
        tokio::task::yield_now().await;
        self.accounts.lock().unwrap().clone()
    }

    async fn chain_id(&self) -> Result<u64, AgentError> {
        tokio::task::yield_now().await;
        Ok(self.chain.load(Ordering::SeqCst))
    }

    async fn balance(&self, _address: &str) -> Result<u128, AgentError> {
        tokio::task::yield_now().await;
        Ok(*self.balance_wei.lock().unwrap())
    }

    async fn sign_message(&self, _address: &str, _message: &str) -> Result<String, AgentError> {
        tokio::task::yield_now().await;
        self.sign_result.lock().unwrap().clone()
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<String, AgentError> {
        self.sent.lock().unwrap().push(tx);
        self.send_result.lock().unwrap().clone()
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), AgentError> {
        let result = self.switch_result.lock().unwrap().clone();
        if result.is_ok() {
            self.chain.store(chain_id, Ordering::SeqCst);
        }
        result
    }

    async fn add_chain(&self, params: &ChainParams) -> Result<(), AgentError> {
        self.added.fetch_add(1, Ordering::SeqCst);
        let result = self.add_result.lock().unwrap().clone();
        if result.is_ok() {
            self.chain.store(params.chain_id, Ordering::SeqCst);
        }
        result
    }

    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<AgentEvent> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        rx
    }
}
