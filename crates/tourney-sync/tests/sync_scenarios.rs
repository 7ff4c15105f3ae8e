// Integration tests for the sync layer.
//
// These drive the public API end-to-end against in-process fakes of the
// backend, the push server and the signing agent: joining under capacity
// limits, scoreboards fed by push events, degraded reads, and wallet
// sessions that survive a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use tourney_core::config::{ChainParams, WalletConfig};
use tourney_core::{Database, SessionStatus, Tournament, TournamentStatus};
use tourney_sync::executor::{
    ApiRequest, ApiResponse, HttpMethod, HttpTransport, TransportError,
};
use tourney_sync::live::{
    ClientCommand, LiveError, LiveEvent, PushConnection, PushConnector,
};
use tourney_sync::wallet::agent::{AgentError, AgentEvent, TransactionRequest};
use tourney_sync::{
    AgentEntryFeeContract, ApiError, JoinFlow, LiveChannel, RequestExecutor, RetryPolicy,
    SessionMachine, SigningAgent, SyncCoordinator, SyncError, TournamentBoard, TournamentService,
};

// ===========================================================================
// Fakes
// ===========================================================================

const PLAYER: &str = "0x5eed000000000000000000000000000000000042";

/// In-memory backend keyed by `METHOD path`. Unrouted requests are refused.
#[derive(Default)]
struct FakeBackend {
    routes: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn route(&self, method: &str, path: &str, body: Value) {
        self.routes
            .lock()
            .unwrap()
            .insert(format!("{method} {path}"), body);
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for FakeBackend {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        };
        let key = format!("{method} {}", request.path);
        self.calls.lock().unwrap().push(key.clone());
        match self.routes.lock().unwrap().get(&key) {
            Some(body) => Ok(ApiResponse {
                status: 200,
                body: body.to_string(),
            }),
            None => Err(TransportError::Connect("connection refused".into())),
        }
    }
}

/// Signing agent that approves everything.
struct ApprovingAgent {
    chain: AtomicU64,
    transactions: Mutex<Vec<TransactionRequest>>,
}

impl ApprovingAgent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            chain: AtomicU64::new(97),
            transactions: Mutex::new(Vec::new()),
        })
    }

    fn transaction_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }
}

#[async_trait]
impl SigningAgent for ApprovingAgent {
    async fn request_accounts(&self) -> Result<Vec<String>, AgentError> {
        Ok(vec![PLAYER.to_string()])
    }

    async fn chain_id(&self) -> Result<u64, AgentError> {
        Ok(self.chain.load(Ordering::SeqCst))
    }

    async fn balance(&self, _address: &str) -> Result<u128, AgentError> {
        Ok(250_000_000_000_000_000)
    }

    async fn sign_message(&self, _address: &str, message: &str) -> Result<String, AgentError> {
        Ok(format!("0xsig:{}", message.len()))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<String, AgentError> {
        self.transactions.lock().unwrap().push(tx);
        Ok("0xfeed".into())
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), AgentError> {
        self.chain.store(chain_id, Ordering::SeqCst);
        Ok(())
    }

    async fn add_chain(&self, _params: &ChainParams) -> Result<(), AgentError> {
        Ok(())
    }

    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<AgentEvent> {
        mpsc::unbounded_channel().1
    }
}

/// Push server whose event senders are handed to the test.
struct FakePushServer {
    sessions: mpsc::UnboundedSender<mpsc::UnboundedSender<LiveEvent>>,
    commands: Mutex<Vec<mpsc::UnboundedReceiver<ClientCommand>>>,
}

#[async_trait]
impl PushConnector for FakePushServer {
    async fn connect(&self) -> Result<PushConnection, LiveError> {
        let (outbound, commands) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        self.commands.lock().unwrap().push(commands);
        let _ = self.sessions.send(events);
        Ok(PushConnection { outbound, inbound })
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

fn service(backend: Arc<FakeBackend>) -> TournamentService {
    TournamentService::new(RequestExecutor::new(backend, RetryPolicy::default()))
}

fn lobby_tournament(id: u64, current: u32, max: u32) -> Tournament {
    let now = chrono::Utc::now().timestamp();
    Tournament {
        id,
        name: format!("Lobby {id}"),
        entry_fee: "50000000000000000".into(),
        max_players: max,
        current_players: current,
        start_time: now + 7_200,
        end_time: now + 10_800,
        lobby_close_time: now + 3_600,
        game_type: 1,
        status: TournamentStatus::Created,
        created_at: None,
        updated_at: None,
        winners: None,
    }
}

fn running_tournament(id: u64) -> Tournament {
    Tournament {
        status: TournamentStatus::Active,
        lobby_close_time: 1_000,
        start_time: 2_000,
        end_time: 4_000_000_000,
        ..lobby_tournament(id, 2, 10)
    }
}

fn list_body(tournaments: &[Tournament]) -> Value {
    json!({ "success": true, "data": tournaments })
}

fn temp_db_path(name: &str) -> String {
    let dir = std::env::temp_dir().join(format!(
        "tourney_sync_{}_{}",
        name,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("tourney.db");
    let _ = std::fs::remove_file(&path);
    path.to_string_lossy().into_owned()
}

// ===========================================================================
// Joining under capacity
// ===========================================================================

#[tokio::test]
async fn filling_the_last_seat_blocks_further_joins_locally() {
    let backend = Arc::new(FakeBackend::default());
    backend.route(
        "GET",
        "/api/tournaments",
        list_body(&[lobby_tournament(7, 9, 10)]),
    );
    backend.route("POST", "/api/wallet/connect", json!({ "success": true }));
    backend.route(
        "POST",
        "/api/tournaments/7/join",
        json!({
            "success": true,
            "message": "Joined",
            "data": {
                "tournamentId": 7,
                "playerAddress": PLAYER,
                "txHash": "0xfeed",
                "currentPlayers": 10,
                "maxPlayers": 10
            }
        }),
    );
    let api = service(backend.clone());

    let board = Arc::new(TournamentBoard::new(api.clone()));
    board.refresh().await;

    let agent = ApprovingAgent::new();
    let wallet = Arc::new(SessionMachine::new(
        agent.clone(),
        api,
        Arc::new(Database::open(":memory:").unwrap()),
        WalletConfig::default(),
    ));
    wallet.connect().await.unwrap();

    let contract = Arc::new(AgentEntryFeeContract::new(
        agent.clone(),
        WalletConfig::default().contract_address,
    ));
    let flow = JoinFlow::new(board.clone(), wallet, contract);

    // The backend's list keeps reporting 9/10 after the join lands.
    let receipt = flow.join(7).await.unwrap();
    assert_eq!(receipt.current_players, 10);
    assert_eq!(board.find(7).unwrap().current_players, 10);
    assert_eq!(agent.transaction_count(), 1);

    let calls_before = backend.calls();
    let err = flow.join(7).await.unwrap_err();
    assert_eq!(err, SyncError::TournamentFull);
    assert_eq!(err.to_string(), "Tournament Full");
    assert_eq!(backend.calls(), calls_before);
    assert_eq!(agent.transaction_count(), 1);
}

// ===========================================================================
// Live scoreboards
// ===========================================================================

#[tokio::test]
async fn unknown_player_score_leaves_scoreboard_unchanged() {
    let backend = Arc::new(FakeBackend::default());
    backend.route(
        "GET",
        "/api/tournaments",
        list_body(&[running_tournament(3)]),
    );
    backend.route(
        "GET",
        "/api/tournaments/3/players",
        json!({ "success": true, "data": { "players": [
            { "address": "0xaaa", "score": 5 },
            { "address": "0xbbb", "score": 8 }
        ]}}),
    );

    let (sessions_tx, mut sessions) = mpsc::unbounded_channel();
    let live = LiveChannel::new(
        Arc::new(FakePushServer {
            sessions: sessions_tx,
            commands: Mutex::new(Vec::new()),
        }),
        Duration::from_secs(1),
    );
    let board = Arc::new(TournamentBoard::new(service(backend)));
    let coordinator = SyncCoordinator::new(board, live, Duration::from_secs(30));

    coordinator.poll().await;
    let mut view = coordinator.subscribe_view(3).unwrap();
    view.wait_for(|v| !v.loading).await.unwrap();

    let server = sessions.recv().await.unwrap();
    let score = |address: &str, value: u64| {
        LiveEvent::ScoreUpdated(tourney_core::ScoreUpdate {
            tournament_id: Some(3),
            player_address: address.into(),
            score: value,
        })
    };
    server.send(score("0xzzz", 100)).unwrap();
    // A known player's update marks the point where the unknown one was handled.
    server.send(score("0xbbb", 9)).unwrap();

    let snapshot = view
        .wait_for(|v| v.players.iter().any(|p| p.score == 9))
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.players.len(), 2);
    assert!(snapshot.players.iter().all(|p| p.address != "0xzzz"));
    assert_eq!(snapshot.ranked_players()[0].address, "0xbbb");
}

// ===========================================================================
// Degraded reads and propagated writes
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn unreachable_backend_degrades_reads_and_fails_actions() {
    let api = service(Arc::new(FakeBackend::default()));

    assert!(api.list_all().await.is_empty());
    assert!(api.list_active().await.is_empty());
    assert_eq!(api.get_by_id(1).await, None);

    assert_eq!(api.get_status(1).await.unwrap_err(), ApiError::Unreachable);
    assert_eq!(api.get_players(1).await.unwrap_err(), ApiError::Unreachable);
    assert_eq!(api.join(1, PLAYER).await.unwrap_err(), ApiError::Unreachable);
    assert_eq!(api.enter(1, PLAYER).await.unwrap_err(), ApiError::Unreachable);
}

// ===========================================================================
// Wallet sessions across restarts
// ===========================================================================

#[tokio::test]
async fn wallet_session_survives_restart_until_disconnect() {
    let path = temp_db_path("restart");
    let backend = Arc::new(FakeBackend::default());
    backend.route("POST", "/api/wallet/connect", json!({ "success": true }));

    {
        let db = Arc::new(Database::open(&path).unwrap());
        let wallet = SessionMachine::new(
            ApprovingAgent::new(),
            service(backend.clone()),
            db,
            WalletConfig::default(),
        );
        let session = wallet.connect().await.unwrap();
        assert_eq!(session.balance.as_deref(), Some("0.25"));
    }

    let db = Arc::new(Database::open(&path).unwrap());
    let wallet = SessionMachine::new(
        ApprovingAgent::new(),
        service(backend),
        db.clone(),
        WalletConfig::default(),
    );
    let restored = wallet.restore();
    assert_eq!(restored.address.as_deref(), Some(PLAYER));
    assert_eq!(restored.status(), SessionStatus::Connected);
    assert_eq!(wallet.session().verified_address(), None);

    wallet.resume().await.unwrap().unwrap();
    assert_eq!(wallet.session().verified_address(), Some(PLAYER));

    wallet.disconnect();
    assert_eq!(wallet.session().status(), SessionStatus::Disconnected);
    assert_eq!(db.load_state("wallet").unwrap(), None);
}
