// Tournament watcher entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout carries the board)
// 2. Load config
// 3. Report the persisted wallet session, if any
// 4. Build the REST service and the shared push channel
// 5. Spawn the sync coordinator
// 6. Print the board whenever it changes, until Ctrl+C
// 7. Unmount watches and exit

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use tourney_core::config;
use tourney_core::{short_address, Database, SessionStatus, Tournament};
use tourney_sync::wallet::agent::format_ether;
use tourney_sync::{
    LiveChannel, ReqwestTransport, RequestExecutor, RetryPolicy, SyncCoordinator,
    TournamentBoard, TournamentService, WebSocketConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Tournament watcher starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: backend={}, refresh every {}s",
        config.api.base_url, config.sync.list_refresh_secs
    );

    let db_path = config.db_path().context("failed to resolve database path")?;
    let db = Database::open(&db_path).context("failed to open database")?;
    info!("Database opened at {}", db_path);
    report_wallet(&db, &config.wallet.storage_key);

    let transport = ReqwestTransport::new(&config.api).context("failed to build HTTP client")?;
    let executor = RequestExecutor::new(Arc::new(transport), RetryPolicy::from(&config.api));
    let api = TournamentService::new(executor);

    let live = LiveChannel::new(
        Arc::new(WebSocketConnector::new(&config.api)),
        Duration::from_millis(config.live.reconnect_delay_ms),
    );
    let board = Arc::new(TournamentBoard::new(api));
    let coordinator = Arc::new(SyncCoordinator::new(
        board.clone(),
        live.clone(),
        Duration::from_secs(config.sync.list_refresh_secs),
    ));

    let sync_handle = tokio::spawn(coordinator.clone().run());

    let mut updates = board.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_board(&snapshot, &coordinator);
            }
            _ = &mut ctrl_c => {
                info!("Ctrl+C received");
                break;
            }
        }
    }

    sync_handle.abort();
    coordinator.shutdown();
    info!("Live channel status at exit: {:?}", live.status());
    info!("Tournament watcher shut down cleanly");
    Ok(())
}

fn report_wallet(db: &Database, key: &str) {
    match db.load_session(key) {
        Ok(session) if session.status() == SessionStatus::Connected => {
            let address = session.address.as_deref().unwrap_or_default();
            println!(
                "Last wallet: {} on chain {} ({} BNB)",
                short_address(address),
                session.chain_id.unwrap_or_default(),
                session.balance.as_deref().unwrap_or("?")
            );
        }
        Ok(_) => println!("No wallet session on record"),
        Err(e) => warn!("Failed to read wallet session: {:#}", e),
    }
}

fn print_board(tournaments: &[Tournament], coordinator: &SyncCoordinator) {
    println!("--- {} tournaments ---", tournaments.len());
    for t in tournaments {
        let fee = t
            .entry_fee
            .parse::<u128>()
            .map(format_ether)
            .unwrap_or_else(|_| t.entry_fee.clone());
        println!(
            "#{:<4} {:<24} {:<10} {:>3}/{:<3} fee {}",
            t.id,
            t.name,
            t.status.to_string(),
            t.current_players,
            t.max_players,
            fee
        );

        if let Some(winners) = t.winners.as_ref().filter(|w| !w.is_empty()) {
            let names: Vec<String> = winners.iter().map(|w| short_address(w)).collect();
            println!("      winners: {}", names.join(", "));
        }

        let Some(view) = coordinator.view(t.id) else {
            continue;
        };
        if view.loading {
            println!("      scoreboard loading...");
            continue;
        }
        for (rank, player) in view.ranked_players().iter().take(5).enumerate() {
            println!("      {}. {:<16} {}", rank + 1, player.display_name(), player.score);
        }
    }
}

/// Initialize tracing to log to a file so stdout stays readable.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("tourney-watch.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tourney_watch=info,tourney_sync=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
