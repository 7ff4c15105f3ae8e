// Shared data model, configuration and persistence for the tournament client.

pub mod config;
pub mod db;
pub mod model;

pub use config::Config;
pub use db::Database;
pub use model::{
    short_address, InvariantError, JoinReceipt, Player, ScoreUpdate, SessionStatus, Tournament,
    TournamentPlayers, TournamentStatus, WalletSession,
};
