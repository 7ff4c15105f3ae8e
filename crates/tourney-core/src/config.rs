// Configuration loading and parsing (config/tourney.toml).
//
// Every section is optional; missing keys fall back to the defaults the
// client has always used (5s request timeout, 3 retries 1s apart, 30s list
// refresh, 10s balance refresh, BSC Testnet as the target chain).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides `api.base_url`.
pub const API_URL_ENV: &str = "TOURNEY_API_URL";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("could not determine a data directory for the session database")]
    NoDataDir,
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub live: LiveConfig,
    pub wallet: WalletConfig,
    pub sync: SyncConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Per-attempt timeout.
    pub request_timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Constant delay between attempts.
    pub retry_delay_ms: u64,
    /// Header sent with every request so tunnelling proxies skip their
    /// interstitial page.
    pub bypass_header: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            bypass_header: "ngrok-skip-browser-warning".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Constant delay before the push connection is re-established.
    pub reconnect_delay_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub balance_refresh_secs: u64,
    /// Key the session is persisted under.
    pub storage_key: String,
    /// Text placed before the nonce in the sign-in message.
    pub sign_in_prefix: String,
    /// Tournament contract that receives entry fees.
    pub contract_address: String,
    pub target_chain: ChainParams,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            balance_refresh_secs: 10,
            storage_key: "wallet".to_string(),
            sign_in_prefix: "Sign this message to connect to CryptoTournaments:".to_string(),
            contract_address: "0x359d14410282EEAFcc9CD92c2CDbAB9386348a35".to_string(),
            target_chain: ChainParams::default(),
        }
    }
}

/// Parameters handed to the signing agent when the target chain has to be
/// added before it can be switched to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub chain_id: u64,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl ChainParams {
    /// `0x`-prefixed hex form the agent expects.
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            chain_id: 97,
            chain_name: "BSC Testnet".to_string(),
            native_currency: NativeCurrency::default(),
            rpc_urls: vec!["https://data-seed-prebsc-1-s1.binance.org:8545".to_string()],
            block_explorer_urls: vec!["https://testnet.bscscan.com".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for NativeCurrency {
    fn default() -> Self {
        Self {
            name: "BNB".to_string(),
            symbol: "tBNB".to_string(),
            decimals: 18,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval of the full tournament-list refetch.
    pub list_refresh_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            list_refresh_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file for the persisted session. `None` uses the platform data
    /// directory; `":memory:"` keeps nothing across runs.
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load `config/tourney.toml` relative to `base_dir`. A missing file yields
/// the defaults; a present one must parse and validate.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("tourney.toml");

    let config = if path.exists() {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadError {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.clone(),
            source,
        })?
    } else {
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

/// Load relative to the working directory and apply environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::ReadError {
        path: PathBuf::from("."),
        source,
    })?;
    let mut config = load_config_from(&cwd)?;
    if let Ok(url) = std::env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            config.api.base_url = url;
            validate(&config)?;
        }
    }
    Ok(config)
}

impl Config {
    /// Path of the session database, resolving the platform default.
    pub fn db_path(&self) -> Result<String, ConfigError> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        let dirs = directories::ProjectDirs::from("com", "tourney", "tourney")
            .ok_or(ConfigError::NoDataDir)?;
        let dir = dirs.data_dir();
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::ReadError {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(dir.join("tourney.db").to_string_lossy().into_owned())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let base_url = config.api.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::ValidationError {
            field: "api.base_url".into(),
            message: format!("must start with http:// or https://, got {base_url:?}"),
        });
    }

    let positive: &[(&str, u64)] = &[
        ("api.request_timeout_ms", config.api.request_timeout_ms),
        ("live.reconnect_delay_ms", config.live.reconnect_delay_ms),
        ("wallet.balance_refresh_secs", config.wallet.balance_refresh_secs),
        ("sync.list_refresh_secs", config.sync.list_refresh_secs),
    ];
    for (name, val) in positive {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be greater than 0".into(),
            });
        }
    }

    if config.wallet.storage_key.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "wallet.storage_key".into(),
            message: "must not be empty".into(),
        });
    }

    let contract = &config.wallet.contract_address;
    if !(contract.len() == 42 && contract.starts_with("0x")) {
        return Err(ConfigError::ValidationError {
            field: "wallet.contract_address".into(),
            message: format!("must be a 0x-prefixed 20-byte address, got {contract:?}"),
        });
    }

    if config.wallet.target_chain.rpc_urls.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "wallet.target_chain.rpc_urls".into(),
            message: "at least one RPC URL is required".into(),
        });
    }

    Ok(())
}
