// Typed wrappers over the backend's tournament and wallet endpoints.
//
// List-style reads degrade to empty results when the backend is unavailable.
// Single-entity reads the caller acts on and every write propagate failures.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use tourney_core::{JoinReceipt, Tournament, TournamentPlayers};

use crate::executor::{ApiError, ApiRequest, RequestExecutor};

/// `{ success, message?, data? }` envelope every endpoint answers with.
/// Actions only count as done when `success` is explicitly true.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn succeeded(&self) -> bool {
        self.success == Some(true)
    }

    fn into_data(self, fallback: &str) -> Result<T, ApiError> {
        if !self.succeeded() {
            return Err(ApiError::Remote(
                self.message.unwrap_or_else(|| fallback.to_string()),
            ));
        }
        self.data
            .ok_or_else(|| ApiError::InvalidResponse("response carried no data".into()))
    }
}

/// Decode an array of tournaments, dropping entries that fail to parse or
/// violate capacity/timing invariants.
fn normalize_tournaments(data: Option<Value>) -> Vec<Tournament> {
    let Some(Value::Array(items)) = data else {
        if data.is_some() {
            warn!("Tournament list payload is not an array; treating as empty");
        }
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Tournament>(item) {
            Ok(t) => match t.validate() {
                Ok(()) => Some(t),
                Err(e) => {
                    warn!("Dropping tournament record: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Dropping undecodable tournament record: {}", e);
                None
            }
        })
        .collect()
}

fn tournament_path(id: u64, suffix: &str) -> String {
    format!("/api/tournaments/{id}{suffix}")
}

#[derive(Clone)]
pub struct TournamentService {
    executor: RequestExecutor,
}

impl TournamentService {
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<Envelope<T>, ApiError> {
        self.executor.execute(&request).await
    }

    async fn list(&self, path: &str) -> Vec<Tournament> {
        match self.fetch::<Value>(ApiRequest::get(path)).await {
            // Lists only refuse on an explicit `success: false`.
            Ok(envelope) if envelope.success != Some(false) => normalize_tournaments(envelope.data),
            Ok(envelope) => {
                warn!(
                    "Tournament list {} refused: {}",
                    path,
                    envelope.message.unwrap_or_default()
                );
                Vec::new()
            }
            Err(e) => {
                warn!("Tournament list {} unavailable, showing none: {}", path, e);
                Vec::new()
            }
        }
    }

    /// `GET /api/tournaments`. Empty on any failure.
    pub async fn list_all(&self) -> Vec<Tournament> {
        self.list("/api/tournaments").await
    }

    /// `GET /api/tournaments/active`. Empty on any failure.
    pub async fn list_active(&self) -> Vec<Tournament> {
        self.list("/api/tournaments/active").await
    }

    /// `GET /api/tournaments/{id}`. `None` when absent or unreachable.
    pub async fn get_by_id(&self, id: u64) -> Option<Tournament> {
        match self.fetch_tournament(tournament_path(id, "")).await {
            Ok(t) => Some(t),
            Err(e) => {
                debug!("Tournament {} unavailable: {}", id, e);
                None
            }
        }
    }

    /// `GET /api/tournaments/{id}/status`.
    pub async fn get_status(&self, id: u64) -> Result<Tournament, ApiError> {
        self.fetch_tournament(tournament_path(id, "/status")).await
    }

    async fn fetch_tournament(&self, path: String) -> Result<Tournament, ApiError> {
        let tournament: Tournament = self
            .fetch(ApiRequest::get(path))
            .await?
            .into_data("Failed to fetch tournament")?;
        tournament
            .validate()
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(tournament)
    }

    /// `GET /api/tournaments/{id}/players`.
    pub async fn get_players(&self, id: u64) -> Result<TournamentPlayers, ApiError> {
        self.fetch(ApiRequest::get(tournament_path(id, "/players")))
            .await?
            .into_data("Failed to fetch players")
    }

    /// `POST /api/tournaments/{id}/join`. One call is one user intent.
    pub async fn join(&self, id: u64, player_address: &str) -> Result<JoinReceipt, ApiError> {
        let body = json!({ "playerAddress": player_address });
        self.fetch(ApiRequest::post(tournament_path(id, "/join"), body))
            .await?
            .into_data("Failed to join tournament")
    }

    /// `POST /api/tournaments/{id}/enter`. Returns the backend's `success`.
    pub async fn enter(&self, id: u64, player_address: &str) -> Result<bool, ApiError> {
        let body = json!({ "playerAddress": player_address });
        let envelope: Envelope<Value> = self
            .fetch(ApiRequest::post(tournament_path(id, "/enter"), body))
            .await?;
        Ok(envelope.succeeded())
    }

    /// `POST /api/wallet/connect`. Any truthy body counts as success.
    pub async fn register_wallet(
        &self,
        address: &str,
        signature: &str,
        message: &str,
    ) -> Result<bool, ApiError> {
        let body = json!({
            "address": address,
            "signature": signature,
            "message": message,
        });
        let value: Value = self
            .executor
            .execute(&ApiRequest::post("/api/wallet/connect", body))
            .await?;
        Ok(is_truthy(&value))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
