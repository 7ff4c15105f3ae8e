// Live scoreboard for one tournament.
//
// A watch subscribes to the push channel first, then fetches the player list
// baseline, then applies buffered and subsequent events in order. Push events
// are hints: completion triggers an authoritative player refetch.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tourney_core::{Player, Tournament, TournamentPlayers};

use crate::live::{LiveChannel, LiveEvent, Subscription};
use crate::service::TournamentService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentView {
    pub tournament: Tournament,
    pub players: Vec<Player>,
    pub last_updated: Option<String>,
    /// True until the first player list read completes.
    pub loading: bool,
}

/// Result of applying one push event to a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Unchanged,
    Updated(TournamentView),
    /// Updated, and the player list should be re-read.
    UpdatedAndRefetch(TournamentView),
}

impl TournamentView {
    pub fn new(tournament: Tournament) -> Self {
        Self {
            tournament,
            players: Vec::new(),
            last_updated: None,
            loading: true,
        }
    }

    pub fn with_players(&self, read: TournamentPlayers) -> Self {
        Self {
            players: read.players,
            last_updated: read.last_updated,
            loading: false,
            ..self.clone()
        }
    }

    /// Adopt a newer tournament snapshot if the status machine allows it.
    pub fn with_tournament(&self, tournament: &Tournament) -> Option<Self> {
        self.tournament.reconcile(tournament).map(|next| Self {
            tournament: next,
            ..self.clone()
        })
    }

    pub fn apply(&self, event: &LiveEvent) -> Applied {
        match event {
            LiveEvent::ScoreUpdated(update) => {
                if update.tournament_id.is_some_and(|id| id != self.tournament.id)
                    || self.tournament.status.is_terminal()
                {
                    return Applied::Unchanged;
                }
                let Some(index) = self
                    .players
                    .iter()
                    .position(|p| p.address.eq_ignore_ascii_case(&update.player_address))
                else {
                    return Applied::Unchanged;
                };
                if self.players[index].score == update.score {
                    return Applied::Unchanged;
                }
                let mut players = self.players.clone();
                players[index].score = update.score;
                Applied::Updated(Self {
                    players,
                    ..self.clone()
                })
            }
            LiveEvent::TournamentCompleted(update) => match self.tournament.with_completion(update) {
                Some(tournament) => Applied::UpdatedAndRefetch(Self {
                    tournament,
                    ..self.clone()
                }),
                None => Applied::Unchanged,
            },
            LiveEvent::TournamentCanceled(update) => match self.tournament.with_cancellation(update) {
                Some(tournament) => Applied::Updated(Self {
                    tournament,
                    ..self.clone()
                }),
                None => Applied::Unchanged,
            },
        }
    }

    /// Players by score, highest first. Ties keep list order.
    pub fn ranked_players(&self) -> Vec<Player> {
        let mut ranked = self.players.clone();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }
}

/// Whether a tournament warrants a live scoreboard.
pub fn should_observe(tournament: &Tournament, has_cached_players: bool) -> bool {
    tournament.is_observable() || has_cached_players
}

async fn read_players(api: &TournamentService, id: u64) -> TournamentPlayers {
    match api.get_players(id).await {
        Ok(players) => players,
        Err(e) => {
            warn!("Players for tournament {} unavailable, showing none: {}", id, e);
            TournamentPlayers::default()
        }
    }
}

/// A mounted scoreboard. Dropping it unmounts.
pub struct TournamentWatch {
    id: u64,
    state: Arc<watch::Sender<TournamentView>>,
    subscription: Subscription,
    task: JoinHandle<()>,
}

impl TournamentWatch {
    /// Subscribe to push events for `tournament` and start the baseline read.
    pub fn mount(tournament: Tournament, api: TournamentService, live: &LiveChannel) -> Self {
        let id = tournament.id;
        let (events_tx, events) = mpsc::unbounded_channel();
        let subscription = live.subscribe(id, Arc::new(events_tx));

        let (state, _) = watch::channel(TournamentView::new(tournament));
        let state = Arc::new(state);
        let task = tokio::spawn(drive(state.clone(), api, events));
        info!("Watching tournament {}", id);

        Self {
            id,
            state,
            subscription,
            task,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn view(&self) -> TournamentView {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TournamentView> {
        self.state.subscribe()
    }

    /// Feed a polled snapshot. Returns whether the view changed.
    pub fn reconcile(&self, tournament: &Tournament) -> bool {
        self.state.send_if_modified(|view| match view.with_tournament(tournament) {
            Some(next) => {
                *view = next;
                true
            }
            None => false,
        })
    }

    /// Stop receiving events. Safe to call repeatedly.
    pub fn unmount(&self) {
        if !self.task.is_finished() {
            debug!("Unmounting watch for tournament {}", self.id);
        }
        self.subscription.unsubscribe();
        self.task.abort();
    }
}

impl Drop for TournamentWatch {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn drive(
    state: Arc<watch::Sender<TournamentView>>,
    api: TournamentService,
    mut events: mpsc::UnboundedReceiver<LiveEvent>,
) {
    let id = state.borrow().tournament.id;

    let baseline = read_players(&api, id).await;
    state.send_modify(|view| *view = view.with_players(baseline));

    while let Some(event) = events.recv().await {
        let mut refetch = false;
        let changed = state.send_if_modified(|view| match view.apply(&event) {
            Applied::Unchanged => false,
            Applied::Updated(next) => {
                *view = next;
                true
            }
            Applied::UpdatedAndRefetch(next) => {
                *view = next;
                refetch = true;
                true
            }
        });
        if !changed {
            debug!("Ignored push event for tournament {}: {:?}", id, event);
        }
        if refetch {
            info!("Tournament {} completed; refreshing final scores", id);
            let players = read_players(&api, id).await;
            state.send_modify(|view| *view = view.with_players(players));
        }
    }
}
