// Synchronization coordinator.
//
// Polls the tournament list on a fixed interval and keeps one live watch
// mounted per observed tournament. The poll bounds staleness when push
// events are lost; push events correct the view between polls.

pub mod board;
pub mod join;
pub mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::live::LiveChannel;

use board::TournamentBoard;
use watch::{should_observe, TournamentView, TournamentWatch};

pub struct SyncCoordinator {
    board: Arc<TournamentBoard>,
    live: LiveChannel,
    watches: Mutex<HashMap<u64, TournamentWatch>>,
    refresh_interval: Duration,
}

impl SyncCoordinator {
    pub fn new(board: Arc<TournamentBoard>, live: LiveChannel, refresh_interval: Duration) -> Self {
        Self {
            board,
            live,
            watches: Mutex::new(HashMap::new()),
            refresh_interval,
        }
    }

    pub fn board(&self) -> &Arc<TournamentBoard> {
        &self.board
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<u64, TournamentWatch>> {
        self.watches.lock().expect("watch registry mutex poisoned")
    }

    /// One reconciliation pass: re-read the list, then mount, update and
    /// unmount watches to match it.
    pub async fn poll(&self) {
        let list = self.board.refresh().await;
        debug!("Tournament list refreshed: {} tournaments", list.len());
        self.sync_watches();
    }

    pub fn sync_watches(&self) {
        let mut watches = self.watches();

        // Push-derived state is at least as new as the poll; let the board
        // adopt it first so both agree.
        for watch in watches.values() {
            self.board.replace(watch.view().tournament);
        }

        let listed = self.board.snapshot();
        let listed_ids: HashSet<u64> = listed.iter().map(|t| t.id).collect();

        for tournament in &listed {
            match watches.get(&tournament.id) {
                Some(watch) => {
                    watch.reconcile(tournament);
                    let view = watch.view();
                    if !should_observe(&view.tournament, !view.players.is_empty()) {
                        info!("Tournament {} no longer observed", tournament.id);
                        watches.remove(&tournament.id);
                    }
                }
                None if should_observe(tournament, false) => {
                    let watch =
                        TournamentWatch::mount(tournament.clone(), self.board.api().clone(), &self.live);
                    watches.insert(tournament.id, watch);
                }
                None => {}
            }
        }

        watches.retain(|id, _| {
            let keep = listed_ids.contains(id);
            if !keep {
                info!("Tournament {} left the list; unmounting", id);
            }
            keep
        });
    }

    pub fn view(&self, id: u64) -> Option<TournamentView> {
        self.watches().get(&id).map(|w| w.view())
    }

    pub fn subscribe_view(&self, id: u64) -> Option<tokio::sync::watch::Receiver<TournamentView>> {
        self.watches().get(&id).map(|w| w.subscribe())
    }

    pub fn watched_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.watches().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Poll forever on the configured interval, starting immediately.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll().await;
        }
    }

    /// Unmount every watch.
    pub fn shutdown(&self) {
        let mut watches = self.watches();
        for watch in watches.values() {
            watch.unmount();
        }
        watches.clear();
    }
}
