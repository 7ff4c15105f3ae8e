use tokio::sync::watch;
use tracing::debug;

use tourney_core::Tournament;

use crate::service::TournamentService;

/// Cached tournament list, refreshed by polling and patched by local actions.
///
/// A refresh adopts the server's list but never lets a stale snapshot move a
/// cached tournament backwards through its status machine.
pub struct TournamentBoard {
    api: TournamentService,
    tournaments: watch::Sender<Vec<Tournament>>,
}

impl TournamentBoard {
    pub fn new(api: TournamentService) -> Self {
        let (tournaments, _) = watch::channel(Vec::new());
        Self { api, tournaments }
    }

    pub fn api(&self) -> &TournamentService {
        &self.api
    }

    pub fn snapshot(&self) -> Vec<Tournament> {
        self.tournaments.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Tournament>> {
        self.tournaments.subscribe()
    }

    pub fn find(&self, id: u64) -> Option<Tournament> {
        self.tournaments.borrow().iter().find(|t| t.id == id).cloned()
    }

    /// Re-fetch the full list. A failed read yields an empty list.
    pub async fn refresh(&self) -> Vec<Tournament> {
        let incoming = self.api.list_all().await;
        let mut merged = Vec::with_capacity(incoming.len());
        {
            let cached = self.tournaments.borrow();
            for fresh in incoming {
                let next = match cached.iter().find(|t| t.id == fresh.id) {
                    Some(current) => current.reconcile(&fresh).unwrap_or_else(|| {
                        if *current != fresh {
                            debug!(
                                "Keeping cached tournament {} ({}) over stale {}",
                                current.id, current.status, fresh.status
                            );
                        }
                        current.clone()
                    }),
                    None => fresh,
                };
                merged.push(next);
            }
        }
        self.tournaments.send_replace(merged.clone());
        merged
    }

    /// Swap in a newer snapshot of one tournament. Returns whether it landed.
    pub fn replace(&self, next: Tournament) -> bool {
        self.tournaments.send_if_modified(|list| {
            let Some(slot) = list.iter_mut().find(|t| t.id == next.id) else {
                return false;
            };
            match slot.reconcile(&next) {
                Some(accepted) => {
                    *slot = accepted;
                    true
                }
                None => false,
            }
        })
    }
}
