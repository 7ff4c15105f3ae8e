// Live update channel.
//
// One persistent push connection per process, multiplexing every tournament
// room. Subscribers register per tournament; the first subscriber of a room
// emits `join-tournament`, the last one to leave emits `leave-tournament`.
// The connection is opened lazily on first subscribe and reconnects with a
// constant delay until the process exits.

pub mod codec;
pub mod socket;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tourney_core::{ScoreUpdate, Tournament};

use codec::Outbound;

// ---------------------------------------------------------------------------
// Events and commands
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("failed to connect push channel: {0}")]
    Connect(String),

    #[error("push protocol error: {0}")]
    Protocol(String),

    #[error("bad {event} payload: {source}")]
    Payload {
        event: String,
        source: serde_json::Error,
    },
}

/// Server-to-client notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    ScoreUpdated(ScoreUpdate),
    TournamentCompleted(Tournament),
    TournamentCanceled(Tournament),
}

impl LiveEvent {
    /// Room the event belongs to; `None` means every subscriber gets it.
    pub fn tournament_id(&self) -> Option<u64> {
        match self {
            LiveEvent::ScoreUpdated(update) => update.tournament_id,
            LiveEvent::TournamentCompleted(t) | LiveEvent::TournamentCanceled(t) => Some(t.id),
        }
    }

    /// Decode a named push event. Unknown names yield `Ok(None)`.
    pub fn decode(name: &str, payload: Value) -> Result<Option<LiveEvent>, LiveError> {
        let wrap = |source| LiveError::Payload {
            event: name.to_string(),
            source,
        };
        let event = match name {
            "score-updated" => {
                LiveEvent::ScoreUpdated(serde_json::from_value(payload).map_err(wrap)?)
            }
            "tournament-completed" => {
                LiveEvent::TournamentCompleted(serde_json::from_value(payload).map_err(wrap)?)
            }
            "tournament-canceled" => {
                LiveEvent::TournamentCanceled(serde_json::from_value(payload).map_err(wrap)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Client-to-server room membership signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    JoinTournament(u64),
    LeaveTournament(u64),
}

impl ClientCommand {
    pub fn to_frame(self) -> Outbound {
        match self {
            ClientCommand::JoinTournament(id) => {
                Outbound::event("join-tournament", json!({ "tournamentId": id }))
            }
            ClientCommand::LeaveTournament(id) => {
                Outbound::event("leave-tournament", json!({ "tournamentId": id }))
            }
        }
    }
}

/// Callbacks for one tournament. Every method defaults to a no-op.
pub trait TournamentListener: Send + Sync {
    fn on_score_update(&self, _update: &ScoreUpdate) {}
    fn on_tournament_complete(&self, _tournament: &Tournament) {}
    fn on_tournament_canceled(&self, _tournament: &Tournament) {}
}

/// Forward events into a channel, for consumers that prefer a stream.
impl TournamentListener for mpsc::UnboundedSender<LiveEvent> {
    fn on_score_update(&self, update: &ScoreUpdate) {
        let _ = self.send(LiveEvent::ScoreUpdated(update.clone()));
    }

    fn on_tournament_complete(&self, tournament: &Tournament) {
        let _ = self.send(LiveEvent::TournamentCompleted(tournament.clone()));
    }

    fn on_tournament_canceled(&self, tournament: &Tournament) {
        let _ = self.send(LiveEvent::TournamentCanceled(tournament.clone()));
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// An established push connection. Dropping `outbound` closes it; `inbound`
/// ending means the remote side went away.
pub struct PushConnection {
    pub outbound: mpsc::UnboundedSender<ClientCommand>,
    pub inbound: mpsc::UnboundedReceiver<LiveEvent>,
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> Result<PushConnection, LiveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No subscriber has asked for the connection yet.
    Idle,
    Connecting,
    Connected,
    /// Lost or failed; a reconnect is scheduled.
    Disconnected,
}

// ---------------------------------------------------------------------------
// LiveChannel
// ---------------------------------------------------------------------------

struct Subscriber {
    tournament_id: u64,
    listener: Arc<dyn TournamentListener>,
}

#[derive(Default)]
struct Registry {
    subscribers: BTreeMap<u64, Subscriber>,
    /// Live subscriber count per tournament room.
    rooms: HashMap<u64, usize>,
    next_id: u64,
}

struct ChannelInner {
    connector: Arc<dyn PushConnector>,
    reconnect_delay: Duration,
    registry: Mutex<Registry>,
    commands: mpsc::UnboundedSender<ClientCommand>,
    /// Taken exactly once, by the connection task.
    pending_commands: Mutex<Option<mpsc::UnboundedReceiver<ClientCommand>>>,
    status: watch::Sender<ChannelStatus>,
}

/// The process-wide push channel.
///
/// Construct one at startup and hand clones to whoever subscribes. The
/// connection task it spawns holds the channel alive for the rest of the
/// process; there is no teardown.
#[derive(Clone)]
pub struct LiveChannel {
    inner: Arc<ChannelInner>,
}

impl LiveChannel {
    pub fn new(connector: Arc<dyn PushConnector>, reconnect_delay: Duration) -> Self {
        let (commands, pending) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ChannelStatus::Idle);
        Self {
            inner: Arc::new(ChannelInner {
                connector,
                reconnect_delay,
                registry: Mutex::new(Registry::default()),
                commands,
                pending_commands: Mutex::new(Some(pending)),
                status,
            }),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    /// Register `listener` for `tournament_id`. Must be called from within a
    /// tokio runtime; the first call starts the connection task.
    pub fn subscribe(
        &self,
        tournament_id: u64,
        listener: Arc<dyn TournamentListener>,
    ) -> Subscription {
        let id = {
            let mut registry = self.inner.registry();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.subscribers.insert(
                id,
                Subscriber {
                    tournament_id,
                    listener,
                },
            );
            let count = registry.rooms.entry(tournament_id).or_insert(0);
            *count += 1;
            if *count == 1 {
                let _ = self
                    .inner
                    .commands
                    .send(ClientCommand::JoinTournament(tournament_id));
            }
            id
        };
        debug!("Subscriber {} attached to tournament {}", id, tournament_id);

        self.ensure_started();

        Subscription {
            channel: Arc::downgrade(&self.inner),
            id,
            tournament_id,
            released: AtomicBool::new(false),
        }
    }

    /// Number of live subscribers for a room.
    pub fn subscriber_count(&self, tournament_id: u64) -> usize {
        self.inner
            .registry()
            .rooms
            .get(&tournament_id)
            .copied()
            .unwrap_or(0)
    }

    fn ensure_started(&self) {
        let pending = self
            .inner
            .pending_commands
            .lock()
            .expect("pending commands mutex poisoned")
            .take();
        if let Some(commands) = pending {
            info!("Starting live update channel");
            tokio::spawn(run_connection(self.inner.clone(), commands));
        }
    }
}

impl ChannelInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().expect("live registry mutex poisoned")
    }

    fn is_room_live(&self, tournament_id: u64) -> bool {
        self.registry().rooms.contains_key(&tournament_id)
    }

    fn release(&self, id: u64) {
        let mut registry = self.registry();
        let Some(subscriber) = registry.subscribers.remove(&id) else {
            return;
        };
        let tournament_id = subscriber.tournament_id;
        if let Some(count) = registry.rooms.get_mut(&tournament_id) {
            *count -= 1;
            if *count == 0 {
                registry.rooms.remove(&tournament_id);
                let _ = self
                    .commands
                    .send(ClientCommand::LeaveTournament(tournament_id));
            }
        }
        debug!("Subscriber {} detached from tournament {}", id, tournament_id);
    }

    /// Deliver to matching subscribers. Listeners run outside the lock so
    /// they may subscribe or unsubscribe re-entrantly.
    fn dispatch(&self, event: &LiveEvent) {
        let target = event.tournament_id();
        let listeners: Vec<Arc<dyn TournamentListener>> = self
            .registry()
            .subscribers
            .values()
            .filter(|s| target.map_or(true, |id| s.tournament_id == id))
            .map(|s| s.listener.clone())
            .collect();

        for listener in listeners {
            match event {
                LiveEvent::ScoreUpdated(update) => listener.on_score_update(update),
                LiveEvent::TournamentCompleted(t) => listener.on_tournament_complete(t),
                LiveEvent::TournamentCanceled(t) => listener.on_tournament_canceled(t),
            }
        }
    }
}

async fn run_connection(
    inner: Arc<ChannelInner>,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
) {
    loop {
        inner.status.send_replace(ChannelStatus::Connecting);
        match inner.connector.connect().await {
            Ok(connection) => {
                info!("Live update channel connected");
                inner.status.send_replace(ChannelStatus::Connected);
                serve(&inner, connection, &mut commands).await;
                warn!("Live update channel lost; reconnecting");
            }
            Err(e) => {
                warn!("Live update channel connect failed: {}", e);
            }
        }
        inner.status.send_replace(ChannelStatus::Disconnected);
        tokio::time::sleep(inner.reconnect_delay).await;
    }
}

/// Pump one connection until either side closes it.
async fn serve(
    inner: &ChannelInner,
    mut connection: PushConnection,
    commands: &mut mpsc::UnboundedReceiver<ClientCommand>,
) {
    let mut joined = HashSet::new();

    // Rejoin every room that still has subscribers.
    let live_rooms: Vec<u64> = inner.registry().rooms.keys().copied().collect();
    for id in live_rooms {
        if joined.insert(id)
            && connection
                .outbound
                .send(ClientCommand::JoinTournament(id))
                .is_err()
        {
            return;
        }
    }

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { return };
                // Queued commands may be stale; the registry decides.
                let forward = match command {
                    ClientCommand::JoinTournament(id) => {
                        inner.is_room_live(id) && joined.insert(id)
                    }
                    ClientCommand::LeaveTournament(id) => {
                        !inner.is_room_live(id) && joined.remove(&id)
                    }
                };
                if forward && connection.outbound.send(command).is_err() {
                    return;
                }
            }
            event = connection.inbound.recv() => {
                match event {
                    Some(event) => inner.dispatch(&event),
                    None => return,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle returned by [`LiveChannel::subscribe`]. Dropping it unsubscribes.
pub struct Subscription {
    channel: Weak<ChannelInner>,
    id: u64,
    tournament_id: u64,
    released: AtomicBool,
}

impl Subscription {
    pub fn tournament_id(&self) -> u64 {
        self.tournament_id
    }

    /// Detach this subscriber. Safe to call repeatedly and after the
    /// connection has dropped.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.channel.upgrade() {
            inner.release(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    /// Server side of one fake connection.
    struct FakeRemote {
        commands: mpsc::UnboundedReceiver<ClientCommand>,
        events: mpsc::UnboundedSender<LiveEvent>,
    }

    struct FakeConnector {
        remotes: mpsc::UnboundedSender<FakeRemote>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PushConnector for FakeConnector {
        async fn connect(&self) -> Result<PushConnection, LiveError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(LiveError::Connect("refused".into()));
            }
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let _ = self.remotes.send(FakeRemote {
                commands: out_rx,
                events: in_tx,
            });
            Ok(PushConnection {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    fn channel() -> (LiveChannel, mpsc::UnboundedReceiver<FakeRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(FakeConnector {
            remotes: tx,
            fail: AtomicBool::new(false),
        });
        (LiveChannel::new(connector, Duration::from_secs(1)), rx)
    }

    fn listener() -> (Arc<dyn TournamentListener>, mpsc::UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(tx), rx)
    }

    fn score(tournament_id: Option<u64>, address: &str, score: u64) -> LiveEvent {
        LiveEvent::ScoreUpdated(ScoreUpdate {
            tournament_id,
            player_address: address.to_string(),
            score,
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connection_is_lazy() {
        let (live, mut remotes) = channel();
        settle().await;
        assert_eq!(live.status(), ChannelStatus::Idle);
        assert!(matches!(remotes.try_recv(), Err(TryRecvError::Empty)));

        let (l, _rx) = listener();
        let _sub = live.subscribe(7, l);
        let mut remote = remotes.recv().await.unwrap();
        assert_eq!(
            remote.commands.recv().await,
            Some(ClientCommand::JoinTournament(7))
        );
    }

    #[tokio::test]
    async fn two_subscribers_each_receive_once() {
        let (live, mut remotes) = channel();
        let (la, mut rx_a) = listener();
        let (lb, mut rx_b) = listener();
        let _a = live.subscribe(7, la);
        let _b = live.subscribe(7, lb);

        let mut remote = remotes.recv().await.unwrap();
        assert_eq!(
            remote.commands.recv().await,
            Some(ClientCommand::JoinTournament(7))
        );

        let event = score(Some(7), "0xabc", 10);
        remote.events.send(event.clone()).unwrap();

        assert_eq!(rx_a.recv().await, Some(event.clone()));
        assert_eq!(rx_b.recv().await, Some(event));
        settle().await;
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
        // Only one join for the shared room.
        assert!(matches!(remote.commands.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn unsubscribing_one_keeps_the_other() {
        let (live, mut remotes) = channel();
        let (la, mut rx_a) = listener();
        let (lb, mut rx_b) = listener();
        let a = live.subscribe(7, la);
        let b = live.subscribe(7, lb);
        let mut remote = remotes.recv().await.unwrap();
        remote.commands.recv().await;

        a.unsubscribe();
        a.unsubscribe();
        assert_eq!(live.subscriber_count(7), 1);

        let event = score(Some(7), "0xabc", 11);
        remote.events.send(event.clone()).unwrap();
        assert_eq!(rx_b.recv().await, Some(event));
        // The detached listener was dropped with its registration.
        assert_eq!(rx_a.recv().await, None);
        settle().await;
        assert!(matches!(remote.commands.try_recv(), Err(TryRecvError::Empty)));

        b.unsubscribe();
        assert_eq!(
            remote.commands.recv().await,
            Some(ClientCommand::LeaveTournament(7))
        );
        assert_eq!(live.subscriber_count(7), 0);
    }

    #[tokio::test]
    async fn events_route_by_tournament() {
        let (live, mut remotes) = channel();
        let (l7, mut rx7) = listener();
        let (l8, mut rx8) = listener();
        let _s7 = live.subscribe(7, l7);
        let _s8 = live.subscribe(8, l8);
        let remote = remotes.recv().await.unwrap();

        let scoped = score(Some(8), "0xabc", 3);
        let unscoped = score(None, "0xdef", 4);
        remote.events.send(scoped.clone()).unwrap();
        remote.events.send(unscoped.clone()).unwrap();

        assert_eq!(rx8.recv().await, Some(scoped));
        assert_eq!(rx8.recv().await, Some(unscoped.clone()));
        assert_eq!(rx7.recv().await, Some(unscoped));
        settle().await;
        assert!(rx7.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rejoins_live_rooms() {
        let (live, mut remotes) = channel();
        let (l, mut rx) = listener();
        let _sub = live.subscribe(7, l);

        let first = remotes.recv().await.unwrap();
        drop(first);

        let mut second = remotes.recv().await.unwrap();
        assert_eq!(
            second.commands.recv().await,
            Some(ClientCommand::JoinTournament(7))
        );
        assert_eq!(live.status(), ChannelStatus::Connected);

        let event = score(Some(7), "0xabc", 1);
        second.events.send(event.clone()).unwrap();
        assert_eq!(rx.recv().await, Some(event));
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_is_safe_without_a_connection() {
        let (tx, _remotes) = mpsc::unbounded_channel();
        let connector = Arc::new(FakeConnector {
            remotes: tx,
            fail: AtomicBool::new(true),
        });
        let live = LiveChannel::new(connector, Duration::from_secs(1));
        let mut status = live.watch_status();

        let (l, _rx) = listener();
        let sub = live.subscribe(3, l);
        status
            .wait_for(|s| *s == ChannelStatus::Disconnected)
            .await
            .unwrap();

        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(live.subscriber_count(3), 0);
    }

    #[test]
    fn decodes_named_events() {
        let event = LiveEvent::decode(
            "score-updated",
            json!({"tournamentId": 7, "playerAddress": "0xabc", "score": 9}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.tournament_id(), Some(7));
        assert_eq!(LiveEvent::decode("unknown", Value::Null).unwrap(), None);
        assert!(LiveEvent::decode("tournament-completed", json!({"id": "x"})).is_err());
    }

    #[test]
    fn commands_encode_as_room_events() {
        assert_eq!(
            ClientCommand::JoinTournament(7).to_frame().encode(),
            r#"42["join-tournament",{"tournamentId":7}]"#
        );
        assert_eq!(
            ClientCommand::LeaveTournament(7).to_frame().encode(),
            r#"42["leave-tournament",{"tournamentId":7}]"#
        );
    }
}
