//! Session driver: owns the reconciler and its collaborators and runs the
//! single event loop that feeds it.

use crate::{
    actions::{
        self,
        ActionSubmitter,
        GameAction,
        HttpActionRelay,
    },
    command::UserCommand,
    config::{
        AppConfig,
        PersistenceTarget,
    },
    error::{
        ActionError,
        ReadError,
    },
    model::{
        GameSnapshot,
        PlayerRecord,
        RoundState,
        WalletId,
    },
    peer::{
        NoPeers,
        PeerChannel,
        PeerLink,
        PeerMessage,
        WsPeerChannel,
    },
    persistence::{
        HttpSink,
        NoopSink,
        Persistence,
        PersistenceSink,
        PlayerUpdate,
        SledSink,
    },
    reconciler::GameViewReconciler,
    scheduler::RepeatingTask,
    source::{
        HttpStateSource,
        RemoteStateSource,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{
    debug,
    info,
    warn,
};

/// What the presentation layer gets to see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewEvent {
    Chat(String),
    /// One-shot message for this user only, e.g. a refused action.
    Notice(String),
    Roster {
        players: Vec<PlayerRecord>,
        round: Option<RoundState>,
    },
}

struct ActionOutcome {
    action: GameAction,
    result: Result<(), ActionError>,
}

enum LoopStep {
    Poll(Result<GameSnapshot, ReadError>),
    LobbyTick,
    Peer(Option<String>),
    Command(Option<UserCommand>),
    Action(ActionOutcome),
    Shutdown,
}

pub struct Session<S, A, P, K> {
    me: WalletId,
    view: GameViewReconciler,
    source: Arc<S>,
    actions: Arc<A>,
    sink: Arc<P>,
    peers: K,
    events: mpsc::UnboundedSender<ViewEvent>,
    poll_interval: Duration,
    lobby_interval: Duration,
    chat_cursor: u64,
    outcome_tx: mpsc::UnboundedSender<ActionOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<ActionOutcome>,
}

impl<S, A, P, K> Session<S, A, P, K>
where
    S: RemoteStateSource,
    A: ActionSubmitter,
    P: PersistenceSink,
    K: PeerChannel,
{
    pub fn new(
        me: WalletId,
        source: Arc<S>,
        actions: Arc<A>,
        sink: Arc<P>,
        peers: K,
        events: mpsc::UnboundedSender<ViewEvent>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            me,
            view: GameViewReconciler::new(),
            source,
            actions,
            sink,
            peers,
            events,
            poll_interval: crate::config::DEFAULT_POLL_INTERVAL,
            lobby_interval: crate::config::DEFAULT_LOBBY_INTERVAL,
            chat_cursor: 0,
            outcome_tx,
            outcome_rx,
        }
    }

    pub fn with_intervals(mut self, poll: Duration, lobby: Duration) -> Self {
        self.poll_interval = poll;
        self.lobby_interval = lobby;
        self
    }

    pub fn view(&self) -> &GameViewReconciler {
        &self.view
    }

    /// Runs until `/quit`, the command stream closes, or Ctrl-C.
    pub async fn run(self, commands: mpsc::UnboundedReceiver<UserCommand>) -> GameViewReconciler {
        self.run_until(commands, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(%err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    pub async fn run_until(
        mut self,
        mut commands: mpsc::UnboundedReceiver<UserCommand>,
        shutdown: impl Future<Output = ()>,
    ) -> GameViewReconciler {
        info!(wallet = %self.me, "session started");
        tokio::pin!(shutdown);

        let (poll_tx, mut poll_rx) = mpsc::unbounded_channel();
        let source = self.source.clone();
        let poller = RepeatingTask::spawn("state-poll", self.poll_interval, move || {
            let source = source.clone();
            let poll_tx = poll_tx.clone();
            async move {
                let _ = poll_tx.send(source.fetch_game_state().await);
            }
        });
        let (lobby_tx, mut lobby_rx) = mpsc::unbounded_channel();
        let lobby = RepeatingTask::spawn("lobby-check", self.lobby_interval, move || {
            let _ = lobby_tx.send(());
            std::future::ready(())
        });

        let mut peers_open = true;
        loop {
            let step = tokio::select! {
                Some(read) = poll_rx.recv() => LoopStep::Poll(read),
                Some(()) = lobby_rx.recv() => LoopStep::LobbyTick,
                payload = self.peers.next_payload(), if peers_open => LoopStep::Peer(payload),
                command = commands.recv() => LoopStep::Command(command),
                Some(outcome) = self.outcome_rx.recv() => LoopStep::Action(outcome),
                _ = &mut shutdown => LoopStep::Shutdown,
            };

            match step {
                LoopStep::Poll(Ok(snapshot)) => {
                    let signals = self.view.apply_remote_snapshot(snapshot);
                    if !signals.is_quiet() {
                        debug!(?signals, "round signals");
                    }
                }
                LoopStep::Poll(Err(err)) => {
                    warn!(%err, "state read failed; keeping previous view");
                }
                LoopStep::LobbyTick => self.broadcast_lobby().await,
                LoopStep::Peer(Some(payload)) => {
                    self.view.apply_peer_payload(&payload);
                }
                LoopStep::Peer(None) => {
                    warn!("peer channel closed; continuing without peers");
                    peers_open = false;
                }
                LoopStep::Command(Some(UserCommand::Quit)) | LoopStep::Command(None) => break,
                LoopStep::Command(Some(command)) => self.handle_command(command).await,
                LoopStep::Action(outcome) => self.finish_action(outcome).await,
                LoopStep::Shutdown => break,
            }
            self.flush_chat();
        }

        poller.cancel();
        lobby.cancel();
        info!(wallet = %self.me, "session stopped");
        self.view
    }

    async fn handle_command(&mut self, command: UserCommand) {
        let prepared = match command {
            UserCommand::CreateProfile {
                username,
                external_id,
            } => actions::prepare_create_profile(&self.view, &self.me, &username, external_id),
            UserCommand::Join => actions::prepare_join(&self.view, &self.me),
            UserCommand::Spectate => actions::prepare_spectate(&self.view, &self.me),
            UserCommand::Ban => actions::prepare_ban(&self.view, &self.me),
            UserCommand::AddBots(count) => {
                match actions::add_bots(&mut self.view, count) {
                    Ok(announcements) => {
                        for announcement in announcements {
                            self.broadcast(&PeerMessage::chat(announcement)).await;
                        }
                    }
                    Err(err) => self.notice(err.to_string()),
                }
                return;
            }
            UserCommand::ListPlayers => {
                let _ = self.events.send(ViewEvent::Roster {
                    players: self.view.players().records().to_vec(),
                    round: self.view.round().cloned(),
                });
                return;
            }
            UserCommand::Say(text) => {
                let line = format!("{}: {text}", self.my_label());
                self.view.append_chat(line.clone());
                self.broadcast(&PeerMessage::chat(line)).await;
                return;
            }
            UserCommand::Quit => return,
        };

        match prepared {
            Ok(action) => self.submit(action),
            Err(err) => {
                warn!(%err, "action refused locally");
                self.notice(err.to_string());
            }
        }
    }

    fn submit(&self, action: GameAction) {
        let relay = self.actions.clone();
        let me = self.me.clone();
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = actions::submit(relay.as_ref(), &me, &action).await;
            let _ = outcome_tx.send(ActionOutcome { action, result });
        });
    }

    async fn finish_action(&mut self, outcome: ActionOutcome) {
        match outcome.result {
            Ok(()) => {
                let confirmed = actions::apply_confirmed(&mut self.view, &self.me, &outcome.action);
                info!(action = outcome.action.name(), "action confirmed");
                self.broadcast(&PeerMessage::chat(confirmed.announcement)).await;
                self.persist(confirmed.updates);
            }
            Err(err) => self.notice(err.to_string()),
        }
    }

    async fn broadcast_lobby(&mut self) {
        if self.view.round().is_none() {
            return;
        }
        let message = self.view.state_message();
        self.broadcast(&message).await;
    }

    async fn broadcast(&mut self, message: &PeerMessage) {
        if let Err(err) = self.peers.broadcast(message).await {
            warn!(%err, "peer broadcast failed");
        }
    }

    fn persist(&self, updates: Vec<PlayerUpdate>) {
        for update in updates {
            let sink = self.sink.clone();
            tokio::spawn(async move {
                if let Err(err) = sink.record(&update).await {
                    warn!(%err, wallet = %update.wallet(), action = update.action(), "persistence update failed");
                }
            });
        }
    }

    fn notice(&self, text: String) {
        let _ = self.events.send(ViewEvent::Notice(text));
    }

    fn my_label(&self) -> String {
        self.view
            .player(&self.me)
            .map(PlayerRecord::label)
            .unwrap_or_else(|| self.me.short())
    }

    fn flush_chat(&mut self) {
        let chat = self.view.chat();
        for entry in chat.since(self.chat_cursor) {
            let _ = self.events.send(ViewEvent::Chat(entry.to_string()));
        }
        self.chat_cursor = chat.last_seq();
    }
}

pub type ClientSession = Session<HttpStateSource, HttpActionRelay, Persistence, PeerLink>;

/// Builds a session with the HTTP collaborators, the configured sink and,
/// when a relay URL is set, a WebSocket peer channel.
pub async fn open_session(
    config: &AppConfig,
    events: mpsc::UnboundedSender<ViewEvent>,
) -> Result<ClientSession> {
    config.validate()?;
    let source = HttpStateSource::new(&config.api_base_url, config.read_timeout())
        .wrap_err("failed to build HTTP client for the state source")?;
    let relay = HttpActionRelay::new(&config.api_base_url)
        .wrap_err("failed to build HTTP client for the action relay")?;
    let sink = match &config.persistence {
        PersistenceTarget::None => Persistence::Disabled(NoopSink),
        PersistenceTarget::Http => Persistence::Http(
            HttpSink::new(&config.api_base_url)
                .wrap_err("failed to build HTTP client for persistence")?,
        ),
        PersistenceTarget::Sled(path) => Persistence::Sled(
            SledSink::open(path)
                .wrap_err_with(|| format!("failed to open player store at {}", path.display()))?,
        ),
    };
    let peers = match &config.peer_url {
        Some(url) => match WsPeerChannel::connect(url).await {
            Ok(channel) => {
                info!(%url, "connected to peer relay");
                PeerLink::WebSocket(channel)
            }
            Err(err) => {
                warn!(%url, %err, "peer relay unavailable; running without peers");
                PeerLink::Offline(NoPeers)
            }
        },
        None => PeerLink::Offline(NoPeers),
    };

    Ok(Session::new(
        config.wallet.clone(),
        Arc::new(source),
        Arc::new(relay),
        Arc::new(sink),
        peers,
        events,
    )
    .with_intervals(config.poll_interval, config.lobby_interval))
}
