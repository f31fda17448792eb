//! Client-side view of one lobby, merged from remote reads, optimistic local
//! patches and peer broadcasts.

use crate::{
    chat::ChatLog,
    model::{
        GameSnapshot,
        PlayerPatch,
        PlayerRecord,
        PlayerTable,
        RoundState,
        WalletId,
    },
    peer::PeerMessage,
    signals::{
        DerivedSignals,
        compute_derived_signals,
    },
};
use tracing::{
    debug,
    info,
};

pub const ROUND_STARTED_ANNOUNCEMENT: &str = "Game started!";
pub const LOBBY_ALONE_ANNOUNCEMENT: &str = "Alone in lobby! Add bots?";

#[derive(Clone, Debug, Default)]
pub struct GameViewReconciler {
    players: PlayerTable,
    round: Option<RoundState>,
    chat: ChatLog,
    bots_offered: bool,
}

impl GameViewReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn players(&self) -> &PlayerTable {
        &self.players
    }

    pub fn player(&self, wallet_id: &WalletId) -> Option<&PlayerRecord> {
        self.players.get(wallet_id)
    }

    /// `None` until the first snapshot (remote or peer) carried round data.
    pub fn round(&self) -> Option<&RoundState> {
        self.round.as_ref()
    }

    pub fn is_round_active(&self) -> bool {
        self.round.as_ref().is_some_and(RoundState::is_active)
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn active_players(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.iter().filter(|p| p.is_active())
    }

    pub fn bots_offered(&self) -> bool {
        self.bots_offered
    }

    /// Replaces players and round wholesale; anything not in the snapshot is
    /// forgotten, including optimistic patches that were never confirmed.
    pub fn apply_remote_snapshot(&mut self, snapshot: GameSnapshot) -> DerivedSignals {
        let previous = self.round.take().unwrap_or_default();
        self.players = snapshot.players;
        self.round = Some(snapshot.round);
        self.settle(&previous)
    }

    pub fn apply_optimistic_patch(&mut self, wallet_id: &WalletId, patch: &PlayerPatch) {
        patch.apply_to(self.players.entry(wallet_id));
    }

    /// Moves the "it" role locally. Ignored while no round is running.
    pub fn apply_optimistic_target(&mut self, target: Option<WalletId>) {
        if let Some(round) = self.round.as_mut() {
            round.retarget(target);
        }
    }

    pub fn apply_peer_message(&mut self, message: PeerMessage) -> Option<DerivedSignals> {
        match message {
            PeerMessage::State {
                players,
                time_left,
                target,
            } => {
                let previous = self.round.clone().unwrap_or_default();
                self.players = PlayerTable::from_records(players);
                if let Some(time_left) = time_left {
                    self.round = Some(RoundState::new(time_left, target));
                }
                Some(self.settle(&previous))
            }
            PeerMessage::ChatAppend { text } => {
                self.chat.push(text);
                None
            }
        }
    }

    /// Decodes and applies a raw peer payload; undecodable payloads are dropped.
    pub fn apply_peer_payload(&mut self, payload: &str) -> Option<DerivedSignals> {
        match PeerMessage::decode(payload) {
            Ok(message) => self.apply_peer_message(message),
            Err(err) => {
                debug!(%err, len = payload.len(), "dropping malformed peer message");
                None
            }
        }
    }

    pub fn append_chat(&mut self, entry: impl Into<String>) {
        self.chat.push(entry);
    }

    /// The current roster as a peer `state` broadcast. Round data is left
    /// out: every client reads the round from its own polls, and a peer whose
    /// poll lags would otherwise replay round transitions on its neighbours.
    pub fn state_message(&self) -> PeerMessage {
        PeerMessage::State {
            players: self.players.records().to_vec(),
            time_left: None,
            target: None,
        }
    }

    fn settle(&mut self, previous: &RoundState) -> DerivedSignals {
        let current = self.round.clone().unwrap_or_default();
        let signals =
            compute_derived_signals(previous, &current, &self.players, self.bots_offered);

        if signals.round_just_started {
            info!(
                seconds = current.time_remaining_seconds(),
                target = ?current.current_target(),
                "round started"
            );
            self.bots_offered = false;
            self.chat.push(ROUND_STARTED_ANNOUNCEMENT);
        }
        if signals.round_just_ended {
            self.bots_offered = false;
            match &signals.winner {
                Some(winner) => {
                    let name = self
                        .players
                        .get(winner)
                        .map(PlayerRecord::label)
                        .unwrap_or_else(|| winner.short());
                    info!(%winner, "round ended");
                    for player in self.players.iter_mut() {
                        player.is_banned = false;
                    }
                    self.chat.push(format!("{name} won the round!"));
                }
                None => info!("round ended without a winner"),
            }
        }
        if signals.lobby_needs_bots {
            self.bots_offered = true;
            self.chat.push(LOBBY_ALONE_ANNOUNCEMENT);
        }
        signals
    }
}
