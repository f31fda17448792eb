use crate::model::{
    PlayerTable,
    RoundState,
    WalletId,
};

/// UI-facing edges detected between two consecutive round states.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DerivedSignals {
    pub round_just_started: bool,
    pub round_just_ended: bool,
    pub winner: Option<WalletId>,
    pub lobby_needs_bots: bool,
}

impl DerivedSignals {
    pub fn is_quiet(&self) -> bool {
        !self.round_just_started && !self.round_just_ended && !self.lobby_needs_bots
    }
}

/// Pure diff of `previous` against `next`.
///
/// `bots_already_offered` is the one-shot latch for the lonely-lobby prompt.
/// Any round transition re-arms it. When a round ends with a winner the
/// caller clears every ban, so the lobby count already treats banned players
/// as active again.
pub fn compute_derived_signals(
    previous: &RoundState,
    next: &RoundState,
    players: &PlayerTable,
    bots_already_offered: bool,
) -> DerivedSignals {
    let round_just_started = !previous.is_active() && next.is_active();
    let round_just_ended = previous.is_active() && !next.is_active();
    let winner = if round_just_ended {
        find_winner(players)
    } else {
        None
    };

    let bans_cleared = winner.is_some();
    let active_players = players
        .iter()
        .filter(|p| !p.is_spectator && (bans_cleared || !p.is_banned))
        .count();
    let latch_armed = !bots_already_offered || round_just_started || round_just_ended;
    let lobby_needs_bots = active_players == 1 && !next.is_active() && latch_armed;

    DerivedSignals {
        round_just_started,
        round_just_ended,
        winner,
        lobby_needs_bots,
    }
}

/// First player in table order who is neither banned nor spectating.
pub fn find_winner(players: &PlayerTable) -> Option<WalletId> {
    players
        .iter()
        .find(|p| p.is_active())
        .map(|p| p.wallet_id.clone())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::model::PlayerRecord;

    fn table(players: &[(&str, bool, bool)]) -> PlayerTable {
        PlayerTable::from_records(players.iter().map(|(w, banned, spectator)| {
            let mut record = PlayerRecord::new((*w).into(), *w);
            record.is_banned = *banned;
            record.is_spectator = *spectator;
            record
        }))
    }

    #[test]
    fn compute__zero_to_positive__round_just_started() {
        // given
        let players = table(&[("A", false, false), ("B", false, false)]);

        // when
        let signals = compute_derived_signals(
            &RoundState::inactive(),
            &RoundState::new(120, Some("A".into())),
            &players,
            false,
        );

        // then
        assert!(signals.round_just_started);
        assert!(!signals.round_just_ended);
        assert!(!signals.lobby_needs_bots);
    }

    #[test]
    fn compute__positive_to_zero__picks_first_unbanned_non_spectator() {
        // given
        let players = table(&[
            ("A", true, false),
            ("S", false, true),
            ("C", false, false),
            ("D", false, false),
        ]);

        // when
        let signals = compute_derived_signals(
            &RoundState::new(3, Some("A".into())),
            &RoundState::inactive(),
            &players,
            false,
        );

        // then
        assert!(signals.round_just_ended);
        assert_eq!(signals.winner, Some(WalletId::from("C")));
    }

    #[test]
    fn compute__round_ends_everyone_banned__no_winner() {
        let players = table(&[("A", true, false), ("B", true, false)]);
        let signals = compute_derived_signals(
            &RoundState::new(1, None),
            &RoundState::inactive(),
            &players,
            false,
        );
        assert!(signals.round_just_ended);
        assert_eq!(signals.winner, None);
    }

    #[test]
    fn compute__steady_active_round__is_quiet() {
        let players = table(&[("A", false, false)]);
        let signals = compute_derived_signals(
            &RoundState::new(50, None),
            &RoundState::new(49, None),
            &players,
            false,
        );
        assert!(signals.is_quiet());
    }

    #[test]
    fn compute__single_active_player_idle_lobby__needs_bots() {
        // given
        let players = table(&[("A", false, false), ("S", false, true)]);

        // when
        let signals = compute_derived_signals(
            &RoundState::inactive(),
            &RoundState::inactive(),
            &players,
            false,
        );

        // then
        assert!(signals.lobby_needs_bots);
    }

    #[test]
    fn compute__latch_already_raised__does_not_fire_again() {
        let players = table(&[("A", false, false)]);
        let signals = compute_derived_signals(
            &RoundState::inactive(),
            &RoundState::inactive(),
            &players,
            true,
        );
        assert!(!signals.lobby_needs_bots);
    }

    #[test]
    fn compute__round_end_with_winner__counts_banned_players_as_back() {
        // given
        let players = table(&[("A", true, false), ("B", false, false)]);

        // when
        let signals = compute_derived_signals(
            &RoundState::new(1, None),
            &RoundState::inactive(),
            &players,
            true,
        );

        // then
        assert_eq!(signals.winner, Some(WalletId::from("B")));
        assert!(!signals.lobby_needs_bots);
    }
}
