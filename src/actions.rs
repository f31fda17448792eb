//! User actions: local precondition checks, submission to the relay, and the
//! optimistic patches applied once the relay accepts them.

use crate::{
    config::DEFAULT_REQUEST_TIMEOUT,
    error::ActionError,
    model::{
        PlayerPatch,
        TOKEN_UNIT,
        WalletId,
    },
    persistence::PlayerUpdate,
    reconciler::GameViewReconciler,
};
use rand::Rng;
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    error,
};

pub const MAX_BOTS: usize = 10;

/// Reward credited to the caller for a successful ban.
pub const BAN_REWARD: u128 = TOKEN_UNIT;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameAction {
    CreateProfile {
        username: String,
        external_id: Option<u64>,
    },
    Join,
    Spectate,
    /// Bans whoever was the target when the action was submitted.
    Ban { target: WalletId },
}

impl GameAction {
    pub fn name(&self) -> &'static str {
        match self {
            GameAction::CreateProfile { .. } => "createProfile",
            GameAction::Join => "join",
            GameAction::Spectate => "spectate",
            GameAction::Ban { .. } => "ban",
        }
    }
}

/// The relay that forwards actions to the contract.
pub trait ActionSubmitter: Send + Sync + 'static {
    fn submit(
        &self,
        wallet: &WalletId,
        action: &GameAction,
    ) -> impl Future<Output = Result<(), ActionError>> + Send;
}

pub fn prepare_create_profile(
    view: &GameViewReconciler,
    me: &WalletId,
    username: &str,
    external_id: Option<u64>,
) -> Result<GameAction, ActionError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ActionError::precondition("username must not be empty"));
    }
    if view.player(me).is_some() {
        return Err(ActionError::precondition("profile already exists"));
    }
    Ok(GameAction::CreateProfile {
        username: username.to_string(),
        external_id: external_id.filter(|id| *id != 0),
    })
}

/// Joining is how a spectator gets back into play.
pub fn prepare_join(view: &GameViewReconciler, me: &WalletId) -> Result<GameAction, ActionError> {
    match view.player(me) {
        None => Err(ActionError::precondition("create a profile first")),
        Some(record) if !record.is_spectator => {
            Err(ActionError::precondition("already in the game"))
        }
        Some(_) => Ok(GameAction::Join),
    }
}

pub fn prepare_spectate(
    view: &GameViewReconciler,
    me: &WalletId,
) -> Result<GameAction, ActionError> {
    require_player(view, me)?;
    Ok(GameAction::Spectate)
}

pub fn prepare_ban(view: &GameViewReconciler, me: &WalletId) -> Result<GameAction, ActionError> {
    let Some(round) = view.round().filter(|r| r.is_active()) else {
        return Err(ActionError::precondition("no round in progress"));
    };
    let Some(target) = round.current_target() else {
        return Err(ActionError::precondition("nobody to ban right now"));
    };
    let Some(caller) = view.player(me) else {
        return Err(ActionError::precondition("create a profile first"));
    };
    if caller.is_banned {
        return Err(ActionError::precondition("banned players cannot ban"));
    }
    if caller.is_spectator {
        return Err(ActionError::precondition("spectators cannot ban"));
    }
    if target == me {
        return Err(ActionError::precondition("you cannot ban yourself"));
    }
    Ok(GameAction::Ban {
        target: target.clone(),
    })
}

fn require_player(view: &GameViewReconciler, me: &WalletId) -> Result<(), ActionError> {
    match view.player(me) {
        None => Err(ActionError::precondition("create a profile first")),
        Some(record) if record.is_spectator => {
            Err(ActionError::precondition("already spectating"))
        }
        Some(_) => Ok(()),
    }
}

pub async fn submit<A: ActionSubmitter>(
    submitter: &A,
    wallet: &WalletId,
    action: &GameAction,
) -> Result<(), ActionError> {
    debug!(action = action.name(), %wallet, "submitting action");
    submitter.submit(wallet, action).await.inspect_err(|err| {
        error!(action = action.name(), %wallet, %err, "action failed");
    })
}

/// What a confirmed action changed, for fan-out to peers and the sink.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Confirmed {
    pub announcement: String,
    pub updates: Vec<PlayerUpdate>,
}

/// Applies the optimistic patches for an accepted action and appends its
/// announcement to the chat log.
pub fn apply_confirmed(
    view: &mut GameViewReconciler,
    me: &WalletId,
    action: &GameAction,
) -> Confirmed {
    let confirmed = match action {
        GameAction::CreateProfile {
            username,
            external_id,
        } => {
            let mut patch = PlayerPatch::default()
                .display_name(username.clone())
                .token_balance(0)
                .banned(false)
                .spectator(false);
            patch.external_id = *external_id;
            view.apply_optimistic_patch(me, &patch);
            Confirmed {
                announcement: format!("{username} joined"),
                updates: vec![PlayerUpdate::Username {
                    wallet: me.clone(),
                    username: username.clone(),
                }],
            }
        }
        GameAction::Join => {
            view.apply_optimistic_patch(me, &PlayerPatch::default().spectator(false));
            Confirmed {
                announcement: format!("{} joined the game", label_of(view, me)),
                updates: vec![PlayerUpdate::Spectator {
                    wallet: me.clone(),
                    spectator: false,
                }],
            }
        }
        GameAction::Spectate => {
            view.apply_optimistic_patch(me, &PlayerPatch::default().spectator(true));
            Confirmed {
                announcement: format!("{} joined as spectator", label_of(view, me)),
                updates: vec![PlayerUpdate::Spectator {
                    wallet: me.clone(),
                    spectator: true,
                }],
            }
        }
        GameAction::Ban { target } => {
            view.apply_optimistic_patch(target, &PlayerPatch::default().banned(true));
            view.apply_optimistic_patch(me, &PlayerPatch::default().token_credit(BAN_REWARD));
            let next_target = view
                .active_players()
                .find(|p| &p.wallet_id != target)
                .map(|p| p.wallet_id.clone());
            view.apply_optimistic_target(next_target);
            let balance = view.player(me).map(|p| p.token_balance).unwrap_or_default();
            Confirmed {
                announcement: format!(
                    "{} banned {}! +1 $TOURS",
                    label_of(view, me),
                    label_of(view, target)
                ),
                updates: vec![
                    PlayerUpdate::Banned {
                        wallet: target.clone(),
                        banned: true,
                    },
                    PlayerUpdate::Balance {
                        wallet: me.clone(),
                        balance,
                    },
                ],
            }
        }
    };
    view.append_chat(confirmed.announcement.clone());
    confirmed
}

fn label_of(view: &GameViewReconciler, wallet: &WalletId) -> String {
    view.player(wallet)
        .map(|p| p.label())
        .unwrap_or_else(|| wallet.short())
}

/// Seeds `count` local bot players into an idle lobby. Returns the
/// announcements appended to the chat log.
pub fn add_bots(view: &mut GameViewReconciler, count: usize) -> Result<Vec<String>, ActionError> {
    if !(1..=MAX_BOTS).contains(&count) {
        return Err(ActionError::precondition(format!(
            "bot count must be between 1 and {MAX_BOTS}"
        )));
    }
    if view.is_round_active() {
        return Err(ActionError::precondition(
            "bots can only join between rounds",
        ));
    }
    let mut rng = rand::rng();
    let mut announcements = Vec::with_capacity(count);
    for i in 1..=count {
        let wallet = WalletId::new(format!("0xBot{i}{:08x}", rng.random::<u32>()));
        let name = format!("Bot{i}");
        view.apply_optimistic_patch(&wallet, &PlayerPatch::default().display_name(name.clone()));
        let announcement = format!("{name} (bot) joined");
        view.append_chat(announcement.clone());
        announcements.push(announcement);
    }
    Ok(announcements)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionRequest<'a> {
    action: &'static str,
    wallet: &'a WalletId,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id: Option<u64>,
}

impl<'a> ActionRequest<'a> {
    fn new(wallet: &'a WalletId, action: &'a GameAction) -> Self {
        let (username, external_id) = match action {
            GameAction::CreateProfile {
                username,
                external_id,
            } => (Some(username.as_str()), *external_id),
            _ => (None, None),
        };
        Self {
            action: action.name(),
            wallet,
            username,
            external_id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl RelayResponse {
    fn into_result(self) -> Result<(), ActionError> {
        match (self.success, self.error) {
            (_, Some(error)) => Err(ActionError::Rejected(error)),
            (true, None) => Ok(()),
            (false, None) => Err(ActionError::Rejected("relay did not confirm".into())),
        }
    }
}

/// Submits actions to the HTTP relay in front of the contract.
#[derive(Clone, Debug)]
pub struct HttpActionRelay {
    base_url: String,
    http: reqwest::Client,
}

impl HttpActionRelay {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ActionError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base_url, http })
    }
}

impl ActionSubmitter for HttpActionRelay {
    async fn submit(&self, wallet: &WalletId, action: &GameAction) -> Result<(), ActionError> {
        let url = format!("{}/game/action", self.base_url);
        let res = self
            .http
            .post(url)
            .json(&ActionRequest::new(wallet, action))
            .send()
            .await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        let parsed: Option<RelayResponse> = serde_json::from_slice(&bytes).ok();
        if status.is_success() {
            return parsed
                .ok_or_else(|| ActionError::Rejected("unreadable relay response".into()))?
                .into_result();
        }
        let reason = match parsed.and_then(|r| r.error) {
            Some(error) => error,
            None if status == StatusCode::TOO_MANY_REQUESTS => "rate limited".to_string(),
            None => format!("relay responded with {status}"),
        };
        Err(ActionError::Rejected(reason))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::model::{
        GameSnapshot,
        PlayerRecord,
        PlayerTable,
        RoundState,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSubmitter {
        calls: Mutex<Vec<(WalletId, GameAction)>>,
        reject_with: Option<String>,
    }

    impl ActionSubmitter for FakeSubmitter {
        async fn submit(&self, wallet: &WalletId, action: &GameAction) -> Result<(), ActionError> {
            self.calls.lock().unwrap().push((wallet.clone(), action.clone()));
            match &self.reject_with {
                Some(reason) => Err(ActionError::Rejected(reason.clone())),
                None => Ok(()),
            }
        }
    }

    fn view_with(time_left: u64, target: Option<&str>, players: &[(&str, bool, bool)]) -> GameViewReconciler {
        let mut view = GameViewReconciler::new();
        view.apply_remote_snapshot(GameSnapshot {
            round: RoundState::new(time_left, target.map(WalletId::from)),
            players: PlayerTable::from_records(players.iter().map(|(w, banned, spectator)| {
                let mut record = PlayerRecord::new((*w).into(), w.to_lowercase());
                record.is_banned = *banned;
                record.is_spectator = *spectator;
                record
            })),
        });
        view
    }

    #[test]
    fn prepare_create_profile__blank_name__rejected() {
        let view = GameViewReconciler::new();
        let result = prepare_create_profile(&view, &"ME".into(), "   ", None);
        assert!(matches!(result, Err(ActionError::Precondition(_))));
    }

    #[test]
    fn prepare_create_profile__existing_record__rejected() {
        let view = view_with(0, None, &[("ME", false, false)]);
        let result = prepare_create_profile(&view, &"ME".into(), "again", None);
        assert!(matches!(result, Err(ActionError::Precondition(_))));
    }

    #[test]
    fn apply_confirmed__create_profile__adds_record_and_announces() {
        // given
        let mut view = view_with(0, None, &[("A", false, false), ("B", false, false)]);
        let me = WalletId::from("ME");
        let action = prepare_create_profile(&view, &me, " carol ", Some(77)).unwrap();

        // when
        let confirmed = apply_confirmed(&mut view, &me, &action);

        // then
        let record = view.player(&me).unwrap();
        assert_eq!(record.display_name, "carol");
        assert_eq!(record.external_id, Some(77));
        assert_eq!(record.token_balance, 0);
        assert_eq!(confirmed.announcement, "carol joined");
        assert_eq!(view.chat().latest(), Some("carol joined"));
    }

    #[test]
    fn prepare_join__spectator__can_rejoin() {
        // given
        let mut view = view_with(0, None, &[("ME", false, true), ("B", false, false)]);
        let me = WalletId::from("ME");

        // when
        let action = prepare_join(&view, &me).unwrap();
        let confirmed = apply_confirmed(&mut view, &me, &action);

        // then
        assert_eq!(action, GameAction::Join);
        assert!(!view.player(&me).unwrap().is_spectator);
        assert_eq!(confirmed.announcement, "me joined the game");
        assert!(prepare_spectate(&view, &me).is_ok());
    }

    #[test]
    fn prepare_join__already_playing__rejected() {
        let view = view_with(0, None, &[("ME", false, false)]);
        assert!(matches!(
            prepare_join(&view, &"ME".into()),
            Err(ActionError::Precondition(_))
        ));
    }

    #[test]
    fn prepare_spectate__spectator__rejected() {
        let view = view_with(0, None, &[("ME", false, true)]);
        assert!(prepare_spectate(&view, &"ME".into()).is_err());
    }

    #[test]
    fn apply_confirmed__spectate__flags_caller() {
        let mut view = view_with(0, None, &[("ME", false, false)]);
        let me = WalletId::from("ME");
        let action = prepare_spectate(&view, &me).unwrap();
        let confirmed = apply_confirmed(&mut view, &me, &action);
        assert!(view.player(&me).unwrap().is_spectator);
        assert_eq!(confirmed.announcement, "me joined as spectator");
    }

    #[test]
    fn prepare_ban__no_round__rejected() {
        let view = view_with(0, None, &[("ME", false, false), ("B", false, false)]);
        assert!(matches!(
            prepare_ban(&view, &"ME".into()),
            Err(ActionError::Precondition(_))
        ));
    }

    #[test]
    fn prepare_ban__caller_is_target__rejected() {
        let view = view_with(30, Some("ME"), &[("ME", false, false), ("B", false, false)]);
        assert!(prepare_ban(&view, &"ME".into()).is_err());
    }

    #[test]
    fn prepare_ban__banned_caller__rejected() {
        let view = view_with(30, Some("B"), &[("ME", true, false), ("B", false, false)]);
        assert!(prepare_ban(&view, &"ME".into()).is_err());
    }

    #[test]
    fn apply_confirmed__ban__bans_target_credits_caller_moves_target() {
        // given
        let mut view = view_with(
            30,
            Some("B"),
            &[("B", false, false), ("ME", false, false), ("C", false, false)],
        );
        let me = WalletId::from("ME");
        let action = prepare_ban(&view, &me).unwrap();

        // when
        let confirmed = apply_confirmed(&mut view, &me, &action);

        // then
        assert!(view.player(&"B".into()).unwrap().is_banned);
        assert_eq!(view.player(&me).unwrap().token_balance, BAN_REWARD);
        assert_eq!(
            view.round().unwrap().current_target(),
            Some(&WalletId::from("ME"))
        );
        assert_eq!(confirmed.announcement, "me banned b! +1 $TOURS");
        assert!(confirmed.updates.contains(&PlayerUpdate::Balance {
            wallet: me.clone(),
            balance: BAN_REWARD,
        }));
    }

    #[test]
    fn apply_confirmed__ban_last_active_player__clears_target() {
        let mut view = view_with(30, Some("B"), &[("B", false, false), ("ME", false, true)]);
        let action = GameAction::Ban { target: "B".into() };
        apply_confirmed(&mut view, &"ME".into(), &action);
        assert_eq!(view.round().unwrap().current_target(), None);
    }

    #[tokio::test]
    async fn submit__relay_rejects__error_surfaced_and_view_untouched() {
        // given
        let view = view_with(30, Some("B"), &[("B", false, false), ("ME", false, false)]);
        let before = view.clone();
        let submitter = FakeSubmitter {
            reject_with: Some("insufficient gas".into()),
            ..Default::default()
        };
        let me = WalletId::from("ME");
        let action = prepare_ban(&view, &me).unwrap();

        // when
        let result = submit(&submitter, &me, &action).await;

        // then
        assert!(matches!(result, Err(ActionError::Rejected(reason)) if reason == "insufficient gas"));
        assert_eq!(view.players(), before.players());
        assert_eq!(submitter.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn add_bots__idle_lobby__adds_named_bots() {
        // given
        let mut view = view_with(0, None, &[("ME", false, false)]);

        // when
        let announcements = add_bots(&mut view, 3).unwrap();

        // then
        assert_eq!(view.players().len(), 4);
        assert_eq!(
            announcements,
            vec!["Bot1 (bot) joined", "Bot2 (bot) joined", "Bot3 (bot) joined"]
        );
        assert!(view
            .players()
            .wallet_ids()
            .skip(1)
            .all(|w| w.as_str().starts_with("0xBot")));
    }

    #[test]
    fn add_bots__out_of_range_or_round_running__rejected() {
        let mut idle = view_with(0, None, &[("ME", false, false)]);
        assert!(add_bots(&mut idle, 0).is_err());
        assert!(add_bots(&mut idle, MAX_BOTS + 1).is_err());

        let mut running = view_with(10, Some("ME"), &[("ME", false, false)]);
        assert!(add_bots(&mut running, 2).is_err());
        assert_eq!(running.players().len(), 1);
    }

    #[test]
    fn relay_response__error_field__wins_over_success() {
        let response: RelayResponse =
            serde_json::from_str(r#"{"success":true,"error":"nope"}"#).unwrap();
        assert!(matches!(response.into_result(), Err(ActionError::Rejected(e)) if e == "nope"));
        let ok: RelayResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(ok.into_result().is_ok());
    }

    #[test]
    fn action_request__create_profile__serializes_camel_case() {
        let wallet = WalletId::from("0xA");
        let action = GameAction::CreateProfile {
            username: "alice".into(),
            external_id: Some(5),
        };
        let json = serde_json::to_value(ActionRequest::new(&wallet, &action)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "action": "createProfile",
                "wallet": "0xA",
                "username": "alice",
                "externalId": 5
            })
        );
        let join = serde_json::to_value(ActionRequest::new(&wallet, &GameAction::Join)).unwrap();
        assert_eq!(join, serde_json::json!({"action": "join", "wallet": "0xA"}));
    }
}
