// Best-effort mirror of player changes into a key-value store.
use crate::{
    config::DEFAULT_REQUEST_TIMEOUT,
    error::SinkError,
    model::{
        WalletId,
        raw_amount,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use sled::{
    Config,
    Tree,
};
use std::path::Path;

const PLAYERS_TREE: &str = "players";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerUpdate {
    Username { wallet: WalletId, username: String },
    Banned { wallet: WalletId, banned: bool },
    Balance { wallet: WalletId, balance: u128 },
    Spectator { wallet: WalletId, spectator: bool },
}

impl PlayerUpdate {
    pub fn wallet(&self) -> &WalletId {
        match self {
            PlayerUpdate::Username { wallet, .. }
            | PlayerUpdate::Banned { wallet, .. }
            | PlayerUpdate::Balance { wallet, .. }
            | PlayerUpdate::Spectator { wallet, .. } => wallet,
        }
    }

    /// Action name understood by the database route.
    pub fn action(&self) -> &'static str {
        match self {
            PlayerUpdate::Username { .. } => "createProfile",
            PlayerUpdate::Banned { .. } => "updateBan",
            PlayerUpdate::Balance { .. } => "updateBalance",
            PlayerUpdate::Spectator { .. } => "updateSpectator",
        }
    }
}

/// Upserts keyed by wallet. Failures never feed back into the view.
pub trait PersistenceSink: Send + Sync + 'static {
    fn record(&self, update: &PlayerUpdate) -> impl Future<Output = Result<(), SinkError>> + Send;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl PersistenceSink for NoopSink {
    async fn record(&self, _update: &PlayerUpdate) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPlayer {
    pub username: Option<String>,
    pub is_banned: bool,
    #[serde(with = "raw_amount")]
    pub token_balance: u128,
    pub is_spectator: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredPlayer {
    fn apply(&mut self, update: &PlayerUpdate, at: DateTime<Utc>) {
        match update {
            PlayerUpdate::Username { username, .. } => self.username = Some(username.clone()),
            PlayerUpdate::Banned { banned, .. } => self.is_banned = *banned,
            PlayerUpdate::Balance { balance, .. } => self.token_balance = *balance,
            PlayerUpdate::Spectator { spectator, .. } => self.is_spectator = *spectator,
        }
        self.updated_at = Some(at);
    }
}

#[derive(Clone)]
pub struct SledSink {
    players: Tree,
}

impl SledSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let db = Config::default().path(path).open()?;
        let players = db.open_tree(PLAYERS_TREE)?;
        Ok(Self { players })
    }

    pub fn get(&self, wallet: &WalletId) -> Result<Option<StoredPlayer>, SinkError> {
        match self.players.get(wallet.as_str())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, update: &PlayerUpdate) -> Result<(), SinkError> {
        let mut stored = self.get(update.wallet())?.unwrap_or_default();
        stored.apply(update, Utc::now());
        let bytes = serde_json::to_vec(&stored)?;
        self.players.insert(update.wallet().as_str(), bytes)?;
        self.players.flush()?;
        Ok(())
    }
}

impl PersistenceSink for SledSink {
    async fn record(&self, update: &PlayerUpdate) -> Result<(), SinkError> {
        self.upsert(update)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DbRequest<'a> {
    action: &'static str,
    wallet: &'a WalletId,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_banned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tours_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_spectator: Option<bool>,
}

impl<'a> From<&'a PlayerUpdate> for DbRequest<'a> {
    fn from(update: &'a PlayerUpdate) -> Self {
        let mut request = DbRequest {
            action: update.action(),
            wallet: update.wallet(),
            username: None,
            is_banned: None,
            tours_balance: None,
            is_spectator: None,
        };
        match update {
            PlayerUpdate::Username { username, .. } => request.username = Some(username.as_str()),
            PlayerUpdate::Banned { banned, .. } => request.is_banned = Some(*banned),
            PlayerUpdate::Balance { balance, .. } => {
                request.tours_balance = Some(balance.to_string())
            }
            PlayerUpdate::Spectator { spectator, .. } => request.is_spectator = Some(*spectator),
        }
        request
    }
}

#[derive(Debug, Default, Deserialize)]
struct DbResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Posts updates to the database route of the web app.
#[derive(Clone, Debug)]
pub struct HttpSink {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSink {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SinkError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base_url, http })
    }
}

impl PersistenceSink for HttpSink {
    async fn record(&self, update: &PlayerUpdate) -> Result<(), SinkError> {
        let url = format!("{}/db", self.base_url);
        let res = self
            .http
            .post(url)
            .json(&DbRequest::from(update))
            .send()
            .await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        if !status.is_success() {
            return Err(SinkError::Rejected(format!(
                "{status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        let response: DbResponse = serde_json::from_slice(&bytes).unwrap_or_default();
        match response.error {
            Some(error) => Err(SinkError::Rejected(error)),
            None => Ok(()),
        }
    }
}

pub enum Persistence {
    Disabled(NoopSink),
    Sled(SledSink),
    Http(HttpSink),
}

impl PersistenceSink for Persistence {
    async fn record(&self, update: &PlayerUpdate) -> Result<(), SinkError> {
        match self {
            Persistence::Disabled(sink) => sink.record(update).await,
            Persistence::Sled(sink) => sink.record(update).await,
            Persistence::Http(sink) => sink.record(update).await,
        }
    }
}
