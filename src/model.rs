use crate::error::ReadError;
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
    de::{
        self,
        Visitor,
    },
};
use std::{
    collections::HashMap,
    fmt,
};

/// Smallest-unit amount of one whole $TOURS token.
pub const TOKEN_UNIT: u128 = 1_000_000_000_000_000_000;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234...` style prefix used when a player has no display name.
    pub fn short(&self) -> String {
        let prefix: String = self.0.chars().take(6).collect();
        format!("{prefix}...")
    }

    /// Chain readers report "no target" as the zero address.
    fn is_unset(raw: &str) -> bool {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        digits.chars().all(|c| c == '0')
    }

    pub fn from_reported(raw: Option<String>) -> Option<Self> {
        raw.filter(|r| !Self::is_unset(r)).map(Self::new)
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for WalletId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub wallet_id: WalletId,
    #[serde(default)]
    pub display_name: String,
    #[serde(with = "raw_amount", default)]
    pub token_balance: u128,
    #[serde(default)]
    pub is_banned: bool,
    #[serde(default)]
    pub is_spectator: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<u64>,
}

impl PlayerRecord {
    pub fn new(wallet_id: WalletId, display_name: impl Into<String>) -> Self {
        Self {
            wallet_id,
            display_name: display_name.into(),
            token_balance: 0,
            is_banned: false,
            is_spectator: false,
            external_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.is_banned && !self.is_spectator
    }

    pub fn label(&self) -> String {
        if self.display_name.is_empty() {
            self.wallet_id.short()
        } else {
            self.display_name.clone()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundState {
    time_remaining_seconds: u64,
    current_target: Option<WalletId>,
}

impl RoundState {
    /// A round with no time left never carries a target.
    pub fn new(time_remaining_seconds: u64, current_target: Option<WalletId>) -> Self {
        let current_target = if time_remaining_seconds == 0 {
            None
        } else {
            current_target
        };
        Self {
            time_remaining_seconds,
            current_target,
        }
    }

    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.time_remaining_seconds > 0
    }

    pub fn time_remaining_seconds(&self) -> u64 {
        self.time_remaining_seconds
    }

    pub fn current_target(&self) -> Option<&WalletId> {
        self.current_target.as_ref()
    }

    pub(crate) fn retarget(&mut self, target: Option<WalletId>) {
        if self.is_active() {
            self.current_target = target;
        }
    }

    pub fn clock(&self) -> String {
        let secs = self.time_remaining_seconds;
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

/// Partial update to a [`PlayerRecord`]; unset fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerPatch {
    pub display_name: Option<String>,
    pub token_balance: Option<u128>,
    pub token_credit: Option<u128>,
    pub is_banned: Option<bool>,
    pub is_spectator: Option<bool>,
    pub external_id: Option<u64>,
}

impl PlayerPatch {
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn token_balance(mut self, balance: u128) -> Self {
        self.token_balance = Some(balance);
        self
    }

    pub fn token_credit(mut self, credit: u128) -> Self {
        self.token_credit = Some(credit);
        self
    }

    pub fn banned(mut self, banned: bool) -> Self {
        self.is_banned = Some(banned);
        self
    }

    pub fn spectator(mut self, spectator: bool) -> Self {
        self.is_spectator = Some(spectator);
        self
    }

    pub fn external_id(mut self, external_id: u64) -> Self {
        self.external_id = Some(external_id);
        self
    }

    pub fn apply_to(&self, record: &mut PlayerRecord) {
        if let Some(name) = &self.display_name {
            record.display_name = name.clone();
        }
        if let Some(balance) = self.token_balance {
            record.token_balance = balance;
        }
        if let Some(credit) = self.token_credit {
            record.token_balance = record.token_balance.saturating_add(credit);
        }
        if let Some(banned) = self.is_banned {
            record.is_banned = banned;
        }
        if let Some(spectator) = self.is_spectator {
            record.is_spectator = spectator;
        }
        // external ids are write-once
        if record.external_id.is_none() {
            record.external_id = self.external_id;
        }
    }
}

/// Players keyed by wallet, iterated in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerTable {
    records: Vec<PlayerRecord>,
    index: HashMap<WalletId, usize>,
}

impl PlayerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = PlayerRecord>) -> Self {
        let mut table = Self::new();
        for record in records {
            table.upsert(record);
        }
        table
    }

    /// Last write wins; an existing wallet keeps its position.
    pub fn upsert(&mut self, record: PlayerRecord) {
        match self.index.get(&record.wallet_id) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.index.insert(record.wallet_id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn entry(&mut self, wallet_id: &WalletId) -> &mut PlayerRecord {
        let pos = match self.index.get(wallet_id) {
            Some(&pos) => pos,
            None => {
                let pos = self.records.len();
                self.index.insert(wallet_id.clone(), pos);
                self.records.push(PlayerRecord::new(wallet_id.clone(), ""));
                pos
            }
        };
        &mut self.records[pos]
    }

    pub fn get(&self, wallet_id: &WalletId) -> Option<&PlayerRecord> {
        self.index.get(wallet_id).map(|&pos| &self.records[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerRecord> {
        self.records.iter_mut()
    }

    pub fn wallet_ids(&self) -> impl Iterator<Item = &WalletId> {
        self.records.iter().map(|r| &r.wallet_id)
    }

    pub fn records(&self) -> &[PlayerRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Complete read of the game at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GameSnapshot {
    pub round: RoundState,
    pub players: PlayerTable,
}

/// Aggregated contract read as returned by the state source: parallel arrays
/// indexed like `player_ids`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateReading {
    pub time_left: Uint,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub player_ids: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub banned_flags: Vec<bool>,
    #[serde(default)]
    pub balances: Vec<Uint>,
    #[serde(default)]
    pub spectator_flags: Vec<bool>,
    #[serde(default)]
    pub external_ids: Vec<Uint>,
}

impl TryFrom<GameStateReading> for GameSnapshot {
    type Error = ReadError;

    fn try_from(reading: GameStateReading) -> Result<Self, Self::Error> {
        let expected = reading.player_ids.len();
        let columns = [
            ("names", reading.names.len()),
            ("bannedFlags", reading.banned_flags.len()),
            ("balances", reading.balances.len()),
            ("spectatorFlags", reading.spectator_flags.len()),
            ("externalIds", reading.external_ids.len()),
        ];
        if let Some((column, len)) = columns.iter().find(|(_, len)| *len != expected) {
            return Err(ReadError::Malformed(format!(
                "{column} has {len} entries, expected {expected}"
            )));
        }
        let time_left = u64::try_from(reading.time_left.0).map_err(|_| {
            ReadError::Malformed(format!("timeLeft {} exceeds u64", reading.time_left.0))
        })?;

        let mut players = PlayerTable::new();
        let rows = reading
            .player_ids
            .into_iter()
            .zip(reading.names)
            .zip(reading.banned_flags)
            .zip(reading.balances)
            .zip(reading.spectator_flags)
            .zip(reading.external_ids);
        for (((((wallet, name), banned), balance), spectator), external) in rows {
            let external_id = match u64::try_from(external.0) {
                Ok(0) => None,
                Ok(id) => Some(id),
                Err(_) => {
                    return Err(ReadError::Malformed(format!(
                        "external id {} for {wallet} exceeds u64",
                        external.0
                    )));
                }
            };
            players.upsert(PlayerRecord {
                wallet_id: WalletId::new(wallet),
                display_name: name,
                token_balance: balance.0,
                is_banned: banned,
                is_spectator: spectator,
                external_id,
            });
        }

        Ok(GameSnapshot {
            round: RoundState::new(time_left, WalletId::from_reported(reading.target)),
            players,
        })
    }
}

/// Unsigned chain integer, accepted as a JSON number or a decimal string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Uint(pub u128);

impl From<u128> for Uint {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl Serialize for Uint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Uint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UintVisitor)
    }
}

struct UintVisitor;

impl Visitor<'_> for UintVisitor {
    type Value = Uint;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer or decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Uint, E> {
        Ok(Uint(v.into()))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Uint, E> {
        Ok(Uint(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Uint, E> {
        u128::try_from(v)
            .map(Uint)
            .map_err(|_| E::custom(format!("negative amount {v}")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Uint, E> {
        if v.is_finite() && v >= 0.0 && v.fract() == 0.0 {
            Ok(Uint(v as u128))
        } else {
            Err(E::custom(format!("amount {v} is not a non-negative integer")))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Uint, E> {
        v.trim()
            .parse::<u128>()
            .map(Uint)
            .map_err(|e| E::custom(format!("invalid amount {v:?}: {e}")))
    }
}

/// Balances travel as decimal strings so 18-decimal amounts survive JSON.
pub(crate) mod raw_amount {
    use super::Uint;
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
    };

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        Uint::deserialize(deserializer).map(|u| u.0)
    }
}

/// Renders a raw balance in whole tokens, e.g. `1.5`.
pub fn format_tokens(raw: u128) -> String {
    let whole = raw / TOKEN_UNIT;
    let frac = raw % TOKEN_UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:018}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
