use crate::{
    error::ConfigError,
    model::WalletId,
};
use std::{
    path::PathBuf,
    str::FromStr,
    time::Duration,
};
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8001";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_LOBBY_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound for action and persistence requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub wallet: WalletId,
    pub api_base_url: String,
    pub peer_url: Option<Url>,
    pub persistence: PersistenceTarget,
    pub poll_interval: Duration,
    pub lobby_interval: Duration,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn new(wallet: impl Into<String>) -> Result<Self, ConfigError> {
        let wallet = wallet.into();
        if wallet.trim().is_empty() {
            return Err(ConfigError::EmptyWallet);
        }
        Ok(Self {
            wallet: WalletId::new(wallet.trim()),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            peer_url: None,
            persistence: PersistenceTarget::None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            lobby_interval: DEFAULT_LOBBY_INTERVAL,
            log_dir: None,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "poll" });
        }
        if self.lobby_interval.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "lobby" });
        }
        Ok(())
    }

    /// A state read may span a few polls before it is abandoned.
    pub fn read_timeout(&self) -> Duration {
        self.poll_interval * 3
    }
}

/// Where player changes are mirrored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PersistenceTarget {
    #[default]
    None,
    /// The web app's database route under the API base URL.
    Http,
    Sled(PathBuf),
}

impl FromStr for PersistenceTarget {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "" | "none" => Ok(PersistenceTarget::None),
            "http" => Ok(PersistenceTarget::Http),
            other => match other.strip_prefix("sled:") {
                Some(path) if !path.is_empty() => Ok(PersistenceTarget::Sled(expand_path(path)?)),
                _ => Err(ConfigError::UnknownPersistence(other.to_string())),
            },
        }
    }
}

/// Expands `~` and environment variables.
pub fn expand_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let expanded = shellexpand::full(raw).map_err(|err| ConfigError::Path {
        path: raw.to_string(),
        reason: err.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn new__defaults__point_at_local_api() {
        let config = AppConfig::new(" 0xA ").unwrap();
        assert_eq!(config.wallet, WalletId::from("0xA"));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.lobby_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn new__blank_wallet__rejected() {
        assert!(matches!(AppConfig::new("  "), Err(ConfigError::EmptyWallet)));
    }

    #[test]
    fn validate__zero_poll_interval__rejected() {
        let mut config = AppConfig::new("0xA").unwrap();
        config.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroInterval { name: "poll" })
        ));
    }

    #[test]
    fn read_timeout__follows_poll_interval() {
        let mut config = AppConfig::new("0xA").unwrap();
        assert_eq!(config.read_timeout(), Duration::from_secs(3));
        config.poll_interval = Duration::from_millis(250);
        assert_eq!(config.read_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn persistence_target__parses_known_forms() {
        assert_eq!("none".parse(), Ok(PersistenceTarget::None));
        assert_eq!("http".parse(), Ok(PersistenceTarget::Http));
        assert_eq!(
            "sled:/tmp/banall".parse(),
            Ok(PersistenceTarget::Sled(PathBuf::from("/tmp/banall")))
        );
        assert!("sled:".parse::<PersistenceTarget>().is_err());
        assert!("postgres".parse::<PersistenceTarget>().is_err());
    }
}
