use crate::{
    error::ReadError,
    model::{
        GameSnapshot,
        GameStateReading,
    },
};
use std::time::Duration;

/// Authoritative read of the whole game, typically an aggregated contract call.
pub trait RemoteStateSource: Send + Sync + 'static {
    fn fetch_game_state(&self) -> impl Future<Output = Result<GameSnapshot, ReadError>> + Send;
}

#[derive(Clone, Debug)]
pub struct HttpStateSource {
    base_url: String,
    http: reqwest::Client,
}

impl HttpStateSource {
    /// `timeout` bounds each read, so a stalled API cannot pile up polls.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ReadError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, http })
    }

    pub fn state_url(&self) -> String {
        format!("{}/game/state", self.base_url)
    }
}

impl RemoteStateSource for HttpStateSource {
    async fn fetch_game_state(&self) -> Result<GameSnapshot, ReadError> {
        let res = self.http.get(self.state_url()).send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        if !status.is_success() {
            return Err(ReadError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let reading: GameStateReading = serde_json::from_slice(&bytes)?;
        GameSnapshot::try_from(reading)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn state_url__trailing_slash__is_trimmed() {
        let source =
            HttpStateSource::new("http://localhost:8001/api/", Duration::from_secs(3)).unwrap();
        assert_eq!(source.state_url(), "http://localhost:8001/api/game/state");
    }

    #[tokio::test]
    async fn fetch_game_state__server_never_answers__times_out() {
        // given
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let source =
            HttpStateSource::new(format!("http://{addr}"), Duration::from_millis(200)).unwrap();

        // when
        let result = tokio::time::timeout(Duration::from_secs(5), source.fetch_game_state())
            .await
            .expect("read should give up on its own");

        // then
        assert!(matches!(result, Err(ReadError::Transport(err)) if err.is_timeout()));
        server.abort();
    }
}
