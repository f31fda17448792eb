use crate::{
    error::PeerError,
    model::{
        PlayerRecord,
        WalletId,
    },
};
use futures::{
    SinkExt,
    StreamExt,
    stream::SplitSink,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::{
    Arc,
    atomic::{
        AtomicU64,
        Ordering,
    },
};
use tokio::{
    net::TcpStream,
    sync::{
        broadcast,
        mpsc,
    },
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    connect_async,
    tungstenite::Message,
};
use tracing::{
    debug,
    warn,
};
use url::Url;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Messages exchanged between clients viewing the same lobby.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PeerMessage {
    State {
        players: Vec<PlayerRecord>,
        #[serde(rename = "timeLeft", default, skip_serializing_if = "Option::is_none")]
        time_left: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<WalletId>,
    },
    ChatAppend {
        text: String,
    },
}

impl PeerMessage {
    pub fn chat(text: impl Into<String>) -> Self {
        Self::ChatAppend { text: text.into() }
    }

    pub fn encode(&self) -> Result<String, PeerError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Transport connecting concurrently viewing clients. Delivery is
/// at-most-once and unordered; payloads are handed out raw so malformed ones
/// can be dropped by the consumer.
pub trait PeerChannel: Send {
    fn broadcast(
        &mut self,
        message: &PeerMessage,
    ) -> impl Future<Output = Result<(), PeerError>> + Send;

    /// Next payload from another client, `None` once the channel is closed.
    /// Must be cancel safe.
    fn next_payload(&mut self) -> impl Future<Output = Option<String>> + Send;
}

/// Channel for running without a session: sends go nowhere, nothing arrives.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPeers;

impl PeerChannel for NoPeers {
    async fn broadcast(&mut self, _message: &PeerMessage) -> Result<(), PeerError> {
        Ok(())
    }

    async fn next_payload(&mut self) -> Option<String> {
        std::future::pending().await
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Peer channel over a WebSocket relay that fans text frames out to every
/// connected client.
pub struct WsPeerChannel {
    outgoing: WsSink,
    incoming: mpsc::Receiver<String>,
    reader: JoinHandle<()>,
}

impl Drop for WsPeerChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl WsPeerChannel {
    pub async fn connect(url: &Url) -> Result<Self, PeerError> {
        let (ws, _) = connect_async(url.as_str()).await?;
        let (outgoing, mut stream) = ws.split();
        let (tx, incoming) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("peer relay closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "peer relay read failed");
                        break;
                    }
                }
            }
        });
        Ok(Self {
            outgoing,
            incoming,
            reader,
        })
    }
}

impl PeerChannel for WsPeerChannel {
    async fn broadcast(&mut self, message: &PeerMessage) -> Result<(), PeerError> {
        let payload = message.encode()?;
        self.outgoing.send(Message::Text(payload)).await?;
        Ok(())
    }

    async fn next_payload(&mut self) -> Option<String> {
        self.incoming.recv().await
    }
}

/// In-process fan-out between clients sharing one runtime.
#[derive(Clone)]
pub struct LocalPeerHub {
    sender: broadcast::Sender<(u64, String)>,
    next_id: Arc<AtomicU64>,
}

impl Default for LocalPeerHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPeerHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn join(&self) -> LocalPeer {
        LocalPeer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            sender: self.sender.clone(),
            receiver: self.sender.subscribe(),
        }
    }
}

pub struct LocalPeer {
    id: u64,
    sender: broadcast::Sender<(u64, String)>,
    receiver: broadcast::Receiver<(u64, String)>,
}

impl LocalPeer {
    /// Publishes a payload as-is, without encoding.
    pub fn broadcast_raw(&self, payload: impl Into<String>) {
        // nobody listening is fine: delivery is at-most-once
        let _ = self.sender.send((self.id, payload.into()));
    }
}

impl PeerChannel for LocalPeer {
    async fn broadcast(&mut self, message: &PeerMessage) -> Result<(), PeerError> {
        self.broadcast_raw(message.encode()?);
        Ok(())
    }

    async fn next_payload(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok((from, payload)) if from != self.id => return Some(payload),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "local peer fell behind; messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The peer transport picked at startup.
pub enum PeerLink {
    Offline(NoPeers),
    WebSocket(WsPeerChannel),
    Local(LocalPeer),
}

impl PeerChannel for PeerLink {
    async fn broadcast(&mut self, message: &PeerMessage) -> Result<(), PeerError> {
        match self {
            PeerLink::Offline(peers) => peers.broadcast(message).await,
            PeerLink::WebSocket(peers) => peers.broadcast(message).await,
            PeerLink::Local(peers) => peers.broadcast(message).await,
        }
    }

    async fn next_payload(&mut self) -> Option<String> {
        match self {
            PeerLink::Offline(peers) => peers.next_payload().await,
            PeerLink::WebSocket(peers) => peers.next_payload().await,
            PeerLink::Local(peers) => peers.next_payload().await,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn decode__state_message__reads_players_and_optional_round() {
        // given
        let payload = r#"{"type":"state","players":[
            {"walletId":"0xA","displayName":"alice","tokenBalance":"10","isBanned":false,"isSpectator":true}
        ],"timeLeft":30,"target":"0xA"}"#;

        // when
        let message = PeerMessage::decode(payload).unwrap();

        // then
        let PeerMessage::State {
            players,
            time_left,
            target,
        } = message
        else {
            panic!("expected a state message");
        };
        assert_eq!(players.len(), 1);
        assert!(players[0].is_spectator);
        assert_eq!(players[0].token_balance, 10);
        assert_eq!(time_left, Some(30));
        assert_eq!(target, Some(WalletId::from("0xA")));
    }

    #[test]
    fn encode__chat_append__uses_camel_case_tag() {
        let json = PeerMessage::chat("hello").encode().unwrap();
        assert_eq!(json, r#"{"type":"chatAppend","text":"hello"}"#);
    }

    #[test]
    fn decode__unknown_type__fails() {
        assert!(PeerMessage::decode(r#"{"type":"dance"}"#).is_err());
        assert!(PeerMessage::decode("not json").is_err());
    }

    #[tokio::test]
    async fn local_hub__broadcast__reaches_others_but_not_sender() {
        // given
        let hub = LocalPeerHub::new();
        let mut alice = hub.join();
        let mut bob = hub.join();

        // when
        alice.broadcast(&PeerMessage::chat("hi bob")).await.unwrap();
        bob.broadcast(&PeerMessage::chat("hi alice")).await.unwrap();

        // then
        let to_bob = bob.next_payload().await.unwrap();
        assert_eq!(
            PeerMessage::decode(&to_bob).unwrap(),
            PeerMessage::chat("hi bob")
        );
        let to_alice = alice.next_payload().await.unwrap();
        assert_eq!(
            PeerMessage::decode(&to_alice).unwrap(),
            PeerMessage::chat("hi alice")
        );
    }
}
