use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use shared::{
    domain::{RoomId, UserId},
    protocol::{
        ClientFrame, ClientFrameKind, MessagePayload, OutboundMessage, PresenceSnapshot,
        ServerFrame,
    },
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::header::AUTHORIZATION, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::warn;
use url::Url;

use crate::{error::ChannelError, session::Credential};

/// Inbound signals from the open room's channel.
#[derive(Debug, Clone)]
pub enum RoomSignal {
    Message(MessagePayload),
    Online(UserId),
    Offline(UserId),
    /// The transport ended; pending acknowledgments have been dropped.
    Closed,
}

#[async_trait]
pub trait RoomTransport: Send + Sync {
    async fn connect(&self, credential: &Credential) -> Result<Arc<dyn RoomConnection>>;
}

#[async_trait]
pub trait RoomConnection: Send + Sync {
    /// Joins a room; the ack carries the presence snapshot, normalized to a
    /// plain id list whichever wire shape the server chose.
    async fn join(&self, room_id: RoomId) -> Result<Vec<UserId>>;

    /// Best-effort server notification, written without waiting for a
    /// reply so it still goes out during abrupt teardown.
    async fn leave(&self);

    /// Fire-and-acknowledge: resolves with the server-echoed stored
    /// message, or fails if the transport drops first. Never retried here.
    async fn send(&self, message: OutboundMessage) -> Result<MessagePayload>;

    fn signals(&self) -> broadcast::Receiver<RoomSignal>;

    async fn close(&self);
}

pub struct MissingRoomTransport;

#[async_trait]
impl RoomTransport for MissingRoomTransport {
    async fn connect(&self, _credential: &Credential) -> Result<Arc<dyn RoomConnection>> {
        Err(ChannelError::Unavailable.into())
    }
}

/// Websocket transport speaking the JSON frame protocol of the realtime
/// backend's `/ws/messages` endpoint.
pub struct WsRoomTransport {
    base: Url,
}

impl WsRoomTransport {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

#[async_trait]
impl RoomTransport for WsRoomTransport {
    async fn connect(&self, credential: &Credential) -> Result<Arc<dyn RoomConnection>> {
        let url = websocket_url(&self.base)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .context("invalid websocket request")?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {}", credential.token)
                .parse()
                .context("credential token is not a valid header value")?,
        );
        let (socket, _) = connect_async(request)
            .await
            .map_err(|err| ChannelError::Connect(err.to_string()))?;
        Ok(WsRoomConnection::start(socket).await)
    }
}

fn websocket_url(base: &Url) -> Result<Url> {
    let mut url = base.join("ws/messages").context("invalid websocket path")?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(anyhow!("unsupported base scheme: {other}")),
    };
    url.set_scheme(scheme)
        .map_err(|()| anyhow!("cannot derive websocket url from {base}"))?;
    Ok(url)
}

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type PendingAcks = Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>;

pub struct WsRoomConnection {
    writer: Mutex<WsWriter>,
    pending: Arc<PendingAcks>,
    next_seq: AtomicU64,
    signals: broadcast::Sender<RoomSignal>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsRoomConnection {
    async fn start(socket: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Arc<Self> {
        let (writer, mut reader) = socket.split();
        let (signals, _) = broadcast::channel(256);
        let pending: Arc<PendingAcks> = Arc::new(Mutex::new(HashMap::new()));

        let connection = Arc::new(Self {
            writer: Mutex::new(writer),
            pending: Arc::clone(&pending),
            next_seq: AtomicU64::new(1),
            signals: signals.clone(),
            reader: Mutex::new(None),
        });

        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => route_frame(frame, &pending, &signals).await,
                        Err(err) => warn!("room channel: invalid server frame: {err}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("room channel: receive failed: {err}");
                        break;
                    }
                }
            }
            // Dropping the senders fails every waiting ack.
            pending.lock().await.clear();
            let _ = signals.send(RoomSignal::Closed);
        });
        *connection.reader.lock().await = Some(task);
        connection
    }

    async fn write_frame(&self, frame: &ClientFrame) -> Result<()> {
        let text = serde_json::to_string(frame).context("frame serialization failed")?;
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|err| ChannelError::Closed(err.to_string()).into())
    }

    async fn request(&self, kind: ClientFrameKind) -> Result<serde_json::Value> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);
        if let Err(err) = self.write_frame(&ClientFrame { seq, kind }).await {
            self.pending.lock().await.remove(&seq);
            return Err(err);
        }
        rx.await.map_err(|_| ChannelError::AckDropped.into())
    }
}

async fn route_frame(
    frame: ServerFrame,
    pending: &PendingAcks,
    signals: &broadcast::Sender<RoomSignal>,
) {
    match frame {
        ServerFrame::Ack { seq, body } => {
            if let Some(tx) = pending.lock().await.remove(&seq) {
                let _ = tx.send(body);
            } else {
                warn!(seq, "room channel: ack with no waiting request");
            }
        }
        ServerFrame::ReceiveMessage { message } => {
            let _ = signals.send(RoomSignal::Message(message));
        }
        ServerFrame::Online { user_id } => {
            let _ = signals.send(RoomSignal::Online(user_id));
        }
        ServerFrame::Offline { user_id } => {
            let _ = signals.send(RoomSignal::Offline(user_id));
        }
        ServerFrame::Error(api_error) => {
            warn!("room channel: server error: {}", api_error.message);
        }
    }
}

#[async_trait]
impl RoomConnection for WsRoomConnection {
    async fn join(&self, room_id: RoomId) -> Result<Vec<UserId>> {
        let body = self.request(ClientFrameKind::JoinRoom { room_id }).await?;
        if body.is_null() {
            return Ok(Vec::new());
        }
        let snapshot: PresenceSnapshot =
            serde_json::from_value(body).map_err(|err| ChannelError::BadAck(err.to_string()))?;
        Ok(snapshot.into_user_ids())
    }

    async fn leave(&self) {
        let frame = ClientFrame {
            seq: 0,
            kind: ClientFrameKind::LeaveRoom,
        };
        if let Err(err) = self.write_frame(&frame).await {
            warn!("room channel: leave notification failed: {err}");
        }
    }

    async fn send(&self, message: OutboundMessage) -> Result<MessagePayload> {
        let body = self.request(ClientFrameKind::SendMessage(message)).await?;
        serde_json::from_value(body)
            .map_err(|err| ChannelError::BadAck(err.to_string()).into())
    }

    fn signals(&self) -> broadcast::Receiver<RoomSignal> {
        self.signals.subscribe()
    }

    async fn close(&self) {
        self.leave().await;
        if let Err(err) = self.writer.lock().await.close().await {
            warn!("room channel: close failed: {err}");
        }
        if let Some(task) = self.reader.lock().await.take() {
            task.abort();
        }
    }
}
