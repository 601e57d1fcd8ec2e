use crate::{Error, Result};
use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use plinko_types::Frame;
use std::{fmt, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    time::timeout,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info};
use url::Url;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Everything needed to open a session: where, and as whom.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub uri: String,
    pub namespace: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("uri", &self.uri)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl Credential {
    pub fn new(
        token: impl Into<String>,
        uri: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            uri: uri.into(),
            namespace: namespace.into(),
        }
    }

    /// WebSocket URL of the namespace: `http(s)` becomes `ws(s)` and the
    /// namespace is appended to the path.
    pub fn endpoint(&self) -> Result<Url> {
        let base = Url::parse(&self.uri)?;
        let ws_scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            scheme => {
                return Err(Error::InvalidScheme(scheme.to_string()));
            }
        };

        let mut url = base.clone();
        url.set_scheme(ws_scheme)
            .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;

        let namespace = self.namespace.trim_matches('/');
        if !namespace.is_empty() {
            let path = format!("{}/{}", url.path().trim_end_matches('/'), namespace);
            url.set_path(&path);
        }
        Ok(url)
    }
}

/// What the transport reports besides frames.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Frame(Frame),
    /// Transport-level error; the connection may still be usable.
    Error(String),
    /// A message arrived that is not a valid envelope.
    Malformed(String),
}

/// One live connection. Dropping it closes the transport.
///
/// `recv` returning `None` means the transport disconnected.
pub struct Connection {
    outbound: mpsc::Sender<Frame>,
    inbound: mpsc::Receiver<Inbound>,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<Frame>, inbound: mpsc::Receiver<Inbound>) -> Self {
        Self { outbound, inbound }
    }

    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Handle for sending without borrowing the connection.
    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.outbound.clone()
    }
}

/// Opens connections on demand. Implementations never reconnect on their own.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, credential: Credential) -> BoxFuture<'static, Result<Connection>>;
}

/// WebSocket transport carrying JSON [Frame]s in text messages.
#[derive(Clone, Debug)]
pub struct WsConnector {
    dial_timeout: Duration,
    channel_capacity: usize,
}

impl WsConnector {
    pub fn new(dial_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// A `channel_capacity` of `0` uses the default capacity.
    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = if channel_capacity == 0 {
            DEFAULT_CHANNEL_CAPACITY
        } else {
            channel_capacity
        };
        self
    }
}

impl Connector for WsConnector {
    fn connect(&self, credential: Credential) -> BoxFuture<'static, Result<Connection>> {
        let dial_timeout = self.dial_timeout;
        let capacity = self.channel_capacity;
        Box::pin(async move {
            let url = credential.endpoint()?;
            let mut request = url.as_str().into_client_request()?;
            let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.token))
                .map_err(|_| Error::InvalidToken)?;
            request.headers_mut().insert(AUTHORIZATION, bearer);
            info!(ws_url = %url, "Connecting to session WebSocket");

            let (ws_stream, _) = timeout(dial_timeout, connect_async(request))
                .await
                .map_err(|_| Error::DialTimeout)??;
            info!("WebSocket connected");

            Ok(pump(ws_stream, capacity))
        })
    }
}

/// Move frames between the socket and a pair of channels until either side closes.
fn pump<S>(ws: WebSocketStream<S>, capacity: usize) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(capacity);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = stream.next() => {
                    let inbound = match msg {
                        Some(Ok(Message::Text(text))) => {
                            debug!("Received text message: {} bytes", text.len());
                            match serde_json::from_str::<Frame>(&text) {
                                Ok(frame) => Inbound::Frame(frame),
                                Err(e) => {
                                    error!("Failed to decode frame: {}", e);
                                    Inbound::Malformed(e.to_string())
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("WebSocket closed");
                            break;
                        }
                        Some(Ok(_)) => continue, // Control frames are answered by tungstenite
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            let _ = inbound_tx.send(Inbound::Error(e.to_string())).await;
                            break;
                        }
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        break; // Receiver dropped
                    }
                }
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        debug!("Connection dropped, closing WebSocket");
                        let _ = sink.close().await;
                        break;
                    };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(event = %frame.event, "Failed to encode frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        error!("WebSocket send failed: {}", e);
                        let _ = inbound_tx.send(Inbound::Error(e.to_string())).await;
                        break;
                    }
                }
            }
        }
    });

    Connection::new(outbound_tx, inbound_rx)
}
