//! In-memory transport for driving a session without a network.

use crate::{
    transport::{Connection, Connector, Credential, Inbound},
    Error, Result,
};
use futures::future::BoxFuture;
use plinko_types::{ClientEvent, Frame, ServerEvent};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct Faults {
    refuse: AtomicUsize,
    hang: AtomicUsize,
}

/// Client side: hands out connections to the paired [MemoryServer].
#[derive(Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<Peer>,
    faults: Arc<Faults>,
}

/// Server side: yields one [Peer] per successful connect.
pub struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<Peer>,
    faults: Arc<Faults>,
}

/// The server's view of one connection. Dropping it disconnects the client.
pub struct Peer {
    pub credential: Credential,
    to_client: mpsc::Sender<Inbound>,
    from_client: mpsc::Receiver<Frame>,
}

pub fn memory() -> (MemoryConnector, MemoryServer) {
    let (accepted, incoming) = mpsc::unbounded_channel();
    let faults = Arc::new(Faults::default());
    (
        MemoryConnector {
            accepted,
            faults: faults.clone(),
        },
        MemoryServer { incoming, faults },
    )
}

impl Connector for MemoryConnector {
    fn connect(&self, credential: Credential) -> BoxFuture<'static, Result<Connection>> {
        let accepted = self.accepted.clone();
        let faults = self.faults.clone();
        Box::pin(async move {
            if take(&faults.hang) {
                std::future::pending::<()>().await;
            }
            if take(&faults.refuse) {
                return Err(Error::ConnectionRefused);
            }
            let (to_client, inbound) = mpsc::channel(CHANNEL_CAPACITY);
            let (outbound, from_client) = mpsc::channel(CHANNEL_CAPACITY);
            accepted
                .send(Peer {
                    credential,
                    to_client,
                    from_client,
                })
                .map_err(|_| Error::ConnectionRefused)?;
            Ok(Connection::new(outbound, inbound))
        })
    }
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<Peer> {
        self.incoming.recv().await
    }

    pub fn try_accept(&mut self) -> Option<Peer> {
        self.incoming.try_recv().ok()
    }

    /// Fail the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.faults.refuse.store(n, Ordering::SeqCst);
    }

    /// Never complete the next `n` connection attempts.
    pub fn hang_next(&self, n: usize) {
        self.faults.hang.store(n, Ordering::SeqCst);
    }
}

impl Peer {
    pub async fn send(&self, event: ServerEvent) -> Result<()> {
        self.send_frame(event.into_frame()).await
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.inject(Inbound::Frame(frame)).await
    }

    /// Deliver anything the transport could report, including errors.
    pub async fn inject(&self, inbound: Inbound) -> Result<()> {
        self.to_client
            .send(inbound)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next decodable client event, skipping anything else.
    pub async fn recv_event(&mut self) -> Option<ClientEvent> {
        while let Some(frame) = self.recv().await {
            if let Ok(Some(event)) = ClientEvent::decode(frame) {
                return Some(event);
            }
        }
        None
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// True once the client side dropped its connection.
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
