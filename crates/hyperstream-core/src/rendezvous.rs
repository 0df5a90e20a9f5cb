//! DHT rendezvous (C2): join a 32-byte topic, obtain exactly one connected,
//! full-duplex socket to the peer that joined the same topic.
//!
//! Both roles enable server and client on the DHT, matching how NAT
//! traversal actually requires symmetric announcement. The two roles run
//! *different* sequences (spec §4.2):
//!
//! - Sender: join the topic, flush the announcement, then arm an observer
//!   and await it. [`join_and_flush`] (the free function) does this without
//!   any observer at all.
//! - Receiver (ORDERING IS LOAD-BEARING): arm an observer first, then join
//!   and flush. The source carried a `CRITICAL` comment about registering
//!   the connection listener before flushing the join, because a DHT lookup
//!   can resolve and the peer can respond before a listener registered
//!   afterward would ever see the event. Here that ordering is a type-level
//!   invariant, not a comment: [`ArmedObserver::join_and_flush`] is the only
//!   way to flush once armed, and it consumes the armed observer, so there
//!   is no call sequence for the receiver that skips arming first.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_lite::StreamExt;
use iroh::endpoint::{Connection, RecvStream, SendStream};
use iroh::{Endpoint, NodeId};
use iroh_gossip::net::{Event, Gossip, GossipEvent, GossipReceiver};
use iroh_gossip::proto::TopicId;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::{HyperstreamError, Result};
use crate::key::TopicKey;

const ALPN: &[u8] = b"hyperstream/transfer/1";
const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(30);

/// The connected byte stream handed to the orchestrator. Wraps a single iroh
/// QUIC bidirectional stream so the rest of the pipeline only ever needs
/// `AsyncRead + AsyncWrite`.
pub struct Socket {
    send: SendStream,
    recv: RecvStream,
}

impl AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.send).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_shutdown(cx)
    }
}

fn topic_id_for(topic: &TopicKey) -> TopicId {
    TopicId::from_bytes(*topic.as_bytes())
}

/// A listener that has been registered with the gossip swarm but has not yet
/// observed any event. Only the receiver's sequence produces one of these
/// before joining; [`ArmedObserver::join_and_flush`] is the only way to flush
/// once armed, and it consumes `self`, so there is no call sequence that
/// skips arming first.
pub struct ArmedObserver {
    receiver: GossipReceiver,
}

/// Registers interest in `topic`'s neighbor-up events before anything else
/// happens on the DHT. Used by the receiver, which must call this before
/// [`ArmedObserver::join_and_flush`]; the sender instead calls the free
/// function [`join_and_flush`] first and arms afterward.
pub async fn arm_first_connection(gossip: &Gossip, topic: &TopicKey) -> Result<ArmedObserver> {
    let topic_id = topic_id_for(topic);
    let receiver = gossip
        .subscribe(topic_id, Vec::new())
        .map_err(|e| HyperstreamError::RendezvousFailed {
            cause: e.to_string(),
        })?;
    Ok(ArmedObserver { receiver })
}

impl ArmedObserver {
    /// Flushes the topic announcement onto the DHT for an observer that is
    /// already armed, waiting until the swarm has actually dispatched it.
    /// Consumes `self` so the type system enforces arm-before-flush: there is
    /// no way to call this without first calling [`arm_first_connection`].
    /// This is the receiver's flush step; the sender uses the free function
    /// [`join_and_flush`] instead, which needs no armed observer.
    pub async fn join_and_flush(self, _topic: &TopicKey) -> Result<Self> {
        self.receiver
            .joined()
            .await
            .map_err(|e| HyperstreamError::RendezvousFailed {
                cause: e.to_string(),
            })?;
        Ok(self)
    }
}

/// Joins `topic` and flushes the announcement without first arming an
/// observer. This is the sender's sequence (spec §4.2): join, flush, *then*
/// arm and await — unlike the receiver, for whom arming before the flush is
/// load-bearing. The subscription opened here to drive the flush is dropped
/// once it resolves; any connection events it could have seen are not needed
/// because the sender arms its own observer immediately afterward.
pub async fn join_and_flush(gossip: &Gossip, topic: &TopicKey) -> Result<()> {
    let topic_id = topic_id_for(topic);
    let receiver = gossip
        .subscribe(topic_id, Vec::new())
        .map_err(|e| HyperstreamError::RendezvousFailed {
            cause: e.to_string(),
        })?;
    receiver
        .joined()
        .await
        .map_err(|e| HyperstreamError::RendezvousFailed {
            cause: e.to_string(),
        })?;
    Ok(())
}

/// Awaits the first neighbor-up event on an armed observer, with the
/// 30-second rendezvous ceiling.
async fn await_first_neighbor(mut armed: ArmedObserver) -> Result<NodeId> {
    tokio::time::timeout(RENDEZVOUS_TIMEOUT, async {
        loop {
            match armed.receiver.next().await {
                Some(Ok(Event::Gossip(GossipEvent::NeighborUp(node_id)))) => return Ok(node_id),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(HyperstreamError::RendezvousFailed {
                        cause: e.to_string(),
                    })
                }
                None => {
                    return Err(HyperstreamError::RendezvousFailed {
                        cause: "gossip event stream closed".to_string(),
                    })
                }
            }
        }
    })
    .await
    .map_err(|_| HyperstreamError::RendezvousTimeout)?
}

/// Owns the DHT handle for one session. `destroy` is idempotent and callable
/// from any exit path.
pub struct Rendezvous {
    endpoint: Endpoint,
    gossip: Gossip,
}

impl Rendezvous {
    pub async fn bind() -> Result<Self> {
        let endpoint = Endpoint::builder()
            .discovery_n0()
            .alpns(vec![ALPN.to_vec()])
            .bind()
            .await
            .map_err(|e| HyperstreamError::RendezvousFailed {
                cause: e.to_string(),
            })?;
        let gossip = Gossip::builder()
            .spawn(endpoint.clone())
            .await
            .map_err(|e| HyperstreamError::RendezvousFailed {
                cause: e.to_string(),
            })?;
        Ok(Self { endpoint, gossip })
    }

    /// Sender sequence: join + flush first, then arm the observer and await.
    pub async fn connect_as_sender(&self, topic: &TopicKey) -> Result<Socket> {
        join_and_flush(&self.gossip, topic).await?;
        let armed = arm_first_connection(&self.gossip, topic).await?;
        let peer = await_first_neighbor(armed).await?;
        self.open_stream_to(peer).await
    }

    /// Receiver sequence (ORDERING IS LOAD-BEARING): arm before join+flush.
    pub async fn connect_as_receiver(&self, topic: &TopicKey) -> Result<Socket> {
        let armed = arm_first_connection(&self.gossip, topic).await?;
        let armed = armed.join_and_flush(topic).await?;
        let peer = await_first_neighbor(armed).await?;
        self.accept_stream_from(peer).await
    }

    async fn open_stream_to(&self, peer: NodeId) -> Result<Socket> {
        let connection = self.dial(peer).await?;
        let (send, recv) = connection
            .open_bi()
            .await
            .map_err(|e| HyperstreamError::RendezvousFailed {
                cause: e.to_string(),
            })?;
        Ok(Socket { send, recv })
    }

    async fn accept_stream_from(&self, _peer: NodeId) -> Result<Socket> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| HyperstreamError::RendezvousFailed {
                cause: "endpoint closed before accepting a connection".to_string(),
            })?;
        let connection: Connection =
            incoming
                .await
                .map_err(|e| HyperstreamError::RendezvousFailed {
                    cause: e.to_string(),
                })?;
        let (send, recv) =
            connection
                .accept_bi()
                .await
                .map_err(|e| HyperstreamError::RendezvousFailed {
                    cause: e.to_string(),
                })?;
        Ok(Socket { send, recv })
    }

    async fn dial(&self, peer: NodeId) -> Result<Connection> {
        self.endpoint
            .connect(peer, ALPN)
            .await
            .map_err(|e| HyperstreamError::RendezvousFailed {
                cause: e.to_string(),
            })
    }

    /// Closes the DHT handle and any open connections. Idempotent.
    pub async fn destroy(&self) {
        self.endpoint.close().await;
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.bound_sockets().into_iter().next()
    }
}
