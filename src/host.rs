//! Interfaces onto the surrounding node: the peer host that owns live
//! connections, and the peer manager that announces peers joining and
//! leaving the network.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::id::PeerId;
use crate::Result;

/// A bidirectional byte stream opened on an existing connection.
pub trait StreamLike: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> StreamLike for T {}

pub type RawStream = Box<dyn StreamLike>;

/// The node's peer host.
///
/// The sync client never dials: `new_stream` must fail when no live
/// connection to the peer exists.
#[async_trait]
pub trait Host: Send + Sync {
    /// Order-preserving intersection of `protocols` with the protocols the
    /// peer advertises.
    async fn supports_protocols(
        &self,
        peer: PeerId,
        protocols: &[&'static str],
    ) -> Result<Vec<&'static str>>;

    /// Opens a stream to `peer` on `protocol` over an existing connection.
    async fn new_stream(&self, peer: PeerId, protocol: &'static str) -> Result<RawStream>;

    /// Tags the peer in the node's connection manager so the connection is
    /// protected from pruning.
    fn tag_peer(&self, peer: PeerId, tag: &'static str, weight: u32);
}

/// Peer lifecycle notifications from the node's peer manager.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PeerEvent {
    Added(PeerId),
    Removed(PeerId),
}

pub trait PeerManager: Send + Sync {
    /// Subscribes to peer lifecycle events.
    fn subscribe(&self) -> mpsc::Receiver<PeerEvent>;
}
