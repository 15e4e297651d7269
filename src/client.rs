use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::block_service::BlockService;
use crate::chain::{decode_header, BlockHeader, FullTipset, Tipset, TipsetKey};
use crate::channel::Channel;
use crate::clock::Clock;
use crate::constants::{BLOCKSYNC_PROTOCOL_ID, GRAPHSYNC_PROTOCOL_ID, SHUFFLE_PREFIX};
use crate::fetcher;
use crate::graphsync::GraphExchange;
use crate::host::{Host, PeerManager};
use crate::id::{Cid, PeerId};
use crate::protocol::{
    BlockSyncRequest, BlockSyncResponse, Status, TipsetBundle, OPT_BLOCKS, OPT_MESSAGES,
};
use crate::tracker::PeerTracker;
use crate::validate;
use crate::{Error, Result};

/// Block synchronization client.
///
/// One instance lives for the process and is shared by all sync callers.
/// Requests are dispatched to one peer at a time in preference order; the
/// round trips feed back into the [PeerTracker] so the order adapts.
pub struct BlockSync {
    block_service: Arc<dyn BlockService>,
    graph_exchange: Arc<dyn GraphExchange>,
    host: Arc<dyn Host>,
    tracker: Arc<PeerTracker>,
    clock: Arc<dyn Clock>,
}

impl BlockSync {
    /// Creates the client and subscribes it to peer lifecycle events.
    pub fn new(
        block_service: Arc<dyn BlockService>,
        host: Arc<dyn Host>,
        peer_manager: Arc<dyn PeerManager>,
        graph_exchange: Arc<dyn GraphExchange>,
        clock: Arc<dyn Clock>,
    ) -> BlockSync {
        let tracker = Arc::new(PeerTracker::new(host.clone(), clock.clone()));

        let mut events = peer_manager.subscribe();
        let event_tracker = tracker.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    crate::host::PeerEvent::Added(peer) => event_tracker.add_peer(peer),
                    crate::host::PeerEvent::Removed(peer) => event_tracker.remove_peer(peer),
                }
            }
            debug!("peer event subscription closed");
        });

        BlockSync { block_service, graph_exchange, host, tracker, clock }
    }

    /// Fetches up to `count` tipsets from the network, walking the chain
    /// backwards from `start`, and validates the parent linkage of the
    /// result.
    pub async fn get_blocks(
        &self,
        ctx: &CancellationToken,
        start: &TipsetKey,
        count: u64,
    ) -> Result<Vec<Tipset>> {
        if count == 0 {
            return Ok(vec![]);
        }

        let request = BlockSyncRequest {
            start: start.cids().to_vec(),
            request_length: count,
            options: OPT_BLOCKS,
        };

        let started = self.clock.now();
        let response = self.request_peers(ctx, &request, "GetBlocks").await?;
        let tipsets = validate::tipsets_from_bundles(&response.chain)?;
        self.tracker.log_global_success(self.clock.since(started));
        Ok(tipsets)
    }

    /// Fetches one tipset, blocks and messages both, from a specific peer.
    pub async fn get_full_tipset(
        &self,
        ctx: &CancellationToken,
        peer: PeerId,
        start: &TipsetKey,
    ) -> Result<FullTipset> {
        let request = BlockSyncRequest {
            start: start.cids().to_vec(),
            request_length: 1,
            options: OPT_BLOCKS | OPT_MESSAGES,
        };

        let response = self.send_request_to_peer(ctx, peer, &request).await?;
        match response.status {
            Status::Ok => {
                let bundle = response.chain.first().ok_or(Error::EmptyChain)?;
                validate::full_tipset_from_bundle(bundle)
            }
            status => Err(Error::Status(peer, status, response.message)),
        }
    }

    /// Fetches the message bundles for `count` tipsets walking backwards
    /// from `head`. The caller is expected to hold validated headers for
    /// the range already, so the bundles are returned raw.
    pub async fn get_chain_messages(
        &self,
        ctx: &CancellationToken,
        head: &Tipset,
        count: u64,
    ) -> Result<Vec<TipsetBundle>> {
        let request = BlockSyncRequest {
            start: head.key().cids().to_vec(),
            request_length: count,
            options: OPT_MESSAGES,
        };

        let started = self.clock.now();
        let response = self.request_peers(ctx, &request, "GetChainMessages").await?;
        self.tracker.log_global_success(self.clock.since(started));
        Ok(response.chain)
    }

    /// Fetches a single header by cid through the block service.
    pub async fn get_block(&self, ctx: &CancellationToken, cid: Cid) -> Result<BlockHeader> {
        let block = self.block_service.get_block(ctx, cid).await?;
        decode_header(&block.data)
    }

    pub async fn fetch_messages_by_cids(
        &self,
        ctx: &CancellationToken,
        cids: &[Cid],
    ) -> Result<Vec<crate::chain::Message>> {
        fetcher::fetch_messages_by_cids(&*self.block_service, ctx, cids).await
    }

    pub async fn fetch_signed_messages_by_cids(
        &self,
        ctx: &CancellationToken,
        cids: &[Cid],
    ) -> Result<Vec<crate::chain::SignedMessage>> {
        fetcher::fetch_signed_messages_by_cids(&*self.block_service, ctx, cids).await
    }

    pub fn add_peer(&self, peer: PeerId) {
        self.tracker.add_peer(peer);
    }

    pub fn remove_peer(&self, peer: PeerId) {
        self.tracker.remove_peer(peer);
    }

    /// The tracker shared by every request of this client.
    pub fn tracker(&self) -> &PeerTracker {
        &self.tracker
    }

    // Dispatch core shared by the multi-peer operations: walk the
    // preference-sorted peers, shuffled head first, until one of them
    // returns a usable response. Transport and status failures move on to
    // the next peer; the last of them is surfaced if every peer fails.
    async fn request_peers(
        &self,
        ctx: &CancellationToken,
        request: &BlockSyncRequest,
        operation: &'static str,
    ) -> Result<BlockSyncResponse> {
        let mut peers = self.tracker.pref_sorted_peers();
        if peers.is_empty() {
            return Err(Error::NoPeers);
        }
        shuffle_prefix(&mut peers);

        let mut last_err = None;
        for peer in peers {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.send_request_to_peer(ctx, peer, request).await {
                Ok(response) => {
                    if response.status.is_success() {
                        return Ok(response);
                    }
                    let err = Error::Status(peer, response.status, response.message);
                    warn!("{} peer {} response was an error: {}", operation, peer, err);
                    last_err = Some(err);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    if !matches!(err, Error::NoConn(_)) {
                        warn!("{} request failed for peer {}: {}", operation, peer, err);
                    }
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(err) => Err(Error::AllPeersFailed(operation, Box::new(err))),
            None => Err(Error::NoPeers),
        }
    }

    // Negotiates the sync protocol with the peer and sends the request over
    // whichever transport comes first in the peer's advertised set.
    async fn send_request_to_peer(
        &self,
        ctx: &CancellationToken,
        peer: PeerId,
        request: &BlockSyncRequest,
    ) -> Result<BlockSyncResponse> {
        let supported = self
            .host
            .supports_protocols(peer, &[BLOCKSYNC_PROTOCOL_ID, GRAPHSYNC_PROTOCOL_ID])
            .await?;

        match supported.first().copied() {
            Some(BLOCKSYNC_PROTOCOL_ID) => self.fetch_tipsets(ctx, peer, request).await,
            Some(GRAPHSYNC_PROTOCOL_ID) => {
                let response =
                    self.graph_exchange.fetch_tipsets(ctx, peer, request).await?;
                if response.chain.len() as u64 > request.request_length {
                    return Err(Error::MalformedFrame(
                        peer,
                        "chain longer than requested".to_string(),
                    ));
                }
                Ok(response)
            }
            _ => Err(Error::NoProtocol(peer)),
        }
    }

    // The request/response transport: one framed stream per request.
    async fn fetch_tipsets(
        &self,
        ctx: &CancellationToken,
        peer: PeerId,
        request: &BlockSyncRequest,
    ) -> Result<BlockSyncResponse> {
        let started = self.clock.now();

        let stream = match self.host.new_stream(peer, BLOCKSYNC_PROTOCOL_ID).await {
            Ok(stream) => stream,
            Err(err) => {
                // the host holds no live connection; the peer is unreachable
                debug!("failed to open stream to peer {}: {}", peer, err);
                self.tracker.remove_peer(peer);
                return Err(Error::NoConn(peer));
            }
        };

        let channel: Channel<BlockSyncRequest, BlockSyncResponse> =
            Channel::wrap(stream, self.clock.clone());
        let (mut sender, mut receiver) = channel.split();

        let sent = tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            sent = sender.send(request) => sent,
        };
        if let Err(err) = sent {
            self.tracker.log_failure(peer, self.clock.since(started));
            return Err(Error::Transport(peer, err.to_string()));
        }

        let received = tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            received = receiver.recv() => received,
        };
        let response = match received {
            Ok(Some(response)) => response,
            Ok(None) => {
                self.tracker.log_failure(peer, self.clock.since(started));
                return Err(Error::Transport(
                    peer,
                    "stream closed before response".to_string(),
                ));
            }
            Err(Error::Decode(err)) => {
                self.tracker.log_failure(peer, self.clock.since(started));
                return Err(Error::MalformedFrame(peer, err.to_string()));
            }
            Err(err) => {
                self.tracker.log_failure(peer, self.clock.since(started));
                return Err(Error::Transport(peer, err.to_string()));
            }
        };

        if response.chain.len() as u64 > request.request_length {
            self.tracker.log_failure(peer, self.clock.since(started));
            return Err(Error::MalformedFrame(peer, "chain longer than requested".to_string()));
        }

        if response.status.is_success() {
            self.tracker.log_success(peer, self.clock.since(started));
        } else {
            self.tracker.log_failure(peer, self.clock.since(started));
        }

        debug!(
            "peer {} responded with status {} and {} tipsets",
            peer,
            response.status,
            response.chain.len()
        );
        Ok(response)
    }
}

// Shuffles the first few peers so identical scores do not always pick the
// same peer.
fn shuffle_prefix(peers: &mut [PeerId]) {
    let prefix = std::cmp::min(SHUFFLE_PREFIX, peers.len());
    peers[..prefix].shuffle(&mut rand::thread_rng());
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shuffle_prefix_is_a_permutation() {
        let mut peers: Vec<PeerId> =
            (0u8..8).map(|lane| PeerId::new(&[lane])).collect();
        let original = peers.clone();

        shuffle_prefix(&mut peers);

        // the tail past the shuffle window is untouched
        assert_eq!(&peers[SHUFFLE_PREFIX..], &original[SHUFFLE_PREFIX..]);

        let mut shuffled_head: Vec<PeerId> = peers[..SHUFFLE_PREFIX].to_vec();
        let mut original_head: Vec<PeerId> = original[..SHUFFLE_PREFIX].to_vec();
        shuffled_head.sort();
        original_head.sort();
        assert_eq!(shuffled_head, original_head);
    }

    #[test]
    fn test_shuffle_prefix_short_list() {
        let mut peers = vec![PeerId::one(), PeerId::two()];
        let original = peers.clone();

        shuffle_prefix(&mut peers);

        let mut sorted = peers.clone();
        sorted.sort();
        let mut original_sorted = original;
        original_sorted.sort();
        assert_eq!(sorted, original_sorted);

        let mut empty: Vec<PeerId> = vec![];
        shuffle_prefix(&mut empty);
        assert!(empty.is_empty());
    }
}
