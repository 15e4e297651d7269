//! Scripted collaborators for driving the sync client end to end over
//! in-memory streams.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::prelude::*;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::block_service::{BlockData, BlockService};
use crate::chain::{decode_header, BlockHeader, Tipset, TipsetKey};
use crate::client::BlockSync;
use crate::clock::{Clock, SystemClock};
use crate::constants::{BLOCKSYNC_PROTOCOL_ID, GRAPHSYNC_PROTOCOL_ID};
use crate::graphsync::GraphExchange;
use crate::host::{Host, PeerEvent, PeerManager, RawStream};
use crate::id::{Cid, PeerId};
use crate::protocol::{BlockSyncRequest, BlockSyncResponse, RawBytes, Status, TipsetBundle};
use crate::{Error, Result};

/// What a scripted peer does when the client knocks.
#[derive(Clone)]
pub enum PeerBehavior {
    /// Answer every request with this response.
    Respond(BlockSyncResponse),
    /// The host holds no connection to this peer.
    NoConnection,
    /// Cancel the given token, then fail the stream open.
    FailAndCancel(CancellationToken),
    /// The peer advertises no sync protocol at all.
    Unsupported,
    /// The peer advertises only the graph transfer protocol.
    GraphsyncOnly,
}

impl PeerBehavior {
    fn supported(&self) -> Vec<&'static str> {
        match self {
            PeerBehavior::Unsupported => vec![],
            PeerBehavior::GraphsyncOnly => vec![GRAPHSYNC_PROTOCOL_ID],
            _ => vec![BLOCKSYNC_PROTOCOL_ID, GRAPHSYNC_PROTOCOL_ID],
        }
    }
}

pub struct MockHost {
    behaviors: Mutex<HashMap<PeerId, PeerBehavior>>,
    contacted: Mutex<Vec<PeerId>>,
    tags: Mutex<Vec<(PeerId, &'static str, u32)>>,
}

impl MockHost {
    pub fn new() -> Arc<MockHost> {
        Arc::new(MockHost {
            behaviors: Mutex::new(HashMap::new()),
            contacted: Mutex::new(vec![]),
            tags: Mutex::new(vec![]),
        })
    }

    pub fn script(&self, peer: PeerId, behavior: PeerBehavior) {
        self.behaviors.lock().unwrap().insert(peer, behavior);
    }

    /// Peers whose stream the client tried to open, in order.
    pub fn contacted(&self) -> Vec<PeerId> {
        self.contacted.lock().unwrap().clone()
    }

    pub fn tags(&self) -> Vec<(PeerId, &'static str, u32)> {
        self.tags.lock().unwrap().clone()
    }

    fn behavior(&self, peer: PeerId) -> PeerBehavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(&peer)
            .cloned()
            .unwrap_or(PeerBehavior::NoConnection)
    }
}

#[async_trait]
impl Host for MockHost {
    async fn supports_protocols(
        &self,
        peer: PeerId,
        protocols: &[&'static str],
    ) -> Result<Vec<&'static str>> {
        let advertised = self.behavior(peer).supported();
        // order-preserving intersection with the query
        Ok(protocols
            .iter()
            .copied()
            .filter(|protocol| advertised.contains(protocol))
            .collect())
    }

    async fn new_stream(&self, peer: PeerId, _protocol: &'static str) -> Result<RawStream> {
        self.contacted.lock().unwrap().push(peer);
        match self.behavior(peer) {
            PeerBehavior::Respond(response) => Ok(serve_response(response)),
            PeerBehavior::FailAndCancel(token) => {
                token.cancel();
                Err(Error::IO(io::Error::new(io::ErrorKind::ConnectionRefused, "no connection")))
            }
            _ => Err(Error::IO(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no connection",
            ))),
        }
    }

    fn tag_peer(&self, peer: PeerId, tag: &'static str, weight: u32) {
        self.tags.lock().unwrap().push((peer, tag, weight));
    }
}

// One-shot server: reads the request frame, answers with `response`, closes.
fn serve_response(response: BlockSyncResponse) -> RawStream {
    let (near, far) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let (read, write) = tokio::io::split(far);
        let mut reader = FramedRead::new(read, LengthDelimitedCodec::new());
        let mut writer = FramedWrite::new(write, LengthDelimitedCodec::new());

        if let Some(Ok(frame)) = reader.next().await {
            let request: BlockSyncRequest =
                serde_cbor::from_slice(&frame).expect("well-formed request frame");
            assert!(!request.start.is_empty());

            let encoded = serde_cbor::to_vec(&response).expect("encodable response");
            let _ = writer.send(Bytes::from(encoded)).await;
        }
    });
    Box::new(near)
}

pub struct MockPeerManager {
    subscription: Mutex<Option<mpsc::Receiver<PeerEvent>>>,
}

impl MockPeerManager {
    pub fn new() -> (Arc<MockPeerManager>, mpsc::Sender<PeerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(MockPeerManager { subscription: Mutex::new(Some(rx)) }), tx)
    }
}

impl PeerManager for MockPeerManager {
    fn subscribe(&self) -> mpsc::Receiver<PeerEvent> {
        match self.subscription.lock().unwrap().take() {
            Some(subscription) => subscription,
            None => {
                let (_tx, rx) = mpsc::channel(1);
                rx
            }
        }
    }
}

/// Serves a scripted list of blocks, in script order, then closes.
pub struct ScriptedBlockService {
    blocks: Mutex<Vec<BlockData>>,
}

impl ScriptedBlockService {
    pub fn new() -> Arc<ScriptedBlockService> {
        Arc::new(ScriptedBlockService { blocks: Mutex::new(vec![]) })
    }

    pub fn serve(&self, blocks: Vec<BlockData>) {
        *self.blocks.lock().unwrap() = blocks;
    }
}

#[async_trait]
impl BlockService for ScriptedBlockService {
    async fn get_block(&self, _ctx: &CancellationToken, cid: Cid) -> Result<BlockData> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| block.cid == cid)
            .cloned()
            .ok_or(Error::IncompleteFetch)
    }

    async fn get_blocks(
        &self,
        _ctx: &CancellationToken,
        _cids: Vec<Cid>,
    ) -> Result<mpsc::Receiver<BlockData>> {
        let blocks = self.blocks.lock().unwrap().clone();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for block in blocks {
                if tx.send(block).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

pub struct StubGraphExchange {
    response: Mutex<Option<BlockSyncResponse>>,
    calls: Mutex<usize>,
}

impl StubGraphExchange {
    pub fn new() -> Arc<StubGraphExchange> {
        Arc::new(StubGraphExchange { response: Mutex::new(None), calls: Mutex::new(0) })
    }

    pub fn respond_with(&self, response: BlockSyncResponse) {
        *self.response.lock().unwrap() = Some(response);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl GraphExchange for StubGraphExchange {
    async fn fetch_tipsets(
        &self,
        _ctx: &CancellationToken,
        peer: PeerId,
        _request: &BlockSyncRequest,
    ) -> Result<BlockSyncResponse> {
        *self.calls.lock().unwrap() += 1;
        self.response.lock().unwrap().clone().ok_or(Error::NoProtocol(peer))
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

/// A sync client wired to scripted collaborators.
pub struct TestNode {
    pub client: BlockSync,
    pub host: Arc<MockHost>,
    pub service: Arc<ScriptedBlockService>,
    pub graph: Arc<StubGraphExchange>,
    pub events: mpsc::Sender<PeerEvent>,
}

pub fn test_node() -> TestNode {
    let host = MockHost::new();
    let service = ScriptedBlockService::new();
    let graph = StubGraphExchange::new();
    let (peer_manager, events) = MockPeerManager::new();

    let client = BlockSync::new(
        service.clone(),
        host.clone(),
        peer_manager,
        graph.clone(),
        Arc::new(SystemClock),
    );
    TestNode { client, host, service, graph, events }
}

/// Builds a valid chain of `len` tipsets of `width` sibling blocks and
/// returns the key of its head tipset together with the response bundles
/// and the tipsets they decode to, both newest first.
pub fn make_chain(len: usize, width: u64) -> (TipsetKey, Vec<TipsetBundle>, Vec<Tipset>) {
    let mut parents = TipsetKey::new(vec![Cid::new(b"genesis")]);
    let mut bundles = Vec::with_capacity(len);
    let mut tipsets = Vec::with_capacity(len);
    for height in 0..len as u64 {
        let raws: Vec<Vec<u8>> = (0..width)
            .map(|lane| BlockHeader::new(parents.clone(), height, lane).encode().unwrap())
            .collect();
        let tipset =
            Tipset::new(raws.iter().map(|raw| decode_header(raw).unwrap()).collect()).unwrap();
        parents = tipset.key();
        tipsets.push(tipset);
        bundles.push(TipsetBundle {
            blocks: raws.into_iter().map(RawBytes).collect(),
            ..TipsetBundle::default()
        });
    }
    bundles.reverse();
    tipsets.reverse();
    let start = tipsets[0].key();
    (start, bundles, tipsets)
}

pub fn ok_response(chain: Vec<TipsetBundle>) -> BlockSyncResponse {
    BlockSyncResponse { status: Status::Ok, message: String::new(), chain }
}

pub fn status_response(status: Status, message: &str) -> BlockSyncResponse {
    BlockSyncResponse { status, message: message.to_string(), chain: vec![] }
}
