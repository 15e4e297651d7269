//! Interface onto the node's content-addressed block service, used to fetch
//! message payloads by cid.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::id::Cid;
use crate::Result;

/// An opaque block of bytes named by its cid.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockData {
    pub cid: Cid,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait BlockService: Send + Sync {
    /// Fetches a single block.
    async fn get_block(&self, ctx: &CancellationToken, cid: Cid) -> Result<BlockData>;

    /// Fetches a set of blocks. The returned channel yields the blocks in
    /// unspecified order and closes when the service has no more to give,
    /// whether or not every requested block was found.
    async fn get_blocks(
        &self,
        ctx: &CancellationToken,
        cids: Vec<Cid>,
    ) -> Result<mpsc::Receiver<BlockData>>;
}
