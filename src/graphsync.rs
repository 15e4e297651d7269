//! Boundary of the alternative graph transfer transport.
//!
//! When protocol negotiation picks the graph transfer protocol instead of
//! the request/response protocol, the request is handed to this exchange
//! wholesale. Its implementation lives with the node.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::id::PeerId;
use crate::protocol::{BlockSyncRequest, BlockSyncResponse};
use crate::Result;

#[async_trait]
pub trait GraphExchange: Send + Sync {
    /// Resolves the request against `peer` over the graph transfer protocol
    /// and reassembles the result into a sync response.
    async fn fetch_tipsets(
        &self,
        ctx: &CancellationToken,
        peer: PeerId,
        request: &BlockSyncRequest,
    ) -> Result<BlockSyncResponse>;
}
