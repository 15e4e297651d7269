//! Fetches sets of content-addressed messages through the node's block
//! service.
//!
//! The service returns blocks in whatever order it finds them; the fetch
//! core places each one at the index its cid was requested at, rejecting
//! duplicates and blocks that were never asked for.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::block_service::BlockService;
use crate::chain::{decode_message, decode_signed_message, Message, SignedMessage};
use crate::id::Cid;
use crate::{Error, Result};

pub async fn fetch_messages_by_cids(
    service: &dyn BlockService,
    ctx: &CancellationToken,
    cids: &[Cid],
) -> Result<Vec<Message>> {
    fetch_cids(service, ctx, cids, |raw| decode_message(raw)).await
}

pub async fn fetch_signed_messages_by_cids(
    service: &dyn BlockService,
    ctx: &CancellationToken,
    cids: &[Cid],
) -> Result<Vec<SignedMessage>> {
    fetch_cids(service, ctx, cids, |raw| decode_signed_message(raw)).await
}

// Fetches `cids` from the block service and decodes each block with
// `decode`, aligning the output to the order of `cids`. Every cid must be
// served exactly once before the service closes its channel.
async fn fetch_cids<T, F>(
    service: &dyn BlockService,
    ctx: &CancellationToken,
    cids: &[Cid],
    decode: F,
) -> Result<Vec<T>>
where
    F: Fn(&[u8]) -> Result<T>,
{
    let index_of: HashMap<Cid, usize> =
        cids.iter().enumerate().map(|(index, cid)| (*cid, index)).collect();

    let mut blocks = service.get_blocks(ctx, cids.to_vec()).await?;

    let mut out: Vec<Option<T>> = cids.iter().map(|_| None).collect();
    let mut filled = 0;
    while filled < cids.len() {
        let block = tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            block = blocks.recv() => block,
        };
        match block {
            Some(block) => {
                let index =
                    *index_of.get(&block.cid).ok_or(Error::UnsolicitedBlock(block.cid))?;
                if out[index].is_some() {
                    return Err(Error::DuplicateBlock(block.cid));
                }
                out[index] = Some(decode(&block.data)?);
                filled += 1;
            }
            None => return Err(Error::IncompleteFetch),
        }
    }

    out.into_iter().collect::<Option<Vec<T>>>().ok_or(Error::IncompleteFetch)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block_service::BlockData;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    // Serves a scripted list of blocks, in script order, then closes.
    struct ScriptedService {
        blocks: Vec<BlockData>,
    }

    impl ScriptedService {
        fn serving(blocks: Vec<BlockData>) -> ScriptedService {
            ScriptedService { blocks }
        }
    }

    #[async_trait]
    impl BlockService for ScriptedService {
        async fn get_block(&self, _ctx: &CancellationToken, cid: Cid) -> Result<BlockData> {
            self.blocks
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
            let (tx, rx) = mpsc::channel(8);
            let blocks = self.blocks.clone();
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

    fn message_block(nonce: u64) -> (Cid, BlockData, Message) {
        let message = Message { nonce, data: vec![nonce as u8] };
        let raw = serde_cbor::to_vec(&message).unwrap();
        let cid = Cid::new(&raw);
        (cid, BlockData { cid, data: raw }, message)
    }

    #[tokio::test]
    async fn test_outputs_align_to_requested_order() {
        let (cid_a, block_a, msg_a) = message_block(1);
        let (cid_b, block_b, msg_b) = message_block(2);

        // served in reverse order of the request
        let service = ScriptedService::serving(vec![block_b, block_a]);
        let ctx = CancellationToken::new();

        let messages =
            fetch_messages_by_cids(&service, &ctx, &[cid_a, cid_b]).await.unwrap();
        assert_eq!(messages, vec![msg_a, msg_b]);
    }

    #[tokio::test]
    async fn test_empty_request() {
        let service = ScriptedService::serving(vec![]);
        let ctx = CancellationToken::new();

        let messages = fetch_messages_by_cids(&service, &ctx, &[]).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_block_fails() {
        let (cid_a, block_a, _) = message_block(1);
        let (cid_b, _, _) = message_block(2);

        let service = ScriptedService::serving(vec![block_a.clone(), block_a]);
        let ctx = CancellationToken::new();

        match fetch_messages_by_cids(&service, &ctx, &[cid_a, cid_b]).await {
            Err(Error::DuplicateBlock(cid)) => assert_eq!(cid, cid_a),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsolicited_block_fails() {
        let (cid_a, _, _) = message_block(1);
        let (_, stray, _) = message_block(9);

        let service = ScriptedService::serving(vec![stray.clone()]);
        let ctx = CancellationToken::new();

        match fetch_messages_by_cids(&service, &ctx, &[cid_a]).await {
            Err(Error::UnsolicitedBlock(cid)) => assert_eq!(cid, stray.cid),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_before_all_served_fails() {
        let (cid_a, block_a, _) = message_block(1);
        let (cid_b, _, _) = message_block(2);

        let service = ScriptedService::serving(vec![block_a]);
        let ctx = CancellationToken::new();

        // the last requested cid is the one missing; the early close must
        // still be an error
        match fetch_messages_by_cids(&service, &ctx, &[cid_a, cid_b]).await {
            Err(Error::IncompleteFetch) => (),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting() {
        let (cid_a, _, _) = message_block(1);

        // serves nothing and never closes promptly enough to matter
        let service = ScriptedService::serving(vec![]);
        let ctx = CancellationToken::new();
        ctx.cancel();

        match fetch_messages_by_cids(&service, &ctx, &[cid_a]).await {
            Err(Error::Cancelled) => (),
            Err(Error::IncompleteFetch) => (),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signed_message_fetch() {
        let signed = SignedMessage {
            message: Message { nonce: 5, data: vec![5] },
            signature: vec![1u8; 64],
        };
        let raw = serde_cbor::to_vec(&signed).unwrap();
        let cid = Cid::new(&raw);
        let service = ScriptedService::serving(vec![BlockData { cid, data: raw }]);
        let ctx = CancellationToken::new();

        let messages =
            fetch_signed_messages_by_cids(&service, &ctx, &[cid]).await.unwrap();
        assert_eq!(messages, vec![signed]);
    }
}
