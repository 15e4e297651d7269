//! Reconstructs typed tipset chains from wire bundles and enforces the
//! parent-linkage invariants.

use crate::chain::{decode_header, decode_message, decode_signed_message};
use crate::chain::{Block, FullTipset, Tipset};
use crate::protocol::TipsetBundle;
use crate::{Error, Result};

/// Builds the tipset chain of a successful response, newest first, checking
/// that every tipset's parents are exactly the next tipset in the list.
pub fn tipsets_from_bundles(chain: &[TipsetBundle]) -> Result<Vec<Tipset>> {
    if chain.is_empty() {
        return Err(Error::EmptyChain);
    }

    let mut tipsets = Vec::with_capacity(chain.len());
    tipsets.push(tipset_from_bundle(&chain[0])?);
    for index in 1..chain.len() {
        let next = tipset_from_bundle(&chain[index])?;
        let current: &Tipset = &tipsets[index - 1];
        if current.parents().cids() != next.cids().as_slice() {
            return Err(Error::BadChain(index - 1, index));
        }
        tipsets.push(next);
    }
    Ok(tipsets)
}

fn tipset_from_bundle(bundle: &TipsetBundle) -> Result<Tipset> {
    let headers = bundle
        .blocks
        .iter()
        .map(|raw| decode_header(raw.as_slice()))
        .collect::<Result<Vec<_>>>()?;
    Tipset::new(headers)
}

/// Reassembles one bundle into a tipset with per-block messages by
/// cross-indexing the include arrays.
pub fn full_tipset_from_bundle(bundle: &TipsetBundle) -> Result<FullTipset> {
    let block_count = bundle.blocks.len();
    if bundle.bls_msg_includes.len() != block_count
        || bundle.secp_msg_includes.len() != block_count
    {
        return Err(Error::InvalidBundle(format!(
            "message includes not aligned with blocks: {} blocks, {} bls includes, {} secp includes",
            block_count,
            bundle.bls_msg_includes.len(),
            bundle.secp_msg_includes.len()
        )));
    }

    let bls_messages = bundle
        .bls_messages
        .iter()
        .map(|raw| decode_message(raw.as_slice()))
        .collect::<Result<Vec<_>>>()?;
    let secp_messages = bundle
        .secp_messages
        .iter()
        .map(|raw| decode_signed_message(raw.as_slice()))
        .collect::<Result<Vec<_>>>()?;

    let mut blocks = Vec::with_capacity(block_count);
    for (index, raw) in bundle.blocks.iter().enumerate() {
        let header = decode_header(raw.as_slice())?;

        let mut block_bls = Vec::with_capacity(bundle.bls_msg_includes[index].len());
        for &msg_index in bundle.bls_msg_includes[index].iter() {
            let message = bls_messages.get(msg_index as usize).ok_or_else(|| {
                Error::InvalidBundle(format!(
                    "bls message index {} out of range for block {}",
                    msg_index, index
                ))
            })?;
            block_bls.push(message.clone());
        }

        let mut block_secp = Vec::with_capacity(bundle.secp_msg_includes[index].len());
        for &msg_index in bundle.secp_msg_includes[index].iter() {
            let message = secp_messages.get(msg_index as usize).ok_or_else(|| {
                Error::InvalidBundle(format!(
                    "secp message index {} out of range for block {}",
                    msg_index, index
                ))
            })?;
            block_secp.push(message.clone());
        }

        blocks.push(Block { header, bls_messages: block_bls, secp_messages: block_secp });
    }

    FullTipset::new(blocks)
}
