use std::fmt;

use crate::chain::header::BlockHeader;
use crate::chain::message::{Message, SignedMessage};
use crate::id::Cid;
use crate::{Error, Result};

/// Ordered list of cids uniquely naming a tipset.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
pub struct TipsetKey(Vec<Cid>);

impl TipsetKey {
    pub fn new(cids: Vec<Cid>) -> TipsetKey {
        TipsetKey(cids)
    }

    pub fn cids(&self) -> &[Cid] {
        &self.0
    }
}

impl fmt::Display for TipsetKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let cids: Vec<String> = self.0.iter().map(|c| format!("{}", c)).collect();
        write!(f, "{{{}}}", cids.join(" "))
    }
}

/// A non-empty set of sibling block headers sharing parents and height.
///
/// Constructed only via [Tipset::new], which sorts the members by cid and
/// rejects sets whose members disagree on parents or height.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tipset {
    headers: Vec<BlockHeader>,
}

impl Tipset {
    pub fn new(mut headers: Vec<BlockHeader>) -> Result<Tipset> {
        if headers.is_empty() {
            return Err(Error::InvalidTipset("no blocks in tipset".to_string()));
        }
        for header in headers[1..].iter() {
            if header.parents() != headers[0].parents() {
                return Err(Error::InvalidTipset(format!(
                    "block {} has different parents than its siblings",
                    header.cid()
                )));
            }
            if header.height() != headers[0].height() {
                return Err(Error::InvalidTipset(format!(
                    "block {} has different height than its siblings",
                    header.cid()
                )));
            }
        }
        headers.sort_by_key(|h| h.cid());
        Ok(Tipset { headers })
    }

    pub fn headers(&self) -> &[BlockHeader] {
        &self.headers
    }

    /// Sorted cids of the member blocks.
    pub fn cids(&self) -> Vec<Cid> {
        self.headers.iter().map(|h| h.cid()).collect()
    }

    pub fn key(&self) -> TipsetKey {
        TipsetKey::new(self.cids())
    }

    pub fn parents(&self) -> &TipsetKey {
        self.headers[0].parents()
    }

    pub fn height(&self) -> u64 {
        self.headers[0].height()
    }
}

/// A block header together with its full message payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub bls_messages: Vec<Message>,
    pub secp_messages: Vec<SignedMessage>,
}

/// A tipset whose blocks carry their messages.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FullTipset {
    blocks: Vec<Block>,
}

impl FullTipset {
    /// Validates the sibling invariants through [Tipset::new].
    pub fn new(blocks: Vec<Block>) -> Result<FullTipset> {
        Tipset::new(blocks.iter().map(|b| b.header.clone()).collect())?;
        Ok(FullTipset { blocks })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Projects away the messages.
    pub fn tipset(&self) -> Result<Tipset> {
        Tipset::new(self.blocks.iter().map(|b| b.header.clone()).collect())
    }
}
