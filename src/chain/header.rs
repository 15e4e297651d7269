use crate::chain::tipset::TipsetKey;
use crate::id::Cid;
use crate::Result;

/// A decoded block header.
///
/// Headers arrive on the wire as opaque byte strings; [decode_header] is the
/// only way to obtain one, so the `cid` always names the exact bytes the
/// header was decoded from.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(skip)]
    cid: Cid,
    /// Key of the tipset this block extends.
    parents: TipsetKey,
    /// The current block height
    height: u64,
    timestamp: u64,
}

impl BlockHeader {
    pub fn new(parents: TipsetKey, height: u64, timestamp: u64) -> BlockHeader {
        BlockHeader { cid: Cid::default(), parents, height, timestamp }
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn parents(&self) -> &TipsetKey {
        &self.parents
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Canonical byte encoding of the header.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_cbor::to_vec(self)?)
    }
}

/// Decodes raw header bytes. The resulting header is named by the hash of
/// `raw`.
pub fn decode_header(raw: &[u8]) -> Result<BlockHeader> {
    let mut header: BlockHeader = serde_cbor::from_slice(raw)?;
    header.cid = Cid::new(raw);
    Ok(header)
}
