//! Chain data model: decoded block headers and messages, and the tipset
//! structures reconstructed from sync responses.

pub mod header;
pub mod message;
pub mod tipset;

pub use header::{decode_header, BlockHeader};
pub use message::{decode_message, decode_signed_message, Message, SignedMessage};
pub use tipset::{Block, FullTipset, Tipset, TipsetKey};
