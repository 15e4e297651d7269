//! Wire protocol types for the block sync exchange.
//!
//! Requests and responses travel as fixed-arity CBOR arrays inside
//! length-delimited frames. The `Serialize`/`Deserialize` impls here are
//! written by hand so that decoding enforces the wire bounds: wrong major
//! types, wrong field counts and arrays longer than
//! [MAX_ARRAY_LENGTH](crate::constants::MAX_ARRAY_LENGTH) are all rejected
//! as malformed input.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{MAX_ARRAY_LENGTH, MAX_REQUEST_LENGTH};
use crate::id::Cid;

/// Request option: return block headers.
pub const OPT_BLOCKS: u64 = 1;
/// Request option: return the messages of each block.
pub const OPT_MESSAGES: u64 = 2;

/// Response status codes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Status {
    Ok,
    /// Well-formed response carrying fewer tipsets than requested.
    Partial,
    NotFound,
    GoAway,
    InternalError,
    BadRequest,
    /// Preserved numeric code the client does not recognize.
    Other(u64),
}

impl Status {
    pub fn from_code(code: u64) -> Status {
        match code {
            0 => Status::Ok,
            101 => Status::Partial,
            201 => Status::NotFound,
            202 => Status::GoAway,
            203 => Status::InternalError,
            204 => Status::BadRequest,
            other => Status::Other(other),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            Status::Ok => 0,
            Status::Partial => 101,
            Status::NotFound => 201,
            Status::GoAway => 202,
            Status::InternalError => 203,
            Status::BadRequest => 204,
            Status::Other(code) => *code,
        }
    }

    /// `Ok` and `Partial` both carry usable chains.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Ok | Status::Partial)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Partial => write!(f, "partial response"),
            Status::NotFound => write!(f, "not found"),
            Status::GoAway => write!(f, "go away"),
            Status::InternalError => write!(f, "internal error"),
            Status::BadRequest => write!(f, "bad request"),
            Status::Other(code) => write!(f, "unrecognized response code {}", code),
        }
    }
}

/// Raw encoded bytes carried on the wire as a CBOR byte string.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct RawBytes(pub Vec<u8>);

impl RawBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for RawBytes {
    fn from(bytes: Vec<u8>) -> RawBytes {
        RawBytes(bytes)
    }
}

impl Serialize for RawBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for RawBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = RawBytes;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<RawBytes, E> {
                Ok(RawBytes(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<RawBytes, E> {
                Ok(RawBytes(v))
            }
        }

        deserializer.deserialize_bytes(BytesVisitor)
    }
}

// Decoding helper: an array capped at MAX_ARRAY_LENGTH elements. Definite
// lengths are rejected from the header, indefinite ones while collecting.
struct Bounded<T>(Vec<T>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Bounded<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BoundedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for BoundedVisitor<T> {
            type Value = Bounded<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "an array of at most {} elements", MAX_ARRAY_LENGTH)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Bounded<T>, A::Error> {
                if let Some(claimed) = seq.size_hint() {
                    if claimed > MAX_ARRAY_LENGTH {
                        return Err(de::Error::custom(format!("array too large ({})", claimed)));
                    }
                }
                let mut out = Vec::new();
                while let Some(element) = seq.next_element()? {
                    if out.len() == MAX_ARRAY_LENGTH {
                        return Err(de::Error::custom("array too large"));
                    }
                    out.push(element);
                }
                Ok(Bounded(out))
            }
        }

        deserializer.deserialize_seq(BoundedVisitor(PhantomData))
    }
}

fn reject_extra_fields<'de, A: SeqAccess<'de>>(seq: &mut A) -> Result<(), A::Error> {
    if seq.next_element::<IgnoredAny>()?.is_some() {
        return Err(de::Error::custom("wrong number of fields"));
    }
    Ok(())
}

fn next_field<'de, A, T, E>(seq: &mut A, index: usize, expecting: &E) -> Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: Deserialize<'de>,
    E: de::Expected,
{
    match seq.next_element()? {
        Some(value) => Ok(value),
        None => Err(de::Error::invalid_length(index, expecting)),
    }
}

/// A request for `request_length` tipsets walking backwards from `start`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockSyncRequest {
    pub start: Vec<Cid>,
    pub request_length: u64,
    pub options: u64,
}

impl BlockSyncRequest {
    pub fn includes_blocks(&self) -> bool {
        self.options & OPT_BLOCKS != 0
    }

    pub fn includes_messages(&self) -> bool {
        self.options & OPT_MESSAGES != 0
    }
}

impl Serialize for BlockSyncRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.start)?;
        tuple.serialize_element(&self.request_length)?;
        tuple.serialize_element(&self.options)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for BlockSyncRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RequestVisitor;

        impl<'de> Visitor<'de> for RequestVisitor {
            type Value = BlockSyncRequest;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a 3-element block sync request array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let start: Bounded<Cid> = next_field(&mut seq, 0, &self)?;
                let request_length: u64 = next_field(&mut seq, 1, &self)?;
                if request_length > MAX_REQUEST_LENGTH {
                    return Err(de::Error::custom(format!(
                        "request length too large ({})",
                        request_length
                    )));
                }
                let options: u64 = next_field(&mut seq, 2, &self)?;
                reject_extra_fields(&mut seq)?;
                Ok(BlockSyncRequest { start: start.0, request_length, options })
            }
        }

        deserializer.deserialize_seq(RequestVisitor)
    }
}

/// One tipset of a response chain: raw sibling headers plus optional
/// per-block message bundles.
///
/// The include arrays are aligned to `blocks`: `bls_msg_includes[i]` holds
/// the indices into `bls_messages` of the messages belonging to block `i`,
/// and likewise for the secp pair. All four message fields are empty when
/// only headers were requested.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct TipsetBundle {
    pub blocks: Vec<RawBytes>,
    pub bls_messages: Vec<RawBytes>,
    pub bls_msg_includes: Vec<Vec<u64>>,
    pub secp_messages: Vec<RawBytes>,
    pub secp_msg_includes: Vec<Vec<u64>>,
}

impl Serialize for TipsetBundle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(5)?;
        tuple.serialize_element(&self.blocks)?;
        tuple.serialize_element(&self.bls_messages)?;
        tuple.serialize_element(&self.bls_msg_includes)?;
        tuple.serialize_element(&self.secp_messages)?;
        tuple.serialize_element(&self.secp_msg_includes)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for TipsetBundle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BundleVisitor;

        impl<'de> Visitor<'de> for BundleVisitor {
            type Value = TipsetBundle;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a 5-element tipset bundle array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let blocks: Bounded<RawBytes> = next_field(&mut seq, 0, &self)?;
                let bls_messages: Bounded<RawBytes> = next_field(&mut seq, 1, &self)?;
                let bls_msg_includes: Bounded<Bounded<u64>> = next_field(&mut seq, 2, &self)?;
                let secp_messages: Bounded<RawBytes> = next_field(&mut seq, 3, &self)?;
                let secp_msg_includes: Bounded<Bounded<u64>> = next_field(&mut seq, 4, &self)?;
                reject_extra_fields(&mut seq)?;
                Ok(TipsetBundle {
                    blocks: blocks.0,
                    bls_messages: bls_messages.0,
                    bls_msg_includes: bls_msg_includes.0.into_iter().map(|b| b.0).collect(),
                    secp_messages: secp_messages.0,
                    secp_msg_includes: secp_msg_includes.0.into_iter().map(|b| b.0).collect(),
                })
            }
        }

        deserializer.deserialize_seq(BundleVisitor)
    }
}

/// A status code, a short diagnostic and the returned chain, newest tipset
/// first.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockSyncResponse {
    pub status: Status,
    pub message: String,
    pub chain: Vec<TipsetBundle>,
}

impl Serialize for BlockSyncResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.status.code())?;
        tuple.serialize_element(&self.message)?;
        tuple.serialize_element(&self.chain)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for BlockSyncResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ResponseVisitor;

        impl<'de> Visitor<'de> for ResponseVisitor {
            type Value = BlockSyncResponse;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a 3-element block sync response array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let code: u64 = next_field(&mut seq, 0, &self)?;
                let message: String = next_field(&mut seq, 1, &self)?;
                let chain: Bounded<TipsetBundle> = next_field(&mut seq, 2, &self)?;
                reject_extra_fields(&mut seq)?;
                Ok(BlockSyncResponse { status: Status::from_code(code), message, chain: chain.0 })
            }
        }

        deserializer.deserialize_seq(ResponseVisitor)
    }
}
