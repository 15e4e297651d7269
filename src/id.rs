//! Hash-based identifiers used throughout the sync client.
//!
//! Both identifier kinds wrap a 32-byte hash and are displayed using the
//! Base58check format. A [Cid] names immutable content (block headers,
//! messages) by the hash of its encoded bytes; a [PeerId] names a remote
//! peer on the network.

use std::fmt;

use base58check::ToBase58Check;
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use rand::{self, Rng};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Content identifier: the hash of an immutable blob of encoded bytes.
///
/// On the wire a `Cid` is a CBOR byte string (major type 2) of exactly 32
/// bytes; anything else is rejected at decode time.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Default)]
pub struct Cid([u8; 32]);

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_base58check(0))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_base58check(0))
    }
}

impl Cid {
    /// Names a blob of bytes by hashing it.
    pub fn new(bytes: &[u8]) -> Cid {
        Cid(hash(bytes))
    }

    /// Generate a random `Cid`
    pub fn generate() -> Cid {
        let mut rng = rand::thread_rng();
        let v: [u8; 32] = rng.gen();
        Cid(v)
    }

    /// All-zeroes `Cid` (for testing)
    pub fn zero() -> Cid {
        Cid([0u8; 32])
    }

    /// Returns the wrapped byte array containing the hash
    pub fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Returns a slice to the contained byte array
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CidVisitor;

        impl<'de> Visitor<'de> for CidVisitor {
            type Value = Cid;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a 32-byte cid byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Cid, E> {
                if v.len() != 32 {
                    return Err(E::invalid_length(v.len(), &self));
                }
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(v);
                Ok(Cid(bytes))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Cid, E> {
                self.visit_bytes(&v)
            }
        }

        deserializer.deserialize_bytes(CidVisitor)
    }
}

/// Identity of a remote peer, assigned by the surrounding host.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Serialize, Deserialize, Default)]
pub struct PeerId([u8; 32]);

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_base58check(0))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_base58check(0))
    }
}

impl PeerId {
    /// By default a new id is created by hashing an input byte slice
    pub fn new(bytes: &[u8]) -> PeerId {
        PeerId(hash(bytes))
    }

    /// Generate a random `PeerId`
    pub fn generate() -> PeerId {
        let mut rng = rand::thread_rng();
        let v: [u8; 32] = rng.gen();
        PeerId(v)
    }

    /// All-zeroes `PeerId` (for testing)
    pub fn zero() -> PeerId {
        PeerId([0u8; 32])
    }

    /// All-ones `PeerId` (for testing)
    pub fn one() -> PeerId {
        PeerId([1u8; 32])
    }

    /// All-twos `PeerId` (for testing)
    pub fn two() -> PeerId {
        PeerId([2u8; 32])
    }

    /// Returns the wrapped byte array
    pub fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

fn hash(input: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2bVar::new(32).unwrap();
    hasher.update(input);
    let mut buf = [0u8; 32];
    hasher.finalize_variable(&mut buf).unwrap();
    buf
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cid_is_content_addressed() {
        let a = Cid::new(b"some header bytes");
        let b = Cid::new(b"some header bytes");
        let c = Cid::new(b"other header bytes");
        assert_eq!(a, b);
        assert!(a != c);
    }

    #[test]
    fn test_cid_cbor_roundtrip() {
        let cid = Cid::generate();
        let bytes = serde_cbor::to_vec(&cid).unwrap();
        let decoded: Cid = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(cid, decoded);
    }

    #[test]
    fn test_cid_rejects_wrong_length() {
        // a 4-byte CBOR byte string is not a valid cid
        let bytes = serde_cbor::to_vec(&serde_cbor::Value::Bytes(vec![1, 2, 3, 4])).unwrap();
        match serde_cbor::from_slice::<Cid>(&bytes) {
            Err(_) => (),
            Ok(other) => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cid_rejects_wrong_major_type() {
        // an unsigned integer is not a byte string
        let bytes = serde_cbor::to_vec(&7u64).unwrap();
        match serde_cbor::from_slice::<Cid>(&bytes) {
            Err(_) => (),
            Ok(other) => panic!("unexpected: {:?}", other),
        }
    }
}
