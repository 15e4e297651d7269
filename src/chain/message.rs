use crate::Result;

/// An unsigned chain message.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub nonce: u64,
    pub data: Vec<u8>,
}

/// A message carrying its signature.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message: Message,
    pub signature: Vec<u8>,
}

pub fn decode_message(raw: &[u8]) -> Result<Message> {
    Ok(serde_cbor::from_slice(raw)?)
}

pub fn decode_signed_message(raw: &[u8]) -> Result<SignedMessage> {
    Ok(serde_cbor::from_slice(raw)?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let msg = Message { nonce: 3, data: vec![1, 2, 3] };
        let raw = serde_cbor::to_vec(&msg).unwrap();
        assert_eq!(decode_message(&raw).unwrap(), msg);

        let signed = SignedMessage { message: msg, signature: vec![9u8; 64] };
        let raw = serde_cbor::to_vec(&signed).unwrap();
        assert_eq!(decode_signed_message(&raw).unwrap(), signed);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        match decode_message(&[0xff, 0x00, 0x13]) {
            Err(crate::Error::Decode(_)) => (),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
