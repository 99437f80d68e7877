//! Canonical wire framing.
//!
//! The wire format is a self-describing JSON serialization of a
//! [`Message`](crate::types::Message), wrapped in a frame that carries a
//! checksum over the canonical message bytes. Field order in the
//! canonical form follows the declaration order of `Message`: header,
//! payload, onion_layers, hops_taken, energy_cost, is_encrypted,
//! signature — `serde_json` preserves struct field order by default, so
//! no explicit field-order bookkeeping is needed beyond declaring the
//! struct in that order.

use sha2::{Digest, Sha256};

use crate::error::MeshError;
use crate::types::Message;

/// Checksum truncated to 16 hex characters, per the wire format.
fn checksum(canonical_bytes: &[u8]) -> String {
    let digest = Sha256::digest(canonical_bytes);
    hex::encode(digest)[..16].to_string()
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Frame {
    checksum: String,
    message: Message,
}

/// Serialize a message into framed wire bytes.
pub fn encode(message: &Message) -> Result<Vec<u8>, MeshError> {
    let canonical =
        serde_json::to_vec(message).map_err(|e| MeshError::StoreError(e.to_string()))?;
    let frame = Frame {
        checksum: checksum(&canonical),
        message: message.clone(),
    };
    serde_json::to_vec(&frame).map_err(|e| MeshError::StoreError(e.to_string()))
}

/// Reconstruct a message from framed wire bytes, verifying the checksum.
///
/// Returns `Ok(None)` on checksum mismatch — the caller silently drops
/// the frame, per the receive path's decode step. Malformed frames that
/// cannot even be parsed as JSON are reported as an error.
pub fn decode(bytes: &[u8]) -> Result<Option<Message>, MeshError> {
    let frame: Frame =
        serde_json::from_slice(bytes).map_err(|e| MeshError::StoreError(e.to_string()))?;
    let canonical = serde_json::to_vec(&frame.message)
        .map_err(|e| MeshError::StoreError(e.to_string()))?;
    if checksum(&canonical) != frame.checksum {
        return Ok(None);
    }
    Ok(Some(frame.message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageHeader, MessagePayload, MessagePriority, MessageType};

    fn sample_message() -> Message {
        Message {
            header: MessageHeader::new(
                "alice".to_string(),
                "bob".to_string(),
                MessageType::Text,
                MessagePriority::Normal,
                1,
                1_700_000_000,
            ),
            payload: MessagePayload::new(b"hello".to_vec(), "text/plain"),
            onion_layers: Vec::new(),
            hops_taken: Vec::new(),
            energy_cost: 120.0,
            is_encrypted: true,
            signature: None,
            onion_ephemeral_public: None,
        }
    }

    #[test]
    fn test_round_trip_identity() {
        let message = sample_message();
        let bytes = encode(&message).unwrap();
        let decoded = decode(&bytes).unwrap().expect("checksum should match");
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_tampered_checksum_is_dropped() {
        let message = sample_message();
        let bytes = encode(&message).unwrap();
        let mut tampered: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        tampered["checksum"] = serde_json::Value::String("0000000000000000".to_string());
        let tampered_bytes = serde_json::to_vec(&tampered).unwrap();
        let decoded = decode(&tampered_bytes).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_checksum_is_sixteen_hex_chars() {
        let sum = checksum(b"some canonical bytes");
        assert_eq!(sum.len(), 16);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_malformed_bytes_is_error() {
        assert!(decode(b"not json").is_err());
    }
}
