//! Core data model shared by every component crate.
//!
//! Kept free of any internal crate dependency so that crypto, energy,
//! routing and relay can each depend on `meshphone-core` without forming
//! a cycle among themselves.

use serde::{Deserialize, Serialize};

/// A stable, opaque string naming a node to other nodes.
pub type Identity = String;

/// Generate a fresh identity string with at least 16 bytes of entropy,
/// hex-encoded.
pub fn generate_identity() -> Identity {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Message kinds carried in `MessageHeader::message_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Voice,
    File,
    Ack,
    RouteRequest,
    RouteReply,
    RouteError,
    Heartbeat,
}

/// Relative urgency of a send, driving both the energy pricing formula
/// and the initial TTL assigned to synthesized acknowledgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl MessagePriority {
    /// The `priority_factor` used in the energy pricing formula.
    pub fn factor(self) -> f64 {
        match self {
            MessagePriority::Low => 0.5,
            MessagePriority::Normal => 1.0,
            MessagePriority::High => 1.5,
            MessagePriority::Urgent => 2.0,
        }
    }
}

pub const INITIAL_TTL: u32 = 10;

/// Visible to every relay along the route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub message_id: String,
    pub sender: Identity,
    pub recipient: Identity,
    pub timestamp: u64,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub ttl: u32,
    pub sequence_number: u64,
}

impl MessageHeader {
    pub fn new(
        sender: Identity,
        recipient: Identity,
        message_type: MessageType,
        priority: MessagePriority,
        sequence_number: u64,
        now: u64,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            sender,
            recipient,
            timestamp: now,
            message_type,
            priority,
            ttl: INITIAL_TTL,
            sequence_number,
        }
    }
}

/// Opaque end-to-end ciphertext during transit; only meaningful once the
/// ratchet session has decrypted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub content: Vec<u8>,
    pub content_type: String,
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<Vec<u8>>,
}

impl MessagePayload {
    pub fn new(content: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            content,
            content_type: content_type.into(),
            metadata: std::collections::BTreeMap::new(),
            attachments: Vec::new(),
        }
    }
}

/// A single per-hop sealed record. Ciphertext and tag lengths are
/// determined by the onion wrapper; this type only carries wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnionLayer {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; 16],
    pub tag: [u8; 32],
}

/// The full framed message as carried on the wire.
///
/// Invariant: `header.ttl + hops_taken.len() <= 10` at all times during
/// transit (checked by the message core, not enforced structurally
/// here).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: MessagePayload,
    #[serde(default)]
    pub onion_layers: Vec<OnionLayer>,
    #[serde(default)]
    pub hops_taken: Vec<Identity>,
    pub energy_cost: f64,
    pub is_encrypted: bool,
    #[serde(default)]
    pub signature: Option<[u8; 64]>,
    /// The sender's onion ephemeral public key, carried alongside the
    /// layers so each relay can redo ECDH when peeling (§4.3's open
    /// question: the source's peel uses the relay's identity private
    /// against this value, which must travel out-of-band from the
    /// layers themselves). `None` when `onion_layers` is empty.
    #[serde(default)]
    pub onion_ephemeral_public: Option<[u8; 32]>,
}

impl Message {
    /// True once no onion layer remains and the recipient is reached.
    pub fn onion_exhausted(&self) -> bool {
        self.onion_layers.is_empty()
    }
}

/// A routing table entry cached for a destination.
///
/// Stale when `next_hop` is no longer a neighbor; a stale entry must be
/// marked inactive rather than deleted so its sequence number remains
/// visible for comparison against future discoveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: Identity,
    pub next_hop: Identity,
    pub hop_count: u32,
    pub sequence_number: u64,
    pub is_active: bool,
}

/// Reason an energy transaction was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyReason {
    Send,
    Relay,
    Receive,
    Penalty,
    Rebalance,
}

/// A single append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyTransaction {
    pub id: u64,
    pub timestamp: u64,
    pub from: Identity,
    pub to: Identity,
    pub amount: f64,
    pub reason: EnergyReason,
    pub message_id: Option<String>,
}

/// Per-identity energy balance and history.
///
/// Invariant: `balance == initial + earned - spent`; transaction ids
/// are per-account monotonic starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyAccount {
    pub identity: Identity,
    pub balance: f64,
    pub earned: f64,
    pub spent: f64,
    pub sent_count: u64,
    pub relayed_count: u64,
    pub received_count: u64,
    pub plugged_in: bool,
    pub transactions: Vec<EnergyTransaction>,
}

impl EnergyAccount {
    pub fn new(identity: Identity, initial_balance: f64) -> Self {
        Self {
            identity,
            balance: initial_balance,
            earned: 0.0,
            spent: 0.0,
            sent_count: 0,
            relayed_count: 0,
            received_count: 0,
            plugged_in: false,
            transactions: Vec::new(),
        }
    }

    /// The relay-reward multiplier for this account: 1.5 when plugged
    /// in, 1.0 otherwise.
    pub fn relay_multiplier(&self) -> f64 {
        if self.plugged_in {
            1.5
        } else {
            1.0
        }
    }
}
