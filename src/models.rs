//! Data models for the Sealbox relay server

use serde::{Deserialize, Serialize};

// ── Identity ──

/// User identity as stored by the relay
///
/// The username is the canonical (normalized) form; all lookups and
/// uniqueness checks operate on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Signal-style registration id (integer >= 1)
    pub registration_id: i64,
    /// Opaque public identity key material (base64)
    pub identity_key: String,
    pub created_at: u64,
    /// Updated on every login
    pub last_seen: u64,
}

/// Claims embedded in a stateless session credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

// ── PreKeys ──

/// A user's signed prekey (exactly one active per user)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKey {
    pub key_id: i64,
    pub public_key: String, // base64
    pub signature: String,  // base64
}

/// A single-use prekey; deleted when distributed in a bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePreKey {
    pub key_id: i64,
    pub public_key: String, // base64
}

/// Everything a peer needs to initiate an encrypted session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub user_id: i64,
    pub registration_id: i64,
    pub identity_key: String, // base64
    pub signed_prekey: Option<SignedPreKey>,
    /// Consumed on read; None when the user has no one-time keys left
    pub one_time_prekey: Option<OneTimePreKey>,
}

// ── Messages ──

/// Message content categories accepted by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Voice,
    Video,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Voice => "voice",
            MessageType::Video => "video",
            MessageType::File => "file",
        }
    }
}

/// Delivery state of a relayed message.
///
/// Transitions are monotonic: sent advances to delivered or queued, never
/// back. Read receipts are transient signals and never written to the log,
/// so no code path persists `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Sent,
    Delivered,
    Queued,
    Read,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Sent => "sent",
            MessageState::Delivered => "delivered",
            MessageState::Queued => "queued",
            MessageState::Read => "read",
        }
    }
}

impl std::str::FromStr for MessageState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageState::Sent),
            "delivered" => Ok(MessageState::Delivered),
            "queued" => Ok(MessageState::Queued),
            "read" => Ok(MessageState::Read),
            _ => Err(format!("unknown message state: {}", s)),
        }
    }
}

/// Metadata row in the durable message log.
///
/// The opaque payload itself is never stored; `payload_ref` is a SHA-256
/// digest of the ciphertext, kept purely as an audit reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    /// Client-supplied idempotency key, defaulted to a timestamp when absent
    pub external_id: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub message_type: MessageType,
    pub payload_ref: String,
    pub state: MessageState,
    pub created_at: u64, // Unix millis
}

// ── Live-channel events ──

/// Events a client may send over the live channel.
///
/// Closed set, internally tagged on `event`; payload fields use camelCase on
/// the wire. Anything that fails to parse into a variant is rejected at the
/// channel boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake binding this connection to a user
    Authenticate { token: String },

    /// Relay an opaque payload to another user
    #[serde(rename_all = "camelCase")]
    SendMessage {
        receiver_id: i64,
        /// Opaque ciphertext; the relay never inspects it
        payload: String,
        #[serde(rename = "type")]
        message_type: MessageType,
        #[serde(default)]
        message_id: Option<String>,
    },

    /// Typing indicator, fire-and-forget
    #[serde(rename_all = "camelCase")]
    Typing { receiver_id: i64, is_typing: bool },

    /// Read receipt for a message the caller received earlier
    #[serde(rename_all = "camelCase")]
    MessageRead { message_id: String, sender_id: i64 },
}

/// Events the server emits over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake outcome; `success: false` carries the reason in `error`
    #[serde(rename_all = "camelCase")]
    Authenticated {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Fan-out of a relayed payload to the receiver's connections
    #[serde(rename_all = "camelCase")]
    ReceiveMessage {
        sender_id: i64,
        payload: String,
        #[serde(rename = "type")]
        message_type: MessageType,
        message_id: String,
        timestamp: u64,
    },

    /// Delivery ack to the sender (receiver was online)
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        message_id: String,
        receiver_id: i64,
        timestamp: u64,
    },

    /// Offline ack to the sender (receiver had no open connections)
    #[serde(rename_all = "camelCase")]
    MessageQueued {
        message_id: String,
        receiver_id: i64,
        status: String,
        timestamp: u64,
    },

    /// Typing indicator fan-out
    #[serde(rename_all = "camelCase")]
    UserTyping { user_id: i64, is_typing: bool },

    /// Read-receipt fan-out to the original sender
    #[serde(rename_all = "camelCase")]
    MessageReadReceipt { message_id: String, read_by: i64 },

    /// Named business-logic error; the connection stays open
    Error { kind: String, message: String },
}

impl ServerEvent {
    /// Encodes the event as a single text frame.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"event":"error","kind":"internal","message":"event encoding failed"}"#.to_string()
        })
    }
}

// ── Request/response DTOs ──

/// Request to register a new user
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub registration_id: i64,
    pub identity_key: String, // base64
}

/// Response after registration
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    /// Canonical form the server stored
    pub username: String,
}

/// Identity-continuation login request
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub username: String,
}

/// Response carrying a fresh session credential
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: i64,
    pub expires_at: u64,
}

/// Request to upload a batch of one-time prekeys
#[derive(Debug, Deserialize)]
pub struct UploadPreKeysRequest {
    pub prekeys: Vec<OneTimePreKey>,
}

/// Response after a one-time prekey upload
#[derive(Debug, Serialize)]
pub struct UploadPreKeysResponse {
    pub status: String,
    /// Count actually inserted (duplicates and malformed entries skipped)
    pub stored: usize,
}

/// Remaining one-time prekey count for the authenticated user
#[derive(Debug, Serialize)]
pub struct PreKeyCountResponse {
    pub count: i64,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Structured error body for the request/response surface
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Taxonomy kind: invalid_input, unauthenticated, unauthorized,
    /// conflict, not_found, capacity_exceeded, internal
    pub kind: String,
    pub code: u16,
}
