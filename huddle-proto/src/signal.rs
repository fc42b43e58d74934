//! Signaling event types exchanged between browser clients and the relay.
//!
//! Every frame is a JSON object of the form `{"event": <name>, "data": <payload>}`.
//! Negotiation payloads (`offer`, `answer`, `candidate`) and transcription
//! text are carried as opaque [`serde_json::Value`]s. The relay reads only
//! the routing fields and forwards everything else verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{ConnectionId, RoomId};

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Join a room, announcing `user_id` to the members already there.
    JoinRoom {
        /// Room to join; created on first use.
        room_id: RoomId,
        /// Application-level user identifier, forwarded verbatim.
        user_id: String,
    },

    /// Session description offer for one peer.
    Offer {
        /// Opaque SDP offer.
        offer: Value,
        /// Connection that should receive the offer.
        target_id: ConnectionId,
    },

    /// Session description answer for one peer.
    Answer {
        /// Opaque SDP answer.
        answer: Value,
        /// Connection that should receive the answer.
        target_id: ConnectionId,
    },

    /// Trickled ICE candidate for one peer.
    IceCandidate {
        /// Opaque candidate object.
        candidate: Value,
        /// Connection that should receive the candidate.
        target_id: ConnectionId,
    },

    /// Live transcript and its translation for one peer.
    TranscriptionMessage {
        transcript: Value,
        translation: Value,
        target_id: ConnectionId,
    },

    /// Microphone state change.
    ///
    /// `target_id` is accepted for compatibility but not used for routing.
    MicStatus {
        mic_on: bool,
        /// Client-supplied sender identifier, forwarded verbatim.
        sender_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<ConnectionId>,
    },
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::TranscriptionMessage { .. } => "transcription-message",
            Self::MicStatus { .. } => "mic-status",
        }
    }

    /// The connection this event is addressed to, for peer-targeted events.
    #[must_use]
    pub const fn target(&self) -> Option<&ConnectionId> {
        match self {
            Self::Offer { target_id, .. }
            | Self::Answer { target_id, .. }
            | Self::IceCandidate { target_id, .. }
            | Self::TranscriptionMessage { target_id, .. } => Some(target_id),
            Self::JoinRoom { .. } | Self::MicStatus { .. } => None,
        }
    }
}

/// Events the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// First frame on every connection: the id other peers use to reach it.
    Welcome { connection_id: ConnectionId },

    /// Another user joined the recipient's room.
    UserConnected(String),

    /// Offer relayed from `sender_id`.
    Offer {
        offer: Value,
        sender_id: ConnectionId,
    },

    /// Answer relayed from `sender_id`.
    Answer {
        answer: Value,
        sender_id: ConnectionId,
    },

    /// ICE candidate relayed from `sender_id`.
    IceCandidate {
        candidate: Value,
        sender_id: ConnectionId,
    },

    /// Transcript relayed from a peer. The sender is not identified.
    TranscriptionMessage { transcript: Value, translation: Value },

    /// Microphone state of `sender_id`.
    MicStatus { mic_on: bool, sender_id: String },

    /// A connection left the relay.
    UserDisconnected(ConnectionId),
}

impl ServerEvent {
    /// Wire name of the event, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::UserConnected(_) => "user-connected",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::TranscriptionMessage { .. } => "transcription-message",
            Self::MicStatus { .. } => "mic-status",
            Self::UserDisconnected(_) => "user-disconnected",
        }
    }
}
