//! Message Types für das Signaling-Protokoll
//!
//! Client- und Server-Nachrichten des Rendezvous-Kanals. Die Felder
//! sind camelCase, das Routing läuft über das `type`-Feld.

use crate::transport::{CandidateInit, SessionDescription};
use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Offer an einen Peer senden.
#[derive(Debug, Clone, Serialize)]
pub struct CallOfferPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub from: String,
    pub to: String,
    #[serde(rename = "signalData")]
    pub signal_data: SessionDescription,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

impl CallOfferPayload {
    pub fn new(
        from: String,
        to: String,
        signal_data: SessionDescription,
        display_name: String,
    ) -> Self {
        Self {
            msg_type: "call-offer",
            from,
            to,
            signal_data,
            display_name,
        }
    }
}

/// Answer an den Anrufer senden.
#[derive(Debug, Clone, Serialize)]
pub struct CallAcceptedPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub from: String,
    pub to: String,
    pub signal: SessionDescription,
}

impl CallAcceptedPayload {
    pub fn new(from: String, to: String, signal: SessionDescription) -> Self {
        Self {
            msg_type: "call-accepted",
            from,
            to,
            signal,
        }
    }
}

/// ICE Candidate an einen Peer senden.
#[derive(Debug, Clone, Serialize)]
pub struct IceCandidatePayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub from: String,
    pub to: String,
    pub candidate: CandidateInit,
}

impl IceCandidatePayload {
    pub fn new(from: String, to: String, candidate: CandidateInit) -> Self {
        Self {
            msg_type: "ice-candidate",
            from,
            to,
            candidate,
        }
    }
}

/// Anruf beenden.
#[derive(Debug, Clone, Serialize)]
pub struct EndCallPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub from: String,
    pub to: String,
}

impl EndCallPayload {
    pub fn new(from: String, to: String) -> Self {
        Self {
            msg_type: "end-call",
            from,
            to,
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Alle möglichen Server-Nachrichten.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Lokal zugewiesene Identität, einmal pro Verbindung.
    #[serde(rename = "identity-assigned")]
    IdentityAssigned { id: String },

    /// Eingehendes Offer.
    #[serde(rename = "call-offer")]
    CallOffer {
        from: String,
        #[serde(rename = "signalData")]
        signal_data: SessionDescription,
        #[serde(rename = "displayName", default)]
        display_name: Option<String>,
    },

    /// Eingehendes Answer.
    #[serde(rename = "call-accepted")]
    CallAccepted {
        from: String,
        signal: SessionDescription,
    },

    /// Eingehender ICE Candidate.
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        from: String,
        candidate: CandidateInit,
    },

    /// Anruf wurde von der Gegenseite beendet.
    #[serde(rename = "end-call")]
    EndCall {
        #[serde(default)]
        from: Option<String>,
    },
}

// ============================================================================
// TESTS
// ============================================================================
