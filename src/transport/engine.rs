//! Transport-Engine Traits und Datentypen
//!
//! Die Engine ist ein externer Collaborator: der Core fährt nur ihre
//! Control-Plane (Offer/Answer, Candidates, Close) und beobachtet ihre
//! Events. Session Descriptions sind opake Blobs mit Richtungs-Tag.

use crate::media::{MediaSource, RemoteTrackHandle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Candidate rejected: {0}")]
    CandidateRejected(String),

    #[error("No active connection")]
    NoConnection,
}

// ============================================================================
// SESSION DESCRIPTION
// ============================================================================

/// Richtung einer Session Description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaker Verhandlungs-Blob der Transport-Engine (Offer oder Answer).
/// Einmal gesetzt wird eine Description nie mutiert, nur durch eine
/// neue Session ersetzt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

// ============================================================================
// ICE CANDIDATE
// ============================================================================

/// Ein entdeckter Netzwerkpfad für die P2P-Verbindung.
///
/// Optionale Felder (Media-Line-Zuordnung) werden unverändert
/// durchgereicht - keine impliziten Defaults; ob ein Candidate ohne
/// Zuordnung anwendbar ist, entscheidet die Engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    // serde-camelCase würde "sdpMlineIndex" erzeugen, der Standard
    // schreibt aber das große L
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl CandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

// ============================================================================
// ENGINE EVENTS
// ============================================================================

/// Events, die eine Engine-Instanz während einer Session liefert.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Lokal entdeckter ICE Candidate, zur Weitergabe an den Peer.
    LocalCandidate(CandidateInit),
    /// Remote-Medien sind eingetroffen.
    RemoteTrack(RemoteTrackHandle),
    /// Medienverbindung steht.
    Connected,
    /// Fataler Verbindungsfehler, Session ist nicht fortsetzbar.
    Failed(String),
}

// ============================================================================
// ENGINE TRAITS
// ============================================================================

/// Control-Plane einer Medien-Transport-Verbindung.
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Hängt die lokale Medienquelle an die Verbindung.
    async fn attach_media(&self, media: &MediaSource) -> Result<(), TransportError>;

    /// Erstellt ein Offer und setzt es als Local Description.
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Erstellt ein Answer und setzt es als Local Description.
    /// Setzt voraus, dass die Remote Description bereits gesetzt ist.
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Setzt die Description der Gegenseite.
    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    /// Wendet einen Remote-Candidate an.
    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), TransportError>;

    /// Schließt die Verbindung und gibt alle Ressourcen frei.
    async fn close(&self);
}

/// Erzeugt pro Session genau eine Engine-Instanz samt Event-Kanal.
///
/// Der Coordinator hält nie zwei lebende Verbindungen gleichzeitig:
/// die alte wird vollständig geschlossen, bevor eine neue entsteht.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
    ) -> Result<(std::sync::Arc<dyn TransportEngine>, mpsc::Receiver<TransportEvent>), TransportError>;
}
