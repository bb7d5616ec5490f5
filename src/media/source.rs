//! Lokale Medienquellen und Remote-Track-Handles
//!
//! Der Core behandelt Medien als opake Handles: Capture und Rendering
//! sind externe Collaborators. Für die WebRTC-Engine trägt eine
//! `MediaSource` die konkreten lokalen Tracks.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum MediaError {
    #[error("Media permission denied")]
    PermissionDenied,

    #[error("Capture failed: {0}")]
    Capture(String),
}

// ============================================================================
// MEDIA SOURCE
// ============================================================================

/// Eine lokale Audio/Video-Quelle.
///
/// Genau eine Quelle wird pro CallSession angehängt. Die Tracks sind
/// für die Transport-Engine bestimmt; Mock-Engines in Tests kommen mit
/// einer leeren Track-Liste aus.
#[derive(Clone)]
pub struct MediaSource {
    pub id: String,
    pub tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl MediaSource {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Opakes Handle auf einen empfangenen Remote-Stream.
///
/// Der Renderer-Collaborator braucht nur "ein abspielbares Handle";
/// die konkrete Track-Auslieferung passiert in der Engine-Implementierung.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackHandle {
    pub stream_id: String,
    /// "audio" oder "video"
    pub kind: String,
}

// ============================================================================
// MEDIA PROVIDER
// ============================================================================

/// Capture-Collaborator: produziert auf Anfrage eine lokale Medienquelle.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn acquire(&self) -> Result<MediaSource, MediaError>;
}
