//! WebRTC-Implementierung der Transport-Engine
//!
//! Fährt eine `RTCPeerConnection` der `webrtc` Crate und übersetzt
//! deren Callback-Events in den typisierten `TransportEvent`-Kanal.

use super::engine::{
    CandidateInit, SdpKind, SessionDescription, TransportEngine, TransportError, TransportEvent,
    TransportFactory,
};
use crate::media::{MediaSource, RemoteTrackHandle};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Kapazität des Engine-Event-Kanals pro Session.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Standard STUN Server Konfiguration.
pub fn default_ice_servers() -> Vec<RTCIceServer> {
    vec![RTCIceServer {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        ..Default::default()
    }]
}

// ============================================================================
// FACTORY
// ============================================================================

/// Erzeugt pro Session eine frische Peer Connection.
pub struct WebRtcFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcFactory {
    pub fn new() -> Self {
        Self {
            ice_servers: default_ice_servers(),
        }
    }

    pub fn with_ice_servers(ice_servers: Vec<RTCIceServer>) -> Self {
        Self { ice_servers }
    }

    /// Fügt optionale TURN-Server Credentials hinzu.
    pub fn add_turn_server(&mut self, url: String, username: String, credential: String) {
        self.ice_servers.push(RTCIceServer {
            urls: vec![url],
            username,
            credential,
            ..Default::default()
        });
    }
}

impl Default for WebRtcFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn TransportEngine>, mpsc::Receiver<TransportEvent>), TransportError> {
        // Media Engine mit Standard-Codecs
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Engine(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::Engine(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| TransportError::Engine(e.to_string()))?,
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        register_handlers(&pc, events_tx);

        Ok((Arc::new(WebRtcEngine { pc }), events_rx))
    }
}

/// Registriert die Callback-Handler der Peer Connection und leitet
/// deren Events in den typisierten Kanal um.
fn register_handlers(pc: &Arc<RTCPeerConnection>, events_tx: mpsc::Sender<TransportEvent>) {
    // ICE Candidate Handler
    let tx = events_tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let tx = tx.clone();
        Box::pin(async move {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => {
                        let _ = tx
                            .send(TransportEvent::LocalCandidate(CandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }))
                            .await;
                    }
                    Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
                }
            }
        })
    }));

    // Track Handler (eingehende Remote-Medien)
    let tx = events_tx.clone();
    pc.on_track(Box::new(move |track, _, _| {
        let tx = tx.clone();
        Box::pin(async move {
            tracing::info!("Received remote track: {:?}", track.codec());
            let _ = tx
                .send(TransportEvent::RemoteTrack(RemoteTrackHandle {
                    stream_id: track.stream_id(),
                    kind: track.kind().to_string(),
                }))
                .await;
        })
    }));

    // Connection State Handler
    let tx = events_tx;
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = tx.clone();
        Box::pin(async move {
            tracing::info!("Peer connection state: {:?}", state);
            match state {
                RTCPeerConnectionState::Connected => {
                    let _ = tx.send(TransportEvent::Connected).await;
                }
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                    let _ = tx
                        .send(TransportEvent::Failed(format!("{:?}", state)))
                        .await;
                }
                _ => {}
            }
        })
    }));
}

// ============================================================================
// ENGINE
// ============================================================================

/// Eine aktive WebRTC Peer Connection.
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    async fn attach_media(&self, media: &MediaSource) -> Result<(), TransportError> {
        for track in &media.tracks {
            self.pc
                .add_track(Arc::clone(track))
                .await
                .map_err(|e| TransportError::Engine(e.to_string()))?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Engine(e.to_string()))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| TransportError::Engine(e.to_string()))?;

        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Engine(e.to_string()))?;

        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::Engine(e.to_string()))?;

        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        let remote = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| TransportError::InvalidSdp(e.to_string()))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| TransportError::Engine(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), TransportError> {
        // Optionale Felder unverändert durchreichen, keine Defaults
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::CandidateRejected(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
    }
}
