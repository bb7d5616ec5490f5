//! Signaling Client für den Rendezvous-Kanal
//!
//! Adaptiert einen bidirektionalen Text-Kanal in die typisierten Events,
//! die die Call-Verhandlung braucht:
//! - WebSocket-Verbindung mit getrennten Read/Write-Tasks
//! - Alternativ ein beliebiges mpsc-Kanalpaar (`from_channel`)
//! - Sends sind fire-and-forget, Zustellung nicht garantiert
//! - Kanalverlust wird höchstens einmal als `Disconnected` gemeldet

use super::messages::*;
use crate::transport::{CandidateInit, SessionDescription};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Kapazität des Event- und des Outbound-Kanals.
const CHANNEL_CAPACITY: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("Signaling connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingClient ausgelöst werden.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Der Server hat die lokale Identität zugewiesen.
    IdentityAssigned { id: String },

    /// Eingehender Anruf mit Offer-Description.
    IncomingCall {
        from: String,
        description: SessionDescription,
        display_name: Option<String>,
    },

    /// Die Gegenseite hat angenommen, Answer-Description liegt bei.
    CallAccepted {
        from: String,
        description: SessionDescription,
    },

    /// ICE Candidate der Gegenseite.
    IceCandidate {
        from: String,
        candidate: CandidateInit,
    },

    /// Die Gegenseite hat aufgelegt.
    CallEnded { from: Option<String> },

    /// Kanal verloren, wird höchstens einmal gemeldet.
    Disconnected,
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Default)]
struct ClientState {
    is_connected: bool,
    self_id: Option<String>,
    disconnect_notified: bool,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// Client für die Kommunikation mit dem Rendezvous-Server.
pub struct SignalingClient {
    state: Arc<RwLock<ClientState>>,
    tx: mpsc::Sender<String>,
    event_tx: broadcast::Sender<SignalingEvent>,
}

impl SignalingClient {
    /// Verbindet per WebSocket mit dem Rendezvous-Server.
    pub async fn connect(server_url: &str) -> Result<Self, SignalingError> {
        tracing::info!("Connecting to signaling server: {}", server_url);

        let (ws_stream, _) = connect_async(server_url)
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let client = Self::with_sender(tx);

        // Read-Task
        let state = Arc::clone(&client.state);
        let event_tx = client.event_tx.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => dispatch_text(&text, &state, &event_tx),
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            notify_disconnected(&state, &event_tx);
        });

        // Write-Task
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        });

        Ok(client)
    }

    /// Adaptiert ein beliebiges bidirektionales Kanalpaar.
    ///
    /// `outbound` transportiert serialisierte Client-Nachrichten zum
    /// Server, `inbound` liefert Server-Nachrichten als JSON-Text.
    pub fn from_channel(
        outbound: mpsc::Sender<String>,
        mut inbound: mpsc::Receiver<String>,
    ) -> Self {
        let client = Self::with_sender(outbound);

        let state = Arc::clone(&client.state);
        let event_tx = client.event_tx.clone();
        tokio::spawn(async move {
            while let Some(text) = inbound.recv().await {
                dispatch_text(&text, &state, &event_tx);
            }
            notify_disconnected(&state, &event_tx);
        });

        client
    }

    fn with_sender(tx: mpsc::Sender<String>) -> Self {
        let (event_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let state = Arc::new(RwLock::new(ClientState {
            is_connected: true,
            ..ClientState::default()
        }));

        Self {
            state,
            tx,
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück.
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }

    /// Die vom Server zugewiesene eigene Identität, falls schon bekannt.
    pub fn self_id(&self) -> Option<String> {
        self.state.read().self_id.clone()
    }

    /// Prüft ob der Kanal noch lebt.
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Wartet bis der Server die eigene Identität zugewiesen hat.
    pub async fn wait_for_identity(&self, timeout: Duration) -> Result<String, SignalingError> {
        let mut rx = self.event_tx.subscribe();
        if let Some(id) = self.self_id() {
            return Ok(id);
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(SignalingEvent::IdentityAssigned { id }) => return Ok(id),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(id) = self.self_id() {
                            return Ok(id);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SignalingError::NotConnected);
                    }
                },
                _ = &mut deadline => {
                    return Err(SignalingError::ConnectionFailed(
                        "timed out waiting for identity".to_string(),
                    ));
                }
            }
        }
    }

    // ========================================================================
    // OUTBOUND MESSAGES (fire-and-forget)
    // ========================================================================

    /// Sendet ein Offer an einen Peer.
    pub fn send_offer(
        &self,
        to: String,
        description: SessionDescription,
        display_name: String,
    ) -> Result<(), SignalingError> {
        let from = self.self_id().ok_or(SignalingError::NotConnected)?;
        self.send_payload(&CallOfferPayload::new(from, to, description, display_name))
    }

    /// Sendet ein Answer an den Anrufer.
    pub fn send_answer(
        &self,
        to: String,
        description: SessionDescription,
    ) -> Result<(), SignalingError> {
        let from = self.self_id().ok_or(SignalingError::NotConnected)?;
        self.send_payload(&CallAcceptedPayload::new(from, to, description))
    }

    /// Sendet einen ICE Candidate an einen Peer.
    pub fn send_candidate(
        &self,
        to: String,
        candidate: CandidateInit,
    ) -> Result<(), SignalingError> {
        let from = self.self_id().ok_or(SignalingError::NotConnected)?;
        self.send_payload(&IceCandidatePayload::new(from, to, candidate))
    }

    /// Meldet der Gegenseite das Ende des Anrufs.
    pub fn send_end_call(&self, to: String) -> Result<(), SignalingError> {
        let from = self.self_id().ok_or(SignalingError::NotConnected)?;
        self.send_payload(&EndCallPayload::new(from, to))
    }

    /// Serialisiert und sendet non-blocking (try_send).
    fn send_payload<T: serde::Serialize>(&self, payload: &T) -> Result<(), SignalingError> {
        let msg = serde_json::to_string(payload)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        self.tx
            .try_send(msg)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("state", &*self.state.read())
            .finish()
    }
}

// ============================================================================
// INBOUND DISPATCH
// ============================================================================

/// Parst eine Server-Nachricht und setzt sie in ein Event um.
/// Unbekannte oder kaputte Nachrichten werden geloggt und verworfen.
fn dispatch_text(
    text: &str,
    state: &Arc<RwLock<ClientState>>,
    event_tx: &broadcast::Sender<SignalingEvent>,
) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("Dropping unparseable signaling message: {}", e);
            return;
        }
    };

    let event = match msg {
        ServerMessage::IdentityAssigned { id } => {
            tracing::info!("Assigned identity: {}", id);
            state.write().self_id = Some(id.clone());
            SignalingEvent::IdentityAssigned { id }
        }
        ServerMessage::CallOffer {
            from,
            signal_data,
            display_name,
        } => SignalingEvent::IncomingCall {
            from,
            description: signal_data,
            display_name,
        },
        ServerMessage::CallAccepted { from, signal } => SignalingEvent::CallAccepted {
            from,
            description: signal,
        },
        ServerMessage::IceCandidate { from, candidate } => {
            SignalingEvent::IceCandidate { from, candidate }
        }
        ServerMessage::EndCall { from } => SignalingEvent::CallEnded { from },
    };

    let _ = event_tx.send(event);
}

/// Meldet den Kanalverlust, garantiert höchstens einmal.
fn notify_disconnected(
    state: &Arc<RwLock<ClientState>>,
    event_tx: &broadcast::Sender<SignalingEvent>,
) {
    {
        let mut s = state.write();
        if s.disconnect_notified {
            return;
        }
        s.disconnect_notified = true;
        s.is_connected = false;
    }
    let _ = event_tx.send(SignalingEvent::Disconnected);
}

// ============================================================================
// TESTS
// ============================================================================
