//! CallSession - Zustandsmaschine einer einzelnen Verhandlung
//!
//! Eine Session besitzt Rolle, Descriptions, Candidate-Buffer und die
//! exklusive Engine-Verbindung. Alle Übergänge laufen seriell über den
//! Coordinator-Loop; die Session selbst kennt weder Kanal noch UI und
//! gibt auszusendende Nachrichten als `OutboundSignal` zurück.

use super::candidate_buffer::CandidateBuffer;
use crate::media::{MediaSource, RemoteTrackHandle};
use crate::signaling::SignalingError;
use crate::transport::{
    CandidateInit, SdpKind, SessionDescription, TransportEngine, TransportError,
};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CallError {
    #[error("No local media source attached")]
    NoActiveMedia,

    #[error("A call is already in progress")]
    CallAlreadyInProgress,

    #[error("No pending incoming call")]
    NoPendingOffer,

    #[error("Media permission denied")]
    PermissionDenied,

    #[error("Media capture failed: {0}")]
    MediaCapture(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Call coordinator is stopped")]
    CoordinatorStopped,
}

// ============================================================================
// ROLE & PHASE
// ============================================================================

/// Wer das Offer erzeugt. Unveränderlich nach Session-Erzeugung.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Lebenszyklus-Phase einer Session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    AwaitingLocalMedia,
    Offering,
    AwaitingAnswer,
    AwaitingLocalAnswer,
    Connected,
    Closing,
    Closed,
    Failed,
}

impl CallPhase {
    /// Terminal heißt: die Session ist inert, keine Events mutieren sie mehr.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallPhase::Closed | CallPhase::Failed)
    }

    pub fn is_active(self) -> bool {
        !matches!(self, CallPhase::Idle | CallPhase::Closed | CallPhase::Failed)
    }
}

// ============================================================================
// OUTBOUND SIGNALS
// ============================================================================

/// Nachricht, die als Folge eines Übergangs an den Peer geht.
#[derive(Debug, Clone)]
pub enum OutboundSignal {
    Offer {
        to: String,
        description: SessionDescription,
        display_name: String,
    },
    Answer {
        to: String,
        description: SessionDescription,
    },
    Candidate {
        to: String,
        candidate: CandidateInit,
    },
    EndCall {
        to: String,
    },
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Eine laufende Verhandlung mit genau einem Remote-Peer.
pub struct CallSession {
    id: Uuid,
    role: CallRole,
    peer_ref: String,
    phase: CallPhase,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    /// Lokale Description wurde bereits an den Peer emittiert.
    local_description_sent: bool,
    remote_candidates: CandidateBuffer,
    local_candidates: CandidateBuffer,
    engine: Arc<dyn TransportEngine>,
    remote_stream: Option<RemoteTrackHandle>,
}

impl CallSession {
    pub fn new_caller(id: Uuid, peer_ref: String, engine: Arc<dyn TransportEngine>) -> Self {
        Self::new(id, CallRole::Caller, peer_ref, engine)
    }

    pub fn new_callee(id: Uuid, peer_ref: String, engine: Arc<dyn TransportEngine>) -> Self {
        Self::new(id, CallRole::Callee, peer_ref, engine)
    }

    fn new(id: Uuid, role: CallRole, peer_ref: String, engine: Arc<dyn TransportEngine>) -> Self {
        Self {
            id,
            role,
            peer_ref,
            phase: CallPhase::Idle,
            local_description: None,
            remote_description: None,
            local_description_sent: false,
            remote_candidates: CandidateBuffer::new(),
            local_candidates: CandidateBuffer::new(),
            engine,
            remote_stream: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn peer_ref(&self) -> &str {
        &self.peer_ref
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn remote_stream(&self) -> Option<RemoteTrackHandle> {
        self.remote_stream.clone()
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    // ========================================================================
    // TRANSITIONS - CALLER
    // ========================================================================

    /// Idle → Offering → AwaitingAnswer: Media anhängen, Offer erzeugen
    /// und als `call-offer` emittieren.
    pub async fn start_offer(
        &mut self,
        media: &MediaSource,
        display_name: String,
    ) -> Result<Vec<OutboundSignal>, CallError> {
        if self.role != CallRole::Caller {
            tracing::warn!(session = %self.id, "Dropping offer attempt on callee session");
            return Ok(Vec::new());
        }
        if self.phase != CallPhase::Idle {
            tracing::warn!(session = %self.id, phase = ?self.phase, "Dropping concurrent offer attempt");
            return Ok(Vec::new());
        }

        self.phase = CallPhase::Offering;

        if let Err(e) = self.engine.attach_media(media).await {
            return Err(self.fail_with(e).await);
        }

        let offer = match self.engine.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail_with(e).await),
        };

        self.local_description = Some(offer.clone());
        self.local_description_sent = true;
        self.phase = CallPhase::AwaitingAnswer;

        let mut signals = vec![OutboundSignal::Offer {
            to: self.peer_ref.clone(),
            description: offer,
            display_name,
        }];
        self.drain_local_candidates(&mut signals);

        tracing::info!(session = %self.id, peer = %self.peer_ref, "Offer created, awaiting answer");
        Ok(signals)
    }

    /// AwaitingAnswer → Connected: Answer der Gegenseite anwenden und
    /// gepufferte Remote-Candidates nachziehen.
    pub async fn apply_remote_answer(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        if self.phase.is_terminal() {
            tracing::debug!(session = %self.id, "Dropping answer for dead session");
            return Ok(());
        }
        if self.role != CallRole::Caller || self.phase != CallPhase::AwaitingAnswer {
            tracing::warn!(session = %self.id, phase = ?self.phase, "Dropping unexpected answer");
            return Ok(());
        }
        if self.remote_description.is_some() {
            tracing::warn!(session = %self.id, "Dropping duplicate answer");
            return Ok(());
        }
        if description.kind != SdpKind::Answer {
            let e = TransportError::InvalidSdp("expected answer description".to_string());
            return Err(self.fail_with(e).await);
        }

        if let Err(e) = self.engine.set_remote_description(description.clone()).await {
            return Err(self.fail_with(e).await);
        }

        self.remote_description = Some(description);
        self.flush_remote_candidates().await;
        self.phase = CallPhase::Connected;

        tracing::info!(session = %self.id, peer = %self.peer_ref, "Answer applied, call connected");
        Ok(())
    }

    // ========================================================================
    // TRANSITIONS - CALLEE
    // ========================================================================

    /// Idle → AwaitingLocalMedia: eingehendes Offer anwenden. Candidates,
    /// die vor dem Offer ankamen, werden direkt mitgeflusht.
    pub async fn apply_remote_offer(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        if self.role != CallRole::Callee || self.phase != CallPhase::Idle {
            tracing::warn!(session = %self.id, phase = ?self.phase, "Dropping unexpected offer");
            return Ok(());
        }
        if self.remote_description.is_some() {
            tracing::warn!(session = %self.id, "Dropping duplicate offer");
            return Ok(());
        }
        if description.kind != SdpKind::Offer {
            let e = TransportError::InvalidSdp("expected offer description".to_string());
            return Err(self.fail_with(e).await);
        }

        if let Err(e) = self.engine.set_remote_description(description.clone()).await {
            return Err(self.fail_with(e).await);
        }

        self.remote_description = Some(description);
        self.flush_remote_candidates().await;
        self.phase = CallPhase::AwaitingLocalMedia;

        tracing::info!(session = %self.id, peer = %self.peer_ref, "Remote offer applied, awaiting local media");
        Ok(())
    }

    /// AwaitingLocalMedia → AwaitingLocalAnswer → Connected: Media
    /// anhängen, Answer erzeugen und als `call-accepted` emittieren.
    pub async fn accept(&mut self, media: &MediaSource) -> Result<Vec<OutboundSignal>, CallError> {
        if self.role != CallRole::Callee {
            tracing::warn!(session = %self.id, "Dropping accept on caller session");
            return Ok(Vec::new());
        }
        if self.phase != CallPhase::AwaitingLocalMedia {
            tracing::warn!(session = %self.id, phase = ?self.phase, "Dropping accept in unexpected phase");
            return Ok(Vec::new());
        }

        if let Err(e) = self.engine.attach_media(media).await {
            return Err(self.fail_with(e).await);
        }

        self.phase = CallPhase::AwaitingLocalAnswer;

        let answer = match self.engine.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail_with(e).await),
        };

        self.local_description = Some(answer.clone());
        self.local_description_sent = true;
        // Verbindungsbestätigung liefert die Engine asynchron nach
        self.phase = CallPhase::Connected;

        let mut signals = vec![OutboundSignal::Answer {
            to: self.peer_ref.clone(),
            description: answer,
        }];
        self.drain_local_candidates(&mut signals);

        tracing::info!(session = %self.id, peer = %self.peer_ref, "Answer created, call connected");
        Ok(signals)
    }

    // ========================================================================
    // CANDIDATES & TRACKS
    // ========================================================================

    /// Remote-Candidate: anwenden sobald die Remote Description steht,
    /// sonst puffern. Einzelne Fehlschläge brechen die Session nie ab.
    pub async fn apply_remote_candidate(&mut self, candidate: CandidateInit) {
        if self.phase.is_terminal() {
            tracing::debug!(session = %self.id, "Dropping candidate for dead session");
            return;
        }

        if self.remote_description.is_some() {
            if let Err(e) = self.engine.add_ice_candidate(candidate).await {
                tracing::warn!(session = %self.id, "Skipping rejected candidate: {}", e);
            }
        } else {
            self.remote_candidates.push(candidate);
            tracing::debug!(
                session = %self.id,
                buffered = self.remote_candidates.len(),
                "Buffered early remote candidate"
            );
        }
    }

    /// Lokal entdeckter Candidate: emittieren sobald die eigene
    /// Description raus ist, sonst puffern.
    pub fn handle_local_candidate(&mut self, candidate: CandidateInit) -> Option<OutboundSignal> {
        if self.phase.is_terminal() {
            return None;
        }

        if self.local_description_sent {
            Some(OutboundSignal::Candidate {
                to: self.peer_ref.clone(),
                candidate,
            })
        } else {
            self.local_candidates.push(candidate);
            None
        }
    }

    /// Remote-Medien sind da; das Handle ändert sich genau einmal pro
    /// erfolgreicher Verhandlung.
    pub fn handle_remote_track(&mut self, handle: RemoteTrackHandle) -> Option<RemoteTrackHandle> {
        if self.phase.is_terminal() {
            return None;
        }
        if self.remote_stream.is_some() {
            tracing::debug!(session = %self.id, "Ignoring additional remote track");
            return None;
        }
        self.remote_stream = Some(handle.clone());
        Some(handle)
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Beendet die Session. Idempotent: auf einer bereits toten Session
    /// passiert nichts und es geht keine zweite Nachricht raus.
    pub async fn close(&mut self, locally_initiated: bool) -> Option<OutboundSignal> {
        if self.phase.is_terminal() {
            return None;
        }

        self.phase = CallPhase::Closing;
        self.engine.close().await;
        self.remote_stream = None;
        self.phase = CallPhase::Closed;

        tracing::info!(session = %self.id, peer = %self.peer_ref, "Call closed");

        locally_initiated.then(|| OutboundSignal::EndCall {
            to: self.peer_ref.clone(),
        })
    }

    /// Fataler Fehler: Ressourcen abbauen, Failed genau einmal melden.
    pub async fn fail(&mut self, reason: &str) -> bool {
        if self.phase.is_terminal() {
            return false;
        }

        self.engine.close().await;
        self.remote_stream = None;
        self.phase = CallPhase::Failed;

        tracing::error!(session = %self.id, peer = %self.peer_ref, "Call failed: {}", reason);
        true
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Engine-Fehler während eines Übergangs: Ressourcen abbauen,
    /// Session terminal auf Failed setzen, Fehler übersetzen.
    async fn fail_with(&mut self, e: TransportError) -> CallError {
        self.engine.close().await;
        self.remote_stream = None;
        self.phase = CallPhase::Failed;
        tracing::error!(session = %self.id, peer = %self.peer_ref, "Negotiation failed: {}", e);
        match e {
            TransportError::InvalidSdp(msg) => CallError::InvalidDescription(msg),
            other => CallError::TransportFailure(other.to_string()),
        }
    }

    async fn flush_remote_candidates(&mut self) {
        let engine = Arc::clone(&self.engine);
        self.remote_candidates
            .flush(|candidate| {
                let engine = Arc::clone(&engine);
                async move { engine.add_ice_candidate(candidate).await }
            })
            .await;
    }

    fn drain_local_candidates(&mut self, signals: &mut Vec<OutboundSignal>) {
        for candidate in self.local_candidates.take_all() {
            signals.push(OutboundSignal::Candidate {
                to: self.peer_ref.clone(),
                candidate,
            });
        }
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer_ref", &self.peer_ref)
            .field("phase", &self.phase)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
