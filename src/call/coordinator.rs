//! Call Coordinator
//!
//! Einziger Besitzer der aktiven CallSession. Bindet Signaling-Events,
//! Engine-Events und UI-Intents an die Zustandsmaschine und serialisiert
//! alle Übergänge über einen einzigen Event-Loop: solange ein Übergang
//! in Flight ist, wird kein zweiter in dieselbe Session dispatcht.
//! Engine-Events tragen die Session-Id; Events toter Sessions laufen
//! ins Leere statt eine beendete Session wiederzubeleben.

use super::session::{CallError, CallPhase, CallRole, CallSession, OutboundSignal};
use crate::media::{MediaError, MediaProvider, MediaSource, RemoteTrackHandle};
use crate::signaling::{SignalingClient, SignalingEvent};
use crate::transport::{CandidateInit, SessionDescription, TransportEvent, TransportFactory};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

/// Kapazität des Command- und des Event-Kanals.
const CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Anzeigename, der mit dem Offer zum Peer geht.
    pub display_name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            display_name: "Caller".to_string(),
        }
    }
}

// ============================================================================
// CALL EVENTS
// ============================================================================

/// Events für den UI-Collaborator.
#[derive(Debug, Clone)]
pub enum CallEvent {
    PhaseChanged {
        session: Uuid,
        phase: CallPhase,
    },
    /// Eingehender Anruf wartet auf `accept_incoming` oder `end_call`.
    IncomingCall {
        from: String,
        display_name: Option<String>,
    },
    /// Remote-Stream-Handle für den Renderer; `None` nach Closed/Failed.
    RemoteMediaChanged(Option<RemoteTrackHandle>),
    /// Terminale Fehlermeldung, genau einmal pro Session.
    CallFailed {
        session: Uuid,
        reason: String,
    },
}

// ============================================================================
// COMMANDS
// ============================================================================

enum Command {
    StartLocalMedia {
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    StartCall {
        peer_ref: String,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    AcceptIncoming {
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    EndCall {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ============================================================================
// SHARED SNAPSHOT
// ============================================================================

#[derive(Debug, Default)]
struct Shared {
    phase: Option<CallPhase>,
    remote_stream: Option<RemoteTrackHandle>,
}

// ============================================================================
// CALL COORDINATOR
// ============================================================================

/// Handle auf den Coordinator-Loop.
///
/// Hält höchstens eine aktive CallSession; ein zweiter `start_call`
/// schlägt mit `CallAlreadyInProgress` fehl, ohne die laufende Session
/// anzufassen.
pub struct CallCoordinator {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<RwLock<Shared>>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallCoordinator {
    /// Startet den Event-Loop und gibt das Handle zurück.
    pub fn spawn(
        signaling: Arc<SignalingClient>,
        factory: Arc<dyn TransportFactory>,
        media_provider: Arc<dyn MediaProvider>,
        config: CoordinatorConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (engine_tx, engine_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let shared = Arc::new(RwLock::new(Shared::default()));

        let task = CoordinatorTask {
            signaling,
            factory,
            media_provider,
            config,
            local_media: None,
            session: None,
            engine_tx,
            shared: Arc::clone(&shared),
            event_tx: event_tx.clone(),
        };
        tokio::spawn(task.run(cmd_rx, engine_rx));

        Self {
            cmd_tx,
            shared,
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// Phase der aktuellen (oder zuletzt beendeten) Session.
    pub fn phase(&self) -> Option<CallPhase> {
        self.shared.read().phase
    }

    /// Aktuelles Remote-Stream-Handle für den Renderer-Collaborator.
    pub fn remote_stream(&self) -> Option<RemoteTrackHandle> {
        self.shared.read().remote_stream.clone()
    }

    /// Fordert die lokale Medienquelle beim Capture-Collaborator an.
    pub async fn start_local_media(&self) -> Result<(), CallError> {
        self.request(|reply| Command::StartLocalMedia { reply })
            .await?
    }

    /// Startet einen ausgehenden Anruf zum angegebenen Peer.
    pub async fn start_call(&self, peer_ref: impl Into<String>) -> Result<(), CallError> {
        let peer_ref = peer_ref.into();
        self.request(|reply| Command::StartCall { peer_ref, reply })
            .await?
    }

    /// Nimmt den wartenden eingehenden Anruf an.
    pub async fn accept_incoming(&self) -> Result<(), CallError> {
        self.request(|reply| Command::AcceptIncoming { reply })
            .await?
    }

    /// Beendet den aktuellen Anruf. Idempotent: auf einer bereits
    /// beendeten Session ist das ein No-op, kein Fehler.
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.request(|reply| Command::EndCall { reply }).await
    }

    /// Beendet einen laufenden Anruf und stoppt den Loop.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| CallError::CoordinatorStopped)?;
        reply_rx.await.map_err(|_| CallError::CoordinatorStopped)
    }
}

impl std::fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("shared", &*self.shared.read())
            .finish()
    }
}

// ============================================================================
// EVENT LOOP
// ============================================================================

struct CoordinatorTask {
    signaling: Arc<SignalingClient>,
    factory: Arc<dyn TransportFactory>,
    media_provider: Arc<dyn MediaProvider>,
    config: CoordinatorConfig,
    local_media: Option<MediaSource>,
    session: Option<CallSession>,
    engine_tx: mpsc::Sender<(Uuid, TransportEvent)>,
    shared: Arc<RwLock<Shared>>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CoordinatorTask {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut engine_rx: mpsc::Receiver<(Uuid, TransportEvent)>,
    ) {
        let mut sig_rx = self.signaling.subscribe();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
                event = sig_rx.recv() => match event {
                    Ok(event) => self.handle_signaling(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Signaling event stream lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Signaling event stream closed");
                        self.close_session(false).await;
                        break;
                    }
                },
                Some((session_id, event)) = engine_rx.recv() => {
                    self.handle_engine(session_id, event).await;
                }
            }
        }

        tracing::info!("Call coordinator stopped");
    }

    /// Erzeugt eine Engine samt Forwarder-Task, der deren Events mit
    /// der Session-Id markiert in den Loop schiebt.
    async fn create_engine(
        &self,
        session_id: Uuid,
    ) -> Result<Arc<dyn crate::transport::TransportEngine>, CallError> {
        let (engine, mut events) = self
            .factory
            .create()
            .await
            .map_err(|e| CallError::TransportFailure(e.to_string()))?;

        let engine_tx = self.engine_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if engine_tx.send((session_id, event)).await.is_err() {
                    break;
                }
            }
        });

        Ok(engine)
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Gibt `true` zurück, wenn der Loop enden soll.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::StartLocalMedia { reply } => {
                let _ = reply.send(self.cmd_start_local_media().await);
            }
            Command::StartCall { peer_ref, reply } => {
                let _ = reply.send(self.cmd_start_call(peer_ref).await);
            }
            Command::AcceptIncoming { reply } => {
                let _ = reply.send(self.cmd_accept_incoming().await);
            }
            Command::EndCall { reply } => {
                self.close_session(true).await;
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.close_session(true).await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    async fn cmd_start_local_media(&mut self) -> Result<(), CallError> {
        let media = self.media_provider.acquire().await.map_err(|e| match e {
            MediaError::PermissionDenied => CallError::PermissionDenied,
            MediaError::Capture(msg) => CallError::MediaCapture(msg),
        })?;

        tracing::info!(media = %media.id, "Local media source attached");
        self.local_media = Some(media);
        Ok(())
    }

    async fn cmd_start_call(&mut self, peer_ref: String) -> Result<(), CallError> {
        if self.session.as_ref().is_some_and(CallSession::is_active) {
            tracing::warn!("start_call while a session is active, dropping");
            return Err(CallError::CallAlreadyInProgress);
        }
        let media = self.local_media.clone().ok_or(CallError::NoActiveMedia)?;

        let session_id = Uuid::new_v4();
        let engine = self.create_engine(session_id).await?;
        let mut session = CallSession::new_caller(session_id, peer_ref, engine);
        tracing::info!(session = %session_id, peer = %session.peer_ref(), "Starting outgoing call");

        match session
            .start_offer(&media, self.config.display_name.clone())
            .await
        {
            Ok(signals) => {
                self.session = Some(session);
                self.emit(signals);
                self.publish_phase();
                Ok(())
            }
            Err(e) => {
                self.publish_failed(session_id, &e.to_string());
                Err(e)
            }
        }
    }

    async fn cmd_accept_incoming(&mut self) -> Result<(), CallError> {
        let has_pending = self.session.as_ref().is_some_and(|s| {
            s.role() == CallRole::Callee && s.phase() == CallPhase::AwaitingLocalMedia
        });
        if !has_pending {
            return Err(CallError::NoPendingOffer);
        }
        let media = self.local_media.clone().ok_or(CallError::NoActiveMedia)?;

        let Some(session) = self.session.as_mut() else {
            return Err(CallError::NoPendingOffer);
        };
        let session_id = session.id();
        match session.accept(&media).await {
            Ok(signals) => {
                self.emit(signals);
                self.publish_phase();
                Ok(())
            }
            Err(e) => {
                self.session = None;
                self.publish_failed(session_id, &e.to_string());
                Err(e)
            }
        }
    }

    // ========================================================================
    // SIGNALING EVENTS
    // ========================================================================

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::IdentityAssigned { id } => {
                tracing::debug!("Signaling identity: {}", id);
            }
            SignalingEvent::IncomingCall {
                from,
                description,
                display_name,
            } => {
                self.on_incoming_offer(from, description, display_name)
                    .await;
            }
            SignalingEvent::CallAccepted { from, description } => {
                self.on_remote_answer(from, description).await;
            }
            SignalingEvent::IceCandidate { from, candidate } => {
                self.on_remote_candidate(from, candidate).await;
            }
            SignalingEvent::CallEnded { from } => {
                tracing::info!(from = ?from, "Peer ended the call");
                self.close_session(false).await;
            }
            SignalingEvent::Disconnected => {
                // Kanalverlust wirkt wie ein end-call der Gegenseite
                tracing::info!("Signaling channel lost");
                self.close_session(false).await;
            }
        }
    }

    async fn on_incoming_offer(
        &mut self,
        from: String,
        description: SessionDescription,
        display_name: Option<String>,
    ) {
        if self.session.as_ref().is_some_and(CallSession::is_active) {
            // Caller-Präzedenz: das erste Offer gewinnt
            tracing::warn!(from = %from, "Dropping call-offer while a call is in progress");
            return;
        }

        let session_id = Uuid::new_v4();
        let engine = match self.create_engine(session_id).await {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!("Failed to create transport for incoming call: {}", e);
                return;
            }
        };

        let mut session = CallSession::new_callee(session_id, from.clone(), engine);
        tracing::info!(session = %session_id, peer = %from, "Incoming call");

        match session.apply_remote_offer(description).await {
            Ok(()) => {
                self.session = Some(session);
                self.publish_phase();
                let _ = self
                    .event_tx
                    .send(CallEvent::IncomingCall { from, display_name });
            }
            Err(e) => {
                self.publish_failed(session_id, &e.to_string());
            }
        }
    }

    async fn on_remote_answer(&mut self, from: String, description: SessionDescription) {
        let Some(session) = self.session.as_mut().filter(|s| s.is_active()) else {
            tracing::debug!(from = %from, "Dropping answer without active session");
            return;
        };
        if session.peer_ref() != from {
            tracing::warn!(from = %from, "Dropping answer from unexpected peer");
            return;
        }

        let session_id = session.id();
        match session.apply_remote_answer(description).await {
            Ok(()) => self.publish_phase(),
            Err(e) => {
                self.session = None;
                self.publish_failed(session_id, &e.to_string());
            }
        }
    }

    async fn on_remote_candidate(&mut self, from: String, candidate: CandidateInit) {
        let Some(session) = self.session.as_mut().filter(|s| s.is_active()) else {
            tracing::debug!(from = %from, "Dropping candidate without active session");
            return;
        };
        if session.peer_ref() != from {
            tracing::debug!(from = %from, "Dropping candidate from unexpected peer");
            return;
        }

        session.apply_remote_candidate(candidate).await;
    }

    // ========================================================================
    // ENGINE EVENTS
    // ========================================================================

    async fn handle_engine(&mut self, session_id: Uuid, event: TransportEvent) {
        let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.id() == session_id && s.is_active())
        else {
            tracing::debug!(session = %session_id, "Dropping engine event for dead session");
            return;
        };

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if let Some(signal) = session.handle_local_candidate(candidate) {
                    self.emit(vec![signal]);
                }
            }
            TransportEvent::RemoteTrack(handle) => {
                if let Some(handle) = session.handle_remote_track(handle) {
                    self.shared.write().remote_stream = Some(handle.clone());
                    let _ = self
                        .event_tx
                        .send(CallEvent::RemoteMediaChanged(Some(handle)));
                }
            }
            TransportEvent::Connected => {
                tracing::info!(session = %session_id, "Transport confirmed media connection");
            }
            TransportEvent::Failed(reason) => {
                if session.fail(&reason).await {
                    self.session = None;
                    self.publish_failed(session_id, &reason);
                }
            }
        }
    }

    // ========================================================================
    // TEARDOWN & PUBLISHING
    // ========================================================================

    /// Schließt die aktuelle Session, falls vorhanden. Idempotent; ein
    /// `end-call` geht nur bei lokal initiiertem Ende raus.
    async fn close_session(&mut self, locally_initiated: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let session_id = session.id();
        if let Some(signal) = session.close(locally_initiated).await {
            self.emit(vec![signal]);
        }
        self.session = None;

        {
            let mut shared = self.shared.write();
            shared.phase = Some(CallPhase::Closed);
            shared.remote_stream = None;
        }
        let _ = self.event_tx.send(CallEvent::PhaseChanged {
            session: session_id,
            phase: CallPhase::Closed,
        });
        let _ = self.event_tx.send(CallEvent::RemoteMediaChanged(None));
    }

    fn publish_phase(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let phase = session.phase();
        self.shared.write().phase = Some(phase);
        let _ = self.event_tx.send(CallEvent::PhaseChanged {
            session: session.id(),
            phase,
        });
    }

    fn publish_failed(&mut self, session: Uuid, reason: &str) {
        {
            let mut shared = self.shared.write();
            shared.phase = Some(CallPhase::Failed);
            shared.remote_stream = None;
        }
        let _ = self.event_tx.send(CallEvent::PhaseChanged {
            session,
            phase: CallPhase::Failed,
        });
        let _ = self.event_tx.send(CallEvent::RemoteMediaChanged(None));
        let _ = self.event_tx.send(CallEvent::CallFailed {
            session,
            reason: reason.to_string(),
        });
    }

    /// Schiebt Übergangs-Ergebnisse in den Signaling-Kanal,
    /// best-effort ohne Zustellgarantie.
    fn emit(&self, signals: Vec<OutboundSignal>) {
        for signal in signals {
            let result = match signal {
                OutboundSignal::Offer {
                    to,
                    description,
                    display_name,
                } => self.signaling.send_offer(to, description, display_name),
                OutboundSignal::Answer { to, description } => {
                    self.signaling.send_answer(to, description)
                }
                OutboundSignal::Candidate { to, candidate } => {
                    self.signaling.send_candidate(to, candidate)
                }
                OutboundSignal::EndCall { to } => self.signaling.send_end_call(to),
            };
            if let Err(e) = result {
                tracing::warn!("Failed to push signaling message: {}", e);
            }
        }
    }
}
