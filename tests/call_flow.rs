//! End-to-End Szenarien für die Call-Verhandlung
//!
//! Fährt den Coordinator gegen eine Mock-Engine und einen In-Memory
//! Signaling-Kanal: ausgehende Nachrichten landen als JSON im Test,
//! Server-Nachrichten werden als JSON-Text injiziert.

use async_trait::async_trait;
use peercall::{
    CallCoordinator, CallError, CallEvent, CallPhase, CandidateInit, CoordinatorConfig, MediaError,
    MediaProvider, MediaSource, SessionDescription, SignalingClient, TransportEngine,
    TransportError, TransportEvent, TransportFactory,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// MOCK ENGINE
// ============================================================================

struct MockEngine {
    remote_description: Mutex<Option<SessionDescription>>,
    applied_candidates: Mutex<Vec<String>>,
    closed: AtomicBool,
    fail_set_remote: bool,
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn attach_media(&self, _media: &MediaSource) -> Result<(), TransportError> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("v=0 mock-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        if self.fail_set_remote {
            return Err(TransportError::InvalidSdp("mock rejection".to_string()));
        }
        *self.remote_description.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), TransportError> {
        if candidate.candidate.contains("reject-me") {
            return Err(TransportError::CandidateRejected("mock".to_string()));
        }
        self.applied_candidates
            .lock()
            .unwrap()
            .push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockFactory {
    fail_set_remote: bool,
    engines: Mutex<Vec<(Arc<MockEngine>, mpsc::Sender<TransportEvent>)>>,
}

impl MockFactory {
    fn failing_remote() -> Self {
        Self {
            fail_set_remote: true,
            ..Self::default()
        }
    }

    fn last_engine(&self) -> (Arc<MockEngine>, mpsc::Sender<TransportEvent>) {
        self.engines
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no engine created yet")
    }

    fn engine_count(&self) -> usize {
        self.engines.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn TransportEngine>, mpsc::Receiver<TransportEvent>), TransportError> {
        let (events_tx, events_rx) = mpsc::channel(64);
        let engine = Arc::new(MockEngine {
            remote_description: Mutex::new(None),
            applied_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_set_remote: self.fail_set_remote,
        });
        self.engines
            .lock()
            .unwrap()
            .push((Arc::clone(&engine), events_tx));
        Ok((engine, events_rx))
    }
}

// ============================================================================
// MOCK MEDIA
// ============================================================================

struct StaticMedia;

#[async_trait]
impl MediaProvider for StaticMedia {
    async fn acquire(&self) -> Result<MediaSource, MediaError> {
        Ok(MediaSource::new("mock-mic", Vec::new()))
    }
}

struct DeniedMedia;

#[async_trait]
impl MediaProvider for DeniedMedia {
    async fn acquire(&self) -> Result<MediaSource, MediaError> {
        Err(MediaError::PermissionDenied)
    }
}

// ============================================================================
// HARNESS
// ============================================================================

struct Harness {
    coordinator: CallCoordinator,
    factory: Arc<MockFactory>,
    /// Vom Client ausgehende Nachrichten (JSON-Text).
    out_rx: mpsc::Receiver<String>,
    /// Injiziert Server-Nachrichten in den Client.
    in_tx: mpsc::Sender<String>,
    events: tokio::sync::broadcast::Receiver<CallEvent>,
}

/// Log-Ausgabe per RUST_LOG steuerbar; mehrfacher Aufruf ist ein No-op.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn harness_with(factory: MockFactory, media: Arc<dyn MediaProvider>) -> Harness {
    init_tracing();
    let (out_tx, out_rx) = mpsc::channel(64);
    let (in_tx, in_rx) = mpsc::channel(64);
    let signaling = Arc::new(SignalingClient::from_channel(out_tx, in_rx));

    in_tx
        .send(json!({"type": "identity-assigned", "id": "me"}).to_string())
        .await
        .expect("identity injected");
    signaling
        .wait_for_identity(WAIT)
        .await
        .expect("identity assigned");

    let factory = Arc::new(factory);
    let coordinator = CallCoordinator::spawn(
        signaling,
        Arc::clone(&factory) as Arc<dyn TransportFactory>,
        media,
        CoordinatorConfig::default(),
    );
    let events = coordinator.subscribe();

    Harness {
        coordinator,
        factory,
        out_rx,
        in_tx,
        events,
    }
}

async fn harness() -> Harness {
    harness_with(MockFactory::default(), Arc::new(StaticMedia)).await
}

impl Harness {
    async fn next_outbound(&mut self) -> Value {
        let text = timeout(WAIT, self.out_rx.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbound channel closed");
        serde_json::from_str(&text).expect("outbound message is JSON")
    }

    fn assert_no_outbound(&mut self) {
        assert!(
            self.out_rx.try_recv().is_err(),
            "unexpected outbound message"
        );
    }

    async fn inject(&self, msg: Value) {
        self.in_tx
            .send(msg.to_string())
            .await
            .expect("inject server message");
    }

    async fn wait_phase(&mut self, want: CallPhase) {
        timeout(WAIT, async {
            loop {
                match self.events.recv().await.expect("event stream open") {
                    CallEvent::PhaseChanged { phase, .. } if phase == want => break,
                    _ => {}
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for phase {:?}", want));
    }

    async fn wait_failed(&mut self) -> String {
        timeout(WAIT, async {
            loop {
                if let CallEvent::CallFailed { reason, .. } =
                    self.events.recv().await.expect("event stream open")
                {
                    break reason;
                }
            }
        })
        .await
        .expect("timed out waiting for failure")
    }

    async fn start_connected_call(&mut self) {
        self.coordinator.start_local_media().await.expect("media");
        self.coordinator.start_call("peer-2").await.expect("call");
        let offer = self.next_outbound().await;
        assert_eq!(offer["type"], "call-offer");
        self.inject(json!({
            "type": "call-accepted",
            "from": "peer-2",
            "signal": {"type": "answer", "sdp": "v=0 remote-answer"},
        }))
        .await;
        self.wait_phase(CallPhase::Connected).await;
    }
}

fn ice_candidate_msg(from: &str, candidate: &str) -> Value {
    json!({
        "type": "ice-candidate",
        "from": from,
        "to": "me",
        "candidate": {"candidate": candidate},
    })
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Szenario A: Media da, start_call → genau ein call-offer mit
/// nicht-leerer Description, Phase AwaitingAnswer.
#[tokio::test]
async fn start_call_emits_one_offer() {
    let mut h = harness().await;

    h.coordinator.start_local_media().await.expect("media");
    h.coordinator.start_call("peer-2").await.expect("call");

    let offer = h.next_outbound().await;
    assert_eq!(offer["type"], "call-offer");
    assert_eq!(offer["from"], "me");
    assert_eq!(offer["to"], "peer-2");
    assert_eq!(offer["signalData"]["type"], "offer");
    assert!(!offer["signalData"]["sdp"].as_str().unwrap().is_empty());
    assert_eq!(offer["displayName"], "Caller");

    assert_eq!(h.coordinator.phase(), Some(CallPhase::AwaitingAnswer));
    h.assert_no_outbound();
}

/// Szenario B: AwaitingAnswer + call-accepted → Connected, Remote
/// Description gesetzt.
#[tokio::test]
async fn answer_moves_session_to_connected() {
    let mut h = harness().await;

    h.coordinator.start_local_media().await.expect("media");
    h.coordinator.start_call("peer-2").await.expect("call");
    let _ = h.next_outbound().await;

    h.inject(json!({
        "type": "call-accepted",
        "from": "peer-2",
        "signal": {"type": "answer", "sdp": "v=0 remote-answer"},
    }))
    .await;
    h.wait_phase(CallPhase::Connected).await;

    let (engine, _) = h.factory.last_engine();
    let remote = engine.remote_description.lock().unwrap().clone();
    assert_eq!(remote, Some(SessionDescription::answer("v=0 remote-answer")));
}

/// Szenario C: drei Candidates vor der Remote Description → alle drei
/// werden nach dem Answer in Originalreihenfolge angewendet.
#[tokio::test]
async fn early_candidates_are_buffered_and_flushed_in_order() {
    let mut h = harness().await;

    h.coordinator.start_local_media().await.expect("media");
    h.coordinator.start_call("peer-2").await.expect("call");
    let _ = h.next_outbound().await;

    for n in 1..=3 {
        h.inject(ice_candidate_msg("peer-2", &format!("candidate:{}", n)))
            .await;
    }

    h.inject(json!({
        "type": "call-accepted",
        "from": "peer-2",
        "signal": {"type": "answer", "sdp": "v=0 remote-answer"},
    }))
    .await;
    h.wait_phase(CallPhase::Connected).await;

    let (engine, _) = h.factory.last_engine();
    assert_eq!(
        *engine.applied_candidates.lock().unwrap(),
        vec!["candidate:1", "candidate:2", "candidate:3"]
    );
}

/// Nach gesetzter Remote Description werden Candidates sofort
/// angewendet; ein abgelehnter Candidate wird übersprungen, ohne die
/// Session zu beenden.
#[tokio::test]
async fn late_candidates_apply_directly_and_rejections_are_isolated() {
    let mut h = harness().await;
    h.start_connected_call().await;

    h.inject(ice_candidate_msg("peer-2", "candidate:a")).await;
    h.inject(ice_candidate_msg("peer-2", "reject-me")).await;
    h.inject(ice_candidate_msg("peer-2", "candidate:b")).await;
    // end-call als Sequenzpunkt: alle Candidates sind danach verarbeitet
    h.inject(json!({"type": "end-call", "from": "peer-2"})).await;
    h.wait_phase(CallPhase::Closed).await;

    let (engine, _) = h.factory.last_engine();
    assert_eq!(
        *engine.applied_candidates.lock().unwrap(),
        vec!["candidate:a", "candidate:b"]
    );
}

/// Szenario D: end_call ist idempotent, genau eine end-call Nachricht.
#[tokio::test]
async fn end_call_is_idempotent() {
    let mut h = harness().await;
    h.start_connected_call().await;

    h.coordinator.end_call().await.expect("end");
    let end = h.next_outbound().await;
    assert_eq!(end["type"], "end-call");
    assert_eq!(end["to"], "peer-2");
    assert_eq!(h.coordinator.phase(), Some(CallPhase::Closed));

    let (engine, _) = h.factory.last_engine();
    assert!(engine.closed.load(Ordering::SeqCst));

    // Zweiter Aufruf: No-op, keine zweite Nachricht
    h.coordinator.end_call().await.expect("end again");
    assert_eq!(h.coordinator.phase(), Some(CallPhase::Closed));
    h.assert_no_outbound();
}

/// Szenario E: fataler Engine-Fehler → genau einmal Failed, danach
/// sind Events für die tote Session wirkungslos.
#[tokio::test]
async fn transport_failure_is_terminal_and_reported_once() {
    let mut h = harness().await;

    h.coordinator.start_local_media().await.expect("media");
    h.coordinator.start_call("peer-2").await.expect("call");
    let _ = h.next_outbound().await;

    let (engine, events_tx) = h.factory.last_engine();
    events_tx
        .send(TransportEvent::Failed("ice timeout".to_string()))
        .await
        .expect("inject failure");

    let reason = h.wait_failed().await;
    assert_eq!(reason, "ice timeout");
    assert_eq!(h.coordinator.phase(), Some(CallPhase::Failed));
    assert!(engine.closed.load(Ordering::SeqCst));

    // Weitere Events derselben Engine verpuffen
    events_tx
        .send(TransportEvent::Failed("again".to_string()))
        .await
        .expect("inject second failure");
    h.inject(ice_candidate_msg("peer-2", "candidate:late")).await;
    h.inject(json!({"type": "end-call", "from": "peer-2"})).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coordinator.phase(), Some(CallPhase::Failed));
    assert!(engine.applied_candidates.lock().unwrap().is_empty());
    h.assert_no_outbound();
}

// ============================================================================
// PRECONDITIONS & INVARIANTS
// ============================================================================

#[tokio::test]
async fn start_call_without_media_fails() {
    let mut h = harness().await;

    let err = h.coordinator.start_call("peer-2").await.unwrap_err();
    assert!(matches!(err, CallError::NoActiveMedia));
    h.assert_no_outbound();
}

#[tokio::test]
async fn permission_denied_is_surfaced() {
    let h = harness_with(MockFactory::default(), Arc::new(DeniedMedia)).await;

    let err = h.coordinator.start_local_media().await.unwrap_err();
    assert!(matches!(err, CallError::PermissionDenied));
}

/// Höchstens eine aktive Session; die laufende bleibt unangetastet.
#[tokio::test]
async fn second_start_call_is_rejected() {
    let mut h = harness().await;

    h.coordinator.start_local_media().await.expect("media");
    h.coordinator.start_call("peer-2").await.expect("call");
    let _ = h.next_outbound().await;

    let err = h.coordinator.start_call("peer-3").await.unwrap_err();
    assert!(matches!(err, CallError::CallAlreadyInProgress));
    assert_eq!(h.coordinator.phase(), Some(CallPhase::AwaitingAnswer));
    assert_eq!(h.factory.engine_count(), 1);
    h.assert_no_outbound();
}

/// Glare: eingehendes Offer während eines aktiven Anrufs wird verworfen.
#[tokio::test]
async fn incoming_offer_during_active_call_is_dropped() {
    let mut h = harness().await;
    h.start_connected_call().await;

    h.inject(json!({
        "type": "call-offer",
        "from": "peer-9",
        "signalData": {"type": "offer", "sdp": "v=0 glare"},
        "displayName": "Intruder",
    }))
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coordinator.phase(), Some(CallPhase::Connected));
    assert_eq!(h.factory.engine_count(), 1);
    h.assert_no_outbound();
}

// ============================================================================
// CALLEE FLOW
// ============================================================================

/// Eingehender Anruf: Offer anwenden, annehmen, genau ein
/// call-accepted - und nie ein call-offer (Rollen-Exklusivität).
#[tokio::test]
async fn incoming_call_is_answered_with_call_accepted() {
    let mut h = harness().await;

    h.coordinator.start_local_media().await.expect("media");
    h.inject(json!({
        "type": "call-offer",
        "from": "peer-9",
        "signalData": {"type": "offer", "sdp": "v=0 remote-offer"},
        "displayName": "Alice",
    }))
    .await;
    h.wait_phase(CallPhase::AwaitingLocalMedia).await;

    let (engine, _) = h.factory.last_engine();
    assert_eq!(
        engine.remote_description.lock().unwrap().clone(),
        Some(SessionDescription::offer("v=0 remote-offer"))
    );

    h.coordinator.accept_incoming().await.expect("accept");
    let answer = h.next_outbound().await;
    assert_eq!(answer["type"], "call-accepted");
    assert_eq!(answer["to"], "peer-9");
    assert_eq!(answer["signal"]["type"], "answer");
    assert_eq!(h.coordinator.phase(), Some(CallPhase::Connected));
    h.assert_no_outbound();
}

/// Candidates, die mit dem Offer ankommen, werden direkt angewendet,
/// da die Remote Description beim Callee sofort steht.
#[tokio::test]
async fn callee_applies_candidates_after_offer() {
    let mut h = harness().await;

    h.coordinator.start_local_media().await.expect("media");
    h.inject(json!({
        "type": "call-offer",
        "from": "peer-9",
        "signalData": {"type": "offer", "sdp": "v=0 remote-offer"},
        "displayName": "Alice",
    }))
    .await;
    h.wait_phase(CallPhase::AwaitingLocalMedia).await;

    h.inject(ice_candidate_msg("peer-9", "candidate:x")).await;
    h.inject(ice_candidate_msg("peer-9", "candidate:y")).await;
    h.inject(json!({"type": "end-call", "from": "peer-9"})).await;
    h.wait_phase(CallPhase::Closed).await;

    let (engine, _) = h.factory.last_engine();
    assert_eq!(
        *engine.applied_candidates.lock().unwrap(),
        vec!["candidate:x", "candidate:y"]
    );
}

#[tokio::test]
async fn accept_without_pending_offer_fails() {
    let h = harness().await;

    let err = h.coordinator.accept_incoming().await.unwrap_err();
    assert!(matches!(err, CallError::NoPendingOffer));
}

// ============================================================================
// TEARDOWN VARIANTS
// ============================================================================

/// Peer legt auf: Session wird geschlossen, aber kein eigenes
/// end-call emittiert.
#[tokio::test]
async fn remote_end_call_closes_without_echo() {
    let mut h = harness().await;
    h.start_connected_call().await;

    h.inject(json!({"type": "end-call", "from": "peer-2"})).await;
    h.wait_phase(CallPhase::Closed).await;

    let (engine, _) = h.factory.last_engine();
    assert!(engine.closed.load(Ordering::SeqCst));
    h.assert_no_outbound();
}

/// Kanalverlust wirkt wie ein end-call der Gegenseite.
#[tokio::test]
async fn signaling_loss_ends_the_call() {
    let mut h = harness().await;
    h.start_connected_call().await;

    // Alle Sender des Inbound-Kanals fallen lassen → Disconnected
    h.in_tx = mpsc::channel(1).0;
    h.wait_phase(CallPhase::Closed).await;

    let (engine, _) = h.factory.last_engine();
    assert!(engine.closed.load(Ordering::SeqCst));
}

/// Remote-Stream-Handle erscheint genau einmal und verschwindet beim
/// Teardown.
#[tokio::test]
async fn remote_stream_handle_resets_on_close() {
    let mut h = harness().await;
    h.start_connected_call().await;
    assert!(h.coordinator.remote_stream().is_none());

    let (_, events_tx) = h.factory.last_engine();
    events_tx
        .send(TransportEvent::RemoteTrack(peercall::RemoteTrackHandle {
            stream_id: "stream-1".to_string(),
            kind: "video".to_string(),
        }))
        .await
        .expect("inject track");

    timeout(WAIT, async {
        loop {
            if let CallEvent::RemoteMediaChanged(Some(handle)) =
                h.events.recv().await.expect("event stream open")
            {
                assert_eq!(handle.stream_id, "stream-1");
                break;
            }
        }
    })
    .await
    .expect("remote media event");
    assert!(h.coordinator.remote_stream().is_some());

    h.coordinator.end_call().await.expect("end");
    assert!(h.coordinator.remote_stream().is_none());
}

/// Kaputtes Answer → Failed, keine automatische Wiederholung.
#[tokio::test]
async fn rejected_answer_fails_the_session() {
    let mut h = harness_with(MockFactory::failing_remote(), Arc::new(StaticMedia)).await;

    h.coordinator.start_local_media().await.expect("media");
    h.coordinator.start_call("peer-2").await.expect("call");
    let _ = h.next_outbound().await;

    h.inject(json!({
        "type": "call-accepted",
        "from": "peer-2",
        "signal": {"type": "answer", "sdp": "garbage"},
    }))
    .await;

    let reason = h.wait_failed().await;
    assert!(reason.contains("mock rejection"));
    assert_eq!(h.coordinator.phase(), Some(CallPhase::Failed));
}

/// Doppeltes call-accepted wird verworfen statt erneut angewendet.
#[tokio::test]
async fn duplicate_answer_is_ignored() {
    let mut h = harness().await;
    h.start_connected_call().await;

    h.inject(json!({
        "type": "call-accepted",
        "from": "peer-2",
        "signal": {"type": "answer", "sdp": "v=0 second-answer"},
    }))
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coordinator.phase(), Some(CallPhase::Connected));

    let (engine, _) = h.factory.last_engine();
    assert_eq!(
        engine.remote_description.lock().unwrap().clone(),
        Some(SessionDescription::answer("v=0 remote-answer"))
    );
}
