//! peercall - P2P Call Negotiation Core
//!
//! Treibt eine Zwei-Parteien Audio/Video-Verbindung von "idle" bis
//! "media flowing":
//! - Offer/Answer-Austausch über einen Rendezvous-Kanal
//! - ICE-Candidate Gathering und Pufferung gegen Timing-Races
//! - Sauberer und abrupter Teardown, tolerant gegen doppelte und
//!   verspätete Nachrichten
//!
//! Capture, Rendering und die Medien-Engine selbst sind Collaborators
//! hinter Traits; produktiv fährt die `webrtc` Crate den Transport und
//! `tokio-tungstenite` den Signaling-Kanal.

pub mod call;
pub mod media;
pub mod signaling;
pub mod transport;

pub use call::{CallCoordinator, CallError, CallEvent, CallPhase, CallRole, CoordinatorConfig};
pub use media::{MediaError, MediaProvider, MediaSource, RemoteTrackHandle};
pub use signaling::{SignalingClient, SignalingError, SignalingEvent};
pub use transport::{
    CandidateInit, SessionDescription, TransportEngine, TransportError, TransportEvent,
    TransportFactory, WebRtcFactory,
};
