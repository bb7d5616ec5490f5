//! Transport Module - Engine-Seam
//!
//! Dieses Modul kapselt die Control-Plane der Medien-Transport-Engine:
//! - Offer/Answer-API und Candidate-Anwendung als Trait
//! - Events der Engine (Candidates, Tracks, Verbindungsstatus)
//! - Produktive Implementierung über die `webrtc` Crate
//!

mod engine;
mod webrtc_engine;

pub use engine::{
    CandidateInit, SdpKind, SessionDescription, TransportEngine, TransportError, TransportEvent,
    TransportFactory,
};
pub use webrtc_engine::{default_ice_servers, WebRtcEngine, WebRtcFactory};
