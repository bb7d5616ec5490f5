//! Call Module - Verhandlung und Koordination
//!
//! Dieses Modul treibt einen Anruf von "idle" bis "media flowing":
//! - Candidate Buffer für Timing-Races zwischen Candidates und Descriptions
//! - CallSession als Zustandsmaschine einer einzelnen Verhandlung
//! - CallCoordinator als einziger Besitzer der aktiven Session
//!

mod candidate_buffer;
mod coordinator;
mod session;

pub use candidate_buffer::CandidateBuffer;
pub use coordinator::{CallCoordinator, CallEvent, CoordinatorConfig};
pub use session::{CallError, CallPhase, CallRole, CallSession, OutboundSignal};
