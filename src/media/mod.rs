//! Media Module - Capture-Collaborator
//!
//! Dieses Modul definiert die Schnittstelle zur lokalen Medienquelle:
//! - `MediaProvider` liefert auf Anfrage eine Audio/Video-Quelle
//! - Permission-Handling ist Sache des Providers, nicht des Cores
//!

mod source;

pub use source::{MediaError, MediaProvider, MediaSource, RemoteTrackHandle};
