//! Signaling Module - Rendezvous-Kanal
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Server:
//! - Kanal aufbauen und halten (WebSocket oder beliebiges Kanalpaar)
//! - Ausgehende Nachrichten serialisieren und senden
//! - Eingehende Nachrichten parsen und als Events weiterleiten
//!

mod client;
mod messages;

pub use client::{SignalingClient, SignalingError, SignalingEvent};
pub use messages::*;
