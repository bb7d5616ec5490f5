//! Candidate Buffer
//!
//! Entkoppelt die Ankunftsreihenfolge von ICE Candidates von der
//! Offer/Answer-Reihenfolge: Candidates, die vor der zugehörigen
//! Description eintreffen, warten hier in FIFO-Ordnung. Der Buffer
//! spricht nie selbst mit dem Netzwerk.

use crate::transport::{CandidateInit, TransportError};
use std::collections::VecDeque;
use std::future::Future;

/// FIFO-Warteschlange für noch nicht anwendbare Candidates.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: VecDeque<CandidateInit>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hängt einen Candidate unbedingt hinten an, schlägt nie fehl.
    /// Auch Candidates ohne Media-Line-Metadaten werden aufgenommen;
    /// ob sie anwendbar sind, entscheidet später die Engine.
    pub fn push(&mut self, candidate: CandidateInit) {
        self.queue.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Entnimmt alle gepufferten Candidates in FIFO-Ordnung.
    pub fn take_all(&mut self) -> Vec<CandidateInit> {
        self.queue.drain(..).collect()
    }

    /// Wendet alle gepufferten Candidates in FIFO-Ordnung an und leert
    /// den Buffer.
    ///
    /// Schlägt `apply` für einen Candidate fehl, wird nur dieser eine
    /// geloggt und übersprungen - Candidates sind best-effort Hinweise,
    /// der Rest des Flushs läuft weiter.
    pub async fn flush<F, Fut>(&mut self, mut apply: F)
    where
        F: FnMut(CandidateInit) -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        while let Some(candidate) = self.queue.pop_front() {
            if let Err(e) = apply(candidate).await {
                tracing::warn!("Skipping buffered candidate: {}", e);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
