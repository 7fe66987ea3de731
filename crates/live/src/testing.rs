//! Test doubles shared by this crate's unit tests and by downstream
//! crates' scenario tests.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use fluxlive_protocol::{Envelope, MessageKind};

use crate::sink::ClientSink;

/// A [`ClientSink`] that records every accepted frame in memory.
pub struct CollectingSink {
    id: String,
    frames: Mutex<Vec<Envelope>>,
    closed: AtomicBool,
}

impl CollectingSink {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frames: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Everything accepted so far, in send order.
    #[must_use]
    pub fn frames(&self) -> Vec<Envelope> {
        self.frames
            .lock()
            .map(|frames| frames.to_vec())
            .unwrap_or_default()
    }

    /// Accepted frames of one kind, in send order.
    #[must_use]
    pub fn frames_of(&self, kind: MessageKind) -> Vec<Envelope> {
        self.frames()
            .into_iter()
            .filter(|f| f.kind == kind)
            .collect()
    }

    /// Simulate the peer going away: every later `send` is rejected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
    }
}

impl ClientSink for CollectingSink {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn send(&self, frame: Envelope) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.frames.lock() {
            Ok(mut frames) => {
                frames.push(frame);
                true
            },
            Err(_) => false,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
