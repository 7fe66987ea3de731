use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    futures::{SinkExt, stream::SplitSink},
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, warn},
};

use fluxlive_live::ClientSink;
use fluxlive_protocol::{CONTROL_QUEUE_CAPACITY, EVENT_QUEUE_CAPACITY, Envelope};

/// Instruction for the writer task.
enum WriterCommand {
    Frame(String),
    Close(u16, String),
}

/// One client connection as the runtime sees it.
///
/// Exactly one spawned task owns the socket write half; everyone else
/// enqueues through a single bounded queue, which keeps every frame the
/// client sees in FIFO order. Admission is kind-dependent: STATE_UPDATE
/// and BROADCAST frames are refused once the queue reaches the event
/// budget (and the connection is marked degraded), while control frames
/// (responses, errors, auth replies) may use the reserved headroom above
/// it, so request/response does not starve under broadcast load.
pub struct Connection {
    id: String,
    tx: mpsc::Sender<WriterCommand>,
    queued: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    degraded: AtomicBool,
}

impl Connection {
    /// Spawn the writer task over the socket's write half.
    pub fn spawn(
        id: String,
        mut write_half: SplitSink<WebSocket, Message>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_CAPACITY + CONTROL_QUEUE_CAPACITY);
        let queued = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        let writer_queued = Arc::clone(&queued);
        let writer_closed = Arc::clone(&closed);
        let writer_id = id.clone();
        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                writer_queued.fetch_sub(1, Ordering::Relaxed);
                match command {
                    WriterCommand::Frame(text) => {
                        if write_half.send(Message::Text(text.into())).await.is_err() {
                            debug!(conn_id = %writer_id, "ws: write loop closed");
                            break;
                        }
                    },
                    WriterCommand::Close(code, reason) => {
                        let _ = write_half
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    },
                }
            }
            writer_closed.store(true, Ordering::Release);
        });

        let connection = Arc::new(Self {
            id,
            tx,
            queued,
            closed,
            degraded: AtomicBool::new(false),
        });
        (connection, handle)
    }

    /// Ask the writer to send a close frame and stop. Idempotent.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self
            .tx
            .try_send(WriterCommand::Close(code, reason.into()))
            .is_ok()
        {
            self.queued.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether the event budget overflowed at least once.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

impl ClientSink for Connection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn send(&self, frame: Envelope) -> bool {
        if self.is_closed() {
            return false;
        }

        // Event frames only get the event budget; the headroom above it is
        // reserved for control frames. The depth read is approximate under
        // contention; delivery on this path is at most once.
        let control = frame.kind.is_control();
        if !control && self.queued.load(Ordering::Relaxed) >= EVENT_QUEUE_CAPACITY {
            self.degraded.store(true, Ordering::Relaxed);
            debug!(conn_id = %self.id, kind = ?frame.kind, "event budget full, frame dropped");
            return false;
        }

        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(conn_id = %self.id, error = %err, "failed to serialize outbound frame");
                return false;
            },
        };
        match self.tx.try_send(WriterCommand::Frame(text)) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                true
            },
            Err(_) => {
                if !control {
                    self.degraded.store(true, Ordering::Relaxed);
                }
                debug!(conn_id = %self.id, kind = ?frame.kind, "outbound queue full, frame dropped");
                false
            },
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
