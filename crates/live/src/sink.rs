use fluxlive_protocol::Envelope;

/// The runtime's view of one connected client.
///
/// Implementations route control frames (responses, errors) and event
/// frames (state updates, broadcasts) onto the connection's writer
/// queue; `send` never blocks. A `false` return means the frame was
/// dropped (queue full or connection gone); the runtime treats that as
/// the at-most-once contract allows and moves on.
pub trait ClientSink: Send + Sync + 'static {
    fn connection_id(&self) -> &str;

    /// Non-blocking enqueue. Returns whether the frame was accepted.
    fn send(&self, frame: Envelope) -> bool;

    fn is_closed(&self) -> bool;
}
