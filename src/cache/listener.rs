use crate::cache::stream::Stream;
use crate::error::RelayError;

/// An independent read cursor into a [`Stream`]'s buffered bytes.
///
/// Reading never blocks: a listener that has caught up to the live edge
/// of an in-progress stream gets a zero-byte, non-error read rather than
/// end-of-data, so that a caller polling for "has anything new arrived"
/// can't mistake "not yet" for "never again". Callers that want blocking
/// tail semantics retry (see `proxy::server`'s response body adapter).
#[derive(Clone)]
pub struct Listener {
    id: u64,
    stream: Stream,
}

impl Listener {
    pub(crate) fn new(id: u64, stream: Stream) -> Self {
        Self { id, stream }
    }

    /// Copies up to `buf.len()` bytes starting at this listener's
    /// current position, advancing the position by the number of bytes
    /// copied.
    ///
    /// Returns `Ok(0)` both when the listener has caught up to an
    /// in-progress stream (no error yet) and when it has been closed.
    /// Returns `Err` only once the stream's terminal status has been
    /// reached and this listener has drained everything before it.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, RelayError> {
        self.stream.read_at(self.id, buf)
    }

    pub fn position(&self) -> usize {
        self.stream.position_of(self.id)
    }

    /// The caller is responsible for clamping `pos` to `[0, stream.size()]`;
    /// out-of-range positions are a caller precondition, not something this
    /// type defends against (see the admin "seek to start/end" handlers for
    /// the only two callers that matter in this crate).
    pub fn set_position(&self, pos: usize) {
        self.stream.set_position_of(self.id, pos);
    }

    /// Deregisters this listener from its stream. Idempotent: closing an
    /// already-closed listener is a no-op.
    pub fn close(&self) {
        self.stream.remove_listener(self.id);
    }
}
