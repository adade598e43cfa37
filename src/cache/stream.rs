use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::cache::listener::Listener;
use crate::error::RelayError;

/// Number of bytes the pumper asks the upstream source for per read.
/// A tuning parameter, not a contract: listeners never observe chunk
/// boundaries, only the flattened `content` byte log.
const CHUNK_SIZE: usize = 1024;

/// How long `Stream::close` waits for the pumper to acknowledge
/// cancellation before giving up and reporting a timeout.
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// An upstream byte source: readable, and dropped (closed) once the
/// pumper is done with it. Boxed so `Stream` doesn't need to be generic
/// over the concrete body type (a `reqwest` response body wrapped in
/// `tokio_util::io::StreamReader`, in production; a plain in-memory
/// reader in tests).
pub type UpstreamReader = Pin<Box<dyn AsyncRead + Send>>;

struct StreamState {
    content: Vec<u8>,
    err: Option<RelayError>,
    /// listener id -> next byte to deliver. A listener's identity lives
    /// here, not in a separate per-listener lock: the whole point of the
    /// one-mutex-per-stream design is that a read can check "is there
    /// new content" and "am I still registered" atomically.
    listeners: HashMap<u64, usize>,
}

/// Owns one upstream reader, pumps it into an append-only buffer, and
/// hands out independent read cursors ([`Listener`]s) over that buffer.
///
/// Cheap to clone: internally an `Arc`, so every `Listener` can hold its
/// own `Stream` handle without the cache needing to manage lifetimes.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<StreamState>,
    reader: Mutex<Option<UpstreamReader>>,
    pump_started: Once,
    /// Cancelled by whoever calls `close()`; observed by the pumper
    /// between reads (and raced against an in-flight read).
    cancel: CancellationToken,
    /// Cancelled by the pumper itself, exactly once, right before it
    /// returns. `close()` waits on this rather than a channel so that a
    /// `close()` called after the pumper has already exited still
    /// resolves immediately instead of needing the pumper to still be
    /// listening.
    done: CancellationToken,
    next_listener_id: AtomicU64,
}

impl Stream {
    /// `cancel` should be a child token of whatever scope owns this
    /// stream (typically the connection cache's token), so that
    /// cancelling the parent tears down every stream it spawned.
    pub fn new(reader: UpstreamReader, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StreamState {
                    content: Vec::new(),
                    err: None,
                    listeners: HashMap::new(),
                }),
                reader: Mutex::new(Some(reader)),
                pump_started: Once::new(),
                cancel,
                done: CancellationToken::new(),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// Starts the background pumper on first call (idempotent across
    /// calls) and registers a new listener positioned at the start of
    /// the buffer. Never fails.
    pub fn create_listener(&self) -> Listener {
        self.start_pump();

        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.state.lock().unwrap().listeners.insert(id, 0);
        Listener::new(id, self.clone())
    }

    fn start_pump(&self) {
        self.inner.pump_started.call_once(|| {
            let reader = self
                .inner
                .reader
                .lock()
                .unwrap()
                .take()
                .expect("pumper starts at most once and owns the reader exclusively");
            let stream = self.clone();
            tokio::spawn(async move { stream.run_pump(reader).await });
        });
    }

    async fn run_pump(&self, mut reader: UpstreamReader) {
        use tokio::io::AsyncReadExt;

        tracing::debug!("stream pumper starting");
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    tracing::debug!("stream pumper cancelled");
                    break;
                }
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("stream pumper reached end of upstream data");
                            self.set_error(RelayError::UpstreamReadFailed(
                                "end of data".to_string(),
                            ));
                            break;
                        }
                        Ok(n) => self.append(&buf[..n]),
                        Err(e) => {
                            tracing::warn!("stream pumper read error: {e}");
                            self.set_error(RelayError::UpstreamReadFailed(e.to_string()));
                            break;
                        }
                    }
                }
            }
        }
        drop(reader);
        self.inner.done.cancel();
    }

    fn append(&self, bytes: &[u8]) {
        let mut state = self.inner.state.lock().unwrap();
        state.content.extend_from_slice(bytes);
        tracing::trace!(size = state.content.len(), "stream buffer grew");
    }

    fn set_error(&self, err: RelayError) {
        let mut state = self.inner.state.lock().unwrap();
        if state.err.is_none() {
            state.err = Some(err);
        }
    }

    /// Cancels the pumper and waits up to one second for it to
    /// acknowledge. Idempotent: calling this again after a successful
    /// close observes the already-fired completion signal right away.
    pub async fn close(&self) -> Result<(), RelayError> {
        self.inner.cancel.cancel();
        tokio::select! {
            _ = self.inner.done.cancelled() => Ok(()),
            _ = tokio::time::sleep(CLOSE_GRACE_PERIOD) => Err(RelayError::CloseTimeout),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.state.lock().unwrap().content.len()
    }

    pub fn error(&self) -> Option<RelayError> {
        self.inner.state.lock().unwrap().err.clone()
    }

    /// Snapshot of the current buffer. Intended for introspection and
    /// small payloads; listeners read through [`Listener::read`] rather
    /// than through this clone.
    pub fn content(&self) -> Vec<u8> {
        self.inner.state.lock().unwrap().content.clone()
    }

    /// Handles for every listener currently registered on this stream,
    /// in the arbitrary order `HashMap` yields them.
    pub fn listeners(&self) -> Vec<Listener> {
        self.inner
            .state
            .lock()
            .unwrap()
            .listeners
            .keys()
            .map(|&id| Listener::new(id, self.clone()))
            .collect()
    }

    pub(crate) fn read_at(&self, id: u64, buf: &mut [u8]) -> Result<usize, RelayError> {
        let mut state = self.inner.state.lock().unwrap();
        let StreamState {
            content,
            err,
            listeners,
        } = &mut *state;

        let Some(pos) = listeners.get_mut(&id) else {
            // Listener has been closed. Treated as a non-error zero-byte
            // read rather than a distinct error kind — see design notes.
            return Ok(0);
        };

        let available = &content[*pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        *pos += n;

        if n == 0 {
            if let Some(err) = err {
                return Err(err.clone());
            }
        }
        Ok(n)
    }

    pub(crate) fn position_of(&self, id: u64) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .listeners
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn set_position_of(&self, id: u64, pos: usize) {
        if let Some(slot) = self.inner.state.lock().unwrap().listeners.get_mut(&id) {
            *slot = pos;
        }
    }

    pub(crate) fn remove_listener(&self, id: u64) {
        self.inner.state.lock().unwrap().listeners.remove(&id);
    }
}
