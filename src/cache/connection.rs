use std::sync::Arc;

use http::{HeaderMap, StatusCode};

use crate::cache::listener::Listener;
use crate::cache::stream::Stream;

/// A materialized response view: the connection's captured upstream
/// status/headers, paired with a fresh listener as the body cursor.
/// Every call to [`Connection::response`] produces one of these with an
/// independent `listener`, even though `status`/`headers` are clones of
/// the same immutable snapshot.
pub struct ResponseView {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub listener: Listener,
}

struct ConnectionInner {
    status: StatusCode,
    headers: HeaderMap,
    stream: Stream,
}

/// Binds one upstream response's metadata to the [`Stream`] draining its
/// body. Cheap to clone (an `Arc` underneath) so the cache can hand out
/// copies to introspection code without worrying about lifetimes.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub fn new(status: StatusCode, headers: HeaderMap, stream: Stream) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                status,
                headers,
                stream,
            }),
        }
    }

    /// Materializes a response whose headers/status clone the captured
    /// upstream response and whose body is a fresh listener. Repeated
    /// calls never share cursor state.
    pub fn response(&self) -> ResponseView {
        ResponseView {
            status: self.inner.status,
            headers: self.inner.headers.clone(),
            listener: self.inner.stream.create_listener(),
        }
    }

    pub fn stream(&self) -> &Stream {
        &self.inner.stream
    }
}
