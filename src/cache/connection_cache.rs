use std::collections::HashMap;
use std::io;

use futures_util::TryStreamExt;
use http::{HeaderMap, Method};
use tokio::sync::Mutex;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::cache::connection::{Connection, ResponseView};
use crate::cache::stream::Stream;
use crate::error::RelayError;

/// URL-keyed registry of [`Connection`]s. Guarantees at most one upstream
/// fetch per URL by serializing `round_trip` on a single mutex held
/// across the miss-path fetch — simple, and correct for the scale this
/// proxy targets (a handful of distinct streamed URLs).
pub struct ConnectionCache {
    client: reqwest::Client,
    cancel: CancellationToken,
    data: Mutex<HashMap<String, Connection>>,
}

impl ConnectionCache {
    pub fn new(client: reqwest::Client, cancel: CancellationToken) -> Self {
        Self {
            client,
            cancel,
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a response view for `url`, fetching upstream on the first
    /// call for that URL and reusing the cached [`Connection`] on every
    /// call after. `method` and `headers` carry the downstream request's
    /// actual method and headers through to the upstream fetch, the way
    /// the original forwards the whole `*http.Request` via
    /// `httpClient.Do`. Upstream fetch failures are returned to the
    /// caller and never cached — the next call retries the fetch.
    pub async fn round_trip(
        &self,
        url: &str,
        method: Method,
        headers: &HeaderMap,
    ) -> Result<ResponseView, RelayError> {
        let mut data = self.data.lock().await;

        if let Some(conn) = data.get(url) {
            return Ok(conn.response());
        }

        tracing::info!(url, %method, "cache miss, fetching upstream");
        let response = self
            .client
            .request(method, url)
            .headers(forwarded_headers(headers))
            .send()
            .await
            .map_err(|e| RelayError::UpstreamFetchFailed(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let reader = Box::pin(StreamReader::new(body));

        let stream = Stream::new(reader, self.cancel.child_token());
        let conn = Connection::new(status, headers, stream);
        let view = conn.response();
        data.insert(url.to_string(), conn);
        Ok(view)
    }

    /// Snapshot of every cached connection, keyed by URL. Cheap: every
    /// `Connection` clone is an `Arc` bump, not a deep copy.
    pub async fn connections(&self) -> HashMap<String, Connection> {
        self.data.lock().await.clone()
    }

    /// Cancels the shared token (tearing down every stream's pumper) and
    /// closes each stream, collecting any close timeouts.
    pub async fn close_all(&self) -> Vec<RelayError> {
        self.cancel.cancel();
        let data = self.data.lock().await;
        let mut errors = Vec::new();
        for conn in data.values() {
            if let Err(e) = conn.stream().close().await {
                errors.push(e);
            }
        }
        errors
    }
}

/// Copies the downstream request's headers for the upstream fetch,
/// dropping `Host`: the incoming value names this proxy, not the
/// upstream server, and `reqwest` sets the correct one from the target
/// URL itself.
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    out.remove(http::header::HOST);
    out
}
