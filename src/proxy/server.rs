use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use http::{Request, StatusCode};

use crate::cache::{ConnectionCache, Listener};
use crate::config::Config;

/// How long the response body adapter waits before retrying a listener
/// read that came back empty with no terminal error yet (live tail).
const LIVE_TAIL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read buffer size per poll of a listener.
const READ_CHUNK: usize = 8 * 1024;

pub struct ProxyState {
    pub cache: ConnectionCache,
    pub config: Config,
}

/// Builds the forward-proxy router. Every request is matched against
/// `config.proxied_hosts`; a match is served out of the shared streaming
/// cache, a non-match is declined with `501` (full general-purpose proxy
/// passthrough is out of scope for this crate — see spec §1 non-goals).
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(any(handle)).with_state(state)
}

async fn handle(State(state): State<Arc<ProxyState>>, req: Request<Body>) -> Response {
    let Some(host) = request_host(&req) else {
        return (StatusCode::BAD_REQUEST, "missing or invalid Host\n").into_response();
    };

    if !state.config.matches_host(&host) {
        tracing::info!(host, "host not in proxied list, declining");
        return (
            StatusCode::NOT_IMPLEMENTED,
            "this proxy only relays configured streaming hosts\n",
        )
            .into_response();
    }

    let Some(url) = target_url(&req, &host) else {
        return (StatusCode::BAD_REQUEST, "could not determine target URL\n").into_response();
    };

    let method = req.method().clone();
    let headers = req.headers().clone();

    match state.cache.round_trip(&url, method, &headers).await {
        Ok(view) => {
            let mut response = Response::builder().status(view.status);
            if let Some(headers) = response.headers_mut() {
                *headers = view.headers;
            }
            response
                .body(listener_body(view.listener))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            tracing::warn!(url, "round trip failed: {e}");
            (StatusCode::BAD_GATEWAY, e.user_message()).into_response()
        }
    }
}

fn request_host(req: &Request<Body>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(host.to_string());
    }
    req.headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_string())
}

/// Absolute-form request targets (the HTTP proxy convention) already
/// carry a full URL; origin-form requests are reassembled from the
/// `Host` header and the request path.
fn target_url(req: &Request<Body>, host: &str) -> Option<String> {
    if req.uri().scheme().is_some() {
        return Some(req.uri().to_string());
    }
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Some(format!("http://{host}{path}"))
}

/// Turns a [`Listener`] into a streaming HTTP response body: reads are
/// retried with a short sleep while the upstream pump is still live
/// (zero bytes, no error yet), and the body ends cleanly once the
/// stream's terminal status is reached. The listener is closed when the
/// body is dropped, whether that's because the stream ended or because
/// the downstream client disconnected early.
fn listener_body(listener: Listener) -> Body {
    let stream = futures_util::stream::unfold(ListenerGuard(listener), |guard| async move {
        loop {
            let mut buf = vec![0u8; READ_CHUNK];
            match guard.0.read(&mut buf) {
                Ok(0) => tokio::time::sleep(LIVE_TAIL_POLL_INTERVAL).await,
                Ok(n) => {
                    buf.truncate(n);
                    return Some((Ok::<_, std::io::Error>(Bytes::from(buf)), guard));
                }
                Err(e) => {
                    tracing::debug!("listener body ending: {e}");
                    return None;
                }
            }
        }
    });
    Body::from_stream(stream)
}

struct ListenerGuard(Listener);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}
