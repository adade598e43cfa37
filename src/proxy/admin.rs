use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http::StatusCode;

use crate::proxy::server::ProxyState;

/// The admin HTML surface: one route to list every cached connection and
/// its listeners, and two routes to seek every listener on every
/// connection to the start or the live edge of its stream. Intentionally
/// hand-built HTML rather than a templating engine — there's nothing here
/// that benefits from one.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/start", get(seek_start))
        .route("/end", get(seek_end))
        .with_state(state)
}

async fn index(State(state): State<Arc<ProxyState>>) -> Html<String> {
    let connections = state.cache.connections().await;

    let mut page = String::new();
    page.push_str("<html><body><h1>relaycache</h1>");
    page.push_str("<table><tr><td>URL</td><td>Listeners</td><td>Size</td><td>Positions</td></tr>");

    for (url, conn) in &connections {
        let stream = conn.stream();
        let listeners = stream.listeners();
        let _ = write!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td><ul>",
            html_escape(url),
            listeners.len(),
            stream.size()
        );
        for listener in &listeners {
            let _ = write!(page, "<li>{}</li>", listener.position());
        }
        page.push_str("</ul></td></tr>");
    }

    page.push_str("</table>");
    let _ = write!(page, "<p>Total: {}</p>", connections.len());
    page.push_str(r#"<p><a href="/start">jump to start</a></p>"#);
    page.push_str(r#"<p><a href="/end">jump to end</a></p>"#);
    page.push_str("</body></html>");

    Html(page)
}

async fn seek_start(State(state): State<Arc<ProxyState>>) -> Response {
    for conn in state.cache.connections().await.values() {
        for listener in conn.stream().listeners() {
            listener.set_position(0);
        }
    }
    (StatusCode::OK, "set pos to start\n").into_response()
}

async fn seek_end(State(state): State<Arc<ProxyState>>) -> Response {
    for conn in state.cache.connections().await.values() {
        let stream = conn.stream();
        let pos = stream.size();
        for listener in stream.listeners() {
            listener.set_position(pos);
        }
    }
    (StatusCode::OK, "set pos to end\n").into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
