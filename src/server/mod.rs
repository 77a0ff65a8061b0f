// Status page: the in-memory status log rendered as a single HTML page
use axum::{extract::State, response::Html, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::reporting::StatusLog;

/// Build the status router
pub fn router(log: StatusLog) -> Router {
    Router::new()
        .route("/", get(status_page))
        .with_state(log)
        .layer(TraceLayer::new_for_http())
}

async fn status_page(State(log): State<StatusLog>) -> Html<String> {
    Html(render_page(&log))
}

/// All entries in insertion order, one paragraph each
pub fn render_page(log: &StatusLog) -> String {
    let mut page = String::from("<html><body>");
    for entry in log.entries() {
        page.push_str("<p>");
        page.push_str(&entry.render());
        page.push_str("</p>");
    }
    page.push_str("</body></html>");
    page
}

/// Serve the status page until `shutdown` resolves
pub async fn serve(
    listener: tokio::net::TcpListener,
    log: StatusLog,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Status page listening on http://{}", addr);
        log.init_log(&format!("Status page listening on http://{}", addr));
    }
    axum::serve(listener, router(log))
        .with_graceful_shutdown(shutdown)
        .await
}
