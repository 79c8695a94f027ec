pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::{ApiError, ApiState};

/// Public broker surface: bind prefixes, query through tunnels, node status.
pub fn broker_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/proxy/create", post(handlers::handle_proxy_create))
        .route("/query/{*subpath}", get(handlers::handle_query))
        .route("/status", get(handlers::handle_status))
        .with_state(state)
        .layer(cors)
}

/// Node-to-node surface: relay through a tunnel parked on this node.
pub fn receiver_router(state: ApiState) -> Router {
    Router::new()
        .route("/send", post(handlers::handle_send))
        .with_state(state)
}

/// Serve `app` on a pre-bound listener until shutdown fires.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "HTTP listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
