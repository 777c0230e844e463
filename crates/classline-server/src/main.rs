use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use classline_chat::messages::Messages;
use classline_store::Store;

mod gateway;
mod routes;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub messages: Messages,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classline=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("CLASSLINE_DB_PATH").unwrap_or_else(|_| "classline.db".into());
    let host = std::env::var("CLASSLINE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CLASSLINE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Shared state
    let store = Arc::new(Store::open(&PathBuf::from(&db_path))?);
    let state = AppState {
        messages: Messages::new(store.clone()),
        store,
    };

    // Routes. Every route runs behind actor resolution; credential
    // issuance belongs to the platform gateway, not this service.
    let app = Router::new()
        .route("/contacts", get(routes::list_contacts))
        .route("/chats/{contact_id}/messages", get(routes::get_history))
        .route("/chats/{contact_id}/messages", post(routes::send_message))
        .route("/chats/{contact_id}/read", post(routes::mark_read))
        .route("/gateway", get(gateway::ws_upgrade))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::resolve_actor,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Classline messaging server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
