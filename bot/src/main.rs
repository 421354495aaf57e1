use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use dashmap::DashMap;
use engine::{Config, Engine, Notification, Store};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

mod routes;

use routes::{ApiState, Inbox};

/// Move engine notifications into the per-actor inbox. Queueing can not
/// fail, so broadcast delivery is best-effort by construction.
async fn pump_notifications(mut rx: mpsc::UnboundedReceiver<Notification>, inbox: Inbox) {
    while let Some(notification) = rx.recv().await {
        inbox
            .entry(notification.actor_id)
            .or_default()
            .push(notification.body);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    info!(api = %config.api_base_url, "starting provisioning bot front end");

    let store = Store::connect(&config.database_url).await?;
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(Engine::new(config, store, notify_tx));

    let inbox: Inbox = Arc::new(DashMap::new());
    tokio::spawn(pump_notifications(notify_rx, Arc::clone(&inbox)));

    let allowed_origins = ["http://localhost:3000", "http://127.0.0.1:3000"]
        .iter()
        .map(|origin| HeaderValue::from_str(origin).expect("Invalid CORS origin"))
        .collect::<Vec<_>>();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let state = ApiState { engine, inbox };
    let app = routes::router().with_state(state).layer(cors);

    let port: u16 = std::env::var("BOT_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8090);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "bot front end listening");
    axum::serve(listener, app).await?;
    Ok(())
}
