use axum::http::HeaderValue;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ticketserver::config::AppConfig;
use ticketserver::directory::GraphClient;
use ticketserver::notify::outbox::OutboxWorker;
use ticketserver::notify::{Mailer, SmtpMailer};
use ticketserver::shared::state::AppState;
use ticketserver::shared::utils::{create_conn, run_migrations};
use ticketserver::tickets::configure_ticket_routes;
use ticketserver::tickets::lifecycle::TicketLifecycle;
use ticketserver::tickets::store::{MemoryTicketStore, PgTicketStore, TicketStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;

    let store: Arc<dyn TicketStore> = match &config.database_url {
        Some(url) => {
            let pool = create_conn(url)
                .map_err(|e| anyhow::anyhow!("Failed to create database pool: {e}"))?;
            run_migrations(&pool)?;
            let store = PgTicketStore::new(pool);
            let last = store
                .ensure_counter()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize ticket counter: {e}"))?;
            info!("Ticket counter loaded: {last}");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory ticket store");
            Arc::new(MemoryTicketStore::new())
        }
    };

    let mailer = Arc::new(SmtpMailer::from_config(&config.smtp));
    if mailer.verify().await {
        info!("Email config OK");
    } else {
        warn!("Email configuration could not be verified; notification delivery may fail");
    }

    let directory = match &config.directory {
        Some(cfg) => match GraphClient::new(cfg.clone()) {
            Ok(client) => {
                info!("Directory integration configured");
                Some(Arc::new(client))
            }
            Err(e) => {
                error!("Failed to initialize directory client: {e}");
                None
            }
        },
        None => {
            warn!("Directory integration not configured; password reset tickets will stay open");
            None
        }
    };

    let lifecycle = Arc::new(TicketLifecycle::new(
        Arc::clone(&store),
        Arc::clone(&mailer) as Arc<dyn Mailer>,
        directory,
        config.routing.clone(),
    ));

    let worker = Arc::new(OutboxWorker::new(
        Arc::clone(&store),
        Arc::clone(&mailer) as Arc<dyn Mailer>,
        &config.outbox,
    ));
    worker.spawn();

    let cors = if config.server.allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .server
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        lifecycle,
    });

    let app = configure_ticket_routes()
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let host: IpAddr = config
        .server
        .host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let addr = SocketAddr::from((host, config.server.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {addr}: {e} - is another instance running?");
            return Err(e.into());
        }
    };
    info!("HTTP server listening on {addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install shutdown signal handler: {e}");
        return;
    }
    info!("Shutdown signal received");
}
