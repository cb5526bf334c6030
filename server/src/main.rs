#![allow(dead_code)]
mod classify;
mod db_core;
mod email;
mod error;
mod model;
mod notify;
mod pipeline;
mod routes;
mod scoring;
mod server_config;
mod util;

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use mimalloc::MiMalloc;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::signal;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classify::provider::GeminiProvider;
use notify::{slack::SlackClient, NotificationSink};
use pipeline::{GmailMailboxFactory, Pipeline};
use routes::AppRouter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone)]
pub struct ServerState {
    pub http_client: HttpClient,
    pub conn: DatabaseConnection,
    pub pipeline: Arc<Pipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL is not set in .env file");
    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);

    let conn = Database::connect(db_options)
        .await
        .expect("Database connection failed");

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;

    let provider = Arc::new(GeminiProvider::from_env(http_client.clone())?);
    let sink: Option<Arc<dyn NotificationSink>> = match SlackClient::from_env(http_client.clone())
    {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!("Slack disabled, notifications will not be delivered: {e}");
            None
        }
    };

    let mailboxes = Arc::new(GmailMailboxFactory::new(http_client.clone(), conn.clone()));
    let pipeline = Arc::new(Pipeline::new(conn.clone(), mailboxes, provider, sink));

    let state = ServerState {
        http_client,
        conn,
        pipeline: pipeline.clone(),
    };

    let router = AppRouter::create(state);

    let mut scheduler = JobScheduler::new()
        .await
        .expect("Failed to create scheduler");

    let cycle_interval =
        Duration::from_secs(u64::from(server_config::cfg.processing.cycle_minutes) * 60);
    {
        let pipeline = pipeline.clone();
        scheduler
            .add(Job::new_repeated_async(cycle_interval, move |uuid, _l| {
                let pipeline = pipeline.clone();
                Box::pin(async move {
                    match pipeline.run_cycle().await {
                        Ok(summary) => {
                            tracing::info!(
                                "Processing job {} done: {} users, {} errors",
                                uuid,
                                summary.users.len(),
                                summary.errors
                            );
                        }
                        Err(e) => {
                            tracing::error!("Processing job {} failed: {:?}", uuid, e);
                        }
                    }
                })
            })?)
            .await?;
    }

    scheduler.set_shutdown_handler(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
        })
    }));

    scheduler.start().await?;
    tracing::info!(
        "Scheduler started, processing every {} minutes",
        server_config::cfg.processing.cycle_minutes
    );

    let port = env::var("PORT").unwrap_or("5006".to_string());
    println!("{}", *server_config::cfg);
    tracing::info!("Triage server running on http://0.0.0.0:{}", port);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>()?));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    Ok(())
}

async fn shutdown_signal(mut scheduler: JobScheduler) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            let _ = scheduler.shutdown().await;
            println!("Cleanups done, shutting down");
        },
        _ = terminate => {
            let _ = scheduler.shutdown().await;
            println!("Cleanups done, shutting down");
        },
    }
}
