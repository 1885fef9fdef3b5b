use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drive::{
    api,
    config::{Config, MailBackend, StorageBackend},
    files,
    mail::{self, Mailer},
    object_store as obj,
    storage::Database,
    AppState,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "drive starting");

    // Load configuration
    let config = Config::load()?;

    // Initialize database
    let db = Database::open(&config.node.data_dir)?;
    info!("Database opened at: {}", config.node.data_dir);

    // Initialize object store backend
    let (object_store, url_signer): (Arc<dyn obj::ObjectStore>, Option<obj::UrlSigner>) =
        match config.storage.backend {
            StorageBackend::Local => {
                let secret = match &config.storage.local_signing_secret {
                    Some(secret) => secret.as_bytes().to_vec(),
                    None => random_secret()?,
                };
                let signer = obj::UrlSigner::new(&secret, &config.storage.public_url);
                let store = obj::LocalStore::new(
                    &config.storage.local_storage_path,
                    &config.storage.bucket,
                    signer.clone(),
                )?;
                info!(
                    "Using local storage backend at: {}/{}",
                    config.storage.local_storage_path, config.storage.bucket
                );
                (Arc::new(store), Some(signer))
            }
            StorageBackend::S3 => {
                let endpoint = config
                    .storage
                    .s3_endpoint
                    .as_deref()
                    .context("S3_ENDPOINT is required")?;
                let store = obj::S3Store::new(
                    endpoint,
                    &config.storage.s3_region,
                    &config.storage.bucket,
                    config.storage.s3_access_key.as_deref().unwrap_or_default(),
                    config.storage.s3_secret_key.as_deref().unwrap_or_default(),
                )?;
                info!(
                    "Using S3 storage backend at {}, bucket: {}",
                    endpoint, config.storage.bucket
                );
                (Arc::new(store), None)
            }
        };

    // Initialize mail delivery
    let mailer: Arc<dyn Mailer> = match config.mail.backend {
        MailBackend::Http => {
            let relay_url = config
                .mail
                .relay_url
                .as_deref()
                .context("MAIL_RELAY_URL is required")?;
            info!("Sending mail through relay: {}", relay_url);
            Arc::new(mail::HttpMailer::new(relay_url, &config.mail)?)
        }
        MailBackend::Smtp => {
            let host = config
                .mail
                .smtp_host
                .as_deref()
                .context("SMTP_HOST is required")?;
            info!(
                "Sending mail over SMTP: {}:{} ({:?})",
                host, config.mail.smtp_port, config.mail.smtp_tls
            );
            Arc::new(mail::SmtpMailer::new(host, &config.mail)?)
        }
        MailBackend::Log => {
            info!("Mail backend is log; login links are written to the log");
            Arc::new(mail::LogMailer::new(&config.mail.frontend_url))
        }
    };

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        object_store,
        mailer,
        url_signer,
        uploads_in_flight: Default::default(),
    });

    let sweeper = tokio::spawn(sweep_uploads(Arc::clone(&state)));

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: abort background tasks
    info!("Shutting down background tasks");
    sweeper.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Periodically discard uploads interrupted between their two phases.
async fn sweep_uploads(state: Arc<AppState>) {
    let uploads = &state.config.uploads;
    let older_than = chrono::Duration::seconds(uploads.stale_after_seconds as i64);
    let period = Duration::from_secs(uploads.sweep_interval_seconds.max(1));
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        if let Err(e) = files::sweep_stale_uploads(&state, older_than).await {
            tracing::error!(error = %e, "Stale upload sweep failed");
        }
    }
}

fn random_secret() -> anyhow::Result<Vec<u8>> {
    let mut secret = vec![0u8; 32];
    SystemRandom::new()
        .fill(&mut secret)
        .map_err(|_| anyhow::anyhow!("system random generator failed"))?;
    Ok(secret)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
