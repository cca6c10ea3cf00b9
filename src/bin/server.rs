use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use account_server::server::{
    redirect_router, router, AccountService, AdminSettings, AppState, ServerConfig,
};
use account_server::store::MemoryStore;
use axum_server::tls_rustls::RustlsConfig;
use clap::builder::BoolishValueParser;
use clap::Parser;
use tokio::{signal, time};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Account server: registration, login, tokens and bans", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Token signing secret
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Comma-separated user ids allowed to manage bans
    #[arg(long, env = "ADMIN_WHITELIST")]
    admin_ids: Option<String>,

    /// Rate limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS")]
    rate_window: Option<u64>,

    /// Attempts allowed per window, per route and client IP
    #[arg(long, env = "RATE_LIMIT_MAX_ATTEMPTS")]
    rate_max: Option<usize>,

    /// Enable metrics endpoint
    #[arg(long, env = "METRICS_ENABLED")]
    metrics: Option<bool>,

    /// Metrics port
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Serve HTTPS on the main port
    #[arg(long, env = "ENABLE_HTTPS", value_parser = BoolishValueParser::new())]
    tls: Option<bool>,

    /// PEM certificate chain
    #[arg(long, env = "SSL_CERT_PATH")]
    tls_cert: Option<String>,

    /// PEM private key
    #[arg(long, env = "SSL_KEY_PATH")]
    tls_key: Option<String>,

    /// Plain HTTP port that redirects to HTTPS
    #[arg(long, env = "HTTP_REDIRECT_PORT")]
    redirect_port: Option<u16>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) -> account_server::Result<()> {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secret) = self.secret {
            config.token.secret = secret;
        }
        if let Some(raw) = self.admin_ids {
            config.admin.ids = AdminSettings::parse_ids(&raw)?;
        }
        if let Some(window) = self.rate_window {
            config.rate_limit.window_secs = window;
        }
        if let Some(max) = self.rate_max {
            config.rate_limit.max_attempts = max;
        }
        if let Some(enabled) = self.metrics {
            config.metrics.enabled = enabled;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
        if let Some(enabled) = self.tls {
            config.tls.enabled = enabled;
        }
        if let Some(cert) = self.tls_cert {
            config.tls.cert_path = cert;
        }
        if let Some(key) = self.tls_key {
            config.tls.key_path = key;
        }
        if let Some(port) = self.redirect_port {
            config.tls.redirect_port = Some(port);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ServerConfig::from_env().unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        info!("Using default configuration");
        ServerConfig::default()
    });
    if let Err(e) = args.apply(&mut config) {
        error!("Invalid command line arguments: {e}");
        return Err(format!("Invalid configuration: {e}").into());
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        return Err(format!("Invalid configuration: {e}").into());
    }

    if config.metrics.enabled {
        let metrics_addr = config.metrics.addr()?;
        if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
        {
            error!("Failed to start metrics server: {e}");
        } else {
            info!("Metrics server started on {metrics_addr}");
        }
    }

    let service = AccountService::new(Arc::new(MemoryStore::new()), &config)?;
    service.bootstrap().await?;
    let state = AppState::new(service);

    let cleanup_state = state.clone();
    tokio::spawn(async move {
        loop {
            let state_clone = cleanup_state.clone();
            let cleanup_handle = tokio::spawn(async move {
                let mut interval = time::interval(Duration::from_secs(60));
                loop {
                    interval.tick().await;
                    state_clone.service.pipeline().limiter().purge_idle().await;
                }
            });

            match cleanup_handle.await {
                Ok(()) => {
                    error!("Cleanup task terminated unexpectedly, restarting...");
                }
                Err(e) => {
                    error!("Cleanup task panicked: {:?}, restarting...", e);
                }
            }

            time::sleep(Duration::from_secs(5)).await;
        }
    });

    let addr = config.addr()?;

    info!(
        %addr,
        window_secs = config.rate_limit.window_secs,
        max_attempts = config.rate_limit.max_attempts,
        admins = config.admin.ids.len(),
        metrics = config.metrics.enabled,
        tls = config.tls.enabled,
        "Server starting"
    );

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    if config.tls.enabled {
        let tls = RustlsConfig::from_pem_file(&config.tls.cert_path, &config.tls.key_path).await?;

        if let Some(port) = config.tls.redirect_port {
            let redirect_listener =
                tokio::net::TcpListener::bind((config.host.as_str(), port)).await?;
            info!(port, https_port = config.port, "HTTP redirect listener started");
            let redirect = redirect_router(config.port);
            tokio::spawn(async move {
                if let Err(e) = axum::serve(redirect_listener, redirect)
                    .with_graceful_shutdown(shutdown_signal())
                    .await
                {
                    error!("HTTP redirect listener failed: {e}");
                }
            });
        }

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Initiating graceful shutdown (allowing in-flight requests to complete)");
}
