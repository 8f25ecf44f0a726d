//! Call relay server binary.
//!
//! Loads configuration, opens the artifact store, wires the stage adapters
//! into a pipeline and serves the telephony webhooks until SIGINT or SIGTERM.

use callrelay_server::config::{Config, LoggingConfig};
use callrelay_server::{app, config, pipeline::Pipeline, retention, AppState};
use callrelay_store::ArtifactStore;
use callrelay_voice::Stages;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Config file used when neither the command line nor the environment names one.
const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Picks the config file: first CLI argument, then `CALLRELAY_CONFIG_PATH`.
fn config_location() -> (String, &'static str) {
    let non_blank = |value: &String| !value.trim().is_empty();

    if let Some(path) = std::env::args().nth(1).filter(non_blank) {
        (path, "argument")
    } else if let Some(path) = std::env::var("CALLRELAY_CONFIG_PATH").ok().filter(non_blank) {
        (path, "environment")
    } else {
        (DEFAULT_CONFIG_FILE.to_string(), "default")
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn warn_on_missing_credentials(config: &Config) {
    if config.transcription.api_key.is_empty() || config.response.api_key.is_empty() {
        tracing::warn!(
            "OPENAI_API_KEY is not set; transcription and response requests carry no credentials"
        );
    }
    if config.synthesis.voice_id.is_empty() {
        tracing::warn!("ELEVENLABS_VOICE_ID is not set; every utterance will fall back");
    }
}

#[tokio::main]
async fn main() {
    let (config_path, config_source) = config_location();
    let config = config::load_config(Some(&config_path)).unwrap_or_else(|e| {
        panic!("cannot start without a valid config ({}): {}", config_path, e)
    });

    init_tracing(&config.logging);
    tracing::info!(path = %config_path, source = config_source, "configuration loaded");
    warn_on_missing_credentials(&config);

    let store = ArtifactStore::open(&config.artifacts.dir)
        .await
        .unwrap_or_else(|e| panic!("cannot open artifacts.dir {:?}: {}", config.artifacts.dir, e));
    tracing::info!(path = %store.root().display(), "artifact store ready");

    let stages = Stages::from_config(
        &config.transcription,
        &config.response,
        &config.synthesis,
    )
    .unwrap_or_else(|e| panic!("cannot build stage clients: {}", e));

    tokio::spawn(retention::start_retention_task(
        store.clone(),
        config.artifacts.retention(),
        config.artifacts.sweep_interval(),
    ));

    let state = AppState::new(
        Pipeline::new(store, stages),
        config.telephony.clone(),
        config.server.public_url.clone(),
    );

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("cannot listen on {}: {}", addr, e));
    tracing::info!(%addr, "callrelay listening");

    if let Err(e) = axum::serve(listener, app(state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await
    {
        tracing::error!(error = %e, "server stopped with an error");
        std::process::exit(1);
    }

    tracing::info!("callrelay stopped");
}

/// Resolves on the first SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        () = interrupt => "SIGINT",
        () = terminate => "SIGTERM",
    };
    tracing::info!(signal, "shutting down, draining open requests");
}
