use studyhub_engine::config::Config;
use studyhub_engine::db::Store;
use studyhub_engine::logging;
use studyhub_engine::services::oracle::OracleChain;
use studyhub_engine::state::AppState;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let store = match Store::connect(&config.database_path).await {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, path = %config.database_path.display(), "failed to open database");
            std::process::exit(1);
        }
    };
    tracing::info!(path = %config.database_path.display(), "database ready");

    let oracle = OracleChain::from_config(&config.oracle);
    if oracle.is_available() {
        tracing::info!(backends = ?oracle.backend_names(), "content oracle configured");
    } else {
        tracing::warn!("no content oracle backend configured, generation and grading of open answers are disabled");
    }

    let state = AppState::new(store.clone(), oracle, config.engine);
    let shutdown = state.shutdown_token();
    let app = studyhub_engine::create_app(state);

    let addr = config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "bind listener failed");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "studyhub-engine listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("HTTP server stopped, closing database");
    store.close().await;
    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
