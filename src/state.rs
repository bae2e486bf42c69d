use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::db::Store;
use crate::services::oracle::OracleChain;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    store: Store,
    oracle: OracleChain,
    engine: EngineConfig,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: Store, oracle: OracleChain, engine: EngineConfig) -> Self {
        Self {
            started_at: Instant::now(),
            store,
            oracle,
            engine,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn oracle(&self) -> &OracleChain {
        &self.oracle
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    /// Token for one oracle-backed request; cancelled when the server shuts down.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
