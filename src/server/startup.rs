//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] so integration tests can
//! spin up a real dashboard server on an ephemeral port, exercise its HTTP
//! endpoints, and shut it down cleanly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::DashboardConfig;
use crate::server::http::{create_router, AppState};
use crate::sessions::retention::{retention_loop, RetentionConfig};
use crate::sessions::SessionCatalog;

/// Everything needed to start a dashboard server.
pub struct ServerConfig {
    pub dashboard: DashboardConfig,
    pub bind_address: SocketAddr,
    /// When `false` (e.g. in tests), the periodic catalog refresh and the
    /// retention loop are **not** spawned.
    pub spawn_background_tasks: bool,
}

impl ServerConfig {
    /// Bind to the configured host and port with background tasks enabled.
    pub fn new(dashboard: DashboardConfig) -> Result<Self, std::net::AddrParseError> {
        let ip = match dashboard.host.as_str() {
            "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
            host => host.parse::<IpAddr>()?,
        };
        Ok(ServerConfig {
            bind_address: SocketAddr::new(ip, dashboard.port),
            dashboard,
            spawn_background_tasks: true,
        })
    }

    /// Binds to `127.0.0.1:0` (OS-assigned port) with no background tasks.
    pub fn for_testing(dashboard: DashboardConfig) -> Self {
        ServerConfig {
            dashboard,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            spawn_background_tasks: false,
        }
    }
}

/// Handle to a running server.  Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<Result<(), std::io::Error>>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The full local address (ip + port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://ip:port` base URL for the running server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop background tasks and wait for in-flight requests to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(Duration::from_secs(5), self.server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("Server task returned error: {}", e),
            Ok(Err(e)) => error!("Server task panicked: {}", e),
            Err(_) => warn!("Server task did not finish within 5s timeout"),
        }
    }
}

/// Re-scan session transcripts every `interval` until shutdown.
async fn refresh_loop(
    catalog: Arc<SessionCatalog>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately; startup already refreshed.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = catalog.refresh().await;
                debug!(sessions = snapshot.len(), "catalog refreshed");
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("catalog refresh loop stopping");
                    break;
                }
            }
        }
    }
}

/// Spawn the periodic catalog refresh and the retention loop.
pub fn spawn_background_tasks(state: &AppState, shutdown_rx: &watch::Receiver<bool>) {
    tokio::spawn(refresh_loop(
        state.catalog.clone(),
        state.config.refresh_interval,
        shutdown_rx.clone(),
    ));

    let retention = RetentionConfig {
        interval: state.config.retention_interval,
        ..RetentionConfig::default()
    };
    info!(
        refresh_secs = state.config.refresh_interval.as_secs(),
        retention_mins = retention.interval.as_secs() / 60,
        "background tasks started"
    );
    tokio::spawn(retention_loop(
        state.archive.clone(),
        state.settings.clone(),
        retention,
        shutdown_rx.clone(),
    ));
}

/// Start a server from a fully-assembled [`ServerConfig`].
///
/// Returns a [`ServerHandle`] that exposes the actual bound address and
/// provides a [`ServerHandle::shutdown`] method for clean teardown.
pub async fn run_server_with_config(
    config: ServerConfig,
) -> Result<ServerHandle, Box<dyn std::error::Error>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState::open(config.dashboard).await?;
    let app = create_router(state.clone());

    if config.spawn_background_tasks {
        spawn_background_tasks(&state, &shutdown_rx);
    }

    // Bind TCP listener (supports port 0 for ephemeral port assignment)
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        auth = %state.config.auth.mode,
        auth_enabled = state.config.auth.enabled(),
        read_only = state.config.auth.read_only,
        "dashboard listening"
    );

    let mut shutdown_watch = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            loop {
                if *shutdown_watch.borrow() {
                    break;
                }
                if shutdown_watch.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
    });

    Ok(ServerHandle {
        local_addr,
        state,
        shutdown_tx,
        server_task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bind_address_from_config() {
        let dir = TempDir::new().unwrap();
        let mut dashboard = DashboardConfig::for_dirs(dir.path(), dir.path().join("cw"));
        dashboard.host = "localhost".to_string();
        dashboard.port = 9001;
        let config = ServerConfig::new(dashboard).unwrap();
        assert_eq!(config.bind_address, SocketAddr::from(([127, 0, 0, 1], 9001)));
        assert!(config.spawn_background_tasks);

        let mut dashboard = DashboardConfig::for_dirs(dir.path(), dir.path().join("cw"));
        dashboard.host = "not an ip".to_string();
        assert!(ServerConfig::new(dashboard).is_err());
    }

    #[tokio::test]
    async fn test_refresh_loop_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(SessionCatalog::new(
            crate::sessions::CatalogConfig::new(dir.path()),
        ));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(refresh_loop(catalog, Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
