//! ticketwaved: the ticket distribution daemon.
//!
//! Single OS process running a Tokio async runtime. Operators drive waves,
//! uploads and deliveries via JSON-RPC over a Unix socket; recipients
//! register themselves by redeeming an invite code.

mod commands;
mod config;
mod events;
mod outbox;
mod rpc;
mod session;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ticketwave_db::SharedConnection;
use ticketwave_delivery::DeliveryEngine;
use ticketwave_pool::{Ingestor, Invites, Ledger, SqliteDirectory, TicketStore, WaveMachine};
use ticketwave_storage::TicketVault;
use ticketwave_types::{now_millis, UserId};

use crate::config::DaemonConfig;
use crate::events::EventBus;
use crate::outbox::OutboxTransport;
use crate::rpc::RpcServer;
use crate::session::UploadSessions;

/// Daemon-wide shared state.
pub struct DaemonState {
    pub db: SharedConnection,
    pub config: DaemonConfig,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    pub store: TicketStore,
    pub directory: SqliteDirectory,
    pub waves: WaveMachine<SqliteDirectory>,
    pub ingestor: Ingestor,
    pub invites: Invites,
    pub engine: DeliveryEngine<OutboxTransport, SqliteDirectory>,
    pub sessions: UploadSessions,
    /// Held for the duration of a bulk run or a manual issue.
    pub delivery_lock: tokio::sync::Mutex<()>,
}

impl DaemonState {
    /// Wire every component onto one connection and grant bootstrap admins.
    pub async fn open(config: DaemonConfig, conn: rusqlite::Connection) -> anyhow::Result<Self> {
        let db = ticketwave_db::shared(conn);
        let vault = TicketVault::open(
            config.tickets_dir(),
            config.archive_dir(),
            config.storage.archive_retention,
        )?;
        let store = TicketStore::new(db.clone(), vault, config.ingest.ticket_extension.clone());
        let ledger = Ledger::new(db.clone());
        let directory = SqliteDirectory::new(db.clone());

        let now = now_millis();
        for admin in &config.access.bootstrap_admins {
            directory.grant_admin(UserId(*admin), now).await?;
        }

        let transport = OutboxTransport::new(config.outbox_dir(), config.delivery.blocked_users());
        let engine = DeliveryEngine::new(
            store.clone(),
            ledger.clone(),
            directory.clone(),
            transport,
            config.delivery.settings(),
        );

        Ok(Self {
            waves: WaveMachine::new(store.clone(), ledger.clone(), directory.clone()),
            ingestor: Ingestor::new(store.clone()),
            invites: Invites::new(db.clone()),
            engine,
            db,
            config,
            event_bus: EventBus::new(1000),
            store,
            directory,
            sessions: UploadSessions::new(),
            delivery_lock: tokio::sync::Mutex::new(()),
        })
    }
}

fn init_tracing(config: &DaemonConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(config.log_directive()),
    };

    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;
    init_tracing(&config)?;

    info!("ticketwave daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let conn = ticketwave_db::open(&config.db_path())?;

    // 3. Build daemon state
    let state = Arc::new(DaemonState::open(config, conn).await?);

    let wave = state.waves.state().await?;
    info!(status = %wave.status, wave_id = ?wave.wave_id, "wave state restored");

    // 4. Start IPC server
    let socket_path = state.config.socket_path();
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    state.event_bus.emit(
        "DaemonStarted",
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "wave_status": wave.status.as_str(),
        }),
    );

    // 5. Run the RPC server until shutdown
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub const OPERATOR: i64 = 1;

    pub struct TestDaemon {
        pub _dir: tempfile::TempDir,
        pub state: Arc<DaemonState>,
    }

    /// A daemon rooted in a temp dir with one bootstrap operator, no pacing
    /// and no backoff.
    pub async fn daemon() -> TestDaemon {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = DaemonConfig::default();
        config.storage.data_dir = dir.path().to_string_lossy().into_owned();
        config.access.bootstrap_admins = vec![OPERATOR];
        config.delivery.pacing_ms = 0;
        config.delivery.pacing_jitter_ms = 0;
        config.delivery.base_backoff_secs = 0;

        let conn = ticketwave_db::open_memory().expect("open db");
        let state = DaemonState::open(config, conn).await.expect("open state");
        TestDaemon {
            _dir: dir,
            state: Arc::new(state),
        }
    }
}
