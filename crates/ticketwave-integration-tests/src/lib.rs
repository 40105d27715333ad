//! Integration test crate for ticketwave.
//!
//! The library half is a harness wiring the pool, the delivery engine and a
//! scripted transport onto one temporary database and vault. The tests
//! under `tests/` drive whole waves through it.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p ticketwave-integration-tests
//! ```

use std::time::Duration;

use ticketwave_db::SharedConnection;
use ticketwave_delivery::scripted::ScriptedTransport;
use ticketwave_delivery::{DeliveryEngine, DeliverySettings};
use ticketwave_pool::{
    Bundle, BundleEntry, Confirmation, IngestMode, IngestReport, Ingestor, Ledger, SqliteDirectory,
    TicketStore, WaveMachine,
};
use ticketwave_storage::TicketVault;
use ticketwave_types::{now_millis, UserId};

pub const OPERATOR: UserId = UserId(1);

/// First recipient id; recipients are numbered upwards from here.
pub const FIRST_RECIPIENT: i64 = 100;

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub db: SharedConnection,
    pub store: TicketStore,
    pub ledger: Ledger,
    pub directory: SqliteDirectory,
    pub waves: WaveMachine<SqliteDirectory>,
    pub ingestor: Ingestor,
    pub transport: ScriptedTransport,
    pub engine: DeliveryEngine<ScriptedTransport, SqliteDirectory>,
}

/// No pacing, no jitter; backoff left at its default so paused-clock tests
/// exercise the real schedule.
pub fn settings() -> DeliverySettings {
    DeliverySettings {
        pacing: Duration::ZERO,
        pacing_jitter: Duration::ZERO,
        ..DeliverySettings::default()
    }
}

impl Harness {
    /// One operator plus `recipients` registered users.
    pub async fn new(recipients: i64) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = TicketVault::open(dir.path().join("tickets"), dir.path().join("archive"), 3)
            .expect("vault");
        let db = ticketwave_db::shared(ticketwave_db::open_memory().expect("db"));
        let store = TicketStore::new(db.clone(), vault, "pdf");
        let ledger = Ledger::new(db.clone());
        let directory = SqliteDirectory::new(db.clone());

        directory.register_user(OPERATOR, Some("operator"), 1).await.expect("register operator");
        directory.grant_admin(OPERATOR, 1).await.expect("grant");
        for i in 0..recipients {
            directory
                .register_user(recipient(i), Some(&format!("user{i}")), 2 + i as u64)
                .await
                .expect("register recipient");
        }

        let transport = ScriptedTransport::new();
        let engine = DeliveryEngine::new(
            store.clone(),
            ledger.clone(),
            directory.clone(),
            transport.clone(),
            settings(),
        );
        Self {
            waves: WaveMachine::new(store.clone(), ledger.clone(), directory.clone()),
            ingestor: Ingestor::new(store.clone()),
            dir,
            db,
            store,
            ledger,
            directory,
            transport,
            engine,
        }
    }

    pub async fn prepare(&self) {
        self.waves.new_wave(OPERATOR, now_millis()).await.expect("new wave");
    }

    pub async fn upload(&self, mode: IngestMode, tickets: &[&str]) -> IngestReport {
        self.ingestor
            .ingest(mode, bundle(tickets), OPERATOR, now_millis())
            .await
            .expect("ingest")
    }

    pub async fn confirm(&self) -> Confirmation {
        self.waves.confirm(OPERATOR, now_millis()).await.expect("confirm")
    }

    /// Prepare, upload `tickets` in replace mode and confirm.
    pub async fn start_wave(&self, tickets: &[&str]) -> Confirmation {
        self.prepare().await;
        self.upload(IngestMode::Replace, tickets).await;
        self.confirm().await
    }
}

pub fn recipient(i: i64) -> UserId {
    UserId(FIRST_RECIPIENT + i)
}

/// A bundle of `.pdf` entries whose content is the given text.
pub fn bundle(tickets: &[&str]) -> Bundle {
    Bundle::new(
        tickets
            .iter()
            .enumerate()
            .map(|(i, content)| BundleEntry {
                name: format!("ticket-{i}.pdf"),
                data: content.as_bytes().to_vec(),
            })
            .collect(),
    )
}
