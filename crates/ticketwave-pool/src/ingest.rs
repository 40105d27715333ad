//! Bundle ingestion.
//!
//! A bundle is a batch of named files uploaded by an operator. Every entry
//! is screened for format and content duplicates before anything is
//! persisted, so a bundle with nothing new changes nothing.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Serialize;
use ticketwave_storage::{fingerprint, StorageError};
use ticketwave_types::{Fingerprint, TicketId, UserId, WaveStatus};

use crate::{PoolError, Result, TicketStore};

/// How an upload relates to tickets already in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Supersede every free ticket. Preparation only, before any upload.
    Replace,
    /// Add to the pool. Preparation or an active wave.
    Add,
}

impl IngestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestMode::Replace => "replace",
            IngestMode::Add => "add",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "replace" => Some(IngestMode::Replace),
            "add" => Some(IngestMode::Add),
            _ => None,
        }
    }
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct BundleEntry {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct Bundle {
    entries: Vec<BundleEntry>,
}

impl Bundle {
    pub fn new(entries: Vec<BundleEntry>) -> Self {
        Self { entries }
    }

    /// Every regular file directly inside `dir`, sorted by name.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let io = |e| PoolError::Storage(StorageError::Io {
            path: dir.display().to_string(),
            source: e,
        });
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io)? {
            let path = entry.map_err(io)?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let data = fs::read(&path).map_err(|e| {
                PoolError::Storage(StorageError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            entries.push(BundleEntry { name, data });
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Ingested,
    /// Every entry was a duplicate or in the wrong format. Nothing changed.
    NothingNew,
    EmptyBundle,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AddedTicket {
    pub id: TicketId,
    pub original_name: String,
    pub storage_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub mode: IngestMode,
    pub outcome: IngestOutcome,
    pub added: Vec<AddedTicket>,
    /// Entry names skipped because their content is already known.
    pub duplicates: Vec<String>,
    /// Entry names skipped for having the wrong extension.
    pub rejected_format: Vec<String>,
    /// Free tickets superseded by a replace upload.
    pub archived: u64,
    /// Whether the new tickets went straight into the active wave.
    pub bound_to_active_wave: bool,
}

impl IngestReport {
    fn empty(mode: IngestMode, outcome: IngestOutcome) -> Self {
        Self {
            mode,
            outcome,
            added: Vec::new(),
            duplicates: Vec::new(),
            rejected_format: Vec::new(),
            archived: 0,
            bound_to_active_wave: false,
        }
    }
}

pub struct Ingestor {
    store: TicketStore,
}

impl Ingestor {
    pub fn new(store: TicketStore) -> Self {
        Self { store }
    }

    /// Ingest `bundle` in `mode` on behalf of `uploader`.
    pub async fn ingest(
        &self,
        mode: IngestMode,
        bundle: Bundle,
        uploader: UserId,
        now: u64,
    ) -> Result<IngestReport> {
        let state = self.store.wave_state().await?;
        match (mode, state.status) {
            (IngestMode::Replace, WaveStatus::Preparing) => {
                let staged = self.store.count_unbound(state.prepared_at).await?;
                if staged > 0 {
                    return Err(PoolError::ReplaceAfterUpload(staged));
                }
            }
            (IngestMode::Add, WaveStatus::Preparing | WaveStatus::Active) => {}
            (mode, status) => {
                return Err(PoolError::UploadNotAllowed {
                    mode: mode.as_str(),
                    status,
                })
            }
        }

        if bundle.is_empty() {
            return Ok(IngestReport::empty(mode, IngestOutcome::EmptyBundle));
        }

        let mut report = IngestReport::empty(mode, IngestOutcome::NothingNew);
        report.bound_to_active_wave = state.status == WaveStatus::Active;

        let mut seen: HashSet<Fingerprint> = HashSet::new();
        let mut accepted = Vec::new();
        for entry in bundle.entries {
            if !self.has_ticket_extension(&entry.name) {
                report.rejected_format.push(entry.name);
                continue;
            }
            let fp = fingerprint(&entry.data);
            if !seen.insert(fp) || self.store.contains(&fp).await? {
                report.duplicates.push(entry.name);
                continue;
            }
            accepted.push(entry);
        }

        if accepted.is_empty() {
            tracing::info!(
                mode = %mode,
                duplicates = report.duplicates.len(),
                rejected = report.rejected_format.len(),
                "bundle contained nothing new"
            );
            return Ok(report);
        }

        if mode == IngestMode::Replace {
            report.archived = self.store.archive_free(now).await?.archived;
        }

        for entry in accepted {
            match self.store.ingest(&entry.data, &entry.name, uploader, now).await {
                Ok(ticket) => report.added.push(AddedTicket {
                    id: ticket.id,
                    original_name: entry.name,
                    storage_name: ticket.storage_name,
                }),
                Err(PoolError::Duplicate(_)) => report.duplicates.push(entry.name),
                Err(e) => return Err(e),
            }
        }
        if !report.added.is_empty() {
            report.outcome = IngestOutcome::Ingested;
        }

        tracing::info!(
            mode = %mode,
            uploader = %uploader,
            added = report.added.len(),
            duplicates = report.duplicates.len(),
            rejected = report.rejected_format.len(),
            archived = report.archived,
            "bundle ingested"
        );
        Ok(report)
    }

    fn has_ticket_extension(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(self.store.extension()))
    }
}

#[cfg(test)]
mod tests {
    use ticketwave_types::TicketStatus;

    use super::*;
    use crate::testutil::{fixture, Fixture, ADMIN};
    use crate::WaveMachine;

    fn entry(name: &str, data: &str) -> BundleEntry {
        BundleEntry {
            name: name.to_string(),
            data: data.as_bytes().to_vec(),
        }
    }

    async fn prepare(fx: &Fixture, at: u64) {
        WaveMachine::new(fx.store.clone(), fx.ledger.clone(), fx.directory.clone())
            .new_wave(ADMIN, at)
            .await
            .expect("new wave");
    }

    #[tokio::test]
    async fn test_rejected_while_idle() {
        let fx = fixture(0).await;
        let ingestor = Ingestor::new(fx.store.clone());
        let result = ingestor
            .ingest(IngestMode::Add, Bundle::new(vec![entry("a.pdf", "a")]), ADMIN, 10)
            .await;
        assert!(matches!(
            result,
            Err(PoolError::UploadNotAllowed { mode: "add", status: WaveStatus::Idle })
        ));
    }

    #[tokio::test]
    async fn test_dedup_within_and_across_bundles() {
        let fx = fixture(0).await;
        prepare(&fx, 100).await;
        let ingestor = Ingestor::new(fx.store.clone());

        let first = ingestor
            .ingest(
                IngestMode::Add,
                Bundle::new(vec![entry("a.pdf", "A"), entry("a-copy.pdf", "A"), entry("b.PDF", "B")]),
                ADMIN,
                200,
            )
            .await
            .expect("first");
        assert_eq!(first.outcome, IngestOutcome::Ingested);
        assert_eq!(first.added.len(), 2);
        assert_eq!(first.duplicates, vec!["a-copy.pdf".to_string()]);

        let second = ingestor
            .ingest(
                IngestMode::Add,
                Bundle::new(vec![entry("again.pdf", "B"), entry("notes.txt", "C")]),
                ADMIN,
                300,
            )
            .await
            .expect("second");
        assert_eq!(second.outcome, IngestOutcome::NothingNew);
        assert_eq!(second.duplicates, vec!["again.pdf".to_string()]);
        assert_eq!(second.rejected_format, vec!["notes.txt".to_string()]);
        assert_eq!(fx.store.list_all().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn test_empty_bundle() {
        let fx = fixture(0).await;
        prepare(&fx, 100).await;
        let report = Ingestor::new(fx.store.clone())
            .ingest(IngestMode::Replace, Bundle::default(), ADMIN, 200)
            .await
            .expect("ingest");
        assert_eq!(report.outcome, IngestOutcome::EmptyBundle);
    }

    #[tokio::test]
    async fn test_replace_only_before_first_upload() {
        let fx = fixture(0).await;
        prepare(&fx, 100).await;
        let ingestor = Ingestor::new(fx.store.clone());
        ingestor
            .ingest(IngestMode::Replace, Bundle::new(vec![entry("a.pdf", "A")]), ADMIN, 200)
            .await
            .expect("replace");

        let result = ingestor
            .ingest(IngestMode::Replace, Bundle::new(vec![entry("b.pdf", "B")]), ADMIN, 300)
            .await;
        assert!(matches!(result, Err(PoolError::ReplaceAfterUpload(1))));
    }

    #[tokio::test]
    async fn test_replace_archives_free_tickets() {
        let fx = fixture(0).await;
        let waves = WaveMachine::new(fx.store.clone(), fx.ledger.clone(), fx.directory.clone());
        waves.new_wave(ADMIN, 100).await.expect("new wave");
        {
            // A free ticket bound to an earlier wave, released after the sweep.
            let conn = fx.db.lock().await;
            let old = ticketwave_db::queries::waves::insert(&conn, 10, ADMIN, 10).expect("wave");
            let fp = fingerprint(b"old");
            fx.store.vault().write("old.pdf", b"old").expect("write");
            ticketwave_db::queries::tickets::insert(&conn, "old.pdf", &fp, "old.pdf", ADMIN, 10, Some(old))
                .expect("insert");
        }

        let report = Ingestor::new(fx.store.clone())
            .ingest(IngestMode::Replace, Bundle::new(vec![entry("new.pdf", "new")]), ADMIN, 210)
            .await
            .expect("replace");
        assert_eq!(report.archived, 1);
        assert_eq!(report.added.len(), 1);

        let statuses: Vec<TicketStatus> = fx
            .store
            .list_all()
            .await
            .expect("list")
            .iter()
            .map(|t| t.status())
            .collect();
        assert_eq!(statuses, vec![TicketStatus::Archived, TicketStatus::Available]);
    }

    #[tokio::test]
    async fn test_add_during_active_wave_binds() {
        let fx = fixture(1).await;
        let waves = WaveMachine::new(fx.store.clone(), fx.ledger.clone(), fx.directory.clone());
        waves.new_wave(ADMIN, 100).await.expect("new wave");
        let ingestor = Ingestor::new(fx.store.clone());
        ingestor
            .ingest(IngestMode::Add, Bundle::new(vec![entry("a.pdf", "A")]), ADMIN, 110)
            .await
            .expect("seed");
        let wave = waves.confirm(ADMIN, 120).await.expect("confirm").wave;

        let report = ingestor
            .ingest(IngestMode::Add, Bundle::new(vec![entry("b.pdf", "B")]), ADMIN, 130)
            .await
            .expect("add");
        assert!(report.bound_to_active_wave);
        let record = fx.store.get(report.added[0].id).await.expect("get");
        assert_eq!(record.wave_id, Some(wave.id));

        assert!(matches!(
            ingestor
                .ingest(IngestMode::Replace, Bundle::new(vec![entry("c.pdf", "C")]), ADMIN, 140)
                .await,
            Err(PoolError::UploadNotAllowed { mode: "replace", status: WaveStatus::Active })
        ));
    }

    #[test]
    fn test_bundle_from_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("b.pdf"), b"B").expect("write");
        fs::write(dir.path().join("a.pdf"), b"A").expect("write");
        fs::create_dir(dir.path().join("nested")).expect("mkdir");

        let bundle = Bundle::from_dir(dir.path()).expect("bundle");
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.entries[0].name, "a.pdf");
        assert_eq!(bundle.entries[1].data, b"B");
    }
}
