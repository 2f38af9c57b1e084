// 🔄 Manifest Pipeline - build → upload PDF → upload CSV → clear
//
// Not a transaction. Each step runs to completion before the next starts;
// a failure stops the run where it is:
//   - files already uploaded stay uploaded (no compensating delete)
//   - the pending set is only cleared in Finalizing, and only the entries
//     that went into the documents; later scans stay pending
// so the operator can retry the whole batch.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

use crate::db::{Event, RecordStore};
use crate::entities::Courier;
use crate::error::{IntakeError, Result};
use crate::manifest::{build_manifest, ManifestData, ManifestDocuments};
use crate::sequence::{generate_bin_number, BinNumber, SequenceStore};
use crate::storage::DocumentStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Csv,
}

impl DocumentKind {
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Csv => "csv",
        }
    }
}

/// Step of the pipeline that is running (or that failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "document", rename_all = "snake_case")]
pub enum Stage {
    Building,
    Uploading(DocumentKind),
    Finalizing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Building => f.write_str("Generating PDF & CSV..."),
            Stage::Uploading(DocumentKind::Pdf) => f.write_str("Uploading PDF..."),
            Stage::Uploading(DocumentKind::Csv) => f.write_str("Uploading CSV..."),
            Stage::Finalizing => f.write_str("Clearing pending parcels..."),
        }
    }
}

impl Stage {
    /// Rough completion for progress bars, 0-100
    pub fn percent(&self) -> u16 {
        match self {
            Stage::Building => 0,
            Stage::Uploading(DocumentKind::Pdf) => 50,
            Stage::Uploading(DocumentKind::Csv) => 75,
            Stage::Finalizing => 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedDocument {
    pub kind: DocumentKind,
    pub file_name: String,
    pub file_id: String,
}

#[derive(Debug, Clone)]
pub struct ManifestReceipt {
    pub courier: Courier,
    pub bin_number: BinNumber,
    pub parcel_count: usize,
    pub documents: ManifestDocuments,
    pub uploaded: Vec<UploadedDocument>,
    pub cleared: usize,
}

impl ManifestReceipt {
    pub fn file_id(&self, kind: DocumentKind) -> Option<&str> {
        self.uploaded
            .iter()
            .find(|doc| doc.kind == kind)
            .map(|doc| doc.file_id.as_str())
    }
}

/// Where a run stopped and what it left behind
#[derive(Debug)]
pub struct ManifestFailure {
    pub courier: Courier,
    pub stage: Stage,
    pub bin_number: Option<BinNumber>,
    pub uploaded: Vec<UploadedDocument>,
    pub error: IntakeError,
}

impl fmt::Display for ManifestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Operators see the raw upstream message
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for ManifestFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[derive(Debug)]
pub enum PipelineState {
    Building,
    Uploading {
        kind: DocumentKind,
        bin_number: BinNumber,
        tracking_numbers: Vec<String>,
        documents: ManifestDocuments,
        uploaded: Vec<UploadedDocument>,
    },
    Finalizing {
        bin_number: BinNumber,
        tracking_numbers: Vec<String>,
        documents: ManifestDocuments,
        uploaded: Vec<UploadedDocument>,
    },
    Complete(ManifestReceipt),
    FailedPartial(ManifestFailure),
}

impl PipelineState {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Building => Some(Stage::Building),
            PipelineState::Uploading { kind, .. } => Some(Stage::Uploading(*kind)),
            PipelineState::Finalizing { .. } => Some(Stage::Finalizing),
            PipelineState::Complete(_) | PipelineState::FailedPartial(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage().is_none()
    }
}

/// Collaborators the pipeline drives
pub struct Collaborators<'a> {
    pub records: &'a dyn RecordStore,
    pub sequence: &'a dyn SequenceStore,
    pub storage: &'a dyn DocumentStorage,
    pub folder_id: &'a str,
    pub actor: &'a str,
}

pub struct ManifestPipeline {
    courier: Courier,
    printed_at: NaiveDateTime,
    state: PipelineState,
}

impl ManifestPipeline {
    pub fn new(courier: Courier, printed_at: NaiveDateTime) -> Self {
        ManifestPipeline {
            courier,
            printed_at,
            state: PipelineState::Building,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Run one step and move to the next state. Terminal states stay put.
    pub fn step(&mut self, ctx: &Collaborators<'_>) {
        let state = std::mem::replace(&mut self.state, PipelineState::Building);
        self.state = match state {
            PipelineState::Building => self.build(ctx),
            PipelineState::Uploading {
                kind,
                bin_number,
                tracking_numbers,
                documents,
                mut uploaded,
            } => {
                let bytes = match kind {
                    DocumentKind::Pdf => &documents.pdf,
                    DocumentKind::Csv => &documents.csv,
                };
                let file_name = format!("{}.{}", bin_number, kind.extension());

                match ctx.storage.upload(bytes, &file_name, ctx.folder_id) {
                    Ok(file_id) => {
                        uploaded.push(UploadedDocument { kind, file_name, file_id });
                        match kind {
                            DocumentKind::Pdf => PipelineState::Uploading {
                                kind: DocumentKind::Csv,
                                bin_number,
                                tracking_numbers,
                                documents,
                                uploaded,
                            },
                            DocumentKind::Csv => PipelineState::Finalizing {
                                bin_number,
                                tracking_numbers,
                                documents,
                                uploaded,
                            },
                        }
                    }
                    Err(error) => self.fail(Stage::Uploading(kind), Some(bin_number), uploaded, error),
                }
            }
            PipelineState::Finalizing {
                bin_number,
                tracking_numbers,
                documents,
                uploaded,
            } => match ctx.records.delete_many(self.courier, &tracking_numbers) {
                Ok(cleared) => {
                    let parcel_count = tracking_numbers.len();
                    self.audit(ctx, &bin_number, parcel_count, &documents, &uploaded);
                    PipelineState::Complete(ManifestReceipt {
                        courier: self.courier,
                        bin_number,
                        parcel_count,
                        documents,
                        uploaded,
                        cleared,
                    })
                }
                Err(error) => self.fail(Stage::Finalizing, Some(bin_number), uploaded, error),
            },
            terminal => terminal,
        };
    }

    /// Drive the pipeline to a terminal state, reporting each stage entered
    pub fn run(
        mut self,
        ctx: &Collaborators<'_>,
        mut on_stage: impl FnMut(Stage),
    ) -> std::result::Result<ManifestReceipt, ManifestFailure> {
        while let Some(stage) = self.state.stage() {
            info!(courier = %self.courier, %stage, "manifest stage");
            on_stage(stage);
            self.step(ctx);
        }

        match self.state {
            PipelineState::Complete(receipt) => {
                info!(
                    courier = %receipt.courier,
                    bin = %receipt.bin_number,
                    parcels = receipt.parcel_count,
                    "manifest complete"
                );
                Ok(receipt)
            }
            PipelineState::FailedPartial(failure) => Err(failure),
            // The loop only exits on a terminal state
            other => Err(ManifestFailure {
                courier: self.courier,
                stage: other.stage().unwrap_or(Stage::Building),
                bin_number: None,
                uploaded: Vec::new(),
                error: IntakeError::invalid("Manifest pipeline stopped early"),
            }),
        }
    }

    fn build(&self, ctx: &Collaborators<'_>) -> PipelineState {
        match self.prepare(ctx) {
            Ok((bin_number, tracking_numbers, documents)) => PipelineState::Uploading {
                kind: DocumentKind::Pdf,
                bin_number,
                tracking_numbers,
                documents,
                uploaded: Vec::new(),
            },
            Err((bin_number, error)) => self.fail(Stage::Building, bin_number, Vec::new(), error),
        }
    }

    #[allow(clippy::type_complexity)]
    fn prepare(
        &self,
        ctx: &Collaborators<'_>,
    ) -> std::result::Result<(BinNumber, Vec<String>, ManifestDocuments), (Option<BinNumber>, IntakeError)> {
        let entries = ctx.records.list_for(self.courier).map_err(|e| (None, e))?;
        if entries.is_empty() {
            return Err((
                None,
                IntakeError::invalid(format!("No pending parcels for {}", self.courier)),
            ));
        }

        let tracking_numbers: Vec<String> = entries.into_iter().map(|e| e.tracking_number).collect();
        let bin_number = generate_bin_number(ctx.sequence, self.courier.name(), self.printed_at.date())
            .map_err(|e| (None, e))?;

        let documents = self
            .render(&bin_number, &tracking_numbers)
            .map_err(|e| (Some(bin_number.clone()), e))?;

        Ok((bin_number, tracking_numbers, documents))
    }

    fn render(&self, bin_number: &BinNumber, tracking_numbers: &[String]) -> Result<ManifestDocuments> {
        let data = ManifestData::new(
            self.courier.name(),
            &bin_number.to_string(),
            tracking_numbers,
            tracking_numbers.len(),
            self.printed_at,
        )?;
        build_manifest(&data)
    }

    fn fail(
        &self,
        stage: Stage,
        bin_number: Option<BinNumber>,
        uploaded: Vec<UploadedDocument>,
        error: IntakeError,
    ) -> PipelineState {
        error!(
            courier = %self.courier,
            ?stage,
            uploaded = uploaded.len(),
            error = %error,
            "manifest failed; pending parcels kept"
        );
        PipelineState::FailedPartial(ManifestFailure {
            courier: self.courier,
            stage,
            bin_number,
            uploaded,
            error,
        })
    }

    fn audit(
        &self,
        ctx: &Collaborators<'_>,
        bin_number: &BinNumber,
        parcel_count: usize,
        documents: &ManifestDocuments,
        uploaded: &[UploadedDocument],
    ) {
        let event = Event::new(
            "manifest_generated",
            "pending_set",
            self.courier.name(),
            serde_json::json!({
                "binNumber": bin_number.to_string(),
                "parcelCount": parcel_count,
                "files": uploaded,
                "pdfSha256": documents.pdf_digest(),
                "csvSha256": documents.csv_digest(),
            }),
            ctx.actor,
        );

        // The batch is already archived and cleared; a missing audit row is not worth failing it
        if let Err(err) = ctx.records.record_event(&event) {
            warn!(error = %err, "could not record manifest event");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_events_for_entity, setup_database, TrackingEntry};
    use crate::error::Service;
    use crate::storage::LocalDriveStorage;
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use std::cell::RefCell;

    fn printed_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn seeded_db(courier: Courier, numbers: &[&str]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        for (i, tn) in numbers.iter().enumerate() {
            conn.insert(&TrackingEntry {
                tracking_number: tn.to_string(),
                courier,
                timestamp: i as i64,
            })
            .unwrap();
        }
        conn
    }

    /// Storage that fails on the n-th upload (0-based) and records the rest
    struct FlakyStorage {
        fail_on: usize,
        calls: RefCell<Vec<String>>,
    }

    impl DocumentStorage for FlakyStorage {
        fn upload(&self, _bytes: &[u8], file_name: &str, _folder_id: &str) -> Result<String> {
            let mut calls = self.calls.borrow_mut();
            if calls.len() == self.fail_on {
                return Err(IntakeError::upstream(Service::DocumentStorage, "Drive quota exceeded"));
            }
            calls.push(file_name.to_string());
            Ok(format!("file-{}", calls.len()))
        }
    }

    const DHL_NUMBERS: [&str; 6] = [
        "5911111111", "5922222222", "5933333333", "5944444444", "5955555555", "5966666666",
    ];

    #[test]
    fn test_happy_path_clears_and_audits() {
        let conn = seeded_db(Courier::Dhl, &DHL_NUMBERS);
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        let ctx = Collaborators {
            records: &conn,
            sequence: &conn,
            storage: &storage,
            folder_id: "outbound",
            actor: "tester",
        };

        let mut stages = Vec::new();
        let receipt = ManifestPipeline::new(Courier::Dhl, printed_at())
            .run(&ctx, |stage| stages.push(stage))
            .unwrap();

        assert_eq!(
            stages,
            vec![
                Stage::Building,
                Stage::Uploading(DocumentKind::Pdf),
                Stage::Uploading(DocumentKind::Csv),
                Stage::Finalizing,
            ]
        );
        assert_eq!(receipt.bin_number.to_string(), "DH20261019A");
        assert_eq!(receipt.parcel_count, 6);
        assert_eq!(receipt.cleared, 6);
        assert!(receipt.file_id(DocumentKind::Pdf).is_some());
        assert!(storage.path_for("DH20261019A.pdf", "outbound").exists());
        assert!(storage.path_for("DH20261019A.csv", "outbound").exists());
        assert!(conn.list_for(Courier::Dhl).unwrap().is_empty());

        let events = get_events_for_entity(&conn, "pending_set", "DHL").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["binNumber"], "DH20261019A");
        assert_eq!(events[0].data["parcelCount"], 6);
    }

    #[test]
    fn test_second_batch_same_day_gets_next_letter() {
        let conn = seeded_db(Courier::Dhl, &DHL_NUMBERS[..2]);
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        let ctx = Collaborators {
            records: &conn,
            sequence: &conn,
            storage: &storage,
            folder_id: "outbound",
            actor: "tester",
        };

        let first = ManifestPipeline::new(Courier::Dhl, printed_at()).run(&ctx, |_| {}).unwrap();
        conn.insert(&TrackingEntry {
            tracking_number: "5977777777".to_string(),
            courier: Courier::Dhl,
            timestamp: 99,
        })
        .unwrap();
        let second = ManifestPipeline::new(Courier::Dhl, printed_at()).run(&ctx, |_| {}).unwrap();

        assert_eq!(first.bin_number.letter, 'A');
        assert_eq!(second.bin_number.letter, 'B');
        assert_eq!(second.parcel_count, 1);
    }

    #[test]
    fn test_csv_upload_failure_leaves_partial_state() {
        let conn = seeded_db(Courier::Dhl, &DHL_NUMBERS);
        let storage = FlakyStorage {
            fail_on: 1,
            calls: RefCell::new(Vec::new()),
        };
        let ctx = Collaborators {
            records: &conn,
            sequence: &conn,
            storage: &storage,
            folder_id: "outbound",
            actor: "tester",
        };

        let failure = ManifestPipeline::new(Courier::Dhl, printed_at())
            .run(&ctx, |_| {})
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Uploading(DocumentKind::Csv));
        assert_eq!(failure.to_string(), "Drive quota exceeded");
        assert_eq!(failure.uploaded.len(), 1);
        assert_eq!(failure.uploaded[0].file_name, "DH20261019A.pdf");
        assert_eq!(*storage.calls.borrow(), vec!["DH20261019A.pdf".to_string()]);

        // Pending set untouched, nothing audited
        assert_eq!(conn.list_for(Courier::Dhl).unwrap().len(), 6);
        assert!(get_events_for_entity(&conn, "pending_set", "DHL").unwrap().is_empty());
    }

    #[test]
    fn test_pdf_upload_failure_uploads_nothing() {
        let conn = seeded_db(Courier::JAndT, &["6123456789012"]);
        let storage = FlakyStorage {
            fail_on: 0,
            calls: RefCell::new(Vec::new()),
        };
        let ctx = Collaborators {
            records: &conn,
            sequence: &conn,
            storage: &storage,
            folder_id: "outbound",
            actor: "tester",
        };

        let failure = ManifestPipeline::new(Courier::JAndT, printed_at())
            .run(&ctx, |_| {})
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Uploading(DocumentKind::Pdf));
        assert!(failure.uploaded.is_empty());
        assert_eq!(failure.bin_number.unwrap().to_string(), "JT20261019A");
        assert_eq!(conn.list_for(Courier::JAndT).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_pending_set_fails_while_building() {
        let conn = seeded_db(Courier::Dhl, &[]);
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        let ctx = Collaborators {
            records: &conn,
            sequence: &conn,
            storage: &storage,
            folder_id: "outbound",
            actor: "tester",
        };

        let failure = ManifestPipeline::new(Courier::Dhl, printed_at())
            .run(&ctx, |_| {})
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Building);
        assert!(matches!(failure.error, IntakeError::InvalidInput(_)));
        // No letter was consumed
        assert!(crate::sequence::load_state(&conn, "DH").unwrap().is_none());
    }

    #[test]
    fn test_step_by_step_states() {
        let conn = seeded_db(Courier::CityLink, &["99123456"]);
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        let ctx = Collaborators {
            records: &conn,
            sequence: &conn,
            storage: &storage,
            folder_id: "outbound",
            actor: "tester",
        };

        let mut pipeline = ManifestPipeline::new(Courier::CityLink, printed_at());
        assert!(matches!(pipeline.state(), PipelineState::Building));

        pipeline.step(&ctx);
        assert!(matches!(pipeline.state(), PipelineState::Uploading { kind: DocumentKind::Pdf, .. }));

        pipeline.step(&ctx);
        assert!(matches!(pipeline.state(), PipelineState::Uploading { kind: DocumentKind::Csv, .. }));

        pipeline.step(&ctx);
        assert!(matches!(pipeline.state(), PipelineState::Finalizing { .. }));
        // Still pending until Finalizing runs
        assert_eq!(conn.list_for(Courier::CityLink).unwrap().len(), 1);

        pipeline.step(&ctx);
        assert!(matches!(pipeline.state(), PipelineState::Complete(_)));
        assert!(pipeline.state().is_terminal());

        // Terminal states are sticky
        pipeline.step(&ctx);
        assert!(matches!(pipeline.state(), PipelineState::Complete(_)));
    }

    #[test]
    fn test_entry_logged_during_run_stays_pending() {
        let conn = seeded_db(Courier::Dhl, &DHL_NUMBERS[..2]);
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDriveStorage::new(dir.path());
        let ctx = Collaborators {
            records: &conn,
            sequence: &conn,
            storage: &storage,
            folder_id: "outbound",
            actor: "tester",
        };

        let mut pipeline = ManifestPipeline::new(Courier::Dhl, printed_at());
        pipeline.step(&ctx);
        assert!(matches!(pipeline.state(), PipelineState::Uploading { kind: DocumentKind::Pdf, .. }));

        // Another station scans a parcel while the PDF is uploading
        conn.insert(&TrackingEntry {
            tracking_number: "5977777777".to_string(),
            courier: Courier::Dhl,
            timestamp: 99,
        })
        .unwrap();

        while !pipeline.state().is_terminal() {
            pipeline.step(&ctx);
        }

        let PipelineState::Complete(receipt) = pipeline.state() else {
            panic!("pipeline did not complete: {:?}", pipeline.state());
        };
        assert_eq!(receipt.parcel_count, 2);
        assert_eq!(receipt.cleared, 2);
        let csv = String::from_utf8(receipt.documents.csv.clone()).unwrap();
        assert!(!csv.contains("5977777777"));

        let left = conn.list_for(Courier::Dhl).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].tracking_number, "5977777777");
    }
}
