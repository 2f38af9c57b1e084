// 📦 Intake service - the operator-facing operations
//
// Borrowed collaborators only; the binaries decide what backs them.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::db::{Event, PendingSet, RecordStore, TrackingEntry};
use crate::entities::{Courier, ManualChoice};
use crate::error::{IntakeError, Result};
use crate::pipeline::{Collaborators, ManifestFailure, ManifestPipeline, ManifestReceipt, Stage};
use crate::rules::{Classification, RuleEngine};
use crate::sequence::SequenceStore;
use crate::storage::DocumentStorage;

pub struct Intake<'a> {
    records: &'a dyn RecordStore,
    sequence: &'a dyn SequenceStore,
    storage: &'a dyn DocumentStorage,
    rules: &'a RuleEngine,
    folder_id: &'a str,
    actor: &'a str,
}

impl<'a> Intake<'a> {
    pub fn new(
        records: &'a dyn RecordStore,
        sequence: &'a dyn SequenceStore,
        storage: &'a dyn DocumentStorage,
        rules: &'a RuleEngine,
        folder_id: &'a str,
        actor: &'a str,
    ) -> Self {
        Intake {
            records,
            sequence,
            storage,
            rules,
            folder_id,
            actor,
        }
    }

    pub fn classify(&self, tracking_number: &str) -> Result<Classification> {
        self.rules.classify(tracking_number)
    }

    /// Persist a resolved entry. Re-logging a tracking number replaces it.
    pub fn log_entry(&self, tracking_number: &str, courier_name: &str, now: DateTime<Utc>) -> Result<TrackingEntry> {
        if tracking_number.trim().is_empty() {
            return Err(IntakeError::invalid("Missing trackingNumber"));
        }
        let courier: Courier = courier_name.parse()?;

        self.store(tracking_number, courier, now)
    }

    /// Apply a manual selection; `Skip` logs nothing
    pub fn resolve_manual(
        &self,
        tracking_number: &str,
        choice: ManualChoice,
        now: DateTime<Utc>,
    ) -> Result<Option<TrackingEntry>> {
        match choice {
            ManualChoice::Courier(courier) => self.store(tracking_number, courier, now).map(Some),
            ManualChoice::Skip => {
                info!(tracking_number = %tracking_number.trim(), "manual selection skipped");
                Ok(None)
            }
        }
    }

    fn store(&self, tracking_number: &str, courier: Courier, now: DateTime<Utc>) -> Result<TrackingEntry> {
        let entry = TrackingEntry::new(tracking_number, courier, now)?;
        self.records.insert(&entry)?;

        self.audit(Event::new(
            "entry_logged",
            "tracking_entry",
            &entry.tracking_number,
            serde_json::json!({ "courier": courier.name(), "timestamp": entry.timestamp }),
            self.actor,
        ));

        info!(tracking_number = %entry.tracking_number, courier = %courier, "entry logged");
        Ok(entry)
    }

    pub fn list_pending(&self) -> Result<Vec<PendingSet>> {
        self.records.list_all()
    }

    pub fn remove_entry(&self, courier: Courier, tracking_number: &str) -> Result<bool> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(IntakeError::invalid("Missing trackingNumber"));
        }

        let removed = self.records.delete_one(courier, tracking_number)?;
        if removed {
            self.audit(Event::new(
                "entry_removed",
                "tracking_entry",
                tracking_number,
                serde_json::json!({ "courier": courier.name() }),
                self.actor,
            ));
            info!(tracking_number = %tracking_number, courier = %courier, "entry removed");
        }

        Ok(removed)
    }

    /// Run the manifest pipeline for one courier, reporting each stage
    pub fn generate_manifest(
        &self,
        courier: Courier,
        printed_at: NaiveDateTime,
        on_stage: impl FnMut(Stage),
    ) -> std::result::Result<ManifestReceipt, ManifestFailure> {
        let ctx = Collaborators {
            records: self.records,
            sequence: self.sequence,
            storage: self.storage,
            folder_id: self.folder_id,
            actor: self.actor,
        };

        ManifestPipeline::new(courier, printed_at).run(&ctx, on_stage)
    }

    pub fn clear_pending(&self, courier: Courier) -> Result<usize> {
        let removed = self.records.delete_all(courier)?;

        self.audit(Event::new(
            "pending_cleared",
            "pending_set",
            courier.name(),
            serde_json::json!({ "removed": removed }),
            self.actor,
        ));

        info!(courier = %courier, removed, "pending set cleared");
        Ok(removed)
    }

    /// The change is already committed; reporting failure would invite a retry
    fn audit(&self, event: Event) {
        if let Err(err) = self.records.record_event(&event) {
            warn!(
                event_type = %event.event_type,
                entity_id = %event.entity_id,
                error = %err,
                "could not record audit event"
            );
        }
    }
}

/// Operator wall clock: UTC for entry timestamps, local time for manifests
pub fn now() -> (DateTime<Utc>, NaiveDateTime) {
    let utc = Utc::now();
    (utc, utc.with_timezone(&Local).naive_local())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_events_for_entity, setup_database};
    use crate::storage::LocalDriveStorage;
    use chrono::{NaiveDate, TimeZone};
    use rusqlite::Connection;

    struct Fixture {
        conn: Connection,
        storage: LocalDriveStorage,
        rules: RuleEngine,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let conn = Connection::open_in_memory().unwrap();
            setup_database(&conn).unwrap();
            let dir = tempfile::tempdir().unwrap();
            Fixture {
                conn,
                storage: LocalDriveStorage::new(dir.path()),
                rules: RuleEngine::standard().unwrap(),
                _dir: dir,
            }
        }

        fn intake(&self) -> Intake<'_> {
            Intake::new(&self.conn, &self.conn, &self.storage, &self.rules, "outbound", "packer@example.com")
        }
    }

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, second).unwrap()
    }

    fn printed_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(16, 45, 0)
            .unwrap()
    }

    #[test]
    fn test_log_entry_validates_fields() {
        let fx = Fixture::new();
        let intake = fx.intake();

        assert!(matches!(intake.log_entry("", "DHL", at(0)), Err(IntakeError::InvalidInput(_))));
        assert!(matches!(intake.log_entry("5911", "", at(0)), Err(IntakeError::InvalidInput(_))));
        assert!(matches!(intake.log_entry("5911", "Carrier Pigeon", at(0)), Err(IntakeError::InvalidInput(_))));
        assert!(intake.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_log_entry_records_event() {
        let fx = Fixture::new();
        let entry = fx.intake().log_entry(" 6123456789012 ", "j&t", at(1)).unwrap();

        assert_eq!(entry.tracking_number, "6123456789012");
        assert_eq!(entry.courier, Courier::JAndT);

        let events = get_events_for_entity(&fx.conn, "tracking_entry", "6123456789012").unwrap();
        assert_eq!(events[0].event_type, "entry_logged");
        assert_eq!(events[0].actor, "packer@example.com");
    }

    #[test]
    fn test_ambiguous_then_manual_choice() {
        let fx = Fixture::new();
        let intake = fx.intake();

        let classification = intake.classify("MY123456789012").unwrap();
        assert!(matches!(classification, Classification::Ambiguous(_)));

        let entry = intake
            .resolve_manual("MY123456789012", ManualChoice::Courier(Courier::PosMalaysia), at(2))
            .unwrap()
            .unwrap();
        assert_eq!(entry.courier, Courier::PosMalaysia);
    }

    #[test]
    fn test_skip_logs_nothing() {
        let fx = Fixture::new();
        let intake = fx.intake();

        assert_eq!(intake.resolve_manual("ZZZ999", ManualChoice::Skip, at(3)).unwrap(), None);
        assert!(intake.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_remove_entry() {
        let fx = Fixture::new();
        let intake = fx.intake();
        intake.log_entry("99123456", "CityLink", at(4)).unwrap();

        assert!(intake.remove_entry(Courier::CityLink, "99123456").unwrap());
        assert!(!intake.remove_entry(Courier::CityLink, "99123456").unwrap());
        assert!(intake.list_pending().unwrap().is_empty());

        let events = get_events_for_entity(&fx.conn, "tracking_entry", "99123456").unwrap();
        assert_eq!(events[0].event_type, "entry_removed");
    }

    #[test]
    fn test_dhl_manifest_end_to_end() {
        let fx = Fixture::new();
        let intake = fx.intake();

        for (i, tn) in ["5911111111", "5922222222", "5933333333", "5944444444", "5955555555", "5966666666"]
            .iter()
            .enumerate()
        {
            let classification = intake.classify(tn).unwrap();
            assert_eq!(classification.courier(), Some(Courier::Dhl));
            intake.log_entry(tn, "DHL", at(i as u32)).unwrap();
        }

        let receipt = intake.generate_manifest(Courier::Dhl, printed_at(), |_| {}).unwrap();
        assert_eq!(receipt.bin_number.to_string(), "DH20261019A");
        assert_eq!(receipt.parcel_count, 6);

        let csv = String::from_utf8(receipt.documents.csv.clone()).unwrap();
        assert!(csv.contains("5911111111,5922222222,5933333333,5944444444,5955555555\r\n5966666666\r\n"));
        assert!(intake.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_clear_pending_only_touches_one_courier() {
        let fx = Fixture::new();
        let intake = fx.intake();
        intake.log_entry("5911111111", "DHL", at(0)).unwrap();
        intake.log_entry("5922222222", "DHL", at(1)).unwrap();
        intake.log_entry("LBX0001", "GDex", at(2)).unwrap();

        assert_eq!(intake.clear_pending(Courier::Dhl).unwrap(), 2);

        let pending = intake.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].courier, Courier::GDex);
    }

    /// Pending entries work; the audit table does not
    struct NoAuditStore<'a>(&'a Connection);

    impl RecordStore for NoAuditStore<'_> {
        fn insert(&self, entry: &TrackingEntry) -> Result<()> {
            self.0.insert(entry)
        }

        fn list_all(&self) -> Result<Vec<PendingSet>> {
            self.0.list_all()
        }

        fn list_for(&self, courier: Courier) -> Result<Vec<TrackingEntry>> {
            self.0.list_for(courier)
        }

        fn delete_one(&self, courier: Courier, tracking_number: &str) -> Result<bool> {
            self.0.delete_one(courier, tracking_number)
        }

        fn delete_all(&self, courier: Courier) -> Result<usize> {
            self.0.delete_all(courier)
        }

        fn delete_many(&self, courier: Courier, tracking_numbers: &[String]) -> Result<usize> {
            self.0.delete_many(courier, tracking_numbers)
        }

        fn record_event(&self, _event: &Event) -> Result<()> {
            Err(IntakeError::invalid("events table is read-only"))
        }
    }

    #[test]
    fn test_committed_changes_succeed_without_audit() {
        let fx = Fixture::new();
        let records = NoAuditStore(&fx.conn);
        let intake = Intake::new(&records, &fx.conn, &fx.storage, &fx.rules, "outbound", "packer@example.com");

        let entry = intake.log_entry("5911111111", "DHL", at(0)).unwrap();
        assert_eq!(entry.courier, Courier::Dhl);
        intake.log_entry("5922222222", "DHL", at(1)).unwrap();
        assert_eq!(intake.list_pending().unwrap()[0].count(), 2);

        assert!(intake.remove_entry(Courier::Dhl, "5911111111").unwrap());
        assert_eq!(intake.clear_pending(Courier::Dhl).unwrap(), 1);
        assert!(intake.list_pending().unwrap().is_empty());

        assert!(get_events_for_entity(&fx.conn, "tracking_entry", "5911111111").unwrap().is_empty());
    }
}
