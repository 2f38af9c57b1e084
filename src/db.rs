use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::entities::Courier;
use crate::error::{IntakeError, Result};

/// One scanned parcel awaiting a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEntry {
    pub tracking_number: String,

    pub courier: Courier,

    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl TrackingEntry {
    pub fn new(tracking_number: &str, courier: Courier, logged_at: DateTime<Utc>) -> Result<Self> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(IntakeError::invalid("Missing trackingNumber"));
        }

        Ok(TrackingEntry {
            tracking_number: tracking_number.to_string(),
            courier,
            timestamp: logged_at.timestamp_millis(),
        })
    }
}

/// All entries for one courier awaiting manifest generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSet {
    pub courier: Courier,
    pub entries: Vec<TrackingEntry>,
}

impl PendingSet {
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn tracking_numbers(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.tracking_number.clone()).collect()
    }

    /// Group a flat entry list by courier, keeping per-courier order
    pub fn group(entries: Vec<TrackingEntry>) -> Vec<PendingSet> {
        let mut grouped: BTreeMap<Courier, Vec<TrackingEntry>> = BTreeMap::new();
        for entry in entries {
            grouped.entry(entry.courier).or_default().push(entry);
        }

        grouped
            .into_iter()
            .map(|(courier, entries)| PendingSet { courier, entries })
            .collect()
    }
}

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// RECORD STORE CONTRACT
// ============================================================================

/// Persistent store of pending entries
pub trait RecordStore {
    /// Create or overwrite one entry (last write wins)
    fn insert(&self, entry: &TrackingEntry) -> Result<()>;

    /// All pending entries grouped by courier
    fn list_all(&self) -> Result<Vec<PendingSet>>;

    /// One courier's pending entries, oldest first
    fn list_for(&self, courier: Courier) -> Result<Vec<TrackingEntry>>;

    /// Remove a single entry. Returns whether it existed.
    fn delete_one(&self, courier: Courier, tracking_number: &str) -> Result<bool>;

    /// Clear a courier's pending set. Returns the number removed.
    fn delete_all(&self, courier: Courier) -> Result<usize>;

    /// Remove exactly these entries of one courier, all or nothing.
    /// Returns the number removed.
    fn delete_many(&self, courier: Courier, tracking_numbers: &[String]) -> Result<usize>;

    /// Append to the audit trail
    fn record_event(&self, event: &Event) -> Result<()>;
}

impl RecordStore for Connection {
    fn insert(&self, entry: &TrackingEntry) -> Result<()> {
        insert_entry(self, entry)
    }

    fn list_all(&self) -> Result<Vec<PendingSet>> {
        Ok(PendingSet::group(get_all_entries(self)?))
    }

    fn list_for(&self, courier: Courier) -> Result<Vec<TrackingEntry>> {
        get_entries_for_courier(self, courier)
    }

    fn delete_one(&self, courier: Courier, tracking_number: &str) -> Result<bool> {
        delete_entry(self, courier, tracking_number)
    }

    fn delete_all(&self, courier: Courier) -> Result<usize> {
        delete_entries_for_courier(self, courier)
    }

    fn delete_many(&self, courier: Courier, tracking_numbers: &[String]) -> Result<usize> {
        delete_entries(self, courier, tracking_numbers)
    }

    fn record_event(&self, event: &Event) -> Result<()> {
        insert_event(self, event)
    }
}

// ============================================================================
// SQLITE
// ============================================================================

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    info!(path = %path.display(), "database opened");
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Pending entries (tracking number is the identity across couriers)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pending_entries (
            tracking_number TEXT PRIMARY KEY NOT NULL,
            courier TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Daily bin sequence, one row per courier code
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sequence_state (
            code TEXT PRIMARY KEY NOT NULL,
            last_date TEXT NOT NULL,
            last_letter TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pending_courier ON pending_entries(courier)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

pub fn insert_entry(conn: &Connection, entry: &TrackingEntry) -> Result<()> {
    let previous: Option<String> = conn
        .query_row(
            "SELECT courier FROM pending_entries WHERE tracking_number = ?1",
            [&entry.tracking_number],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute(
        "INSERT INTO pending_entries (tracking_number, courier, timestamp)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(tracking_number) DO UPDATE SET
            courier = excluded.courier,
            timestamp = excluded.timestamp",
        params![entry.tracking_number, entry.courier.name(), entry.timestamp],
    )?;

    match previous {
        Some(ref old) if old != entry.courier.name() => info!(
            tracking_number = %entry.tracking_number,
            from = %old,
            to = %entry.courier,
            "entry moved to another courier"
        ),
        Some(_) => info!(tracking_number = %entry.tracking_number, "entry overwritten"),
        None => {}
    }

    Ok(())
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackingEntry> {
    let courier_name: String = row.get(1)?;
    let courier = Courier::find_by_name(&courier_name).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown courier '{}'", courier_name).into(),
        )
    })?;

    Ok(TrackingEntry {
        tracking_number: row.get(0)?,
        courier,
        timestamp: row.get(2)?,
    })
}

pub fn get_all_entries(conn: &Connection) -> Result<Vec<TrackingEntry>> {
    let mut stmt = conn.prepare(
        "SELECT tracking_number, courier, timestamp
         FROM pending_entries
         ORDER BY courier, timestamp, tracking_number",
    )?;

    let entries = stmt
        .query_map([], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

pub fn get_entries_for_courier(conn: &Connection, courier: Courier) -> Result<Vec<TrackingEntry>> {
    let mut stmt = conn.prepare(
        "SELECT tracking_number, courier, timestamp
         FROM pending_entries
         WHERE courier = ?1
         ORDER BY timestamp, tracking_number",
    )?;

    let entries = stmt
        .query_map([courier.name()], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

pub fn delete_entry(conn: &Connection, courier: Courier, tracking_number: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM pending_entries WHERE courier = ?1 AND tracking_number = ?2",
        params![courier.name(), tracking_number.trim()],
    )?;

    Ok(removed > 0)
}

pub fn delete_entries_for_courier(conn: &Connection, courier: Courier) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM pending_entries WHERE courier = ?1",
        [courier.name()],
    )?;

    Ok(removed)
}

pub fn delete_entries(conn: &Connection, courier: Courier, tracking_numbers: &[String]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut removed = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM pending_entries WHERE courier = ?1 AND tracking_number = ?2")?;
        for tracking_number in tracking_numbers {
            removed += stmt.execute(params![courier.name(), tracking_number])?;
        }
    }
    tx.commit()?;

    Ok(removed)
}

pub fn count_pending(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_entries", [], |row| row.get(0))?;

    Ok(count)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn entry(tn: &str, courier: Courier, millis: i64) -> TrackingEntry {
        TrackingEntry {
            tracking_number: tn.to_string(),
            courier,
            timestamp: millis,
        }
    }

    #[test]
    fn test_new_entry_trims_and_validates() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let e = TrackingEntry::new(" 5911111111 ", Courier::Dhl, at).unwrap();
        assert_eq!(e.tracking_number, "5911111111");
        assert_eq!(e.timestamp, at.timestamp_millis());

        assert!(matches!(
            TrackingEntry::new("  ", Courier::Dhl, at),
            Err(IntakeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_insert_and_list_grouped() {
        let conn = test_db();
        conn.insert(&entry("5911111111", Courier::Dhl, 2)).unwrap();
        conn.insert(&entry("5922222222", Courier::Dhl, 1)).unwrap();
        conn.insert(&entry("6123", Courier::JAndT, 3)).unwrap();

        let sets = conn.list_all().unwrap();
        assert_eq!(sets.len(), 2);

        let dhl = sets.iter().find(|s| s.courier == Courier::Dhl).unwrap();
        assert_eq!(dhl.tracking_numbers(), vec!["5922222222", "5911111111"]);
        assert_eq!(count_pending(&conn).unwrap(), 3);
    }

    #[test]
    fn test_duplicate_insert_last_write_wins() {
        let conn = test_db();
        conn.insert(&entry("5911111111", Courier::Dhl, 1)).unwrap();
        conn.insert(&entry("5911111111", Courier::Dhl, 9)).unwrap();

        let entries = conn.list_for(Courier::Dhl).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, 9);
    }

    #[test]
    fn test_relogging_under_other_courier_moves_entry() {
        let conn = test_db();
        conn.insert(&entry("MY123456789012", Courier::ShopeeExpress, 1)).unwrap();
        conn.insert(&entry("MY123456789012", Courier::PosMalaysia, 2)).unwrap();

        assert!(conn.list_for(Courier::ShopeeExpress).unwrap().is_empty());
        assert_eq!(conn.list_for(Courier::PosMalaysia).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_one_and_all() {
        let conn = test_db();
        conn.insert(&entry("5911111111", Courier::Dhl, 1)).unwrap();
        conn.insert(&entry("5922222222", Courier::Dhl, 2)).unwrap();
        conn.insert(&entry("99123", Courier::CityLink, 3)).unwrap();

        assert!(conn.delete_one(Courier::Dhl, "5911111111").unwrap());
        assert!(!conn.delete_one(Courier::Dhl, "5911111111").unwrap());
        // Wrong courier does not touch the entry
        assert!(!conn.delete_one(Courier::Dhl, "99123").unwrap());

        assert_eq!(conn.delete_all(Courier::Dhl).unwrap(), 1);
        assert_eq!(conn.delete_all(Courier::Dhl).unwrap(), 0);
        assert_eq!(conn.list_for(Courier::CityLink).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_many_only_touches_listed_entries() {
        let conn = test_db();
        conn.insert(&entry("5911111111", Courier::Dhl, 1)).unwrap();
        conn.insert(&entry("5922222222", Courier::Dhl, 2)).unwrap();
        conn.insert(&entry("5933333333", Courier::Dhl, 3)).unwrap();
        conn.insert(&entry("99123", Courier::CityLink, 4)).unwrap();

        let listed = vec!["5911111111".to_string(), "5922222222".to_string(), "99123".to_string()];
        assert_eq!(conn.delete_many(Courier::Dhl, &listed).unwrap(), 2);

        let left = conn.list_for(Courier::Dhl).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].tracking_number, "5933333333");
        // Listed under another courier, so kept
        assert_eq!(conn.list_for(Courier::CityLink).unwrap().len(), 1);
    }

    #[test]
    fn test_event_log() {
        let conn = test_db();

        let event = Event::new(
            "entry_logged",
            "tracking_entry",
            "5911111111",
            serde_json::json!({"courier": "DHL"}),
            "operator@example.com",
        );

        conn.record_event(&event).unwrap();

        let events = get_events_for_entity(&conn, "tracking_entry", "5911111111").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "entry_logged");
        assert_eq!(events[0].actor, "operator@example.com");
        assert_eq!(events[0].data["courier"], "DHL");
    }

    #[test]
    fn test_entry_json_is_camel_case() {
        let json = serde_json::to_value(entry("6123", Courier::JAndT, 42)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"trackingNumber": "6123", "courier": "J&T", "timestamp": 42})
        );
    }
}
