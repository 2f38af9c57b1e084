// 🔢 Batch Sequencer - daily bin letters per courier code
//
// State per code: {last_date, last_letter}
//   new code or new day → 'A'
//   same day            → next letter
//   same day past 'Z'   → SequenceOverflow (state untouched)

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::entities::{Courier, FALLBACK_CODE};
use crate::error::{IntakeError, Result, Service};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Courier code for a courier name; `XX` when unrecognized or code-less
pub fn courier_code(courier_name: &str) -> &'static str {
    Courier::find_by_name(courier_name)
        .map(|courier| courier.bin_code())
        .unwrap_or(FALLBACK_CODE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceState {
    pub date: NaiveDate,
    pub letter: char,
}

/// Compute the next state for `code` given what was stored last
pub fn advance(code: &str, previous: Option<&SequenceState>, today: NaiveDate) -> Result<SequenceState> {
    match previous {
        Some(state) if state.date == today => {
            if state.letter >= 'Z' {
                return Err(IntakeError::SequenceOverflow {
                    code: code.to_string(),
                    date: today,
                });
            }
            let next = (state.letter as u8 + 1) as char;
            Ok(SequenceState { date: today, letter: next })
        }
        _ => Ok(SequenceState { date: today, letter: 'A' }),
    }
}

// ============================================================================
// SEQUENCE STORE
// ============================================================================

/// Keyed counter with an atomic get-and-increment per code
pub trait SequenceStore {
    fn next_letter(&self, code: &str, today: NaiveDate) -> Result<char>;
}

fn store_error(err: impl fmt::Display) -> IntakeError {
    IntakeError::upstream(Service::SequenceStore, err)
}

/// Read the stored state for a code without advancing it
pub fn load_state(conn: &Connection, code: &str) -> Result<Option<SequenceState>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT last_date, last_letter FROM sequence_state WHERE code = ?1",
            [code],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(store_error)?;

    row.map(|(date, letter)| {
        let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(store_error)?;
        let letter = letter
            .chars()
            .next()
            .ok_or_else(|| store_error(format!("empty sequence letter for {}", code)))?;
        Ok(SequenceState { date, letter })
    })
    .transpose()
}

impl SequenceStore for Connection {
    fn next_letter(&self, code: &str, today: NaiveDate) -> Result<char> {
        // IMMEDIATE takes the write lock up front so two clients sharing the
        // database file cannot hand out the same letter
        let tx = rusqlite::Transaction::new_unchecked(self, TransactionBehavior::Immediate)
            .map_err(store_error)?;

        let previous = load_state(&tx, code)?;
        let next = advance(code, previous.as_ref(), today)?;

        tx.execute(
            "INSERT INTO sequence_state (code, last_date, last_letter)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(code) DO UPDATE SET
                last_date = excluded.last_date,
                last_letter = excluded.last_letter",
            params![code, next.date.format(DATE_FORMAT).to_string(), next.letter.to_string()],
        )
        .map_err(store_error)?;

        tx.commit().map_err(store_error)?;

        Ok(next.letter)
    }
}

// ============================================================================
// BIN NUMBER
// ============================================================================

/// `<code><YYYYMMDD><letter>`, e.g. `DH20261019A`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinNumber {
    pub code: String,
    pub date: NaiveDate,
    pub letter: char,
}

impl fmt::Display for BinNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.code, self.date.format("%Y%m%d"), self.letter)
    }
}

impl Serialize for BinNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Allocate the next bin number for a courier on `today`
pub fn generate_bin_number(store: &dyn SequenceStore, courier_name: &str, today: NaiveDate) -> Result<BinNumber> {
    let code = courier_code(courier_name);
    let letter = store.next_letter(code, today)?;

    let bin = BinNumber {
        code: code.to_string(),
        date: today,
        letter,
    };
    info!(courier = courier_name, bin = %bin, "bin number allocated");

    Ok(bin)
}

// ============================================================================
// TESTS
// ============================================================================
