// Parcel Intake - Core Library
// Exposes all modules for use in CLI, TUI, API server, and tests

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod intake;
pub mod manifest;
pub mod pipeline;
pub mod rules;
pub mod sequence;
pub mod storage;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use auth::{Authenticator, Identity, StaticTokenVerifier, TokenVerifier};
pub use config::IntakeConfig;
pub use db::{
    Event, PendingSet, RecordStore, TrackingEntry,
    open_database, setup_database, insert_event, get_events_for_entity,
};
pub use entities::{Courier, ManualChoice, AMBIGUOUS_PAIR, MANUAL_CHOICES};
pub use error::{IntakeError, Result, Service};
pub use intake::Intake;
pub use manifest::{build_manifest, chunk_rows, ManifestData, ManifestDocuments, ROW_WIDTH};
pub use pipeline::{DocumentKind, ManifestFailure, ManifestPipeline, ManifestReceipt, Stage};
pub use rules::{Classification, CourierRule, RuleEngine};
pub use sequence::{courier_code, generate_bin_number, BinNumber, SequenceStore};
pub use storage::{DocumentStorage, LocalDriveStorage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
