// ⚠️ Error taxonomy for the intake core
// Classification that needs a manual choice is NOT an error (see rules::Classification)

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// External collaborator that produced an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    RecordStore,
    DocumentStorage,
    IdentityVerification,
    SequenceStore,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::RecordStore => "record store",
            Service::DocumentStorage => "document storage",
            Service::IdentityVerification => "identity verification",
            Service::SequenceStore => "sequence store",
        }
    }
}

#[derive(Debug, Error)]
pub enum IntakeError {
    /// Missing/empty tracking number or courier, count mismatch, bad file name
    #[error("{0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Upstream message is passed through verbatim
    #[error("{message}")]
    Upstream { service: Service, message: String },

    #[error("Sequence letter exhausted for courier code {code} on {date}")]
    SequenceOverflow { code: String, date: NaiveDate },

    #[error("Render error: {0}")]
    Render(String),
}

impl IntakeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        IntakeError::InvalidInput(message.into())
    }

    pub fn upstream(service: Service, message: impl std::fmt::Display) -> Self {
        IntakeError::Upstream {
            service,
            message: message.to_string(),
        }
    }

    /// Which collaborator failed, if any
    pub fn service(&self) -> Option<Service> {
        match self {
            IntakeError::Upstream { service, .. } => Some(*service),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for IntakeError {
    fn from(err: rusqlite::Error) -> Self {
        IntakeError::upstream(Service::RecordStore, err)
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(err: serde_json::Error) -> Self {
        IntakeError::upstream(Service::RecordStore, err)
    }
}

pub type Result<T> = std::result::Result<T, IntakeError>;
