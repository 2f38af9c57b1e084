// ⚙️ Configuration - environment (+ .env) and tracing setup

use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::auth::{Authenticator, StaticTokenVerifier};

pub const DEFAULT_DB_PATH: &str = "parcel_intake.db";
pub const DEFAULT_DRIVE_DIR: &str = "manifests";
pub const DEFAULT_FOLDER_ID: &str = "outbound";
pub const DEFAULT_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_LOG_FILE: &str = "parcel_intake.log";

pub fn default_log_filter() -> &'static str {
    "parcel_intake=info,intake_server=info,tower_http=info"
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub db_path: PathBuf,
    pub drive_dir: PathBuf,
    pub folder_id: String,
    pub bind: SocketAddr,
    pub tokens: Vec<IssuedToken>,
    pub allowed_emails: Vec<String>,
    pub bypass_auth: bool,
    pub log_file: PathBuf,
    /// `.env` file that was loaded, if any
    pub env_file: Option<PathBuf>,
}

impl IntakeConfig {
    /// Load `.env` (if any), then read the process environment.
    /// Runs before tracing is up, so nothing is logged here; see `log_loaded`.
    pub fn from_env() -> Result<Self> {
        let env_file = dotenvy::dotenv().ok();
        let mut cfg = Self::from_lookup(|key| std::env::var(key).ok())?;
        cfg.env_file = env_file;
        Ok(cfg)
    }

    /// Where the settings came from, for the start-up log line
    pub fn source(&self) -> String {
        match &self.env_file {
            Some(path) => format!("environment + {}", path.display()),
            None => "environment".to_string(),
        }
    }

    /// Call once tracing is initialised
    pub fn log_loaded(&self) {
        tracing::info!(
            source = %self.source(),
            db = %self.db_path.display(),
            drive = %self.drive_dir.display(),
            "configuration loaded"
        );
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let bind = get("INTAKE_BIND", DEFAULT_BIND);
        let bind: SocketAddr = bind
            .parse()
            .with_context(|| format!("INTAKE_BIND is not a socket address: {}", bind))?;

        let tokens = parse_tokens(&lookup("INTAKE_TOKENS").unwrap_or_default())?;
        let allowed_emails = lookup("INTAKE_ALLOWED_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        let bypass_auth = match lookup("BYPASS_AUTH").map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => bail!("BYPASS_AUTH must be true or false, got {}", other),
        };

        Ok(IntakeConfig {
            db_path: PathBuf::from(get("INTAKE_DB_PATH", DEFAULT_DB_PATH)),
            drive_dir: PathBuf::from(get("INTAKE_DRIVE_DIR", DEFAULT_DRIVE_DIR)),
            folder_id: get("INTAKE_FOLDER_ID", DEFAULT_FOLDER_ID),
            bind,
            tokens,
            allowed_emails,
            bypass_auth,
            log_file: PathBuf::from(get("INTAKE_LOG_FILE", DEFAULT_LOG_FILE)),
            env_file: None,
        })
    }

    pub fn build_authenticator(&self) -> Authenticator {
        let mut verifier = StaticTokenVerifier::new();
        for issued in &self.tokens {
            verifier.add_token(&issued.token, &issued.email);
        }

        if self.bypass_auth {
            tracing::warn!("BYPASS_AUTH is set; every request runs as the local test identity");
        } else if verifier.token_count() == 0 {
            tracing::warn!("no INTAKE_TOKENS configured; every request will be rejected");
        }

        Authenticator::new(Box::new(verifier), self.allowed_emails.clone(), self.bypass_auth)
    }
}

/// `token=email,token=email`
fn parse_tokens(raw: &str) -> Result<Vec<IssuedToken>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (token, email) = pair
                .split_once('=')
                .with_context(|| "INTAKE_TOKENS entries must look like token=email")?;
            let (token, email) = (token.trim(), email.trim());
            if token.is_empty() || email.is_empty() {
                bail!("INTAKE_TOKENS entry has an empty token or email");
            }
            Ok(IssuedToken {
                token: token.to_string(),
                email: email.to_string(),
            })
        })
        .collect()
}

// ============================================================================
// TRACING
// ============================================================================

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Log to stderr (CLI and server)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Log to a file so the terminal UI is not overdrawn
pub fn init_file_tracing(path: &std::path::Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}
