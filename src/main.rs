// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parcel_intake::config::{self, IntakeConfig};
use parcel_intake::intake::{self, Intake};
use parcel_intake::{
    open_database, Authenticator, Classification, Courier, Identity, LocalDriveStorage, RuleEngine, MANUAL_CHOICES,
};

#[derive(Parser)]
#[command(name = "parcel-intake", version, about = "Warehouse parcel intake: classify, log, and manifest")]
struct Cli {
    /// Bearer token for this operator
    #[arg(long, global = true, env = "INTAKE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show which courier a tracking number belongs to
    Classify { tracking_number: String },
    /// Log a tracking number under a courier
    Log {
        tracking_number: String,
        #[arg(long, short)]
        courier: String,
    },
    /// Classify and log in one step when the courier is certain
    Scan { tracking_number: String },
    /// List pending parcels per courier
    Pending,
    /// Remove one pending parcel
    Remove { courier: String, tracking_number: String },
    /// Generate, archive and clear a courier's manifest
    Manifest { courier: String },
    /// Drop a courier's pending parcels without a manifest
    Clear { courier: String },
    /// List the manual-selection menu
    Couriers,
    /// Interactive operator console (default)
    Ui,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Ui);

    let cfg = IntakeConfig::from_env().context("Failed to load configuration")?;
    if matches!(command, Command::Ui) {
        config::init_file_tracing(&cfg.log_file)?;
    } else {
        config::init_tracing();
    }
    cfg.log_loaded();

    let identity = authorize(&cfg.build_authenticator(), cli.token.as_deref())?;

    let conn = open_database(&cfg.db_path)
        .with_context(|| format!("Failed to open database {}", cfg.db_path.display()))?;
    let storage = LocalDriveStorage::new(&cfg.drive_dir);
    let rules = RuleEngine::standard().context("Failed to compile courier rules")?;
    let service = Intake::new(&conn, &conn, &storage, &rules, &cfg.folder_id, &identity.email);

    match command {
        Command::Classify { tracking_number } => {
            let classification = service.classify(&tracking_number)?;
            print_classification(&tracking_number, &classification);
        }
        Command::Log { tracking_number, courier } => {
            let (now, _) = intake::now();
            let entry = service.log_entry(&tracking_number, &courier, now)?;
            println!("✓ {} logged under {}", entry.tracking_number, entry.courier);
        }
        Command::Scan { tracking_number } => {
            let classification = service.classify(&tracking_number)?;
            match classification.courier() {
                Some(courier) => {
                    let (now, _) = intake::now();
                    let entry = service.log_entry(&tracking_number, courier.name(), now)?;
                    println!("✓ {} logged under {}", entry.tracking_number, entry.courier);
                }
                None => {
                    print_classification(&tracking_number, &classification);
                    println!("\nLog it with: parcel-intake log {} --courier <NAME>", tracking_number.trim());
                }
            }
        }
        Command::Pending => {
            let pending = service.list_pending()?;
            if pending.is_empty() {
                println!("No pending parcels");
            }
            for set in pending {
                println!("📦 {} ({}) - {} parcels", set.courier, set.courier.bin_code(), set.count());
                for entry in &set.entries {
                    println!("   {}", entry.tracking_number);
                }
            }
        }
        Command::Remove { courier, tracking_number } => {
            let courier: Courier = courier.parse()?;
            if service.remove_entry(courier, &tracking_number)? {
                println!("✓ Removed {} from {}", tracking_number.trim(), courier);
            } else {
                println!("{} is not pending under {}", tracking_number.trim(), courier);
            }
        }
        Command::Manifest { courier } => {
            let courier: Courier = courier.parse()?;
            let (_, printed_at) = intake::now();

            let receipt = service
                .generate_manifest(courier, printed_at, |stage| println!("⏳ {}", stage))
                .map_err(|failure| {
                    for doc in &failure.uploaded {
                        eprintln!("   already uploaded: {} ({})", doc.file_name, doc.file_id);
                    }
                    anyhow::anyhow!("{} failed: {}", failure.stage, failure)
                })?;

            println!("✅ Manifest {} complete", receipt.bin_number);
            println!("   Parcels: {}", receipt.parcel_count);
            for doc in &receipt.uploaded {
                println!("   {} → {}", doc.file_name, doc.file_id);
            }
        }
        Command::Clear { courier } => {
            let courier: Courier = courier.parse()?;
            let removed = service.clear_pending(courier)?;
            println!("✓ Cleared {} pending parcels for {}", removed, courier);
        }
        Command::Couriers => {
            for (i, choice) in MANUAL_CHOICES.iter().enumerate() {
                println!("{:>2}. {}", i + 1, choice.label());
            }
        }
        Command::Ui => run_ui_mode(service, &identity)?,
    }

    Ok(())
}

fn authorize(auth: &Authenticator, token: Option<&str>) -> Result<Identity> {
    let identity = match token {
        Some(token) => auth.authorize_token(token)?,
        None => auth.authorize_header(None)?,
    };
    tracing::info!(email = %identity.email, "operator authorized");
    Ok(identity)
}

fn print_classification(tracking_number: &str, classification: &Classification) {
    let tracking_number = tracking_number.trim();
    match classification {
        Classification::Matched(courier) => println!("{} → {}", tracking_number, courier),
        Classification::Ambiguous(pair) => {
            println!("{} is ambiguous. Choose one:", tracking_number);
            for courier in pair {
                println!("   - {}", courier);
            }
            println!("   - none of these (see `parcel-intake couriers`)");
        }
        Classification::Unknown => {
            println!("{} did not match any courier. Choose one:", tracking_number);
            for choice in MANUAL_CHOICES.iter() {
                println!("   - {}", choice.label());
            }
        }
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(service: Intake<'_>, identity: &Identity) -> Result<()> {
    let mut app = ui::App::new(service, &identity.email);
    ui::run_ui(&mut app)?;

    println!("\n✅ Console closed");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_service: Intake<'_>, _identity: &Identity) -> Result<()> {
    anyhow::bail!("TUI mode not available. Rebuild with: cargo build --features tui")
}
