use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use invoice_intake::config::{AppConfig, APP_VERSION};
use invoice_intake::db::Database;
use invoice_intake::models::{IngestionStatus, Owner, Role};
use invoice_intake::services::batch::run_job;
use invoice_intake::services::export::{export, ExportFormat};
use invoice_intake::services::intake::{create_job, IncomingFile};
use invoice_intake::services::overrides::effective_invoices;
use invoice_intake::services::reports::spawn_scheduler;
use invoice_intake::services::state::AppState;
use invoice_intake::services::watcher::spawn_inbox;

#[derive(Parser)]
#[command(name = "invoice-intake", version, about = "Invoice intake service")]
struct Cli {
    /// TOML configuration file; defaults apply when it is missing.
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the HTTP API, the report scheduler and the inbox watcher.
    Serve,
    /// Creates a user and prints a new API token.
    CreateUser {
        email: String,
        #[arg(long, default_value = "member")]
        role: String,
        /// Organization name, created if it does not exist.
        #[arg(long)]
        org: Option<String>,
        /// Monthly quota for a newly created organization.
        #[arg(long)]
        quota: Option<u64>,
    },
    /// Processes local files as one job and writes the exports.
    Process {
        #[arg(long)]
        user: String,
        #[arg(long, short, default_value = "export")]
        output: PathBuf,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    invoice_intake::init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    tracing::info!(version = APP_VERSION, config = %cli.config.display(), "Invoice intake starting");

    match cli.command {
        Command::Serve => serve(config).await,
        Command::CreateUser {
            email,
            role,
            org,
            quota,
        } => create_user(config, &email, &role, org.as_deref(), quota),
        Command::Process { user, output, files } => process(config, &user, &output, files).await,
    }
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Create {}", parent.display()))?;
    }
    Database::new(path).with_context(|| format!("Open database {}", path.display()))
}

async fn serve(config: AppConfig) -> Result<()> {
    std::fs::create_dir_all(&config.server.upload_dir)?;
    let db = open_database(&config)?;
    let state = Arc::new(AppState::new(config, db)?);

    let _scheduler = spawn_scheduler(Arc::clone(&state));
    let _inbox = spawn_inbox(Arc::clone(&state))?;
    invoice_intake::commands::serve(state).await
}

fn create_user(config: AppConfig, email: &str, role: &str, org: Option<&str>, quota: Option<u64>) -> Result<()> {
    let role = Role::parse(role).ok_or_else(|| anyhow!("Role must be viewer, member or admin, got {role}"))?;
    let db = open_database(&config)?;
    let org_id = match org {
        Some(name) => Some(match db.get_organization_by_name(name)? {
            Some(existing) => existing.id,
            None => db.create_organization(name, quota)?.id,
        }),
        None => None,
    };
    let user = db.create_user(email, org_id.as_deref(), role)?;
    let token = db.issue_token(&user.id, Some("cli"))?;
    tracing::info!(user_id = %user.id, role = role.as_str(), "User created");
    println!("{token}");
    Ok(())
}

async fn process(config: AppConfig, email: &str, output: &Path, paths: Vec<PathBuf>) -> Result<()> {
    std::fs::create_dir_all(&config.server.upload_dir)?;
    let db = open_database(&config)?;
    let state = Arc::new(AppState::new(config, db)?);

    let user = state
        .db()?
        .get_user_by_email(email)?
        .ok_or_else(|| anyhow!("Unknown user {email}"))?;
    let owner = Owner {
        user_id: user.id,
        org_id: user.org_id,
    };

    let files = paths
        .iter()
        .map(|path| IncomingFile::read(path))
        .collect::<Result<Vec<_>, _>>()?;
    let job = create_job(&state, &owner, files)?;
    state.db()?.start_job(&job.id)?;
    let job = run_job(Arc::clone(&state), job.id).await?;

    let invoices = {
        let db = state.db()?;
        effective_invoices(&db, &owner.key(), db.get_invoices_by_job(&job.id)?)?
    };
    let exported: Vec<_> = invoices
        .into_iter()
        .filter(|i| i.ingestion_status != IngestionStatus::Failed)
        .collect();

    std::fs::create_dir_all(output)?;
    for format in [ExportFormat::Xlsx, ExportFormat::Csv, ExportFormat::Json, ExportFormat::Datev] {
        let file = export(format, &exported, &state.config.datev)?;
        let path = output.join(&file.file_name);
        std::fs::write(&path, &file.bytes).with_context(|| format!("Write {}", path.display()))?;
        tracing::info!(path = %path.display(), format = format.as_str(), "Export written");
    }

    println!(
        "Job {}: {} ({} of {} files succeeded, {} failed)",
        job.id,
        job.status.as_str(),
        job.succeeded_files,
        job.total_files,
        job.failed_files
    );
    for file in state.db()?.get_job_files(&job.id)? {
        if let (Some(kind), Some(message)) = (&file.error_kind, &file.error_message) {
            println!("  {}: {kind}: {message}", file.file_name);
            if let Some(hint) = &file.remediation {
                println!("    {hint}");
            }
        }
    }
    Ok(())
}
