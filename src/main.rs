use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_merge::{
    audit_entries_for_target, get_merge_ledger, issue_token, resolve_caller, setup_database,
    AccountKind, AccountMergeEngine, CallerContext, EngineConfig, FindDuplicatesRequest,
    MergeRequest, Role,
};

#[derive(Parser, Debug)]
#[command(name = "account-merge")]
#[command(about = "Find duplicate accounts and merge them into a primary")]
#[command(version)]
struct Args {
    /// Path to TOML config
    #[arg(short, long, env = "ACCOUNT_MERGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables in the configured database
    Init,

    /// Issue a bearer token for an operator
    IssueToken {
        #[arg(long)]
        actor: String,

        /// member, moderator, admin or super_admin
        #[arg(long)]
        role: String,

        /// Comma-separated country codes (empty = unrestricted)
        #[arg(long, default_value = "")]
        countries: String,
    },

    /// Search for duplicate accounts
    FindDuplicates {
        #[arg(long, env = "ACCOUNT_MERGE_TOKEN")]
        token: String,

        /// client or business
        #[arg(long = "type")]
        kind: String,

        #[arg(long)]
        first_name: Option<String>,

        /// YYYY-MM-DD
        #[arg(long)]
        birthday: Option<String>,

        #[arg(long)]
        business_name: Option<String>,

        #[arg(long)]
        business_phone: Option<String>,
    },

    /// Merge a secondary account into a primary
    Merge {
        #[arg(long, env = "ACCOUNT_MERGE_TOKEN")]
        token: String,

        #[arg(long)]
        primary: String,

        #[arg(long)]
        secondary: String,
    },

    /// Show the audit trail for an account
    Audit { account_id: String },

    /// Write a merge ledger to CSV
    ExportLedger {
        merge_id: String,

        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_merge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    setup_database(&conn).context("Failed to initialize database")?;

    let engine = AccountMergeEngine::new(&config);

    match args.command {
        Command::Init => {
            info!("Database initialized at {:?}", config.database_path);
        }
        Command::IssueToken { actor, role, countries } => {
            let role = Role::parse(&role).with_context(|| format!("Unknown role: {}", role))?;
            let scope: Vec<&str> = countries.split(',').map(str::trim).filter(|c| !c.is_empty()).collect();
            let caller = CallerContext::new(&actor, role).with_countries(&scope);
            let token = issue_token(&conn, &caller)?;
            println!("{}", token);
        }
        Command::FindDuplicates { token, kind, first_name, birthday, business_name, business_phone } => {
            let caller = resolve_caller(&conn, Some(&token))?;
            let Some(kind) = AccountKind::parse(&kind) else {
                bail!("--type must be client or business");
            };
            let request = FindDuplicatesRequest {
                kind: Some(kind),
                first_name,
                birthday,
                business_name,
                business_phone,
            };
            let response = engine.find_duplicates(&conn, &caller, &request)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Merge { token, primary, secondary } => {
            let caller = resolve_caller(&conn, Some(&token))?;
            let result = engine.merge_accounts(&conn, &caller, &MergeRequest::new(&primary, &secondary))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                eprintln!("Merge completed with failures: {}", result.failed_relations().join(", "));
                std::process::exit(2);
            }
        }
        Command::Audit { account_id } => {
            let entries = audit_entries_for_target(&conn, &account_id)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::ExportLedger { merge_id, out } => {
            let ledger = get_merge_ledger(&conn, &merge_id)?
                .with_context(|| format!("No ledger for merge {}", merge_id))?;

            let mut writer = csv::Writer::from_path(&out)
                .with_context(|| format!("Failed to create {:?}", out))?;
            writer.write_record(["merge_id", "relation", "count", "success", "error"])?;
            for entry in &ledger.entries {
                let count = entry.count.to_string();
                let success = entry.success.to_string();
                writer.write_record([
                    ledger.merge_id.as_str(),
                    entry.relation.as_str(),
                    count.as_str(),
                    success.as_str(),
                    entry.error.as_deref().unwrap_or(""),
                ])?;
            }
            writer.flush()?;
            info!("Wrote {} ledger entries to {:?}", ledger.entries.len(), out);
        }
    }

    Ok(())
}
