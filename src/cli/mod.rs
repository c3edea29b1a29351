use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::error;

use crate::config::Config;
use crate::content::NotesApiProvider;
use crate::db;
use crate::generator::MessagesApiGenerator;
use crate::lock::{LockError, RunLock};
use crate::mailstore::HttpMailStore;
use crate::pipeline::{self, Collaborators, RunPaths};
use crate::status::{
    check_health, read_snapshot, write_snapshot, RunEvent, RunEventRepository, RunOutcome,
    RunStatus,
};

#[derive(Parser, Debug)]
#[command(name = "followup")]
#[command(about = "Automatic meeting follow-up email drafter", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Execute one pipeline run (the default when invoked by a trigger)
    Run,
    /// Print the status snapshot from the last run
    Status,
    /// List recent run outcomes from the event log
    History(HistoryCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct HistoryCliArgs {
    /// Maximum number of run events to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

/// One trigger-driven pipeline run. Exits zero on every terminal outcome
/// including skips, deferrals, and lock contention; a returned error (and
/// non-zero exit) means an unexpected internal failure.
pub async fn handle_run_command() -> Result<()> {
    let config = Config::load()?;
    let paths = RunPaths::from_global()?;

    let collaborators = match build_collaborators(&config) {
        Ok(collaborators) => collaborators,
        Err(detail) => {
            error!("Collaborator setup failed: {}", detail);
            record_setup_failure(&config, &paths, &detail)?;
            return Ok(());
        }
    };

    pipeline::run(&config, &collaborators, &paths).await?;
    Ok(())
}

fn build_collaborators(config: &Config) -> std::result::Result<Collaborators, String> {
    let auth_file = config
        .source
        .auth_file
        .as_deref()
        .ok_or("auth_file not configured")?;
    let content = NotesApiProvider::new(
        &config.source.notes_endpoint,
        std::path::Path::new(auth_file),
        config.source.min_notes_chars,
    )
    .map_err(|e| e.to_string())?;

    let token_file = config
        .mail
        .token_file
        .as_deref()
        .ok_or("mail token_file not configured")?;
    let mail = HttpMailStore::new(&config.mail.endpoint, std::path::Path::new(token_file))
        .map_err(|e| e.to_string())?;

    let generator = MessagesApiGenerator::new(&config.generation).map_err(|e| e.to_string())?;

    Ok(Collaborators {
        content: Box::new(content),
        mail: Box::new(mail),
        generator: Box::new(generator),
    })
}

/// Collaborator credentials were unusable before the pipeline could even
/// start. Still a visible outcome: record it like any other failed run.
fn record_setup_failure(config: &Config, paths: &RunPaths, detail: &str) -> Result<()> {
    let _lock = match RunLock::acquire(&paths.lock_file) {
        Ok(lock) => lock,
        Err(LockError::AlreadyRunning) => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let conn = db::open_at(&paths.db_file)?;
    RunEventRepository::append(
        &conn,
        &RunEvent {
            run_id: uuid::Uuid::new_v4().to_string(),
            outcome: RunOutcome::Failed,
            meeting_id: None,
            detail: Some(format!("collaborator setup: {}", detail)),
        },
    )?;

    write_snapshot(
        &paths.status_file,
        &RunStatus {
            last_run: chrono::Utc::now(),
            outcome: RunOutcome::Failed,
            processed: 0,
            deferred: 0,
            skipped: 0,
            health: check_health(config),
        },
    )?;
    Ok(())
}

pub fn handle_status_command() -> Result<()> {
    let path = crate::global::status_file()?;
    let Some(status) = read_snapshot(&path)? else {
        println!("No runs recorded yet.");
        return Ok(());
    };

    println!("Last run: {}", status.last_run.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Outcome:  {}", status.outcome.as_str());
    println!(
        "Counts:   processed={} deferred={} skipped={}",
        status.processed, status.deferred, status.skipped
    );
    println!("Health:");
    for (name, check) in [
        ("source", &status.health.source),
        ("content API", &status.health.content_api),
        ("mail store", &status.health.mail_store),
        ("generator", &status.health.generator),
    ] {
        match (&check.ok, &check.detail) {
            (true, _) => println!("  {:<12} ok", name),
            (false, Some(detail)) => println!("  {:<12} FAILING ({})", name, detail),
            (false, None) => println!("  {:<12} FAILING", name),
        }
    }

    Ok(())
}

pub fn handle_history_command(args: HistoryCliArgs) -> Result<()> {
    let conn = db::init_db()?;
    let events = RunEventRepository::recent(&conn, args.limit)?;

    if events.is_empty() {
        println!("No run events recorded yet.");
        return Ok(());
    }

    println!("Last {} run(s):\n", events.len());
    for event in events {
        println!("Run:     {}", event.run_id);
        println!("Date:    {}", event.created_at);
        println!("Outcome: {}", event.outcome);
        if let Some(meeting_id) = &event.meeting_id {
            println!("Meeting: {}", meeting_id);
        }
        if let Some(detail) = &event.detail {
            println!("Detail:  {}", detail);
        }
        println!("---");
    }

    Ok(())
}
