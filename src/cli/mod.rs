//! Command-line interface for voxroute.
//!
//! Routes model responses through the pipeline and inspects stored
//! transcripts.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config;
use crate::core::Orchestrator;
use crate::domain::{HandlerStatus, OverallStatus, PipelineResult};
use crate::store::Gateway;

/// voxroute - route classified voice-diary responses into durable records
#[derive(Parser, Debug)]
#[command(name = "voxroute")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Route a model response through the pipeline
    Route {
        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Classification tag, used when the response has no tagged blocks
        #[arg(short, long, default_value = "unclassified")]
        tag: String,

        /// Source recording path stored with the transcript
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Recording length in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create or migrate the database
    InitDb,

    /// List the latest transcripts
    Transcripts {
        /// Maximum number of transcripts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List the latest day summaries
    Summaries {
        /// Maximum number of summaries to show
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Show one transcript
    Show {
        /// Transcript id
        id: i64,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Route {
                input,
                tag,
                source,
                duration,
                json,
            } => route(input, &tag, source, duration, json).await,
            Commands::InitDb => init_db(),
            Commands::Transcripts { limit } => list_transcripts(limit).await,
            Commands::Summaries { limit } => list_summaries(limit).await,
            Commands::Show { id } => show_transcript(id).await,
            Commands::Config => show_config(),
        }
    }
}

fn read_input(input_file: Option<&Path>) -> Result<String> {
    let input = if let Some(path) = input_file {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No input provided. Use --input <file> or pipe to stdin");
    };

    if input.trim().is_empty() {
        anyhow::bail!("Input is empty");
    }
    Ok(input)
}

fn gateway() -> Result<Gateway> {
    let cfg = config::config()?;
    Gateway::connect(cfg.database.store_settings())
        .with_context(|| format!("Failed to open database {}", cfg.database.url))
}

async fn route(
    input_file: Option<PathBuf>,
    tag: &str,
    source: Option<PathBuf>,
    duration: Option<f64>,
    json: bool,
) -> Result<()> {
    let raw = read_input(input_file.as_deref())?;
    let source = source
        .or(input_file)
        .unwrap_or_else(|| PathBuf::from("stdin"));

    let orchestrator = Orchestrator::from_config(config::config()?)?;
    let result = orchestrator
        .run_with_duration(&raw, tag, &source, duration)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if result.overall_status == OverallStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(result: &PipelineResult) {
    println!("Run: {}", result.run_id);
    match result.transcript_id {
        Some(id) => println!("Transcript: {}", id),
        None => println!("Transcript: (not stored)"),
    }
    println!();

    if !result.segments.is_empty() {
        println!("{:<4} {:<14} {:<9} {}", "#", "TAG", "STATUS", "DETAIL");
        println!("{}", "-".repeat(72));
    }
    for outcome in &result.segments {
        let status = match outcome.handler_status {
            HandlerStatus::Success => "ok",
            HandlerStatus::Failed => "failed",
            HandlerStatus::Skipped => "skipped",
        };
        let detail = match (&outcome.destination, &outcome.error) {
            (Some(dest), _) => match &dest.link {
                Some(link) => format!("{} #{} {}", dest.table, dest.id, link),
                None => format!("{} #{}", dest.table, dest.id),
            },
            (None, Some(error)) => error.clone(),
            (None, None) => outcome.segment.preview(),
        };
        println!(
            "{:<4} {:<14} {:<9} {}",
            outcome.segment.order, outcome.segment.tag, status, detail
        );
    }

    println!();
    eprintln!("[Run {} finished: {:?}]", result.run_id, result.overall_status);
}

fn init_db() -> Result<()> {
    let gateway = gateway()?;
    println!("Database ready: {}", gateway.database());
    Ok(())
}

async fn list_transcripts(limit: usize) -> Result<()> {
    let transcripts = gateway()?
        .latest_transcripts(limit)
        .await
        .into_result()
        .context("Failed to list transcripts")?
        .unwrap_or_default();

    if transcripts.is_empty() {
        println!("No transcripts found");
        return Ok(());
    }

    println!("{:<6} {:<26} {:<14} {:<10} {}", "ID", "CREATED", "TAG", "PROCESSED", "FILE");
    println!("{}", "-".repeat(80));
    for t in transcripts {
        println!(
            "{:<6} {:<26} {:<14} {:<10} {}",
            t.id,
            t.created_at.format("%Y-%m-%d %H:%M:%S"),
            t.tag,
            if t.is_processed { "yes" } else { "no" },
            t.filename.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn list_summaries(limit: usize) -> Result<()> {
    let summaries = gateway()?
        .latest_day_summaries(limit)
        .await
        .into_result()
        .context("Failed to list day summaries")?
        .unwrap_or_default();

    if summaries.is_empty() {
        println!("No day summaries found");
        return Ok(());
    }

    let day = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map(|at| at.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "?".to_string())
    };
    for summary in summaries {
        println!(
            "#{} written {} covering {}..{}",
            summary.id,
            summary.summary_date.format("%Y-%m-%d %H:%M"),
            day(summary.date_range_start),
            day(summary.date_range_end)
        );
        println!("{}", summary.content.trim());
        println!();
    }
    Ok(())
}

async fn show_transcript(id: i64) -> Result<()> {
    let transcript = gateway()?
        .get_transcript(id)
        .await
        .into_result()
        .context("Failed to read transcript")?
        .with_context(|| format!("Transcript {} not found", id))?;

    println!("{}", serde_json::to_string_pretty(&transcript)?);
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Home:        {}", cfg.home.display());
    println!("Model:       {}", cfg.model);
    println!();
    println!("Database:");
    println!("  URL:             {}", cfg.database.url);
    println!(
        "  Pool:            {}..{} connections",
        cfg.database.min_connections, cfg.database.max_connections
    );
    println!("  Acquire timeout: {}s", cfg.database.acquire_timeout_seconds);
    println!("  Busy timeout:    {}ms", cfg.database.busy_timeout_ms);
    println!();
    match &cfg.structuring {
        Some(s) => {
            println!("Structuring: {} {}", s.program, s.args.join(" "));
            println!("  Timeout: {}s", s.timeout_seconds);
            for (tag, action) in &s.actions {
                println!("  {}: {}", tag, action);
            }
        }
        None => println!("Structuring: (disabled - extracting from segment text)"),
    }
    println!();
    if cfg.calendar.enabled {
        println!(
            "Calendar: {} via {} (token from ${})",
            cfg.calendar.calendar_id, cfg.calendar.base_url, cfg.calendar.token_env
        );
    } else {
        println!("Calendar: (local only)");
    }

    Ok(())
}
