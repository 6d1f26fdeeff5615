use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod mapping;
mod models;
mod polling;
mod record;
mod report;
mod review;
mod sessions;
mod source;

use config::Config;
use models::{ChannelReviewRow, ReviewStatus};
use polling::Poll;
use review::ReviewOptions;
use sessions::{FeedbackPatch, SessionStore};
use source::ReviewInputs;

#[derive(Parser)]
#[command(name = "channel-review")]
#[command(about = "Per-channel review aggregation for team communication sessions", long_about = None)]
struct Cli {
    /// Config file (defaults to ./channel-review.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default channel-review.toml
    InitConfig,
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample users, criteria, messages and observations
    Seed,
    /// Import flattened message/criterion rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Aggregate observations into one review per channel
    Review {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, default_value = "review-report.md")]
        out: PathBuf,
    },
    /// Mock asynchronous review sessions
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Args)]
struct InputArgs {
    /// Restrict the review to one channel id
    #[arg(long)]
    channel: Option<String>,
    /// Read messages from a JSON/CSV file instead of the database
    #[arg(long, requires_all = ["observations", "criteria"])]
    messages: Option<PathBuf>,
    #[arg(long, requires = "messages")]
    observations: Option<PathBuf>,
    #[arg(long, requires = "messages")]
    criteria: Option<PathBuf>,
    #[arg(long, requires = "messages")]
    users: Option<PathBuf>,
    /// Sum raw counts instead of scoring any non-zero count as 100
    #[arg(long)]
    raw_counts: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Create a pending session for a channel
    Create {
        #[arg(long)]
        channel: String,
        /// Criterion ids to evaluate (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,
    },
    /// List sessions, newest first
    List,
    /// Show one session
    Show { id: u64 },
    /// Delete a session and its feedback
    Delete { id: u64 },
    /// Start the analysis for a session
    Start { id: u64 },
    /// Print status and progress
    Status { id: u64 },
    /// Print the feedback of a finished session
    Feedback { id: u64 },
    /// Adjust one criterion score by a delta
    Score {
        id: u64,
        #[arg(long)]
        criterion: String,
        #[arg(long, allow_negative_numbers = true)]
        delta: i64,
    },
    /// Replace feedback fields from a JSON patch file
    Edit {
        id: u64,
        #[arg(long)]
        patch: PathBuf,
    },
    /// Approve feedback, optionally applying a JSON patch first
    Approve {
        id: u64,
        #[arg(long)]
        patch: Option<PathBuf>,
    },
    /// Poll until the session is done
    Watch {
        id: u64,
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::InitConfig = cli.command {
        let path = Path::new(config::DEFAULT_CONFIG_FILE);
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        std::fs::write(path, Config::default_toml())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Created {}.", path.display());
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::InitConfig => {}
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} observations from {}.", csv.display());
        }
        Commands::Review { input, format } => {
            let rows = build_rows(&config, &input).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Text => print_rows(&rows),
            }
        }
        Commands::Report { input, out } => {
            let rows = build_rows(&config, &input).await?;
            let report = report::build_report(input.channel.as_deref(), Utc::now(), &rows);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Session(command) => run_session(&config, command).await?,
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn build_rows(config: &Config, input: &InputArgs) -> anyhow::Result<Vec<ChannelReviewRow>> {
    let inputs = match (&input.messages, &input.observations, &input.criteria) {
        (Some(messages), Some(observations), Some(criteria)) => {
            let mut inputs = ReviewInputs::from_files(
                messages,
                observations,
                criteria,
                input.users.as_deref(),
            )?;
            if let Some(channel) = input.channel.as_deref() {
                inputs.retain_channel(&config.fields.msg_channel, channel);
            }
            inputs
        }
        _ => {
            let pool = connect().await?;
            db::fetch_inputs(&pool, input.channel.as_deref()).await?
        }
    };

    let options = ReviewOptions {
        mapping: config.fields.clone(),
        normalize_counts: config.review.normalize_counts && !input.raw_counts,
    };
    let rows = review::build_channel_reviews(
        &inputs.messages,
        &inputs.observations,
        &inputs.criteria,
        &options,
        &inputs.users,
    );
    info!(channels = rows.len(), "built channel reviews");
    Ok(rows)
}

fn print_rows(rows: &[ChannelReviewRow]) {
    if rows.is_empty() {
        println!("No messages found.");
        return;
    }

    for row in rows {
        println!(
            "#{} ({} messages, {} to {}) score {}",
            row.channel_name,
            row.message_count,
            row.created_at.as_deref().unwrap_or("-"),
            row.updated_at.as_deref().unwrap_or("-"),
            report::score_label(row.aggregate_score)
        );
        for entry in &row.breakdown {
            println!(
                "  - {}: {} ({} evidence)",
                entry.criterion_name,
                entry.score,
                entry.evidence.len()
            );
        }
    }
}

fn read_patch(path: &Path) -> anyhow::Result<FeedbackPatch> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid feedback patch {}", path.display()))
}

fn open_store(config: &Config) -> anyhow::Result<SessionStore> {
    Ok(SessionStore::open(
        &config.store.path,
        config.store.completion_delay_secs,
        Utc::now(),
    )?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_session(config: &Config, command: SessionCommand) -> anyhow::Result<()> {
    let mut store = open_store(config)?;

    match command {
        SessionCommand::Create { channel, criteria } => {
            let criteria_ids = criteria
                .iter()
                .map(|raw| sessions::criterion_id_value(raw))
                .collect();
            let session = store.create(&channel, criteria_ids, Utc::now())?;
            println!("Created session {} for {}.", session.id, session.channel_name);
        }
        SessionCommand::List => {
            if store.list().is_empty() {
                println!("No sessions.");
            }
            for session in store.list() {
                println!(
                    "{:>4}  {:<8} {:<20} {}{}",
                    session.id,
                    session.status,
                    session.channel_name,
                    session.created_at.format("%Y-%m-%d %H:%M"),
                    if session.approved { "  approved" } else { "" }
                );
            }
        }
        SessionCommand::Show { id } => match store.get(id) {
            Some(session) => print_json(session)?,
            None => println!("Session {id} not found."),
        },
        SessionCommand::Delete { id } => {
            if store.delete(id)? {
                println!("Deleted session {id}.");
            } else {
                println!("Session {id} not found.");
            }
        }
        SessionCommand::Start { id } => match store.start(id, Utc::now())? {
            Some(session) => println!("Session {} is {}.", session.id, session.status),
            None => println!("Session {id} not found."),
        },
        SessionCommand::Status { id } => print_json(&store.status(id))?,
        SessionCommand::Feedback { id } => match store.feedback(id) {
            Some(feedback) => print_json(feedback)?,
            None => println!("No feedback for session {id} yet."),
        },
        SessionCommand::Score {
            id,
            criterion,
            delta,
        } => match store.update_score(id, &criterion, delta)? {
            Some(feedback) => print_json(&feedback)?,
            None => println!("No feedback for session {id} yet."),
        },
        SessionCommand::Edit { id, patch } => {
            let feedback = store.update_feedback(id, read_patch(&patch)?)?;
            print_json(&feedback)?;
        }
        SessionCommand::Approve { id, patch } => {
            let patch = match patch {
                Some(path) => read_patch(&path)?,
                None => FeedbackPatch::default(),
            };
            match store.approve(id, patch, Utc::now())? {
                Some(feedback) => print_json(&feedback)?,
                None => println!("Session {id} has no feedback to approve."),
            }
        }
        SessionCommand::Watch { id, interval_secs } => {
            drop(store);
            let period = Duration::from_secs(interval_secs.unwrap_or(config.polling.interval_secs));
            let finished = polling::poll_until(period, config.polling.max_attempts, |attempt| async move {
                let status = open_store(config)?.status(id);
                println!("[{attempt}] session {id}: {} ({}%)", status.status, status.progress);
                Ok::<_, anyhow::Error>(if status.status == ReviewStatus::Done {
                    Poll::Ready(status)
                } else {
                    Poll::Pending
                })
            })
            .await?;

            if finished.is_none() {
                anyhow::bail!("session {id} did not finish within {} polls", config.polling.max_attempts);
            }
        }
    }

    Ok(())
}
