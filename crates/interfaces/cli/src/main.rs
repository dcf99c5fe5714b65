use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use haru_config::AppConfig;
use haru_entry::{DiaryEntry, Normalizer, SlotPolicy};
use haru_gateway::GeminiClient;
use haru_runtime::{Confirm, DeleteOutcome, DiaryController, SubmitOutcome};
use haru_store::{AuthState, EntryStore, LocalStore, RemoteStore, Session, migrate_if_empty};

#[derive(Debug, Parser)]
#[command(
    name = "haru",
    version,
    about = "A happy-moments diary with AI feedback"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List every recorded day, newest first.
    List,
    /// Show one day's moments and its AI feedback.
    Show {
        /// Day to show (YYYY-MM-DD). Defaults to today.
        date: Option<String>,
    },
    /// Record up to three happy moments for a day.
    Save {
        /// Day to save under (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<String>,
        /// The moments themselves (1 to 3).
        #[arg(value_name = "MOMENT", num_args = 1..=3, required = true)]
        moments: Vec<String>,
        /// Overwrite an existing entry without asking.
        #[arg(long)]
        yes: bool,
    },
    /// Delete one day's entry.
    Delete {
        /// Day to delete (YYYY-MM-DD).
        date: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Generate a fresh happiness analysis across the whole diary.
    Analyze,
    /// Show the last saved happiness analysis.
    Analysis,
    /// Copy local entries into the remote store (once, if it is empty).
    Migrate,
    /// Show backend, session, and diary size.
    Status,
}

/// Interactive confirmation on stdin, or auto-approval under `--yes`.
struct PromptConfirm {
    assume_yes: bool,
}

impl Confirm for PromptConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        print!("{prompt} [y/N] ");
        let _ = io::stdout().flush();
        let mut answer = String::new();
        if io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        is_affirmative(&answer)
    }
}

fn is_affirmative(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn remote_session() -> Result<Session> {
    let user_id = std::env::var("HARU_USER_ID")
        .context("remote backend needs HARU_USER_ID set to the signed-in user's id")?;
    let id_token = std::env::var("HARU_ID_TOKEN")
        .context("remote backend needs HARU_ID_TOKEN set to a valid id token")?;
    Ok(Session::new(user_id, "").with_token(id_token))
}

fn local_store(config: &AppConfig, normalizer: Normalizer) -> LocalStore {
    LocalStore::new(config.storage.local_dir.clone(), normalizer)
}

fn remote_store(config: &AppConfig, normalizer: Normalizer) -> Result<RemoteStore> {
    if config.storage.project_id.is_empty() {
        bail!("remote backend needs storage.project_id in the config file");
    }
    Ok(RemoteStore::new(
        config.storage.remote_base_url.clone(),
        config.storage.project_id.clone(),
        normalizer,
        Duration::from_secs(config.storage.poll_interval_secs),
    ))
}

fn print_entry(entry: &DiaryEntry) {
    println!("{}", entry.date);
    for (idx, item) in entry.non_empty_items().enumerate() {
        println!("  {}. {item}", idx + 1);
    }
    if !entry.ai_feedback.is_empty() {
        println!("  feedback: {}", entry.ai_feedback);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load_from("config/default.toml")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone())),
        )
        .init();

    tracing::debug!(backend = %config.storage.backend, "configuration loaded");

    let cli = Cli::parse();

    let policy = if config.diary.preserve_slot_positions {
        SlotPolicy::PreserveSlots
    } else {
        SlotPolicy::DropEmpty
    };
    let normalizer = Normalizer::new(policy);

    let (store, session): (Arc<dyn EntryStore>, Session) = if config.uses_remote_backend() {
        (
            Arc::new(remote_store(&config, normalizer)?),
            remote_session()?,
        )
    } else {
        (Arc::new(local_store(&config, normalizer)), Session::local())
    };
    let auth = AuthState::signed_in(session.clone());

    let gateway = Arc::new(
        GeminiClient::new(
            config.gateway.base_url.clone(),
            config.gateway.api_key.clone(),
            config.gateway.model.clone(),
        )
        .with_generation(
            config.gateway.temperature,
            config.gateway.feedback_max_tokens,
            config.gateway.analysis_max_tokens,
        ),
    );
    let controller = Arc::new(DiaryController::new(store.clone(), gateway, auth));

    match cli.command {
        Commands::List => {
            controller.refresh().await?;
            let entries = controller.entries().await;
            if entries.is_empty() {
                println!("No happy moments recorded yet.");
            }
            for entry in &entries {
                print_entry(entry);
            }
        }
        Commands::Show { date } => {
            let date = date.unwrap_or_else(today);
            controller.select_date(&date).await?;
            match store.find_by_date(&session, &date).await? {
                Some(entry) => print_entry(&entry),
                None => println!("No entry for {date}."),
            }
        }
        Commands::Save { date, moments, yes } => {
            let date = date.unwrap_or_else(today);
            controller.select_date(&date).await?;
            let outcome = controller
                .submit(&moments, &PromptConfirm { assume_yes: yes })
                .await?;
            match outcome {
                SubmitOutcome::Saved(entry) => {
                    println!("Saved {}.", entry.date);
                    println!("  feedback: {}", entry.ai_feedback);
                }
                SubmitOutcome::Declined => println!("Left the existing entry unchanged."),
            }
        }
        Commands::Delete { date, yes } => {
            let outcome = controller
                .delete_entry(&date, &PromptConfirm { assume_yes: yes })
                .await?;
            match outcome {
                DeleteOutcome::Deleted(_) => println!("Deleted {date}."),
                DeleteOutcome::NotFound => println!("No entry for {date}; nothing to delete."),
                DeleteOutcome::Declined => println!("Kept {date}."),
            }
        }
        Commands::Analyze => {
            let analysis = controller.request_analysis().await?;
            println!("{analysis}");
        }
        Commands::Analysis => match controller.saved_analysis().await? {
            Some(analysis) => println!("{analysis}"),
            None => println!("No analysis saved yet. Run `haru analyze` first."),
        },
        Commands::Migrate => {
            if !config.uses_remote_backend() {
                bail!("migrate copies local entries to the remote store; set storage.backend = \"remote\" first");
            }
            let local = local_store(&config, normalizer);
            let remote = remote_store(&config, normalizer)?;
            let report = migrate_if_empty(&local, &remote, &session).await?;
            if report.destination_populated {
                println!("Remote store already has entries; nothing migrated.");
            } else {
                println!("Migrated {} entries to the remote store.", report.migrated);
            }
        }
        Commands::Status => {
            controller.refresh().await?;
            let entries = controller.entries().await;
            println!("backend: {}", config.storage.backend);
            println!("user: {}", session.user_id);
            println!("entries: {}", entries.len());
            println!(
                "analysis: {}",
                if controller.saved_analysis().await?.is_some() {
                    "saved"
                } else {
                    "none"
                }
            );
        }
    }

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::is_affirmative;

    #[test]
    fn affirmative_answers() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative("YES"));
        assert!(is_affirmative("  yes  "));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("yep"));
    }
}
