//! assignq CLI: operator interface to the assignment queue.
//!
//! Every command connects to Postgres and applies pending migrations before
//! it runs, so a fresh database works with any command. `migrate` does only
//! that step and exits.

use assignq::config::Config;
use assignq::content::ContentStore;
use assignq::db::Db;
use assignq::model::{ActorId, ItemId};
use assignq::queue::QueueService;
use assignq::reaper::{LeaseReaper, ReaperConfig};
use assignq::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "assignq",
    about = "Claim, edit and assign queued messages",
    after_help = "Pending database migrations are applied before every command."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations and exit (every command also does this first)
    Migrate,
    /// Submit a new message
    Submit {
        /// Message content
        content: String,
    },
    /// Claim the next unassigned message
    Next,
    /// Overwrite a message and assign it to an actor
    Edit {
        item_id: i64,
        actor_id: i64,
        /// New message content
        content: String,
    },
    /// Find or create an actor by name
    Actor { name: String },
    /// Show a message and its current content
    Show { item_id: i64 },
    /// Return a claimed message to the queue
    Release { item_id: i64 },
    /// Run the claim-lease reaper until Ctrl-C
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "assignq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let content = ContentStore::open(&config.content_dir).await?;
    let queue = QueueService::new(Arc::new(db), content);

    match cli.command {
        Command::Migrate => println!("migrations applied"),
        Command::Submit { content } => {
            let id = queue.submit(&content).await?;
            print_json(&serde_json::json!({ "id": id }))?;
        }
        Command::Next => match queue.next_available().await? {
            Some(view) => print_json(&serde_json::json!({
                "id": view.item.id,
                "message": view.content,
            }))?,
            None => println!("No messages available"),
        },
        Command::Edit {
            item_id,
            actor_id,
            content,
        } => {
            let id = queue
                .edit_and_assign(ItemId(item_id), &content, ActorId(actor_id))
                .await?;
            print_json(&serde_json::json!({ "id": id, "message": content }))?;
        }
        Command::Actor { name } => {
            let actor = queue.find_or_create_actor(&name).await?;
            print_json(&actor)?;
        }
        Command::Show { item_id } => {
            let view = queue.get(ItemId(item_id)).await?;
            print_json(&view)?;
        }
        Command::Release { item_id } => {
            let item = queue.release(ItemId(item_id)).await?;
            print_json(&item)?;
        }
        Command::Serve => {
            let reaper = LeaseReaper::new(
                queue,
                ReaperConfig {
                    lease: config.claim_lease,
                    interval: config.reaper_interval,
                },
            );

            let handle = reaper.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                handle.shutdown();
            });

            reaper.run().await?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
