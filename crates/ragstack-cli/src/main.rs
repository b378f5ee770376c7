//! ragstack CLI - Command-line interface
//!
//! Usage:
//!   ragstack health
//!   ragstack list
//!   ragstack create <name> [--model <model>] [--distance cosine|dot]
//!   ragstack delete <name>
//!   ragstack delete-objects <collection> --where '<json>' [--dry-run]
//!   ragstack count <collection> [--where '<json>']
//!   ragstack embed <text> [--url <embedding-url>]

use anyhow::Context;
use clap::{Parser, Subcommand};
use ragstack_core::{AppConfig, LoggingConfig, Outcome};
use ragstack_vector::{CollectionOptions, DeleteFilter, VectorStoreClient};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "ragstack")]
#[command(about = "Weaviate collection management with custom embeddings")]
#[command(version)]
struct Cli {
    /// TOML config file; environment variables override its values
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that Weaviate is ready and show its version
    Health,
    /// List collections
    List,
    /// Create a collection vectorized by the embedding service
    Create {
        name: String,
        /// Embedding model the vectorizer requests
        #[arg(long)]
        model: Option<String>,
        /// Distance metric: cosine or dot
        #[arg(long, default_value = "cosine")]
        distance: String,
    },
    /// Delete a collection and all its objects
    Delete { name: String },
    /// Delete objects matching a where filter
    DeleteObjects {
        collection: String,
        /// Filter as JSON, e.g. '{"path":["title"],"operator":"Equal","valueText":"X"}'
        #[arg(long = "where")]
        filter: String,
        /// Report matches without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Count objects, optionally matching a where filter
    Count {
        collection: String,
        #[arg(long = "where")]
        filter: Option<String>,
    },
    /// Embed text through the embedding service
    Embed {
        text: String,
        /// Override the configured embedding URL
        #[arg(long)]
        url: Option<String>,
    },
}

fn load_config(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "ragstack={level},ragstack_vector={level},ragstack_core={level}",
            level = logging.level
        )
        .into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_filter(raw: &str) -> anyhow::Result<DeleteFilter> {
    serde_json::from_str(raw).with_context(|| format!("invalid --where filter: {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_outcome<T: Serialize>(action: &str, outcome: Outcome<T>) -> anyhow::Result<()> {
    match outcome {
        Outcome::Done(value) => print_json(&value),
        Outcome::Skipped(reason) => {
            println!("{action} skipped: {reason}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    let client = VectorStoreClient::from_config(&config)?;

    match cli.command {
        Commands::Health => {
            let meta = client.meta().await?;
            println!("Weaviate {} is ready", meta.version);
            println!("  http: {}", config.weaviate.http_url());
            println!("  grpc: {}", config.weaviate.grpc_endpoint());
            println!("  modules: {}", meta.modules.join(", "));
        }
        Commands::List => {
            let collections = client.list_collections().await?;
            print_json(&collections)?;
        }
        Commands::Create {
            name,
            model,
            distance,
        } => {
            let mut options = CollectionOptions::default().with_distance(distance);
            if let Some(model) = model {
                options = options.with_model(model);
            }
            match client.create_collection(&name, &options).await? {
                Outcome::Done(()) => println!("Collection {name} created"),
                Outcome::Skipped(reason) => println!("Collection {name} {reason}"),
            }
        }
        Commands::Delete { name } => match client.delete_collection(&name).await? {
            Outcome::Done(()) => println!("Collection {name} deleted"),
            Outcome::Skipped(reason) => println!("Collection {name} {reason}"),
        },
        Commands::DeleteObjects {
            collection,
            filter,
            dry_run,
        } => {
            let filter = parse_filter(&filter)?;
            let outcome = if dry_run {
                client.preview_delete(&collection, &filter).await?
            } else {
                client.delete_objects(&collection, &filter).await?
            };
            print_outcome("Delete", outcome)?;
        }
        Commands::Count { collection, filter } => {
            let filter = filter.as_deref().map(parse_filter).transpose()?;
            let outcome = client.count_objects(&collection, filter.as_ref()).await?;
            print_outcome("Count", outcome)?;
        }
        Commands::Embed { text, url } => {
            let vector = client.embed(&text, url.as_deref()).await?;
            println!("Embedding dimension: {}", vector.len());
            print_json(&vector)?;
        }
    }

    Ok(())
}
