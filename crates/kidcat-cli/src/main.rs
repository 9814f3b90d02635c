use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kidcat_match::{Conversation, MatchingEngine, OpenAiClient, ProductProfile};
use kidcat_storage::PgCatalogueStore;
use kidcat_sync::{refresh_embeddings, InferenceRun, SyncConfig, SyncPipeline};
use kidcat_web::AppState;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "kidcat")]
#[command(about = "Kids catalogue scraper, enricher and recommender")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover product links, then scrape them.
    Sync,
    /// Read the sitemap(s) and write the product link file.
    Discover,
    /// Scrape every link in the link file into the catalogue.
    Scrape {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Infer shopping attributes for active products.
    Infer {
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        with_images: bool,
    },
    /// Embed products that have attributes but no vector.
    Embed,
    /// Print matches for a product profile JSON file.
    Recommend {
        profile: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Create the vector extension and products table.
    InitDb,
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the cron scheduler until interrupted.
    Schedule,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn openai_client(config: &SyncConfig) -> Result<Arc<OpenAiClient>> {
    let openai = config
        .openai_config()
        .context("OPENAI_API_KEY is not set")?;
    Ok(Arc::new(OpenAiClient::new(openai)?))
}

async fn catalogue(config: &SyncConfig) -> Result<Arc<PgCatalogueStore>> {
    let store = PgCatalogueStore::connect(&config.database_url)
        .await
        .context("connecting to catalogue database")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = SyncPipeline::connect(config).await?.run_once().await?;
            println!(
                "sync complete: run_id={} links={} created={} updated={} failed={} reports={}",
                summary.run_id,
                summary.discovered_links,
                summary.created,
                summary.updated,
                summary.failed,
                summary.reports_dir
            );
        }
        Commands::Discover => {
            let links = SyncPipeline::connect(config).await?.discover().await?;
            println!("discovered {} product links", links.len());
        }
        Commands::Scrape { limit, workers } => {
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let pipeline = SyncPipeline::connect(config).await?;
            let (outcome, report) = pipeline.scrape(limit).await?;
            println!(
                "scrape complete: run_id={} attempted={} created={} updated={} failed={} reports={}",
                outcome.run_id,
                outcome.attempted,
                outcome.created(),
                outcome.updated(),
                outcome.failed.len(),
                report.reports_dir.display()
            );
        }
        Commands::Infer {
            batch_size,
            with_images,
        } => {
            let client = openai_client(&config)?;
            let store = catalogue(&config).await?;
            let outcome = InferenceRun::new(client.clone(), client, store)
                .with_batch_size(batch_size.unwrap_or(config.inference_batch))
                .with_images(with_images)
                .run()
                .await?;
            println!(
                "inference complete: batches={} applied={} unmatched={} rejected={} embedding_failures={}",
                outcome.batches,
                outcome.applied,
                outcome.unmatched.len(),
                outcome.rejected,
                outcome.embedding_failures
            );
        }
        Commands::Embed => {
            let client = openai_client(&config)?;
            let store = catalogue(&config).await?;
            let refresh = refresh_embeddings(client.as_ref(), store.as_ref()).await?;
            println!("embedded={} failed={}", refresh.embedded, refresh.failed);
        }
        Commands::Recommend { profile, limit } => {
            let text = tokio::fs::read_to_string(&profile)
                .await
                .with_context(|| format!("reading {}", profile.display()))?;
            let profile: ProductProfile = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", profile.display()))?;
            let mut engine = MatchingEngine::new(openai_client(&config)?, catalogue(&config).await?);
            if let Some(limit) = limit {
                engine = engine.with_page_size(limit);
            }
            let products = engine.recommend(&profile).await?;
            println!("{}", serde_json::to_string_pretty(&products)?);
        }
        Commands::InitDb => {
            catalogue(&config).await?.ensure_schema().await?;
            println!("catalogue schema ready");
        }
        Commands::Serve { port } => {
            let client = openai_client(&config)?;
            let store = catalogue(&config).await?;
            store.ensure_schema().await?;
            let engine = MatchingEngine::new(client.clone(), store);
            let state = AppState::new(Conversation::new(client, engine.clone()), engine)
                .with_static_root(config.workspace_root.join("static"))
                .with_session_ttl(config.session_ttl());
            kidcat_web::serve(state, port.unwrap_or(config.web_port)).await?;
        }
        Commands::Schedule => {
            config.scheduler_enabled = true;
            let pipeline = Arc::new(SyncPipeline::connect(config).await?);
            let Some(sched) = pipeline.maybe_build_scheduler().await? else {
                return Ok(());
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    Ok(())
}
