//! docuseek command-line interface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docuseek::config::{self, Settings};
use docuseek::enrich::EnrichClient;
use docuseek::platform::youtube::{YouTubeClient, YouTubeConfig};
use docuseek::platform::{parse_source_url, VideoPlatform};
use docuseek::repository::{
    create_diesel_pool, init_schema, ChangeBus, DieselCategoryRepository,
    DieselSourceRepository, DieselTombstoneRepository, DieselVideoRepository,
};
use docuseek::search::sync::SearchSynchronizer;
use docuseek::search::SearchIndex;
use docuseek::sync::{scheduler, ReconcileService};

#[derive(Parser)]
#[command(name = "docuseek", version, about = "Documentary catalog synchronization pipeline")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconciliation cycle and exit
    Sync,
    /// Run reconciliation on a fixed interval until interrupted
    Schedule,
    /// Rebuild the search index from the database
    Reindex,
    /// Query the search index
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Manage crawled sources
    Source {
        #[command(subcommand)]
        command: SourceCommand,
    },
    /// Manage removal tombstones
    Tombstone {
        #[command(subcommand)]
        command: TombstoneCommand,
    },
}

#[derive(Subcommand)]
enum SourceCommand {
    /// Register a source by playlist URL or bare id
    Add { url: String },
    /// List registered sources
    List,
    /// Remove a source (its videos become orphans)
    Remove { external_id: String },
}

#[derive(Subcommand)]
enum TombstoneCommand {
    /// List tombstoned external ids
    List,
    /// Clear a tombstone, making the id eligible for re-insertion
    Clear { external_id: String },
}

/// Shared handles for every command.
struct App {
    settings: Settings,
    videos: DieselVideoRepository,
    sources: DieselSourceRepository,
    categories: DieselCategoryRepository,
    tombstones: DieselTombstoneRepository,
    index: Arc<SearchIndex>,
    synchronizer: Arc<SearchSynchronizer>,
    bus: Arc<ChangeBus>,
    follower: tokio::task::JoinHandle<()>,
}

impl App {
    /// Close the change bus and wait for the index follower to apply
    /// whatever is still queued. Called once, right before exit.
    async fn drain(self) {
        self.bus.close();
        let _ = self.follower.await;
    }
}

async fn build_app(settings: Settings) -> anyhow::Result<App> {
    settings.ensure_directories()?;

    let pool = create_diesel_pool(&settings.database_path())
        .context("failed to open catalog database")?;
    init_schema(pool.clone()).await?;

    let bus = Arc::new(ChangeBus::new());
    let index = Arc::new(SearchIndex::open(&settings.index_path())?);
    let synchronizer = Arc::new(SearchSynchronizer::new(Arc::clone(&index)));
    let follower = synchronizer.spawn_follower(bus.subscribe(256));

    Ok(App {
        videos: DieselVideoRepository::new(pool.clone(), Arc::clone(&bus)),
        sources: DieselSourceRepository::new(pool.clone()),
        categories: DieselCategoryRepository::new(pool.clone()),
        tombstones: DieselTombstoneRepository::new(pool),
        index,
        synchronizer,
        bus,
        follower,
        settings,
    })
}

fn platform_client(settings: &Settings) -> anyhow::Result<Arc<YouTubeClient>> {
    config::require_api_key(settings)?;
    Ok(Arc::new(YouTubeClient::new(YouTubeConfig::new(
        settings.api_key.clone(),
    ))?))
}

fn reconcile_service(
    app: &App,
    platform: Arc<YouTubeClient>,
) -> anyhow::Result<ReconcileService<YouTubeClient>> {
    let enrich = Arc::new(EnrichClient::new(app.settings.enrich.clone())?);
    Ok(ReconcileService::new(
        platform,
        app.videos.clone(),
        app.sources.clone(),
        app.categories.clone(),
        app.tombstones.clone(),
        enrich,
        Arc::clone(&app.index),
        app.settings.retry_policy(),
    )
    .with_num_related(app.settings.num_related))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docuseek=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = config::load_settings(cli.config.as_deref())?;
    let app = build_app(settings).await?;

    match cli.command {
        Command::Sync => {
            let platform = platform_client(&app.settings)?;
            let service = reconcile_service(&app, platform)?;
            match service.try_run().await? {
                Some(report) => println!(
                    "inserted {} / updated {} / deleted {} across {} sources ({} complete)",
                    report.inserted,
                    report.updated,
                    report.deleted,
                    report.sources,
                    report.complete_sources
                ),
                None => println!("a run is already in progress"),
            }
        }
        Command::Schedule => {
            let platform = platform_client(&app.settings)?;
            let service = Arc::new(reconcile_service(&app, platform)?);
            let interval = Duration::from_secs(app.settings.run_interval_secs);
            let handle = scheduler::spawn(service, interval);

            tokio::signal::ctrl_c().await?;
            info!("interrupted, shutting down");
            handle.abort();
        }
        Command::Reindex => match app.synchronizer.reindex(&app.videos).await? {
            Some(count) => println!("reindexed {count} videos"),
            None => println!("a reindex is already in progress"),
        },
        Command::Search { query, limit } => {
            let (ids, total) = app.index.search(&query, limit, 0)?;
            println!("{total} matches");
            for id in ids {
                if let Some(video) = app.videos.get(id).await? {
                    println!("{:>6}  {}", video.id, video.title);
                }
            }
        }
        Command::Source { command } => match command {
            SourceCommand::Add { url } => {
                let external_id = parse_source_url(&url)
                    .with_context(|| format!("not a recognizable source URL: {url}"))?;
                let platform = platform_client(&app.settings)?;
                let retry = app.settings.retry_policy();

                let metadata = retry
                    .execute(|| platform.get_source_metadata(&external_id))
                    .await
                    .map_err(docuseek::Error::from)?;
                let channel = retry
                    .execute(|| platform.get_channel_metadata(&metadata.channel_id))
                    .await
                    .map_err(docuseek::Error::from)?;

                let source = app
                    .sources
                    .upsert(&external_id, &metadata, &channel.thumbnails)
                    .await?;
                println!("added source {} ({})", source.external_id, source.title);
            }
            SourceCommand::List => {
                for source in app.sources.get_all().await? {
                    println!("{}  {}", source.external_id, source.title);
                }
            }
            SourceCommand::Remove { external_id } => {
                if app.sources.remove(&external_id).await? {
                    println!("removed source {external_id}");
                } else {
                    println!("no such source: {external_id}");
                }
            }
        },
        Command::Tombstone { command } => match command {
            TombstoneCommand::List => {
                for tombstone in app.tombstones.get_all().await? {
                    println!(
                        "{}  {}  ({})",
                        tombstone.external_id,
                        tombstone.reason,
                        tombstone.created_at.format("%Y-%m-%d")
                    );
                }
            }
            TombstoneCommand::Clear { external_id } => {
                if app.tombstones.clear(&external_id).await? {
                    println!("cleared tombstone for {external_id}");
                } else {
                    println!("no tombstone for {external_id}");
                }
            }
        },
    }

    app.drain().await;
    Ok(())
}
