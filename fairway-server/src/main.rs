//! Fairway Server
//!
//! Event-driven round coordination for disc golf leagues.

mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use fairway_core::config::{ConfigRoleAuthority, ConfigStore, GuildRoles};
use fairway_core::entities::{RoundStore, TagLedger};
use fairway_core::events::{EventPublisher, InMemoryBus};
use fairway_core::framework::{DatabaseProcessor, MemoryProcessor};
use fairway_core::processors::{
    EventDispatcher, EventHandler, RoundSaga, TagLookupResponder, TagSwapMatcher,
};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Fairway - round lifecycle and leaderboard tag coordination
#[derive(Parser, Debug)]
#[command(name = "fairway-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./fairway.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Keep rounds and tags in memory instead of Postgres
    #[arg(long, default_value = "false")]
    memory: bool,
}

/// The storage seams every processor is built from.
struct Storage {
    rounds: Arc<dyn RoundStore>,
    tags: Arc<dyn TagLedger>,
    pool: Option<PgPool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting fairway-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let listen_addr = loaded_config.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let storage = if args.memory {
        tracing::warn!("Running with in-memory storage, state is lost on exit");
        let memory = Arc::new(MemoryProcessor::new());
        Storage {
            rounds: memory.clone(),
            tags: memory,
            pool: None,
        }
    } else {
        connect_database(args.migrate).await?
    };

    let roles = ConfigStore::new(loaded_config.roles);
    let authority = Arc::new(ConfigRoleAuthority::new(roles.clone()));

    // Event bus and the handlers that consume it
    let workers = loaded_config.workers;
    let (bus, deliveries) =
        InMemoryBus::new(workers.channel_capacity, workers.max_delivery_attempts);
    let bus = Arc::new(bus);

    let handlers: Vec<Arc<dyn EventHandler>> = vec![
        Arc::new(RoundSaga::new(storage.rounds.clone(), authority)),
        Arc::new(TagLookupResponder::new(storage.tags.clone())),
    ];
    let dispatcher = EventDispatcher::new(bus.clone(), deliveries, handlers, workers.workers);

    let publisher: Arc<dyn EventPublisher> = bus.clone();
    let matcher = Arc::new(TagSwapMatcher::new(
        storage.tags.clone(),
        publisher,
        loaded_config.tag_swap,
    ));

    // Background tasks stop on this channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx.clone()));
    let watcher_handle = tokio::spawn(log_role_reloads(roles.clone(), shutdown_rx));

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(config_loader, roles);

    // Create application state and build the router
    let state = AppState::new(storage.pool.clone(), bus, matcher);
    let router = build_router(state);

    // Run the server
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    // Stop background tasks
    reload_notify.notify_one();
    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher_handle.await {
        tracing::error!("Event dispatcher task failed: {}", e);
    }
    if let Err(e) = watcher_handle.await {
        tracing::error!("Role watcher task failed: {}", e);
    }

    // Close database connections gracefully
    if let Some(pool) = storage.pool {
        tracing::info!("Closing database connections...");
        pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

async fn connect_database(migrate: bool) -> anyhow::Result<Storage> {
    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let processor = Arc::new(DatabaseProcessor {
        pool: db_pool.clone(),
    });
    Ok(Storage {
        rounds: processor.clone(),
        tags: processor,
        pool: Some(db_pool),
    })
}

/// Log the admin roster after each reload until shutdown.
async fn log_role_reloads(roles: ConfigStore<GuildRoles>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut watcher = roles.watch();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            changed = watcher.changed() => {
                let Some(snapshot) = changed else {
                    break;
                };
                tracing::info!(
                    revision = snapshot.revision,
                    guilds = snapshot.value.guild_count(),
                    "Admin roles now in effect"
                );
            }
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
