use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use allnews::collector::{collect, group_sources, shutdown_channel, ArticleSink, PrintSink};
use allnews::config::Config;
use allnews::db::Database;
use allnews::fetcher::Fetcher;
use allnews::routes::{router, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "allnews",
    about = "RSS feed aggregator",
    long_about = "Gathers user-defined RSS feeds and displays them as a single timeline"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, env = "ALLNEWS_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect the configured feeds and store them in the database
    Collect {
        /// Keep collecting, refetching each source on its update period
        #[arg(short, long)]
        continuous: bool,

        /// Print articles to stdout instead of saving them
        #[arg(long)]
        dry_run: bool,

        /// Name of a source to process (can be repeated)
        #[arg(long = "name", value_name = "NAME")]
        names: Vec<String>,
    },
    /// Start the HTTP server
    Serve {
        /// Run continuous feed collection in the background
        #[arg(short = 'c', long)]
        with_collect: bool,
    },
    /// Apply database migrations
    Migratedb,
    /// Print the program version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "allnews=info,tower_http=debug".into()),
        )
        // stdout is reserved for `collect --dry-run` output
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("version: {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    info!("Loaded {} sources from configuration", config.sources.len());

    match cli.command {
        Command::Collect {
            continuous,
            dry_run,
            names,
        } => run_collect(config, names, dry_run, continuous).await,
        Command::Serve { with_collect } => run_serve(config, with_collect).await,
        Command::Migratedb => {
            open_database(&config).await?;
            info!("Database migrated");
            Ok(())
        }
        Command::Version => Ok(()),
    }
}

async fn open_database(config: &Config) -> anyhow::Result<Database> {
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| config.db.clone());
    let db = Database::new(&database_url)
        .await
        .with_context(|| format!("failed to open database {}", database_url))?;
    db.initialize().await?;
    Ok(db)
}

async fn run_collect(
    config: Config,
    names: Vec<String>,
    dry_run: bool,
    continuous: bool,
) -> anyhow::Result<()> {
    let groups = group_sources(&config.sources, &names);
    if groups.is_empty() {
        warn!("No sources to collect");
    }

    let sink: Arc<dyn ArticleSink> = if dry_run {
        Arc::new(PrintSink)
    } else {
        Arc::new(open_database(&config).await?)
    };
    let fetcher = Arc::new(Fetcher::new()?);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, waiting for collect loops");
        let _ = shutdown_tx.send(true);
    });

    collect(groups, fetcher, sink, continuous, shutdown_rx).await;
    Ok(())
}

async fn run_serve(config: Config, with_collect: bool) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let db = Arc::new(open_database(&config).await?);
    info!("Database initialized");

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // Start background collection
    let collector = if with_collect {
        let groups = group_sources(&config.sources, &[]);
        let fetcher = Arc::new(Fetcher::new()?);
        let sink: Arc<dyn ArticleSink> = db.clone();
        Some(tokio::spawn(collect(
            groups,
            fetcher,
            sink,
            true,
            shutdown_rx,
        )))
    } else {
        None
    };

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("Listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = collector {
        handle.await?;
    }

    Ok(())
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
