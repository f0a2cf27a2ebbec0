//! Portal Gamification Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! portal-gamification
//!
//! # Start with custom config and port
//! portal-gamification --config /etc/gamification.toml --http-port 9000
//!
//! # Load users and categories from the portal directory export
//! portal-gamification seed directory.json
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use portal_gamification::db::users::{self, DirectorySeed};
use portal_gamification::services::spawn_logging_listener;
use portal_gamification::{BlobObjectStore, Config, Db, HttpServer, Services};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "portal-gamification")]
#[command(about = "Points ledger, rankings and challenges for the portal")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "GAMIFICATION_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (database and uploads)
    #[arg(long, env = "GAMIFICATION_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "GAMIFICATION_HTTP_PORT")]
    http_port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long, env = "GAMIFICATION_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Load users, categories and memberships from a JSON file
    Seed {
        file: PathBuf,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("portal_gamification=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json)?;

    let config = load_config(&args)?;
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let db = Arc::new(Db::open(&config.database_path(), config.pool_size)?);

    match args.command {
        Some(Command::Seed { file }) => seed(&db, &file),
        Some(Command::Serve) | None => serve(config, db).await,
    }
}

fn seed(db: &Db, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let directory: DirectorySeed = serde_json::from_str(&content).context("parsing seed file")?;

    let summary = db.transaction(|conn| users::apply_seed(conn, &directory))?;
    info!(
        categories = summary.categories,
        users = summary.users,
        assignments = summary.assignments,
        "Seeded directory"
    );
    Ok(())
}

async fn serve(config: Config, db: Arc<Db>) -> anyhow::Result<()> {
    info!(
        data_dir = %config.data_dir.display(),
        http_port = config.http_port,
        "Starting portal-gamification"
    );

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let objects = Arc::new(BlobObjectStore::new(config.objects_dir(), &config.public_base_url).await?);
    let services = Arc::new(Services::new(
        db.clone(),
        objects,
        Duration::from_secs(config.object_delete_timeout_secs),
    ));
    let audit = spawn_logging_listener(services.events.clone());

    let http_addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port)
        .parse()
        .context("invalid bind address")?;
    let server = Arc::new(HttpServer::new(services, http_addr, config.max_upload_bytes));

    info!("HTTP API available at http://{}", http_addr);
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    audit.abort();

    if let Ok(stats) = db.stats() {
        info!(
            users = stats.user_count,
            challenges = stats.challenge_count,
            submissions = stats.submission_count,
            entries = stats.points_entry_count,
            "Final database stats"
        );
    }

    Ok(())
}
