use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use deckforge::config::loader::load_config_with_env;
use deckforge::processor::FormatConverter;
use deckforge::queue::{QueueBroker, RedisBroker};
use deckforge::sanitize::redact_broker_url;
use deckforge::storage::StorageLayout;
use deckforge::worker::{ConversionRunner, WorkerPool};
use deckforge::{Config, ConversionService, Database};

use crate::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(name = "deckforge", version, about = "Presentation conversion service")]
pub struct Cli {
    /// JSON config file; environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Dotenv file read before config; defaults to `.env` in the working
    /// directory or one of its parents.
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the conversion HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },
    /// Consume conversion tasks from the queue until interrupted.
    Worker {
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Convert one upload synchronously and print the final status.
    Convert {
        presentation_id: i64,
        filename: String,
    },
}

/// Loads a dotenv file into the process environment without overriding
/// variables that are already set. Returns the file that was read, if any.
pub fn load_env_file(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => dotenvy::from_path(path).ok().map(|()| path.to_path_buf()),
        None => dotenvy::dotenv().ok(),
    }
}

pub fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config_with_env(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Command::Serve { bind } => serve(config, bind),
        Command::Worker { concurrency } => run_worker(config, concurrency),
        Command::Convert {
            presentation_id,
            filename,
        } => convert(config, presentation_id, &filename),
    }
}

fn open_database(config: &Config) -> Result<Database> {
    let path = config.database_path();
    Database::open(&path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn redis_broker(config: &Config, slot: usize) -> Result<Arc<dyn QueueBroker>> {
    let broker = RedisBroker::new(&config.queue, RedisBroker::consumer_name(slot))
        .with_context(|| {
            format!(
                "Invalid broker URL {}",
                redact_broker_url(&config.queue.redis_url)
            )
        })?;
    Ok(Arc::new(broker))
}

fn serve(config: Config, bind: SocketAddr) -> Result<()> {
    let db = open_database(&config)?;

    // Without a usable broker every request converts inline.
    let broker = if config.background_conversion {
        match redis_broker(&config, 0) {
            Ok(broker) => Some(broker),
            Err(e) => {
                log::warn!("{:#}; conversions will run inline", e);
                None
            }
        }
    } else {
        None
    };

    let service = ConversionService::from_config(&config, db, broker);
    let state = Arc::new(AppState::new(service));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(server::run(state, bind))
}

fn run_worker(config: Config, concurrency: usize) -> Result<()> {
    let db = open_database(&config)?;
    let broker = redis_broker(&config, 0)?;

    let converter = FormatConverter::from_config(&config);
    let runner = Arc::new(ConversionRunner::new(
        db,
        StorageLayout::new(&config.upload_dir),
        Arc::new(converter),
        config.thumbnails.max_pages,
    ));

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        log::info!("Interrupt received, finishing current job...");
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("Failed to install Ctrl-C handler")?;

    log::info!(
        "Worker consuming {} as group {}",
        config.queue.stream,
        config.queue.consumer_group
    );

    let pool = WorkerPool::with_shutdown_flag(
        broker,
        runner,
        concurrency,
        Duration::from_millis(config.queue.block_timeout_ms),
        shutdown,
    )?;
    pool.wait();
    Ok(())
}

fn convert(mut config: Config, presentation_id: i64, filename: &str) -> Result<()> {
    config.background_conversion = false;
    let db = open_database(&config)?;
    let service = ConversionService::from_config(&config, db, None);

    let dispatch = service.request_conversion(presentation_id, filename)?;
    let status = service.get_status(presentation_id)?;

    log::info!("Conversion {} finished as {}", dispatch.job_id(), status.status);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
