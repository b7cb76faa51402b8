mod reports;
mod scheduler;
mod state;
mod util;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use draftstat_engine::{
    ContextKey, DocumentStore, EngineConfig, FileStore, IndicatorEngine, IngestRequest,
    MemoryStore, PoolUpdate, RecommendRequest,
};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reports::Report;
use scheduler::ServeOptions;
use state::ServiceState;
use util::parse_ids;

type Engine = IndicatorEngine<Box<dyn DocumentStore>>;

const DOCUMENTS_DIR: &str = "documents";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Documents live in process memory and vanish on exit
    Memory,
    /// One JSON file per document under the data directory
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Console,
    Json,
    Markdown,
}

#[derive(Debug, Parser)]
#[command(name = "draftstat", version)]
#[command(about = "Draft-frequency analytics: ingestion, batch rotation and balance reports")]
struct Args {
    /// Directory holding service state and file-store documents
    #[arg(long, global = true, default_value = "draftstat-data")]
    data_dir: PathBuf,

    /// Engine configuration (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Document store backend
    #[arg(long, global = true, value_enum, default_value_t = StoreKind::File)]
    store: StoreKind,

    /// Override the configured RNG seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Output report format
    #[arg(long, global = true, value_enum, default_value_t = ReportFormat::Console)]
    format: ReportFormat,

    /// Optional path to write the report output instead of stdout
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replace the whole pool configuration from a JSON file
    Pool {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        token: String,
    },
    /// Switch the active patch version
    Patch {
        version: String,
        #[arg(long)]
        token: String,
    },
    /// Ingest a JSON file of finished games
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Rotate the batch now
    Rotate {
        #[arg(long)]
        token: String,
    },
    /// Rotate on the configured interval and ingest files dropped in an inbox
    Serve {
        #[arg(long)]
        inbox: Option<PathBuf>,
        /// Inbox polling interval in milliseconds
        #[arg(long, default_value_t = 5_000)]
        poll_ms: u64,
        /// Process the inbox once and exit
        #[arg(long)]
        once: bool,
    },
    /// Patch version, live batch and pool summary
    Status,
    /// Aggregate matrices of the latest complete batch
    Indicator,
    /// Pick and win documents of the live batch
    Matrices,
    /// Class ranking, or card ranking of one class
    Rebalance {
        #[arg(long)]
        class: Option<i32>,
    },
    /// Score open cards against a deck
    Recommend {
        #[arg(long)]
        class: i32,
        /// Cards already in the deck (comma-separated)
        #[arg(long, default_value = "")]
        deck: String,
        /// Cards on offer (comma-separated)
        #[arg(long)]
        open: String,
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        map: i32,
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        players: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let result = run(&args).await;

    let mut output_target = OutputTarget::new(args.output.clone())?;
    if matches!(output_target, OutputTarget::File(_)) {
        colored::control::set_override(false);
    }
    match (&result, args.format) {
        (_, ReportFormat::Json) => {
            reports::generate_json_report(output_target.writer(), result.as_ref())?;
        }
        (Ok(report), ReportFormat::Markdown) => {
            reports::generate_markdown_report(output_target.writer(), report)?;
        }
        (Ok(report), ReportFormat::Console) => {
            reports::generate_console_report(output_target.writer(), report)?;
        }
        (Err(_), _) => {}
    }
    output_target.flush_inner()?;

    match result {
        Ok(_) => Ok(()),
        Err(err) if args.format == ReportFormat::Json => {
            log::error!("{err:#}");
            std::process::exit(1);
        }
        Err(err) => Err(err),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            EngineConfig::from_json(&content)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.rng_seed = seed;
    }
    Ok(config)
}

fn open_store(args: &Args) -> Result<Box<dyn DocumentStore>> {
    Ok(match args.store {
        StoreKind::Memory => Box::new(MemoryStore::new()),
        StoreKind::File => {
            let root = args.data_dir.join(DOCUMENTS_DIR);
            Box::new(FileStore::open(&root).context("failed to open the document store")?)
        }
    })
}

fn build_engine(args: &Args) -> Result<(Engine, ServiceState)> {
    let engine = IndicatorEngine::new(load_config(args)?, open_store(args)?)
        .context("invalid engine configuration")?;
    let state = ServiceState::load(&args.data_dir)?;
    state.restore(&engine)?;
    Ok((engine, state))
}

async fn run(args: &Args) -> Result<Report> {
    let (engine, mut state) = build_engine(args)?;

    let report = match &args.command {
        Command::Pool { file, token } => {
            let update: PoolUpdate = read_json(file)?;
            let pool = engine.replace_pool(token, &update)?;
            state.pool = Some(pool.to_update());
            state.save(&args.data_dir)?;
            Report::Pool(pool.to_update())
        }
        Command::Patch { version, token } => {
            let switch = engine.switch_patch(token, version)?;
            state.patch_version = engine.version().patch_version().map(str::to_string);
            state.save(&args.data_dir)?;
            Report::Patch(switch)
        }
        Command::Ingest { file } => {
            let request: IngestRequest = read_json(file)?;
            Report::Ingest(engine.ingest_async(&request).await?)
        }
        Command::Rotate { token } => Report::Rotation(engine.rotate_now(token)?),
        Command::Serve {
            inbox,
            poll_ms,
            once,
        } => {
            let options = ServeOptions {
                inbox: inbox.clone(),
                poll_every: Duration::from_millis((*poll_ms).max(1)),
                once: *once,
            };
            let tally = scheduler::serve(&engine, &options).await?;
            Report::Served {
                files: tally.files,
                failed: tally.failed,
            }
        }
        Command::Status => Report::Status(engine.status()),
        Command::Indicator => Report::Indicator(engine.indicator()?.as_ref().clone()),
        Command::Matrices => Report::Matrices(engine.matrices()?),
        Command::Rebalance { class: None } => Report::Rebalance(engine.rebalance_classes()?),
        Command::Rebalance { class: Some(class) } => {
            Report::Rebalance(engine.rebalance_cards(*class)?)
        }
        Command::Recommend {
            class,
            deck,
            open,
            map,
            players,
        } => {
            let request = RecommendRequest {
                class_code: *class,
                deck: parse_ids(deck)?,
                open: parse_ids(open)?,
                context: ContextKey::new(*map, *players),
            };
            Report::Recommend(engine.recommend(&request)?)
        }
    };
    Ok(report)
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = Args::try_parse_from([
            "draftstat",
            "recommend",
            "--class",
            "1",
            "--open",
            "10,20",
            "--map",
            "-1",
            "--format",
            "json",
            "--store",
            "memory",
        ])
        .unwrap();
        assert_eq!(args.format, ReportFormat::Json);
        assert_eq!(args.store, StoreKind::Memory);
        assert!(matches!(
            args.command,
            Command::Recommend {
                class: 1,
                map: -1,
                players: -1,
                ..
            }
        ));
    }

    #[test]
    fn seed_flag_overrides_config() {
        let args = Args::try_parse_from(["draftstat", "--seed", "42", "status"]).unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.rng_seed, 42);
        assert_eq!(config.rotation_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn admin_commands_require_a_token() {
        assert!(Args::try_parse_from(["draftstat", "rotate"]).is_err());
        assert!(Args::try_parse_from(["draftstat", "patch", "3"]).is_err());
    }
}
