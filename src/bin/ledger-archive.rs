//! Ledger archive operator tool
//!
//! Creates, inspects and feeds archive data directories.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ledger_archive::{
    AddTransactionsResponse, Archive, ArchiveConfig, IndexType, TransactionRange, Value,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ledger-archive")]
#[command(about = "Inspect and maintain ledger block archives")]
struct Args {
    /// Archive data directory
    #[arg(short = 'd', long)]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new archive
    Init {
        /// TOML configuration file (overrides the flags below)
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Storage backend (stable, stable-typed, managed)
        #[arg(long, default_value = "stable")]
        index_type: String,

        #[arg(long, default_value_t = 1024)]
        max_pages: u64,

        #[arg(long, default_value_t = 100_000)]
        max_records: u64,

        #[arg(long, default_value_t = 0)]
        first_index: u64,

        /// Caller allowed to append
        #[arg(long)]
        owner: Option<String>,

        /// Live ledger query target
        #[arg(long)]
        ledger: Option<String>,
    },
    /// Print usage statistics as JSON
    Stats,
    /// Print one block as JSON
    Get { index: u64 },
    /// Query a range, printing blocks and redirections as JSON
    Blocks { start: u64, length: u64 },
    /// Append blocks read from a JSON array file
    Append {
        /// File holding a JSON array of values
        file: PathBuf,

        /// Caller identity
        #[arg(long)]
        caller: String,
    },
    /// Rescan every stored block against the index
    Verify,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Init {
            config,
            index_type,
            max_pages,
            max_records,
            first_index,
            owner,
            ledger,
        } => {
            let config = match config {
                Some(path) => ArchiveConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => {
                    let (Some(owner), Some(ledger)) = (owner, ledger) else {
                        bail!("--owner and --ledger are required without --config");
                    };
                    let index_type: IndexType = index_type.parse()?;
                    ArchiveConfig::new(index_type, max_pages, max_records, first_index, owner, ledger)
                }
            };
            let archive = Archive::create(&args.dir, &config)
                .with_context(|| format!("creating archive in {}", args.dir.display()))?;
            info!("Archive ready, first index {}", archive.first_index());
            archive.close()?;
        }
        Command::Stats => {
            let archive = open(&args.dir)?;
            println!("{}", serde_json::to_string_pretty(&archive.stats())?);
        }
        Command::Get { index } => {
            let archive = open(&args.dir)?;
            match archive.get_transaction(index)? {
                Some(block) => println!("{}", serde_json::to_string_pretty(&block)?),
                None => bail!("block {} is not held by this archive", index),
            }
        }
        Command::Blocks { start, length } => {
            let archive = open(&args.dir)?;
            let result = archive.icrc3_get_blocks(&[TransactionRange::new(start, length)])?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Append { file, caller } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let blocks: Vec<Value> = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", file.display()))?;

            let mut archive = open(&args.dir)?;
            match archive.append_transactions(&caller, blocks) {
                AddTransactionsResponse::Ok(stats) => {
                    println!("{}", serde_json::to_string_pretty(&stats)?)
                }
                AddTransactionsResponse::Full(stats) => {
                    bail!("archive is full ({} blocks)", stats.item_count)
                }
                AddTransactionsResponse::Err(e) => bail!("append rejected: {}", e),
            }
            archive.close()?;
        }
        Command::Verify => {
            let archive = open(&args.dir)?;
            let checked = archive.verify()?;
            println!("{} blocks verified", checked);
        }
    }

    Ok(())
}

fn open(dir: &std::path::Path) -> anyhow::Result<Archive> {
    Archive::open(dir).with_context(|| format!("opening archive in {}", dir.display()))
}
