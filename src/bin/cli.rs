//! ChainKV CLI
//!
//! Opens a database image, runs one command against it and closes it.
//!
//! Exit codes: 0 = applied / found, 1 = precondition failed / not found,
//! 2 = error.

use std::process::ExitCode;

use chainkv::{Config, Engine, Outcome, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// ChainKV CLI
#[derive(Parser, Debug)]
#[command(name = "chainkv-cli")]
#[command(about = "Log-structured key-value store")]
#[command(version)]
struct Args {
    /// Device image file
    #[arg(short, long, default_value = "./chainkv.img")]
    path: String,

    /// Block size used when creating the image
    #[arg(short, long, default_value = "4096")]
    block_size: u32,

    /// Image size in blocks
    #[arg(long, default_value = "65536")]
    blocks: u64,

    /// Ignore existing contents and do not resume from them
    #[arg(long)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a key that does not exist yet
    Insert { key: String, value: String },

    /// Set a key, creating it if needed
    Update { key: String, value: String },

    /// Overwrite an existing key
    Replace { key: String, value: String },

    /// Remove an existing key
    Remove { key: String },

    /// Print the value of a key
    Get { key: String },

    /// Print every version of a key, newest first
    History { key: String },

    /// Print engine counters
    Stats,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chainkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .path(&args.path)
        .block_size(args.block_size)
        .device_blocks(args.blocks)
        .persistence(!args.ephemeral)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open {}: {}", args.path, e);
            return ExitCode::from(2);
        }
    };

    let code = match run(&engine, args.command) {
        Ok(found) => u8::from(!found),
        Err(e) => {
            eprintln!("error: {}", e);
            2
        }
    };

    if let Err(e) = engine.close() {
        tracing::error!("Failed to close {}: {}", args.path, e);
        return ExitCode::from(2);
    }

    ExitCode::from(code)
}

/// Execute one command; `Ok(false)` means a precondition failed or nothing was found
fn run(engine: &Engine, command: Commands) -> Result<bool> {
    match command {
        Commands::Insert { key, value } => report(engine.insert(key.as_bytes(), value.as_bytes())?),
        Commands::Update { key, value } => report(engine.update(key.as_bytes(), value.as_bytes())?),
        Commands::Replace { key, value } => {
            report(engine.replace(key.as_bytes(), value.as_bytes())?)
        }
        Commands::Remove { key } => report(engine.remove(key.as_bytes())?),
        Commands::Get { key } => match engine.lookup(key.as_bytes())? {
            Some(value) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(true)
            }
            None => {
                println!("(nil)");
                Ok(false)
            }
        },
        Commands::History { key } => {
            let versions = engine.history(key.as_bytes())?;
            for (age, version) in versions.iter().enumerate() {
                match version {
                    Some(value) => println!("{}) {}", age, String::from_utf8_lossy(value)),
                    None => println!("{}) (removed)", age),
                }
            }
            Ok(!versions.is_empty())
        }
        Commands::Stats => {
            let stats = engine.stats();
            println!("size:         {}", stats.size);
            println!("waste:        {}", stats.waste);
            println!("indexed keys: {}", stats.indexed_keys);
            println!("log length:   {}", stats.log_len);
            println!(
                "read cache:   {}/{} slots, {} hits, {} misses",
                stats.cache.occupied, stats.cache.slots, stats.cache.hits, stats.cache.misses
            );
            Ok(true)
        }
    }
}

fn report(outcome: Outcome) -> Result<bool> {
    match outcome {
        Outcome::Applied => println!("OK"),
        Outcome::KeyExists => println!("key exists"),
        Outcome::KeyNotFound => println!("key not found"),
    }
    Ok(outcome.is_applied())
}
