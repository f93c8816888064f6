//! `ferry`: push Nix store paths to a binary cache.

mod config;
mod reporter;
#[cfg(test)]
mod test_env;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Overrides;
use ferry_core::narinfo::Compression;
use ferry_core::store_path::StorePath;
use ferry_push::{
    Concurrency, HttpCacheClient, NixStore, PushContext, RetryPolicy, push_closure,
    push_single_store_path,
};
use ferry_signer::KeyPair;
use reporter::{Reporter, ReporterSettings, Summary, Tally};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Push Nix store paths to a binary cache")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = config::CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push store paths and their closures to a cache
    Push(PushArgs),
    /// Signing key management
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Args)]
struct PushArgs {
    /// Cache name
    cache: String,

    /// Store paths or symlinks into the store; read from stdin when omitted
    paths: Vec<PathBuf>,

    /// Server URL (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Parallel uploads
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Send unknown-deriver instead of the real deriver
    #[arg(long)]
    omit_deriver: bool,

    /// Compression method: xz or zstd
    #[arg(long, value_parser = parse_compression)]
    compression_method: Option<Compression>,

    /// Compression level
    #[arg(long)]
    compression_level: Option<i32>,

    /// Push only the given paths, not their closures
    #[arg(long)]
    no_closure: bool,
}

impl PushArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            jobs: self.jobs,
            omit_deriver: self.omit_deriver,
            compression_method: self.compression_method,
            compression_level: self.compression_level,
        }
    }
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate a new signing key pair
    Generate {
        /// Key name (e.g., "cache.example.com-1")
        name: String,
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_compression(s: &str) -> Result<Compression, String> {
    Compression::parse(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { config, command } = Cli::parse();

    match command {
        Commands::Push(args) => handle_push_command(config, args).await,
        Commands::Key { command } => handle_key_command(command).await,
    }
}

async fn handle_key_command(command: KeyCommands) -> Result<()> {
    match command {
        KeyCommands::Generate { name, output } => {
            let keypair = KeyPair::generate(&name);
            let secret_key = keypair.to_nix_secret_key();
            let public_key = keypair.to_nix_public_key();

            if let Some(path) = output {
                tokio::fs::write(&path, &secret_key)
                    .await
                    .with_context(|| format!("failed to write key to {}", path.display()))?;
                println!("Secret key written to: {}", path.display());
            } else {
                println!("Secret key:");
                println!("{secret_key}");
            }

            println!("\nPublic key:");
            println!("{public_key}");
            println!("\nAdd this to your nix.conf trusted-public-keys:");
            println!("  trusted-public-keys = {public_key}");
        }
    }
    Ok(())
}

async fn handle_push_command(config_path: Option<PathBuf>, args: PushArgs) -> Result<()> {
    let path = config::config_path(config_path.as_deref())?;
    let mut config = config::load_config(&path)?;
    args.overrides().apply(&mut config);
    config.validate().context("invalid configuration")?;
    let cache = config.push_cache(&args.cache)?;

    let inputs = if args.paths.is_empty() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("failed to read store paths from stdin")?;
        parse_path_list(&input)
    } else {
        args.paths
    };
    if inputs.is_empty() {
        anyhow::bail!("no store paths provided");
    }

    let api = HttpCacheClient::new(config.host()?, config.subdomain_routing)?;
    let store = NixStore::new(config.store_dir.clone());
    let retry = RetryPolicy::from(config.retry);
    let ctx = PushContext::new(Arc::new(api), Arc::new(store), cache, retry)?;

    let settings = Arc::new(ReporterSettings {
        cache: args.cache.clone(),
        compression: config.compression,
        omit_deriver: config.omit_deriver,
        max_attempts: retry.max_attempts(),
    });
    let tally = Arc::new(Tally::default());
    let concurrency = Concurrency::bounded(config.jobs);

    tracing::info!(
        cache = %args.cache,
        inputs = inputs.len(),
        jobs = config.jobs,
        closure = !args.no_closure,
        "Starting push"
    );

    if args.no_closure {
        let mut paths = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let path = ctx
                .store
                .follow_links_to_store_path(input)
                .await
                .with_context(|| format!("failed to resolve {}", input.display()))?;
            paths.push(path);
        }
        push_each(&ctx, concurrency, paths, settings, tally.clone()).await;
    } else {
        let factory = {
            let tally = tally.clone();
            Arc::new(move |path: &StorePath| {
                Reporter::new(path, settings.clone(), tally.clone())
            })
        };
        push_closure(&ctx, concurrency, factory, &inputs)
            .await
            .context("failed to push closure")?;
    }

    finish(tally.summary())
}

/// Push each path on its own, probing the cache per path.
async fn push_each(
    ctx: &PushContext,
    concurrency: Concurrency,
    paths: Vec<StorePath>,
    settings: Arc<ReporterSettings>,
    tally: Arc<Tally>,
) {
    let ctx = Arc::new(ctx.clone());
    concurrency
        .run_all(paths, move |path| {
            let ctx = ctx.clone();
            let reporter = Reporter::new(&path, settings.clone(), tally.clone());
            async move {
                // The reporter records failures; the result carries nothing more.
                let _ = push_single_store_path(&ctx, &reporter, &path).await;
            }
        })
        .await;
}

fn finish(summary: Summary) -> Result<()> {
    println!("{}", summary.line());
    if summary.failed > 0 {
        anyhow::bail!("{} path(s) failed to push", summary.failed);
    }
    Ok(())
}

/// Whitespace-separated paths, as produced by `nix-store -qR` or `nix build --print-out-paths`.
fn parse_path_list(input: &str) -> Vec<PathBuf> {
    input.split_whitespace().map(PathBuf::from).collect()
}
