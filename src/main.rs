// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use assetcache::colors::{self, paint, symbols};
use assetcache::config::{config_path, load_config, AssetConfig};
use assetcache::utils::{format_bytes, mask_sensitive};
use assetcache::{
    format_error, AssetFile, AssetHandle, AssetManager, CacheStore, Clock, SystemClock,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Success - operation completed successfully
    pub const SUCCESS: i32 = 0;
    /// General error - the asset could not be downloaded
    pub const ERROR: i32 = 1;
    /// Usage error - invalid command line arguments
    pub const USAGE: i32 = 64;
    /// I/O error - cache directory could not be read
    pub const IO_ERR: i32 = 74;
    /// Temporary failure - timed out waiting for a download
    pub const TEMP_FAIL: i32 = 75;
    /// Configuration error - invalid or missing config
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

#[derive(Parser)]
#[command(name = "assetcache")]
#[command(version = VERSION)]
#[command(about = "Download assets once, serve them from the disk cache afterwards")]
#[command(after_help = "Quick start:\n    \
    Fetch by id:         assetcache fetch 1234\n    \
    Fetch by URL:        assetcache fetch-url 1234 https://cdn.example.com/model.glb\n    \
    Inspect the cache:   assetcache list\n    \
    Evict stale assets:  assetcache sweep")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache root directory (overrides config and ASSETCACHE_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Metadata service base URL (overrides config and ASSETCACHE_METADATA_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download an asset by id through the metadata service
    ///
    /// Examples:
    ///   assetcache fetch 1234
    ///   assetcache fetch 1234 --timeout 60
    Fetch {
        /// Asset id
        id: String,

        /// Give up after this many seconds (waits indefinitely when omitted)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Download an asset from a known content URL
    FetchUrl {
        /// Asset id to cache the content under
        id: String,

        /// Content URL
        url: String,

        /// Give up after this many seconds (waits indefinitely when omitted)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Evict assets not accessed within the retention window
    Sweep,

    /// List cached assets
    List,

    /// Print the cache root directory
    Path,

    /// Show the effective configuration
    Config,
}

/// Output settings shared by the command handlers.
struct Output {
    color: bool,
}

impl Output {
    fn ok(&self, message: &str) {
        println!("{} {}", paint(symbols::SUCCESS, colors::GREEN, self.color), message);
    }

    fn warn(&self, message: &str) {
        eprintln!("{} {}", paint(symbols::WARNING, colors::YELLOW, self.color), message);
    }

    fn fail(&self, message: &str) {
        eprintln!("{}", paint(message.trim_end(), colors::RED, self.color));
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Effective configuration: file, then environment, then flags.
fn resolve_config(cli: &Cli) -> Result<AssetConfig> {
    let mut config = load_config()?;
    if let Some(root) = &cli.root {
        config.root_dir = Some(root.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        config.metadata_endpoint = Some(endpoint.clone());
    }
    Ok(config)
}

fn wait_for(mut handle: AssetHandle, timeout: Option<u64>) -> Option<AssetFile> {
    match timeout {
        Some(secs) => handle.wait_timeout(Duration::from_secs(secs)),
        None => Some(handle.wait()),
    }
}

fn run_fetch(
    config: AssetConfig,
    id: &str,
    url: Option<&str>,
    timeout: Option<u64>,
    out: &Output,
) -> Result<i32> {
    let endpoint_missing = url.is_none() && config.metadata_endpoint.is_none();
    let manager = AssetManager::from_config(config).context("Failed to create HTTP client")?;
    let handle = match url {
        Some(url) => manager.download_asset_from_url(id, url),
        None => manager.download_asset(id),
    };

    let code = match wait_for(handle, timeout) {
        Some(file) => match file.path() {
            Some(path) => {
                out.ok(&format!("{} {} {}", id, symbols::ARROW, path.display()));
                SUCCESS
            }
            // Not cached, and there is nowhere to resolve it from
            None if endpoint_missing => {
                out.fail(&format_error(
                    &format!("Asset {} is not cached and no metadata endpoint is configured", id),
                    &["Neither the config file nor ASSETCACHE_METADATA_ENDPOINT sets one"],
                    &[
                        "Pass --endpoint https://assets.example.com/api/assets",
                        "Or use `assetcache fetch-url <ID> <URL>` when the content URL is known",
                    ],
                ));
                CONFIG
            }
            None => {
                out.fail(&format_error(
                    &format!("Could not download asset {}", id),
                    &[
                        "The asset id is not known to the metadata service",
                        "The metadata or content server is unreachable",
                        "The cache directory is not writable",
                    ],
                    &["Run again with -v to see the failing stage"],
                ));
                ERROR
            }
        },
        None => {
            out.warn(&format!("Timed out waiting for asset {}", id));
            TEMP_FAIL
        }
    };

    manager.shutdown();
    Ok(code)
}

fn run_sweep(config: &AssetConfig, out: &Output) -> i32 {
    let store = CacheStore::new(config.resolve_root());
    let report = store.sweep_expired(SystemClock.now(), config.retention());

    out.ok(&format!(
        "Scanned {} assets: {} evicted, {} retained, {} skipped",
        report.scanned, report.evicted, report.retained, report.skipped
    ));
    if report.failed > 0 {
        out.warn(&format!("{} expired assets could not be deleted", report.failed));
        return IO_ERR;
    }
    SUCCESS
}

fn run_list(config: &AssetConfig, out: &Output) -> Result<i32> {
    let store = CacheStore::new(config.resolve_root());
    let entries = match store.entries() {
        Ok(entries) => entries,
        Err(e) => {
            out.fail(&format_error(
                &e.to_string(),
                &[],
                &["Check the permissions of the cache root"],
            ));
            return Ok(IO_ERR);
        }
    };

    if entries.is_empty() {
        println!("No cached assets in {}", store.root().display());
        return Ok(SUCCESS);
    }

    for entry in entries {
        let last_access = entry
            .last_access
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());

        match entry.file {
            Some(file) => {
                let size = std::fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
                let name = file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                println!(
                    "{}  {}  {}  {}",
                    paint(&entry.asset_id, colors::CYAN, out.color),
                    name,
                    format_bytes(size),
                    paint(&last_access, colors::DIM, out.color)
                );
            }
            None => out.warn(&format!("{} has no content file", entry.asset_id)),
        }
    }
    Ok(SUCCESS)
}

fn run_config(config: &AssetConfig, out: &Output) -> Result<i32> {
    println!("{}", paint("Configuration", colors::BOLD, out.color));
    match config_path() {
        Ok(path) => println!("  file:              {}", path.display()),
        Err(_) => println!("  file:              (no config directory)"),
    }
    println!("  root:              {}", config.resolve_root().display());
    println!("  retention:         {} days", config.retention_days);
    println!(
        "  metadata endpoint: {}",
        config.metadata_endpoint.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  access token:      {}",
        config
            .access_token
            .as_deref()
            .map(|token| mask_sensitive(token, 4))
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("  poll interval:     {} ms", config.poll_interval_ms);
    println!("  drain limit:       {}", config.drain_limit());
    Ok(SUCCESS)
}

fn run(cli: Cli) -> Result<i32> {
    let out = Output {
        color: !cli.no_color && std::io::stdout().is_terminal(),
    };

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            out.fail(&format_error(
                "Failed to load configuration",
                &[&format!("{:#}", e)],
                &["Fix or remove the config file shown by `assetcache config`"],
            ));
            return Ok(CONFIG);
        }
    };

    match &cli.command {
        Commands::Fetch { id, timeout } => run_fetch(config, id, None, *timeout, &out),
        Commands::FetchUrl { id, url, timeout } => {
            run_fetch(config, id, Some(url), *timeout, &out)
        }
        Commands::Sweep => Ok(run_sweep(&config, &out)),
        Commands::List => run_list(&config, &out),
        Commands::Path => {
            println!("{}", config.resolve_root().display());
            Ok(SUCCESS)
        }
        Commands::Config => run_config(&config, &out),
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { USAGE } else { SUCCESS };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", symbols::ERROR, e);
            std::process::exit(ERROR);
        }
    }
}
