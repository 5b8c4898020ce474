//! Hashwatch CLI
//!
//! Command-line interface for Hashwatch operations:
//! - Look up a hash or check an image against a running daemon
//! - Show status and trigger a refresh
//! - Build, query and verify an index directly on disk

use clap::{Parser, Subcommand};
use hashwatch::api::dto::MatchDto;
use hashwatch::index::{
    GenerationStore, IndexBuilder, QueryEngine, DUMP_FILE, HASHES_FILE, OFFSETS_FILE,
};
use hashwatch::refresh::{decompress, DEFAULT_BUFFER_BYTES};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hashwatch-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Perceptual-hash matching index tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://127.0.0.1:8090", global = true)]
    pub api_url: String,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Find posts whose hash is near HASH
    Match {
        /// Signed 64-bit perceptual hash
        #[arg(allow_hyphen_values = true)]
        hash: i64,
    },

    /// Hash an image on the server host and find matching posts
    Check {
        /// Image path, as seen by the server
        path: PathBuf,
    },

    /// Show daemon status
    Status,

    /// Ask the daemon to check for a new dump now
    Refresh,

    /// Build and publish a generation from a local dump
    Build {
        /// Dump file (.csv or .csv.gz)
        dump: PathBuf,
        /// Data directory
        data_dir: PathBuf,
        /// Pairs sorted in memory per run
        #[arg(long, default_value_t = hashwatch::index::DEFAULT_PAIRS_PER_RUN)]
        pairs_per_run: usize,
    },

    /// Query a data directory without a running daemon
    Lookup {
        /// Data directory
        data_dir: PathBuf,
        /// Signed 64-bit perceptual hash
        #[arg(allow_hyphen_values = true)]
        hash: i64,
        /// Maximum Hamming distance (0-3)
        #[arg(short, long, default_value = "3")]
        max_distance: u32,
    },

    /// Recompute the checksums of the published generation
    Verify {
        /// Data directory
        data_dir: PathBuf,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Match { hash } => {
            let response = client
                .get(format!("{}/api/v1/matches/{}", cli.api_url, hash))
                .send()
                .await
                .unwrap_or_else(|e| connection_failed(&cli.api_url, e));

            let data = json_or_exit(response, "Lookup failed").await?;
            print_matches(&data, &cli.format)?;
        }

        Commands::Check { path } => {
            let body = serde_json::json!({ "path": path });
            let response = client
                .post(format!("{}/api/v1/check", cli.api_url))
                .json(&body)
                .send()
                .await
                .unwrap_or_else(|e| connection_failed(&cli.api_url, e));

            let data = json_or_exit(response, "Check failed").await?;
            if cli.format != "json" {
                match data["hash"].as_i64() {
                    Some(hash) => println!("Hash: {}", hash),
                    None => println!("Image could not be hashed"),
                }
                println!();
            }
            print_matches(&data, &cli.format)?;
        }

        Commands::Status => {
            let response = client
                .get(format!("{}/api/v1/status", cli.api_url))
                .send()
                .await
                .unwrap_or_else(|e| connection_failed(&cli.api_url, e));
            let status = json_or_exit(response, "Status failed").await?;

            let uptime = match client.get(format!("{}/health", cli.api_url)).send().await {
                Ok(resp) => resp
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|h| h["uptime_seconds"].as_u64()),
                Err(_) => None,
            };

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status, uptime);
            }
        }

        Commands::Refresh => {
            let response = client
                .post(format!("{}/api/v1/refresh", cli.api_url))
                .send()
                .await
                .unwrap_or_else(|e| connection_failed(&cli.api_url, e));

            let data = json_or_exit(response, "Refresh failed").await?;
            println!(
                "Refresh {}. Run `hashwatch-cli status` to follow progress.",
                data["status"].as_str().unwrap_or("unknown")
            );
        }

        Commands::Build {
            dump,
            data_dir,
            pairs_per_run,
        } => {
            if !dump.is_file() {
                eprintln!("File not found: {:?}", dump);
                std::process::exit(1);
            }

            let store = GenerationStore::open(&data_dir)?;
            let staging = store.reset_staging()?;
            stage_dump(&dump, &staging.join(DUMP_FILE))?;

            let stats = IndexBuilder::new(data_dir.join("work"))
                .pairs_per_run(pairs_per_run)
                .build(
                    &staging.join(DUMP_FILE),
                    &staging.join(HASHES_FILE),
                    &staging.join(OFFSETS_FILE),
                )?;

            let source = dump.canonicalize().unwrap_or(dump).display().to_string();
            let generation = store.publish_staging(
                stats.records,
                stats.hash_crc32,
                stats.offset_crc32,
                Some(source),
            )?;

            println!("Build results:");
            println!("  Records indexed: {}", stats.records);
            println!("  Lines skipped: {}", stats.skipped);
            println!("  Sorted runs: {}", stats.runs);
            println!();
            println!(
                "Published generation {} in {:?}",
                generation.manifest().generation,
                generation.dir()
            );
        }

        Commands::Lookup {
            data_dir,
            hash,
            max_distance,
        } => {
            let store = Arc::new(GenerationStore::open(&data_dir)?);
            if store.current().is_none() {
                eprintln!("No generation published in {:?}", data_dir);
                eprintln!();
                eprintln!("Build one with:");
                eprintln!("  hashwatch-cli build <dump.csv.gz> {}", data_dir.display());
                std::process::exit(1);
            }

            let engine = QueryEngine::new(store, max_distance);
            let mut matches = engine.find_matches(hash);
            matches.sort_by_key(|m| m.posted_at);

            let matches: Vec<MatchDto> = matches.into_iter().map(MatchDto::from).collect();
            let data = serde_json::json!({ "hash": hash, "matches": matches });
            print_matches(&data, &cli.format)?;
        }

        Commands::Verify { data_dir } => {
            let store = GenerationStore::open(&data_dir)?;
            let Some(manifest) = store.manifest() else {
                eprintln!("No generation published in {:?}", data_dir);
                std::process::exit(1);
            };

            match store.verify() {
                Ok(()) => println!(
                    "Generation {} OK ({} records)",
                    manifest.generation, manifest.record_count
                ),
                Err(e) => {
                    eprintln!("Generation {} failed verification: {}", manifest.generation, e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Config { output } => {
            let config = hashwatch::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

/// Place a private copy of the dump in staging, inflating it if gzipped.
///
/// The published dump is memory-mapped, so it must never share storage
/// with a file the operator may still edit.
fn stage_dump(dump: &Path, dest: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if dump.extension().is_some_and(|ext| ext == "gz") {
        decompress(dump, dest, DEFAULT_BUFFER_BYTES)?;
    } else {
        std::fs::copy(dump, dest)?;
    }
    Ok(())
}

fn connection_failed(api_url: &str, e: reqwest::Error) -> ! {
    eprintln!("Cannot connect to Hashwatch API at {}", api_url);
    eprintln!("Error: {}", e);
    eprintln!();
    eprintln!("Make sure the daemon is running:");
    eprintln!("  cargo run --bin hashwatch");
    std::process::exit(1);
}

async fn json_or_exit(
    response: reqwest::Response,
    what: &str,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        eprintln!("{} ({}): {}", what, status, text);
        std::process::exit(1);
    }
    Ok(response.json().await?)
}

fn print_matches(data: &serde_json::Value, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(data)?);
        return Ok(());
    }

    let matches = match data["matches"].as_array() {
        Some(m) if !m.is_empty() => m,
        _ => {
            println!("No matches");
            return Ok(());
        }
    };

    println!(
        "{:<12} {:<12} {:<20} {:<12} {:<5} {}",
        "Site", "ID", "Artist", "Posted", "Dist", "URL"
    );
    println!("{}", "-".repeat(90));

    for m in matches {
        let posted = m["posted_at"]
            .as_i64()
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<12} {:<12} {:<20} {:<12} {:<5} {}",
            m["site"].as_str().unwrap_or("-"),
            m["id"].as_i64().unwrap_or(0),
            truncate(m["artist"].as_str().unwrap_or("-"), 20),
            posted,
            m["distance"].as_u64().unwrap_or(0),
            m["url"].as_str().unwrap_or("-")
        );
    }

    println!();
    println!("{} match(es)", matches.len());
    Ok(())
}

fn print_status(status: &serde_json::Value, uptime: Option<u64>) {
    println!("Hashwatch v{}", env!("CARGO_PKG_VERSION"));
    println!();

    if status["enabled"].as_bool().unwrap_or(false) {
        println!("Matching: enabled");
    } else {
        println!(
            "Matching: disabled ({})",
            status["disabled_reason"].as_str().unwrap_or("unknown reason")
        );
    }

    println!();
    match status.get("generation").filter(|g| !g.is_null()) {
        Some(generation) => {
            println!("Index:");
            println!("  Generation: {}", generation["generation"].as_u64().unwrap_or(0));
            println!("  Records: {}", generation["record_count"].as_u64().unwrap_or(0));
            if let Some(created) = generation["created_at"]
                .as_i64()
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            {
                println!("  Published: {}", created.format("%Y-%m-%dT%H:%M:%SZ"));
            }
            if let Some(url) = generation["source_url"].as_str() {
                println!("  Source: {}", url);
            }
        }
        None => println!("Index: none published"),
    }
    if let Some(retired) = status["retired_generations"].as_u64().filter(|n| *n > 0) {
        println!("  Retired, still in use: {}", retired);
    }

    if let Some(refresh) = status.get("refresh").filter(|r| !r.is_null()) {
        println!();
        println!("Refresh:");
        println!("  Phase: {}", refresh["phase"].as_str().unwrap_or("unknown"));
        if let Some(checked) = refresh["state"]["last_checked"]
            .as_i64()
            .filter(|ts| *ts > 0)
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        {
            println!("  Last checked: {}", checked.format("%Y-%m-%dT%H:%M:%SZ"));
        }
        if let Some(url) = refresh["state"]["last_url"].as_str() {
            println!("  Last dump: {}", url);
        }
        if let Some(error) = refresh["last_error"].as_str() {
            println!("  Last error: {}", error);
        }
    }

    if let Some(uptime) = uptime {
        println!();
        println!("Uptime: {}", format_duration(uptime));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{}~", cut)
    }
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}
