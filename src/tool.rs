// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CLI tool for interacting with a SiloBang store.

use clap::{ArgAction, Parser, Subcommand};
use silobang::{ByteRange, CancellationToken, Config};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

macro_rules! die {
    ($fmt:literal, $($arg:tt)*) => {{
        eprintln!($fmt, $($arg)*);
        std::process::exit(1);
    }};
}

/// CLI tool for interacting with a SiloBang store
#[derive(Parser, Debug)]
#[command(name = "silobang")]
#[command(about = "CLI tool for interacting with a SiloBang store")]
struct ToolArgs {
    /// Suppress all output except for errors. This overrides the -v flag.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Turn on verbose output. Supply -v multiple times to increase verbosity.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the store's working directory (created if it doesn't exist)
    store_path: PathBuf,

    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(Subcommand, Debug)]
enum ToolCommand {
    /// Create a new topic
    CreateTopic { topic: String },
    /// Store a file's bytes under a topic, printing the resulting hash
    Put {
        topic: String,
        path: PathBuf,
        /// Hash of a same-topic asset this one derives from
        #[arg(long)]
        parent: Option<String>,
    },
    /// Fetch an asset's bytes by hash
    Get {
        hash: String,
        /// Destination path; defaults to stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Re-verify the payload's hash before returning it
        #[arg(long)]
        verify: bool,
    },
    /// Print an asset's metadata
    Stat { hash: String },
    /// Verify a topic's integrity
    Verify { topic: String },
    /// Attempt to repair a topic (truncate torn tail, restore orchestrator rows)
    Recover { topic: String },
}

fn init_tracing(quiet: bool, verbose: u8) -> LevelFilter {
    let level_filter = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(level_filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    level_filter
}

fn main() {
    let args = ToolArgs::parse();
    init_tracing(args.quiet, args.verbose);

    tracing::info!(
        "opening store at {} ({} {})",
        args.store_path.display(),
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let store = match Config::new(&args.store_path).open() {
        Ok(s) => s,
        Err(e) => die!("error opening store: {}", e),
    };

    match args.command {
        ToolCommand::CreateTopic { topic } => match store.create_topic(&topic) {
            Ok(()) => println!("OK (created topic {topic:?})"),
            Err(e) => die!("error: {}", e),
        },
        ToolCommand::Put { topic, path, parent } => {
            let payload = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => die!("error reading {}: {}", path.display(), e),
            };
            let origin_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match store.put(&topic, &payload, &origin_name, parent.as_deref()) {
                Ok(result) => println!("{}", result.hash),
                Err(e) => die!("error: {}", e),
            }
        }
        ToolCommand::Get { hash, out, verify } => {
            match store.get(&hash, None::<ByteRange>, verify) {
                Ok(bytes) => match out {
                    Some(path) => {
                        if let Err(e) = std::fs::write(&path, &bytes) {
                            die!("error writing {}: {}", path.display(), e);
                        }
                        println!("OK ({} bytes written to {})", bytes.len(), path.display());
                    }
                    None => {
                        use std::io::Write;
                        if std::io::stdout().write_all(&bytes).is_err() {
                            die!("error writing to stdout");
                        }
                    }
                },
                Err(e) => die!("error: {}", e),
            }
        }
        ToolCommand::Stat { hash } => match store.stat(&hash) {
            Ok(stat) => {
                println!("hash:        {}", stat.hash);
                println!("topic:       {}", stat.topic);
                println!("size:        {} bytes", stat.size);
                println!("origin name: {}", stat.origin_name);
                println!("mime:        {}", stat.mime);
                println!("parent:      {}", stat.parent_hash.as_deref().unwrap_or("(none)"));
                println!("created at:  {}", stat.created_at);
            }
            Err(e) => die!("error: {}", e),
        },
        ToolCommand::Verify { topic } => {
            let cancel = CancellationToken::new();
            match store.verify(&topic, &cancel, Some(|p: silobang::VerifyProgress| {
                eprintln!("checked {}/{} assets, {} issues so far", p.assets_checked, p.assets_total, p.issues_found);
            })) {
                Ok(report) => {
                    println!("assets checked: {}", report.assets_checked);
                    println!("issues found:   {}", report.total_issues);
                    for issue in &report.issues {
                        println!("  [{}] {}", issue.kind.as_str(), issue.detail);
                    }
                    if report.total_issues > report.issues.len() {
                        println!("  ... and {} more not shown", report.total_issues - report.issues.len());
                    }
                    if !report.is_healthy() {
                        std::process::exit(1);
                    }
                }
                Err(e) => die!("error: {}", e),
            }
        }
        ToolCommand::Recover { topic } => match store.recover(&topic) {
            Ok(report) => {
                if let Some(segment_id) = report.truncated_segment {
                    println!("truncated {} bytes from segment {}", report.truncated_bytes, segment_id);
                }
                println!("orchestrator rows restored: {}", report.orchestrator_rows_restored);
            }
            Err(e) => die!("error: {}", e),
        },
    }
}
