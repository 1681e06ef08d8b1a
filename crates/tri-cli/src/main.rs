// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tri_cli::{doctor, report, run_pipeline};
use tri_config::load_config;

const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "tri", version, about = "Triangulation pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file. Defaults are used if omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline over a root path and wait for it to settle.
    Run {
        /// Root directory to analyze.
        root: PathBuf,

        /// SQLite file to persist the relational store to. Omit to keep
        /// results in memory (fine for a one-shot run; `tri status`
        /// afterward has nothing to read).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Jobs drained per queue per tick (approximates "N processes" per worker kind).
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },

    /// Print what's known about a run from a persisted store.
    Status {
        /// Run id printed by a prior `tri run --db ...` invocation.
        run_id: String,

        /// SQLite file the run was persisted to.
        #[arg(long)]
        db: PathBuf,
    },

    /// Validate the active configuration and print resolved values.
    Doctor,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { EnvFilter::new("tri=debug") } else { EnvFilter::new("tri=info") };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = dispatch(cli).await;
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { root, db, workers } => {
            let summary = run_pipeline(&root, &config, db.as_deref(), workers).await?;
            println!("run_id:         {}", summary.run_id);
            println!("status:         {:?}", summary.status);
            println!("file jobs:      {}", summary.file_job_count);
            println!("directory jobs: {}", summary.dir_job_count);
            println!("dead letters:   {}", summary.dead_letter_count);
            println!("files marked:   {}", summary.files_marked_deleted);
            println!("files swept:    {}", summary.files_swept);
            Ok(())
        }
        Commands::Status { run_id, db } => {
            let report = report(&db, &run_id)?;
            println!("{report}");
            Ok(())
        }
        Commands::Doctor => {
            let report = doctor(&config);
            println!("{report}");
            Ok(())
        }
    }
}
