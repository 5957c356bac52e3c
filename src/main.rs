#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};
use uuid::Uuid;

use lab_provision::config::load_config;
use lab_provision::core::SelectionMode;
use lab_provision::provision_cmd::ReportTargets;
use lab_provision::store::PgLabStore;
use lab_provision::{ProvisionResult, history_cmd, images_cmd, provision_cmd, records_cmd, render_cmd};

#[derive(Parser, Debug)]
#[command(name = "lab-provision")]
#[command(about = "Provision lab requests with Terraform and record the instances", long_about = None)]
struct Cli {
    /// Enable verbose logging (or set LAB_PROVISION_LOG)
    #[arg(long)]
    verbose: bool,

    /// Path to config file (default: ./lab-provision.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision the next lab request and record its instance id
    Provision {
        /// How the next lab request is selected
        #[arg(long, value_enum, default_value_t = SelectionMode::Unprovisioned)]
        mode: SelectionMode,
        /// Directory for per-lab Terraform working directories
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Path to the terraform binary
        #[arg(long)]
        terraform: Option<PathBuf>,
        /// Timeout seconds for each terraform command (0 = none)
        #[arg(long)]
        timeout: Option<u64>,
        /// Leave infrastructure in place when a later step fails
        #[arg(long)]
        no_rollback: bool,
        /// Write machine-readable JSON report to this file
        #[arg(long)]
        json: Option<PathBuf>,
        /// Append the run report to this JSONL history file
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Render a Terraform document for explicit values (dry run)
    Render {
        /// Lab id used for the directory and resource names (random if omitted)
        #[arg(long)]
        lab_id: Option<Uuid>,
        #[arg(long)]
        instance_type: String,
        /// Root volume size in GB
        #[arg(long)]
        storage: u32,
        #[arg(long)]
        os: String,
        #[arg(long, default_value = "")]
        title: String,
        /// Output directory (default: configured workspace)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// List provisioning records
    Records {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the OS to image catalog in effect
    Images,

    /// Show runs from a JSONL history file
    History {
        /// Path to JSONL history
        #[arg(long)]
        file: PathBuf,
        /// Only runs for this lab
        #[arg(long)]
        lab_id: Option<Uuid>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let env = std::env::var("LAB_PROVISION_LOG").unwrap_or_else(|_| {
        if verbose { "lab_provision=debug".to_string() } else { "lab_provision=info".to_string() }
    });
    let _ = tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_env_filter(EnvFilter::new(env))
        .try_init();
}

fn dispatch(cli: Cli) -> ProvisionResult<()> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Provision { mode, workspace, terraform, timeout, no_rollback, json, history } => {
            if let Some(dir) = workspace {
                config.workspace = dir;
            }
            if let Some(bin) = terraform {
                config.terraform.binary = bin;
            }
            if let Some(secs) = timeout {
                config.terraform.timeout_secs = secs;
            }
            let targets = ReportTargets { json, history };
            provision_cmd::run(&config, mode, !no_rollback, &targets)
        }
        Commands::Render { lab_id, instance_type, storage, os, title, workspace } => {
            let lab = render_cmd::lab_from_args(lab_id, instance_type, storage, os, title);
            let dir = workspace.unwrap_or_else(|| config.workspace.clone());
            render_cmd::run(&config, &dir, &lab).map(|_| ())
        }
        Commands::Records { json } => {
            let store = PgLabStore::new(config.database.clone());
            records_cmd::run(&store, json)
        }
        Commands::Images => images_cmd::run(&config.image_catalog()),
        Commands::History { file, lab_id, json } => history_cmd::run(file, lab_id, json),
    }
}

fn main() {
    color_eyre::install().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dispatch(cli) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
