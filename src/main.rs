use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mend::config::Config;
use mend::db::{DbHandle, MendDb};

mod cmd;

#[derive(Parser)]
#[command(name = "mend")]
#[command(version, about = "Self-healing pipeline orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Database path (overrides MEND_DB_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a workflow
    Create {
        /// What the pipeline should accomplish
        task: String,

        /// Module the work belongs to
        #[arg(short, long)]
        module: String,

        /// Workflow type: feature, bugfix, refactor, documentation, review, new_module
        #[arg(short = 't', long = "type", default_value = "feature")]
        workflow_type: String,

        /// Branch pushed on clean completion of a root pipeline
        #[arg(short, long, default_value = "")]
        branch: String,

        /// Working directory the stages run against
        #[arg(short = 'd', long, default_value = ".")]
        dir: String,

        /// Parent workflow id, for sub-workflows
        #[arg(long)]
        parent: Option<i64>,

        /// Expand structured plans into child workflows automatically
        #[arg(long)]
        auto_expand: bool,
    },
    /// Execute a workflow through its stage sequence
    Run { id: i64 },
    /// List workflows
    List,
    /// Show one workflow with its stage executions
    Status { id: i64 },
    /// Pause a workflow at its next stage boundary
    Pause {
        id: i64,

        /// Reason shown in the workflow's message feed
        #[arg(short, long, default_value = "operator pause")]
        reason: String,
    },
    /// Clear a workflow's paused flag
    Resume { id: i64 },
    /// Cancel a workflow at its next stage boundary
    Cancel { id: i64 },
    /// Queue an instruction for the workflow's next stage
    Instruct { id: i64, text: String },
    /// Show recent execution log entries
    Logs {
        /// Limit to one workflow
        #[arg(long)]
        workflow: Option<i64>,

        /// Number of entries
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env(cli.verbose);
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = DbHandle::new(MendDb::new(&db_path)?);

    match &cli.command {
        Commands::Create {
            task,
            module,
            workflow_type,
            branch,
            dir,
            parent,
            auto_expand,
        } => {
            cmd::cmd_create(&db, task, module, workflow_type, branch, dir, *parent, *auto_expand)
                .await?;
        }
        Commands::Run { id } => cmd::cmd_run(&db, &config, *id).await?,
        Commands::List => cmd::cmd_list(&db).await?,
        Commands::Status { id } => cmd::cmd_status(&db, *id).await?,
        Commands::Pause { id, reason } => cmd::cmd_pause(&db, *id, reason).await?,
        Commands::Resume { id } => cmd::cmd_resume(&db, *id).await?,
        Commands::Cancel { id } => cmd::cmd_cancel(&db, *id).await?,
        Commands::Instruct { id, text } => cmd::cmd_instruct(&db, *id, text).await?,
        Commands::Logs { workflow, limit } => cmd::cmd_logs(&db, *workflow, *limit).await?,
    }

    Ok(())
}
