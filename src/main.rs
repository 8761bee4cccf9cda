//! `taskengine` CLI — a thin client over the library for local operation:
//! running migrations, inspecting tasks, and driving a plan to completion
//! without standing up the HTTP surface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use taskengine::config::ConfigLoader;
use taskengine::error::EngineError;
use taskengine::evaluation::EvaluationLoop;
use taskengine::repository::models::TaskStatus;
use taskengine::repository::TaskRepository;
use taskengine::scheduler::{CancelSignal, Scheduler, Strategy};

#[derive(Parser)]
#[command(name = "taskengine", version, about = "AI-driven task orchestration engine")]
struct Cli {
    #[arg(long, env = "TASKENGINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run startup migrations against the configured database and exit.
    Migrate,
    /// Print a task as JSON.
    ShowTask { id: i64 },
    /// Transition a task's status.
    SetStatus {
        id: i64,
        status: String,
        #[arg(long)]
        explicit_rerun: bool,
    },
    /// Drive a root task's subtree to completion via the scheduler.
    Run {
        root_id: i64,
        #[arg(long)]
        strategy: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = ConfigLoader::load(cli.config.as_deref())?;
    taskengine::observability::init(&cfg.logging);

    let repo = Arc::new(TaskRepository::open(&cfg.database_path)?);

    match cli.command {
        Command::Migrate => {
            tracing::info!("migrations applied");
        }
        Command::ShowTask { id } => {
            let task = repo.get_task(id)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Command::SetStatus { id, status, explicit_rerun } => {
            let next = TaskStatus::parse(&status).ok_or_else(|| EngineError::Validation {
                message: format!("unknown status '{status}'"),
            })?;
            repo.update_task_status(id, next, explicit_rerun)?;
            println!("task {id} -> {status}");
        }
        Command::Run { root_id, strategy } => {
            let strategy = Strategy::parse(strategy.as_deref().unwrap_or(&cfg.scheduler.default_strategy))?;
            let executor = taskengine::llm::build_executor(&cfg.llm)?;
            let evaluator = taskengine::llm::build_evaluator(&cfg.llm, &cfg.evaluation)?;
            let evaluation = Arc::new(EvaluationLoop::new(repo.clone(), cfg.evaluation.clone()));
            let scheduler = Scheduler::new(repo.clone(), executor, Some(evaluation), Some(evaluator), cfg.scheduler.clone());
            let summary = scheduler.run_root(root_id, strategy, CancelSignal::new()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
