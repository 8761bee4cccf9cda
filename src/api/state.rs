use std::sync::Arc;

use crate::config::AppConfig;
use crate::embedding::EmbeddingService;
use crate::evaluation::{EvaluationLoop, Evaluator};
use crate::jobs::JobRegistry;
use crate::repository::TaskRepository;
use crate::scheduler::{Scheduler, TaskExecutor};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<TaskRepository>,
    pub embedding: Arc<EmbeddingService>,
    pub jobs: Arc<JobRegistry>,
    pub config: Arc<AppConfig>,
    pub scheduler: Arc<Scheduler>,
    pub evaluation: Arc<EvaluationLoop>,
    pub executor: Arc<dyn TaskExecutor>,
    pub evaluator: Arc<dyn Evaluator>,
}
