//! 4.G — task scheduler: orders tasks by strategy and drives each through
//! context assembly, execution, optional evaluation, and status transition.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::SchedulerConfig;
use crate::error::{EngineError, EngineResult};
use crate::evaluation::{EvaluationLoop, Evaluator};
use crate::repository::models::{LinkKind, Task, TaskStatus};
use crate::repository::TaskRepository;

/// External executor collaborator (the remote LLM, out of scope per §1).
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, prompt: &str) -> EngineResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Bfs,
    Dag,
    Postorder,
}

impl Strategy {
    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "bfs" => Ok(Strategy::Bfs),
            "dag" => Ok(Strategy::Dag),
            "postorder" => Ok(Strategy::Postorder),
            other => Err(EngineError::Validation {
                message: format!("unknown scheduling strategy '{other}'"),
            }),
        }
    }
}

/// A cooperative cancel signal shared across one scheduler run.
#[derive(Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: i64,
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub results: Vec<TaskResult>,
}

/// Groups `atomic` tasks into ordered levels; tasks within a level share no
/// mutual `requires` edge and may run in parallel.
pub fn build_levels(tasks: &[Task], requires_edges: &[(i64, i64)], strategy: Strategy) -> EngineResult<Vec<Vec<i64>>> {
    match strategy {
        Strategy::Bfs => Ok(build_bfs_levels(tasks)),
        Strategy::Dag => build_dag_levels(tasks, requires_edges),
        Strategy::Postorder => Ok(vec![build_postorder(tasks)]),
    }
}

fn build_bfs_levels(tasks: &[Task]) -> Vec<Vec<i64>> {
    let mut by_parent: HashMap<Option<i64>, Vec<&Task>> = HashMap::new();
    for t in tasks {
        by_parent.entry(t.parent_id).or_default().push(t);
    }
    for group in by_parent.values_mut() {
        group.sort_by_key(|t| (t.priority, t.id));
    }

    let mut levels = Vec::new();
    let roots: Vec<i64> = tasks.iter().filter(|t| t.parent_id.is_none()).map(|t| t.id).collect();
    let mut frontier = roots;
    while !frontier.is_empty() {
        levels.push(frontier.clone());
        let mut next = Vec::new();
        for id in &frontier {
            if let Some(children) = by_parent.get(&Some(*id)) {
                next.extend(children.iter().map(|t| t.id));
            }
        }
        frontier = next;
    }
    levels
}

/// Kahn's algorithm over `requires` edges: `(from, to)` means `from` requires
/// `to`, i.e. `to` must complete first.
fn build_dag_levels(tasks: &[Task], requires_edges: &[(i64, i64)]) -> EngineResult<Vec<Vec<i64>>> {
    let priority: HashMap<i64, (i64, i64)> = tasks.iter().map(|t| (t.id, (t.priority, t.id))).collect();
    let mut indegree: HashMap<i64, usize> = tasks.iter().map(|t| (t.id, 0)).collect();
    let mut dependents: HashMap<i64, Vec<i64>> = HashMap::new();

    for &(from, to) in requires_edges {
        *indegree.entry(from).or_insert(0) += 1;
        dependents.entry(to).or_default().push(from);
    }

    let mut levels = Vec::new();
    let mut remaining: HashSet<i64> = tasks.iter().map(|t| t.id).collect();
    let mut ready: Vec<i64> = remaining.iter().copied().filter(|id| indegree.get(id).copied().unwrap_or(0) == 0).collect();

    while !ready.is_empty() {
        ready.sort_by_key(|id| priority.get(id).copied().unwrap_or((0, *id)));
        for id in &ready {
            remaining.remove(id);
        }
        levels.push(ready.clone());

        let mut next_ready = Vec::new();
        for id in &ready {
            if let Some(deps) = dependents.get(id) {
                for dep in deps {
                    if let Some(count) = indegree.get_mut(dep) {
                        *count -= 1;
                        if *count == 0 && remaining.contains(dep) {
                            next_ready.push(*dep);
                        }
                    }
                }
            }
        }
        ready = next_ready;
    }

    if !remaining.is_empty() {
        return Err(EngineError::Validation {
            message: "requires graph contains a cycle, cannot compute DAG order".into(),
        });
    }

    Ok(levels)
}

fn build_postorder(tasks: &[Task]) -> Vec<i64> {
    let mut children: HashMap<Option<i64>, Vec<&Task>> = HashMap::new();
    for t in tasks {
        children.entry(t.parent_id).or_default().push(t);
    }
    for group in children.values_mut() {
        group.sort_by_key(|t| (t.priority, t.id));
    }

    let mut order = Vec::new();
    let roots: Vec<i64> = {
        let mut r: Vec<&Task> = tasks.iter().filter(|t| t.parent_id.is_none()).collect();
        r.sort_by_key(|t| (t.priority, t.id));
        r.iter().map(|t| t.id).collect()
    };
    for root in roots {
        visit_postorder(root, &children, &mut order);
    }
    order
}

fn visit_postorder(id: i64, children: &HashMap<Option<i64>, Vec<&Task>>, order: &mut Vec<i64>) {
    if let Some(kids) = children.get(&Some(id)) {
        for k in kids {
            visit_postorder(k.id, children, order);
        }
    }
    order.push(id);
}

pub struct Scheduler {
    repo: Arc<TaskRepository>,
    executor: Arc<dyn TaskExecutor>,
    evaluation: Option<Arc<EvaluationLoop>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    cfg: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        repo: Arc<TaskRepository>,
        executor: Arc<dyn TaskExecutor>,
        evaluation: Option<Arc<EvaluationLoop>>,
        evaluator: Option<Arc<dyn Evaluator>>,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            repo,
            executor,
            evaluation,
            evaluator,
            cfg,
        }
    }

    /// Drives a root's full subtree to completion per the configured
    /// strategy, bounded by `scheduler.parallelism`.
    pub async fn run_root(&self, root_id: i64, strategy: Strategy, cancel: CancelSignal) -> EngineResult<RunSummary> {
        let root = self.repo.get_task(root_id)?;
        let mut tasks = self.repo.get_subtree(root_id, 64)?;
        let links = self.repo.list_links(&root.workflow_id)?;
        tasks.push(root);
        let requires_edges: Vec<(i64, i64)> = links
            .iter()
            .filter(|l| l.kind == LinkKind::Requires)
            .map(|l| (l.from_task, l.to_task))
            .collect();

        let atomics: Vec<Task> = tasks.into_iter().filter(|t| t.task_type == crate::repository::models::TaskType::Atomic).collect();
        let levels = build_levels(&atomics, &requires_edges, strategy)?;

        let semaphore = Arc::new(Semaphore::new(self.cfg.parallelism.max(1)));
        let mut failed: HashSet<i64> = HashSet::new();
        let mut summary = RunSummary::default();

        for level in levels {
            if cancel.is_cancelled() {
                break;
            }
            let mut handles = Vec::new();
            for task_id in level {
                if failed.contains(&task_id) {
                    self.repo.update_task_status(task_id, TaskStatus::Failed, false).ok();
                    summary.results.push(TaskResult {
                        task_id,
                        status: TaskStatus::Failed,
                        output: None,
                        error: Some("upstream dependency failed".into()),
                    });
                    continue;
                }

                let permit = semaphore.clone().acquire_owned().await.map_err(|_| EngineError::Internal {
                    message: "scheduler semaphore closed".into(),
                })?;
                let this_repo = self.repo.clone();
                let this_executor = self.executor.clone();
                let this_evaluation = self.evaluation.clone();
                let this_evaluator = self.evaluator.clone();
                let this_cancel = cancel.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    run_one_task(this_repo, this_executor, this_evaluation, this_evaluator, task_id, this_cancel).await
                }));
            }

            for handle in handles {
                let result = handle.await.map_err(|e| EngineError::Internal {
                    message: format!("task join error: {e}"),
                })??;
                if result.status == TaskStatus::Failed {
                    failed.insert(result.task_id);
                }
                summary.results.push(result);
            }
        }

        Ok(summary)
    }
}

async fn run_one_task(
    repo: Arc<TaskRepository>,
    executor: Arc<dyn TaskExecutor>,
    evaluation: Option<Arc<EvaluationLoop>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    task_id: i64,
    cancel: CancelSignal,
) -> EngineResult<TaskResult> {
    if cancel.is_cancelled() {
        return Ok(TaskResult {
            task_id,
            status: TaskStatus::Pending,
            output: None,
            error: Some("cancelled before start".into()),
        });
    }

    // The scheduler is only ever driven by an explicit top-level action
    // (`/run`, `/rerun`, `/rerun-subtree`, the CLI `run` subcommand), never
    // implicitly, so a `done`/`failed` task it picks up counts as an
    // explicit rerun for the state machine's purposes.
    repo.update_task_status(task_id, TaskStatus::Running, true)?;
    let task = repo.get_task(task_id)?;
    let prompt = task.input_prompt.clone().unwrap_or_else(|| task.name.clone());

    tracing::info!(task_id, "executing task");

    let (status, output) = if let (Some(eval_loop), Some(evaluator)) = (evaluation.as_ref(), evaluator.as_ref()) {
        match eval_loop.run(&task, &prompt, executor.as_ref(), evaluator.as_ref()).await {
            Ok(run) => (run.final_status, Some(run.final_output)),
            Err(e) => {
                tracing::warn!(task_id, error = %e, "task execution failed");
                (TaskStatus::Failed, None)
            }
        }
    } else {
        match executor.execute(&task, &prompt).await {
            Ok(content) => (TaskStatus::Done, Some(content)),
            Err(e) => {
                tracing::warn!(task_id, error = %e, "task execution failed");
                (TaskStatus::Failed, None)
            }
        }
    };

    if cancel.is_cancelled() {
        repo.reset_cancelled_task(task_id)?;
        return Ok(TaskResult {
            task_id,
            status: TaskStatus::Pending,
            output,
            error: Some("cancelled".into()),
        });
    }

    if let Some(content) = &output {
        repo.upsert_task_output(task_id, content)?;
    }
    repo.update_task_status(task_id, status, true)?;

    Ok(TaskResult {
        task_id,
        status,
        output,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::models::TaskType;

    struct EchoExecutor;

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        async fn execute(&self, task: &Task, prompt: &str) -> EngineResult<String> {
            Ok(format!("{}::{}", task.name, prompt))
        }
    }

    fn task(id: i64, parent: Option<i64>, priority: i64) -> Task {
        Task {
            id,
            parent_id: parent,
            root_id: 1,
            workflow_id: "wf_1".into(),
            session_id: None,
            path: id.to_string(),
            name: format!("T{id}"),
            status: TaskStatus::Pending,
            priority,
            task_type: TaskType::Atomic,
            input_prompt: None,
            output_content: None,
            metadata: serde_json::Value::Null,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn bfs_levels_respect_parent_then_priority() {
        let tasks = vec![task(1, None, 0), task(2, Some(1), 1), task(3, Some(1), 0)];
        let levels = build_levels(&tasks, &[], Strategy::Bfs).unwrap();
        assert_eq!(levels[0], vec![1]);
        assert_eq!(levels[1], vec![3, 2]);
    }

    #[test]
    fn dag_levels_respect_requires_order() {
        let tasks = vec![task(1, None, 0), task(2, None, 0), task(3, None, 0)];
        // 1 requires 2, 2 requires 3 => order: [3], [2], [1]
        let edges = vec![(1, 2), (2, 3)];
        let levels = build_levels(&tasks, &edges, Strategy::Dag).unwrap();
        assert_eq!(levels, vec![vec![3], vec![2], vec![1]]);
    }

    #[test]
    fn dag_levels_reject_cycle() {
        let tasks = vec![task(1, None, 0), task(2, None, 0)];
        let edges = vec![(1, 2), (2, 1)];
        assert!(build_levels(&tasks, &edges, Strategy::Dag).is_err());
    }

    #[test]
    fn postorder_visits_children_before_parent() {
        let tasks = vec![task(1, None, 0), task(2, Some(1), 0), task(3, Some(2), 0)];
        let levels = build_levels(&tasks, &[], Strategy::Postorder).unwrap();
        assert_eq!(levels[0], vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn run_root_marks_independent_tasks_done() {
        let repo = Arc::new(TaskRepository::open_in_memory().unwrap());
        let root = repo.create_task(None, "Root", TaskStatus::Pending, 0, TaskType::Root, serde_json::Value::Null).unwrap();
        let a = repo.create_task(Some(root), "A", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let b = repo.create_task(Some(root), "B", TaskStatus::Pending, 1, TaskType::Atomic, serde_json::Value::Null).unwrap();

        let scheduler = Scheduler::new(repo.clone(), Arc::new(EchoExecutor), None, None, SchedulerConfig {
            parallelism: 2,
            default_strategy: "bfs".into(),
            queue_buffer: 4,
        });

        let summary = scheduler.run_root(root, Strategy::Bfs, CancelSignal::new()).await.unwrap();
        assert_eq!(summary.results.len(), 2);
        assert_eq!(repo.get_task(a).unwrap().status, TaskStatus::Done);
        assert_eq!(repo.get_task(b).unwrap().status, TaskStatus::Done);
    }

    /// An executor that flips the cancel signal while "running", simulating
    /// a cancellation delivered mid-execution.
    struct CancelMidRunExecutor(CancelSignal);

    #[async_trait]
    impl TaskExecutor for CancelMidRunExecutor {
        async fn execute(&self, task: &Task, _prompt: &str) -> EngineResult<String> {
            self.0.cancel();
            Ok(format!("{}::done", task.name))
        }
    }

    #[tokio::test]
    async fn cancelled_running_task_is_reset_to_pending_in_repository() {
        let repo = Arc::new(TaskRepository::open_in_memory().unwrap());
        let root = repo.create_task(None, "Root", TaskStatus::Pending, 0, TaskType::Root, serde_json::Value::Null).unwrap();

        let cancel = CancelSignal::new();
        let executor = Arc::new(CancelMidRunExecutor(cancel.clone()));

        let result = run_one_task(repo.clone(), executor, None, None, root, cancel).await.unwrap();

        assert_eq!(result.status, TaskStatus::Pending);
        assert_eq!(repo.get_task(root).unwrap().status, TaskStatus::Pending);
    }
}
