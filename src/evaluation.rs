//! 4.H — evaluation-driven re-execution loop: scores an output, decides
//! whether to re-run with feedback, and persists every iteration.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::config::EvaluationConfig;
use crate::error::{EngineError, EngineResult};
use crate::repository::models::{EvaluationIteration, ExpertScore, HumanOverride, Task, TaskStatus};
use crate::repository::TaskRepository;
use crate::scheduler::TaskExecutor;

/// What an evaluator returns for a single scored attempt.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub score: f64,
    pub dimensions: serde_json::Value,
    pub suggestions: Vec<String>,
    pub needs_revision: bool,
    pub expert_scores: Option<Vec<ExpertScore>>,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, task: &Task, output: &str) -> EngineResult<EvaluationOutcome>;
}

/// Scores `output` against `claimed_score` and keeps the lower of the two —
/// the source's `adversarial` evaluator mode.
pub struct AdversarialEvaluator<C: Evaluator> {
    pub critic: C,
    pub claimed_score: f64,
}

#[async_trait]
impl<C: Evaluator + Send + Sync> Evaluator for AdversarialEvaluator<C> {
    async fn evaluate(&self, task: &Task, output: &str) -> EngineResult<EvaluationOutcome> {
        let mut outcome = self.critic.evaluate(task, output).await?;
        outcome.score = outcome.score.min(self.claimed_score);
        Ok(outcome)
    }
}

/// Runs N independent scorers and takes their weighted mean — the source's
/// `multi_expert` evaluator mode. Surfaces per-expert detail (§9 Open
/// Question 2) alongside the aggregate.
pub struct MultiExpertEvaluator {
    pub experts: Vec<(String, f64, Arc<dyn Evaluator>)>, // (name, weight, evaluator)
}

#[async_trait]
impl Evaluator for MultiExpertEvaluator {
    async fn evaluate(&self, task: &Task, output: &str) -> EngineResult<EvaluationOutcome> {
        let mut expert_scores = Vec::with_capacity(self.experts.len());
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut suggestions = Vec::new();
        let mut needs_revision = false;
        let mut dimensions = serde_json::Map::new();

        for (name, weight, evaluator) in &self.experts {
            let outcome = evaluator.evaluate(task, output).await?;
            weighted_sum += outcome.score * weight;
            weight_total += weight;
            needs_revision |= outcome.needs_revision;
            suggestions.extend(outcome.suggestions);
            dimensions.insert(name.clone(), outcome.dimensions);
            expert_scores.push(ExpertScore {
                name: name.clone(),
                score: outcome.score,
                weight: *weight,
            });
        }

        let score = if weight_total > 0.0 { weighted_sum / weight_total } else { 0.0 };
        Ok(EvaluationOutcome {
            score,
            dimensions: serde_json::Value::Object(dimensions),
            suggestions,
            needs_revision,
            expert_scores: Some(expert_scores),
        })
    }
}

pub struct EvaluationLoop {
    repo: Arc<TaskRepository>,
    cfg: EvaluationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRunResult {
    pub final_status: TaskStatus,
    pub final_output: String,
    pub iterations: u32,
    pub last_score: Option<f64>,
}

impl EvaluationLoop {
    pub fn new(repo: Arc<TaskRepository>, cfg: EvaluationConfig) -> Self {
        Self { repo, cfg }
    }

    /// Drives the generate-evaluate-revise loop for `task` (SPEC_FULL.md
    /// §4.H). `executor` regenerates output from a prompt; `base_prompt` is
    /// reused with accumulated feedback on each revision.
    pub async fn run(
        &self,
        task: &Task,
        base_prompt: &str,
        executor: &dyn TaskExecutor,
        evaluator: &dyn Evaluator,
    ) -> EngineResult<EvaluationRunResult> {
        let mut prompt = base_prompt.to_string();
        let mut iteration = 0u32;
        let mut last_valid: Option<(f64, String)> = None;

        loop {
            let output = executor.execute(task, &prompt).await?;
            iteration += 1;

            match evaluator.evaluate(task, &output).await {
                Ok(outcome) => {
                    self.repo.record_evaluation_iteration(&EvaluationIteration {
                        task_id: task.id,
                        iteration,
                        score: outcome.score,
                        dimensions: outcome.dimensions,
                        suggestions: outcome.suggestions.clone(),
                        needs_revision: outcome.needs_revision,
                        expert_scores: outcome.expert_scores,
                        human_override: None,
                        created_at: Utc::now(),
                    })?;

                    last_valid = Some((outcome.score, output.clone()));

                    if outcome.score >= self.cfg.quality_threshold {
                        return Ok(EvaluationRunResult {
                            final_status: TaskStatus::Done,
                            final_output: output,
                            iterations: iteration,
                            last_score: Some(outcome.score),
                        });
                    }

                    if iteration >= self.cfg.max_iterations {
                        return Ok(EvaluationRunResult {
                            final_status: TaskStatus::NeedsReview,
                            final_output: output,
                            iterations: iteration,
                            last_score: Some(outcome.score),
                        });
                    }

                    prompt = format!("{base_prompt}\n\nFeedback from prior attempt: {}", outcome.suggestions.join("; "));
                }
                Err(e) => {
                    tracing::warn!(task_id = task.id, error = %e, "evaluator failed, marking task for review");
                    let (score, valid_output) = last_valid.unwrap_or((0.0, output));
                    return Ok(EvaluationRunResult {
                        final_status: TaskStatus::NeedsReview,
                        final_output: valid_output,
                        iterations: iteration.saturating_sub(1),
                        last_score: if score > 0.0 { Some(score) } else { None },
                    });
                }
            }
        }
    }

    /// Records a human override; it supersedes evaluator output for routing
    /// decisions but does not itself re-trigger execution.
    pub fn apply_human_override(&self, task_id: i64, iteration: u32, score: f64, reason: &str) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&score) {
            return Err(EngineError::Validation {
                message: "human override score must be within [0,1]".into(),
            });
        }
        let history = self.repo.list_evaluation_iterations(task_id)?;
        let mut target = history
            .into_iter()
            .find(|i| i.iteration == iteration)
            .ok_or_else(|| EngineError::Validation {
                message: format!("no evaluation iteration {iteration} for task {task_id}"),
            })?;
        target.human_override = Some(HumanOverride {
            score,
            reason: reason.to_string(),
            overridden_at: Utc::now(),
        });
        self.repo.record_evaluation_iteration(&target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineResult;
    use crate::repository::models::{TaskType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskExecutor for StubExecutor {
        async fn execute(&self, _task: &Task, _prompt: &str) -> EngineResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("draft".into())
        }
    }

    struct ScriptedEvaluator {
        scores: std::sync::Mutex<std::collections::VecDeque<f64>>,
    }

    #[async_trait]
    impl Evaluator for ScriptedEvaluator {
        async fn evaluate(&self, _task: &Task, _output: &str) -> EngineResult<EvaluationOutcome> {
            let score = self.scores.lock().unwrap().pop_front().unwrap_or(0.0);
            Ok(EvaluationOutcome {
                score,
                dimensions: serde_json::json!({}),
                suggestions: vec!["improve clarity".into()],
                needs_revision: score < 0.8,
                expert_scores: None,
            })
        }
    }

    fn task() -> Task {
        Task {
            id: 1,
            parent_id: None,
            root_id: 1,
            workflow_id: "wf_1".into(),
            session_id: None,
            path: "1".into(),
            name: "T".into(),
            status: TaskStatus::Running,
            priority: 0,
            task_type: TaskType::Atomic,
            input_prompt: None,
            output_content: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn three_scored_iterations_reach_done() {
        let repo = Arc::new(TaskRepository::open_in_memory().unwrap());
        repo.create_task(None, "T", TaskStatus::Running, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let cfg = EvaluationConfig {
            quality_threshold: 0.8,
            max_iterations: 3,
            mode: "llm".into(),
        };
        let loop_ = EvaluationLoop::new(repo.clone(), cfg);
        let executor = StubExecutor { calls: AtomicUsize::new(0) };
        let evaluator = ScriptedEvaluator {
            scores: std::sync::Mutex::new(vec![0.6, 0.7, 0.85].into()),
        };

        let result = loop_.run(&task(), "write it", &executor, &evaluator).await.unwrap();
        assert_eq!(result.final_status, TaskStatus::Done);
        assert_eq!(result.iterations, 3);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(repo.list_evaluation_iterations(1).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn exhausting_iterations_yields_needs_review() {
        let repo = Arc::new(TaskRepository::open_in_memory().unwrap());
        repo.create_task(None, "T", TaskStatus::Running, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let cfg = EvaluationConfig {
            quality_threshold: 0.9,
            max_iterations: 2,
            mode: "llm".into(),
        };
        let loop_ = EvaluationLoop::new(repo, cfg);
        let executor = StubExecutor { calls: AtomicUsize::new(0) };
        let evaluator = ScriptedEvaluator {
            scores: std::sync::Mutex::new(vec![0.5, 0.6].into()),
        };

        let result = loop_.run(&task(), "write it", &executor, &evaluator).await.unwrap();
        assert_eq!(result.final_status, TaskStatus::NeedsReview);
        assert_eq!(result.iterations, 2);
    }

    #[tokio::test]
    async fn multi_expert_weighted_mean_and_detail_survive() {
        struct Fixed(f64);
        #[async_trait]
        impl Evaluator for Fixed {
            async fn evaluate(&self, _task: &Task, _output: &str) -> EngineResult<EvaluationOutcome> {
                Ok(EvaluationOutcome {
                    score: self.0,
                    dimensions: serde_json::json!({"x": self.0}),
                    suggestions: vec![],
                    needs_revision: false,
                    expert_scores: None,
                })
            }
        }
        let multi = MultiExpertEvaluator {
            experts: vec![
                ("clarity".into(), 1.0, Arc::new(Fixed(0.6))),
                ("accuracy".into(), 1.0, Arc::new(Fixed(1.0))),
            ],
        };
        let outcome = multi.evaluate(&task(), "out").await.unwrap();
        assert!((outcome.score - 0.8).abs() < 1e-9);
        assert_eq!(outcome.expert_scores.unwrap().len(), 2);
    }
}
