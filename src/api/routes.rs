//! axum router wiring SPEC_FULL.md §6's HTTP surface onto engine methods.
//! Each handler is a thin adapter: deserialize, call one engine method,
//! convert the result via [`super::errors::ApiError`].

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures::stream::{unfold, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::errors::ApiResult;
use super::state::AppState;
use crate::context::budget::SummarizeStrategy;
use crate::context::{AssembleOptions, Section, SectionKind};
use crate::error::EngineError;
use crate::jobs::JobEvent;
use crate::repository::models::{LinkKind, TaskStatus, TaskType};
use crate::scheduler::{CancelSignal, Strategy};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks/:id", get(get_task).put(update_task).delete(delete_task))
        .route("/tasks", post(create_task))
        .route("/tasks/:id/context/preview", post(preview_context))
        .route("/tasks/:id/context/snapshots", get(list_snapshots))
        .route("/tasks/:id/context/snapshots/:label", get(get_snapshot))
        .route("/context/links", post(create_link).delete(delete_link_route))
        .route("/context/links/:task_id", get(list_dependencies))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/stream", get(stream_job))
        .route("/plans/:title/tasks", get(plan_tasks))
        .route("/run", post(run_plan))
        .route("/tasks/:id/rerun", post(rerun_task))
        .route("/tasks/:id/rerun-subtree", post(rerun_subtree))
        .route("/tasks/:id/execute/with-evaluation", post(execute_with_evaluation))
        .route("/tasks/:id/evaluation/history", get(evaluation_history))
        .route("/tasks/:id/evaluation/latest", get(evaluation_latest))
        .route("/tasks/:id/evaluation/override", post(evaluation_override))
        .route("/evaluation/batch", post(evaluation_batch))
        .route("/evaluation/supervision", get(evaluation_supervision))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    parent_id: Option<i64>,
    name: String,
    priority: Option<i64>,
    task_type: Option<String>,
}

#[derive(Serialize)]
struct CreateTaskResponse {
    id: i64,
}

async fn create_task(State(state): State<AppState>, Json(req): Json<CreateTaskRequest>) -> ApiResult<Json<CreateTaskResponse>> {
    let task_type = match req.task_type.as_deref() {
        Some(s) => TaskType::parse(s).ok_or_else(|| EngineError::Validation {
            message: format!("unknown task_type '{s}'"),
        })?,
        None => TaskType::Atomic,
    };
    let id = state
        .repo
        .create_task(req.parent_id, &req.name, TaskStatus::Pending, req.priority.unwrap_or(0), task_type, serde_json::Value::Null)?;
    Ok(Json(CreateTaskResponse { id }))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let task = state.repo.get_task(id)?;
    Ok(Json(task))
}

#[derive(Deserialize)]
struct UpdateTaskRequest {
    status: Option<String>,
    explicit_rerun: Option<bool>,
    output: Option<String>,
}

async fn update_task(State(state): State<AppState>, Path(id): Path<i64>, Json(req): Json<UpdateTaskRequest>) -> ApiResult<impl IntoResponse> {
    if let Some(status) = req.status {
        let next = TaskStatus::parse(&status).ok_or_else(|| EngineError::Validation {
            message: format!("unknown status '{status}'"),
        })?;
        state.repo.update_task_status(id, next, req.explicit_rerun.unwrap_or(false))?;
    }
    if let Some(output) = req.output {
        state.repo.upsert_task_output(id, &output)?;
    }
    let task = state.repo.get_task(id)?;
    Ok(Json(task))
}

async fn delete_task(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    state.repo.delete_task(id)?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

#[derive(Deserialize)]
struct LinkRequest {
    from: i64,
    to: i64,
    kind: String,
}

async fn create_link(State(state): State<AppState>, Json(req): Json<LinkRequest>) -> ApiResult<impl IntoResponse> {
    let kind = LinkKind::parse(&req.kind).ok_or_else(|| EngineError::Validation {
        message: format!("unknown link kind '{}'", req.kind),
    })?;
    let id = state.repo.create_link(req.from, req.to, kind)?;
    Ok(Json(serde_json::json!({"id": id})))
}

async fn delete_link_route(State(state): State<AppState>, Json(req): Json<LinkRequest>) -> ApiResult<impl IntoResponse> {
    let kind = LinkKind::parse(&req.kind).ok_or_else(|| EngineError::Validation {
        message: format!("unknown link kind '{}'", req.kind),
    })?;
    state.repo.delete_link(req.from, req.to, kind)?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

async fn list_dependencies(State(state): State<AppState>, Path(task_id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let links = state.repo.list_dependencies(task_id)?;
    Ok(Json(links))
}

#[derive(Deserialize)]
struct ContextPreviewRequest {
    max_chars: Option<usize>,
    per_section_max: Option<usize>,
    #[serde(default)]
    strategy: Option<String>,
}

async fn preview_context(State(state): State<AppState>, Path(id): Path<i64>, Json(req): Json<ContextPreviewRequest>) -> ApiResult<impl IntoResponse> {
    let task = state.repo.get_task(id)?;
    let mut sections = Vec::new();

    if let Some(content) = &task.output_content {
        sections.push(Section {
            task_id: task.id,
            name: task.name.clone(),
            short_name: task.short_name().to_string(),
            kind: SectionKind::Index,
            content: content.clone(),
            pinned: false,
            retrieval_score: None,
        });
    }
    for dep in state.repo.list_dependencies(id)? {
        let dep_task = state.repo.get_task(dep.from_task)?;
        let kind = if dep.kind == LinkKind::Requires { SectionKind::DepRequires } else { SectionKind::DepRefers };
        sections.push(Section {
            task_id: dep_task.id,
            name: dep_task.name.clone(),
            short_name: dep_task.short_name().to_string(),
            kind,
            content: dep_task.output_content.clone().unwrap_or_default(),
            pinned: false,
            retrieval_score: None,
        });
    }

    let strategy = match req.strategy.as_deref() {
        Some("sentence") => SummarizeStrategy::Sentence,
        _ => SummarizeStrategy::Truncate,
    };
    let opts = AssembleOptions {
        max_chars: req.max_chars,
        per_section_max: req.per_section_max,
        strategy,
    };
    let bundle = crate::context::assemble(id, sections, &opts);
    Ok(Json(bundle))
}

async fn list_snapshots(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.repo.list_snapshots(id)?))
}

async fn get_snapshot(State(state): State<AppState>, Path((id, label)): Path<(i64, String)>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.repo.get_snapshot(id, &label)?))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let include_logs = true;
    Ok(Json(state.jobs.get_job(&id, include_logs)?))
}

/// Adapts a job's broadcast receiver into a `JobEvent` stream that ends with
/// one final `Overflow` event if the subscriber ever lags behind the sender,
/// instead of silently dropping the gap (SPEC_FULL.md §4.I).
fn job_event_stream(rx: broadcast::Receiver<JobEvent>) -> impl Stream<Item = JobEvent> {
    let raw = BroadcastStream::new(rx);
    unfold((raw, false), |(mut raw, ended)| async move {
        if ended {
            return None;
        }
        match raw.next().await {
            None => None,
            Some(Ok(event)) => Some((event, (raw, false))),
            Some(Err(BroadcastStreamRecvError::Lagged(_))) => Some((JobEvent::Overflow, (raw, true))),
        }
    })
}

/// Streams job events as SSE. A lagging subscriber (the broadcast channel
/// overflowed before it could keep up) is sent a final `overflow` event and
/// then disconnected, per SPEC_FULL.md §4.I, rather than silently dropped.
async fn stream_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let rx = state.jobs.subscribe(&id)?;
    let stream = job_event_stream(rx).filter_map(|event| async move {
        serde_json::to_string(&event).ok().map(|payload| Ok(Event::default().data(payload)))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

async fn plan_tasks(State(state): State<AppState>, Path(title): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.repo.list_plan_tasks(&title)?))
}

#[derive(Deserialize)]
struct RunRequest {
    root_id: i64,
    strategy: Option<String>,
}

async fn run_plan(State(state): State<AppState>, Json(req): Json<RunRequest>) -> ApiResult<impl IntoResponse> {
    let strategy = match req.strategy.as_deref() {
        Some(s) => Strategy::parse(s)?,
        None => Strategy::parse(&state.config.scheduler.default_strategy)?,
    };
    let summary = state.scheduler.run_root(req.root_id, strategy, CancelSignal::new()).await?;
    Ok(Json(summary))
}

/// Re-executes a single task: `run_root` over a leaf id runs just that task
/// (its subtree is empty), transitioning it through the scheduler's own
/// explicit-rerun path regardless of its current `done`/`failed`/
/// `needs_review` status.
async fn rerun_task(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let strategy = Strategy::parse(&state.config.scheduler.default_strategy)?;
    let summary = state.scheduler.run_root(id, strategy, CancelSignal::new()).await?;
    Ok(Json(summary))
}

/// Re-executes every atomic task in `id`'s subtree (id included).
async fn rerun_subtree(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let strategy = Strategy::parse(&state.config.scheduler.default_strategy)?;
    let summary = state.scheduler.run_root(id, strategy, CancelSignal::new()).await?;
    Ok(Json(summary))
}

async fn execute_with_evaluation(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let task = state.repo.get_task(id)?;
    let prompt = task.input_prompt.clone().unwrap_or_else(|| task.name.clone());
    let run = state
        .evaluation
        .run(&task, &prompt, state.executor.as_ref(), state.evaluator.as_ref())
        .await?;
    state.repo.upsert_task_output(id, &run.final_output)?;
    state.repo.update_task_status(id, run.final_status, true)?;
    Ok(Json(run))
}

async fn evaluation_history(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.repo.list_evaluation_iterations(id)?))
}

async fn evaluation_latest(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let history = state.repo.list_evaluation_iterations(id)?;
    let latest = history.into_iter().max_by_key(|i| i.iteration);
    Ok(Json(latest))
}

#[derive(Deserialize)]
struct OverrideRequest {
    iteration: u32,
    score: f64,
    reason: String,
}

async fn evaluation_override(State(state): State<AppState>, Path(id): Path<i64>, Json(req): Json<OverrideRequest>) -> ApiResult<impl IntoResponse> {
    state.evaluation.apply_human_override(id, req.iteration, req.score, &req.reason)?;
    Ok(Json(serde_json::json!({"overridden": true})))
}

#[derive(Deserialize)]
struct BatchRequest {
    task_ids: Vec<i64>,
}

async fn evaluation_batch(State(state): State<AppState>, Json(req): Json<BatchRequest>) -> ApiResult<impl IntoResponse> {
    let mut results = Vec::with_capacity(req.task_ids.len());
    for id in req.task_ids {
        let task = state.repo.get_task(id)?;
        let prompt = task.input_prompt.clone().unwrap_or_else(|| task.name.clone());
        let run = state
            .evaluation
            .run(&task, &prompt, state.executor.as_ref(), state.evaluator.as_ref())
            .await?;
        state.repo.upsert_task_output(id, &run.final_output)?;
        state.repo.update_task_status(id, run.final_status, true)?;
        results.push(serde_json::json!({"task_id": id, "status": run.final_status, "score": run.last_score}));
    }
    Ok(Json(results))
}

async fn evaluation_supervision(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.repo.evaluation_supervision_report()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lagging_subscriber_gets_one_overflow_event_then_ends() {
        let (tx, rx) = broadcast::channel(2);
        // Two sends fill the buffer; the third overwrites the oldest entry
        // before the subscriber below ever reads, so its first `recv` lags.
        for i in 0..4 {
            let _ = tx.send(JobEvent::Action { cursor: i, action: "tick".into() });
        }

        let events: Vec<JobEvent> = job_event_stream(rx).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], JobEvent::Overflow));
    }

    #[tokio::test]
    async fn non_lagging_subscriber_sees_every_event_in_order() {
        let (tx, rx) = broadcast::channel(8);
        let stream_events = job_event_stream(rx);
        tokio::pin!(stream_events);

        tx.send(JobEvent::Event { level: "info".into(), message: "a".into() }).unwrap();
        let first = stream_events.next().await.unwrap();
        assert!(matches!(first, JobEvent::Event { .. }));

        tx.send(JobEvent::Done { result: None, error: None }).unwrap();
        let second = stream_events.next().await.unwrap();
        assert!(matches!(second, JobEvent::Done { .. }));
    }
}
