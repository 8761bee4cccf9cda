//! Sealed row structs for every persisted entity (SPEC_FULL.md §9: replaces
//! the source's heterogenous mapping/tuple row shapes with one struct per
//! entity; every call site consumes the struct).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    NeedsReview,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::NeedsReview => "needs_review",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "done" => Some(TaskStatus::Done),
            "needs_review" => Some(TaskStatus::NeedsReview),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// The task status state machine from SPEC_FULL.md §4.D.
    pub fn can_transition_to(&self, next: TaskStatus, explicit_rerun: bool) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Done) | (Running, Failed) | (Running, NeedsReview) => true,
            (NeedsReview, Running) => true,
            (Done, Running) | (Failed, Running) => explicit_rerun,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Root,
    Composite,
    Atomic,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Root => "root",
            TaskType::Composite => "composite",
            TaskType::Atomic => "atomic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "root" => Some(TaskType::Root),
            "composite" => Some(TaskType::Composite),
            "atomic" => Some(TaskType::Atomic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Requires,
    Refers,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Requires => "requires",
            LinkKind::Refers => "refers",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requires" => Some(LinkKind::Requires),
            "refers" => Some(LinkKind::Refers),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub root_id: i64,
    pub workflow_id: String,
    pub session_id: Option<String>,
    pub path: String,
    pub name: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub task_type: TaskType,
    pub input_prompt: Option<String>,
    pub output_content: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Returns the `"ShortName"` portion of a `"[PlanTitle] ShortName"` name.
    pub fn short_name(&self) -> &str {
        match self.name.find("] ") {
            Some(idx) if self.name.starts_with('[') => &self.name[idx + 2..],
            _ => &self.name,
        }
    }

    /// Returns the bracketed `PlanTitle` prefix, if the name follows the convention.
    pub fn plan_title(&self) -> Option<&str> {
        if self.name.starts_with('[') {
            self.name.find(']').map(|idx| &self.name[1..idx])
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub workflow_id: String,
    pub from_task: i64,
    pub to_task: i64,
    pub kind: LinkKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub task_id: i64,
    pub model_name: String,
    pub vector: Vec<f32>,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSectionRow {
    pub task_id: i64,
    pub name: String,
    pub short_name: String,
    pub kind: String,
    pub content: String,
    pub pinned: bool,
    pub retrieval_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub task_id: i64,
    pub label: String,
    pub combined: String,
    pub sections: Vec<ContextSectionRow>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub session_id: Option<String>,
    pub root_task_id: Option<i64>,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertScore {
    pub name: String,
    pub score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationIteration {
    pub task_id: i64,
    pub iteration: u32,
    pub score: f64,
    pub dimensions: serde_json::Value,
    pub suggestions: Vec<String>,
    pub needs_revision: bool,
    /// Only populated when the evaluator runs in `multi_expert` mode
    /// (SPEC_FULL.md §4.H, §9 resolved Open Question 2).
    pub expert_scores: Option<Vec<ExpertScore>>,
    pub human_override: Option<HumanOverride>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanOverride {
    pub score: f64,
    pub reason: String,
    pub overridden_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_allows_documented_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running, false));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Done, false));
        assert!(TaskStatus::NeedsReview.can_transition_to(TaskStatus::Running, false));
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::Running, false));
        assert!(TaskStatus::Done.can_transition_to(TaskStatus::Running, true));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Done, false));
    }

    #[test]
    fn short_name_strips_plan_prefix() {
        let t = Task {
            id: 1,
            parent_id: None,
            root_id: 1,
            workflow_id: "wf_1".into(),
            session_id: None,
            path: "1".into(),
            name: "[Essay] Intro".into(),
            status: TaskStatus::Pending,
            priority: 0,
            task_type: TaskType::Atomic,
            input_prompt: None,
            output_content: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(t.short_name(), "Intro");
        assert_eq!(t.plan_title(), Some("Essay"));
    }
}
