//! 4.D — the task repository: the single source of truth for tasks, links,
//! outputs, embeddings, snapshots, and workflows. Backed by an embedded
//! `rusqlite` connection; every mutating operation is a transaction.

pub mod migrations;
pub mod models;

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{EngineError, EngineResult};
use models::*;

pub struct TaskRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TaskRepository {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn create_task(
        &self,
        parent_id: Option<i64>,
        name: &str,
        status: TaskStatus,
        priority: i64,
        task_type: TaskType,
        metadata: serde_json::Value,
    ) -> EngineResult<i64> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let (root_id, workflow_id, session_id, parent_path) = match parent_id {
            None => (None, None, None, String::new()),
            Some(pid) => {
                let (proot, pworkflow, psession, ppath): (i64, String, Option<String>, String) = tx
                    .query_row(
                        "SELECT root_id, workflow_id, session_id, path FROM tasks WHERE id = ?1",
                        [pid],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
                    )
                    .map_err(|_| EngineError::TaskNotFound { id: pid })?;
                (Some(proot), Some(pworkflow), psession, ppath)
            }
        };

        let metadata_str = metadata.to_string();
        tx.execute(
            "INSERT INTO tasks (parent_id, path, name, status, priority, task_type, metadata, root_id, workflow_id, session_id)
             VALUES (?1, '', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                parent_id,
                name,
                status.as_str(),
                priority,
                task_type.as_str(),
                metadata_str,
                root_id,
                workflow_id,
                session_id,
            ],
        )?;
        let id = tx.last_insert_rowid();

        let root_id = root_id.unwrap_or(id);
        let workflow_id = workflow_id.unwrap_or_else(|| format!("wf_{id}"));
        let path = if parent_path.is_empty() {
            format!("{id}")
        } else {
            format!("{parent_path}/{id}")
        };

        tx.execute(
            "UPDATE tasks SET root_id = ?1, workflow_id = ?2, path = ?3 WHERE id = ?4",
            rusqlite::params![root_id, workflow_id, path, id],
        )?;

        if parent_id.is_none() {
            tx.execute(
                "INSERT INTO workflows (workflow_id, session_id, root_task_id, title) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(workflow_id) DO NOTHING",
                rusqlite::params![workflow_id, session_id, id, name],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    pub fn update_task_status(&self, id: i64, next: TaskStatus, explicit_rerun: bool) -> EngineResult<()> {
        let conn = self.conn.lock();
        let current: String = conn
            .query_row("SELECT status FROM tasks WHERE id = ?1", [id], |r| r.get(0))
            .map_err(|_| EngineError::TaskNotFound { id })?;
        let current = TaskStatus::parse(&current).ok_or_else(|| EngineError::Internal {
            message: format!("unparseable status '{current}' for task {id}"),
        })?;

        if !current.can_transition_to(next, explicit_rerun) {
            return Err(EngineError::InvalidStateTransition {
                from: current.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![next.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Resets a task the scheduler cancelled mid-run back to `pending`, so a
    /// later scheduling pass picks it up again. Deliberately bypasses
    /// `can_transition_to` — cancellation is a scheduler-driven interrupt, not
    /// a status transition a caller requests, and the state machine has no
    /// `(Running, Pending)` arm for the ordinary request path.
    pub fn reset_cancelled_task(&self, id: i64) -> EngineResult<()> {
        let conn = self.conn.lock();
        let current: String = conn
            .query_row("SELECT status FROM tasks WHERE id = ?1", [id], |r| r.get(0))
            .map_err(|_| EngineError::TaskNotFound { id })?;
        let current = TaskStatus::parse(&current).ok_or_else(|| EngineError::Internal {
            message: format!("unparseable status '{current}' for task {id}"),
        })?;

        if current != TaskStatus::Running {
            return Err(EngineError::InvalidStateTransition {
                from: current.as_str().to_string(),
                to: TaskStatus::Pending.as_str().to_string(),
            });
        }

        conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![TaskStatus::Pending.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn upsert_task_input(&self, id: i64, prompt: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        self.ensure_task_exists(&conn, id)?;
        conn.execute(
            "INSERT INTO task_inputs (task_id, prompt) VALUES (?1, ?2)
             ON CONFLICT(task_id) DO UPDATE SET prompt = excluded.prompt",
            rusqlite::params![id, prompt],
        )?;
        Ok(())
    }

    /// Returns `true` when an output was written, signalling the caller
    /// should fire the best-effort async embedding path (SPEC_FULL.md §4.D).
    pub fn upsert_task_output(&self, id: i64, content: &str) -> EngineResult<bool> {
        let conn = self.conn.lock();
        self.ensure_task_exists(&conn, id)?;
        conn.execute(
            "INSERT INTO task_outputs (task_id, content) VALUES (?1, ?2)
             ON CONFLICT(task_id) DO UPDATE SET content = excluded.content",
            rusqlite::params![id, content],
        )?;
        Ok(true)
    }

    fn ensure_task_exists(&self, conn: &Connection, id: i64) -> EngineResult<()> {
        let exists: bool = conn
            .query_row("SELECT 1 FROM tasks WHERE id = ?1", [id], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            Ok(())
        } else {
            Err(EngineError::TaskNotFound { id })
        }
    }

    pub fn create_link(&self, from: i64, to: i64, kind: LinkKind) -> EngineResult<i64> {
        let conn = self.conn.lock();
        let workflow_id = self.workflow_of(&conn, from)?;
        let to_workflow = self.workflow_of(&conn, to)?;
        if workflow_id != to_workflow {
            return Err(EngineError::WorkflowIsolationViolation {
                id: to,
                expected: workflow_id,
            });
        }

        if kind == LinkKind::Requires && self.would_create_cycle(&conn, &workflow_id, from, to)? {
            return Err(EngineError::CycleDetected {
                from,
                to,
                kind: kind.as_str().to_string(),
            });
        }

        conn.execute(
            "INSERT INTO task_links (workflow_id, from_task, to_task, kind) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![workflow_id, from, to, kind.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// DFS from `to` following existing `requires` edges; if `from` is
    /// reachable, adding `from -> to` would close a cycle.
    fn would_create_cycle(&self, conn: &Connection, workflow_id: &str, from: i64, to: i64) -> EngineResult<bool> {
        if from == to {
            return Ok(true);
        }
        let mut stmt = conn.prepare(
            "SELECT to_task FROM task_links WHERE workflow_id = ?1 AND kind = 'requires' AND from_task = ?2",
        )?;

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(to);
        visited.insert(to);

        while let Some(node) = queue.pop_front() {
            if node == from {
                return Ok(true);
            }
            let successors: Vec<i64> = stmt
                .query_map(rusqlite::params![workflow_id, node], |r| r.get(0))?
                .collect::<Result<_, _>>()?;
            for next in successors {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(false)
    }

    pub fn delete_link(&self, from: i64, to: i64, kind: LinkKind) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM task_links WHERE from_task = ?1 AND to_task = ?2 AND kind = ?3",
            rusqlite::params![from, to, kind.as_str()],
        )?;
        Ok(())
    }

    /// Inbound links ordered requires-first, then refers; within a kind by
    /// priority then id (SPEC_FULL.md §4.D `list_dependencies`).
    pub fn list_dependencies(&self, id: i64) -> EngineResult<Vec<Link>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT l.id, l.workflow_id, l.from_task, l.to_task, l.kind, l.created_at
             FROM task_links l JOIN tasks t ON t.id = l.from_task
             WHERE l.to_task = ?1
             ORDER BY CASE l.kind WHEN 'requires' THEN 0 ELSE 1 END, t.priority, l.from_task",
        )?;
        let rows = stmt
            .query_map([id], row_to_link)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_links(&self, workflow_id: &str) -> EngineResult<Vec<Link>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, from_task, to_task, kind, created_at FROM task_links WHERE workflow_id = ?1",
        )?;
        let rows = stmt
            .query_map([workflow_id], row_to_link)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_plan_tasks(&self, plan_title: &str) -> EngineResult<Vec<Task>> {
        let conn = self.conn.lock();
        let prefix = format!("[{plan_title}]%");
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE name LIKE ?1 ORDER BY priority, id",
        )?;
        let rows = stmt
            .query_map([prefix], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_task(&self, id: i64) -> EngineResult<Task> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM tasks WHERE id = ?1", [id], row_to_task)
            .map_err(|_| EngineError::TaskNotFound { id })
    }

    pub fn get_ancestors(&self, id: i64, max_depth: usize) -> EngineResult<Vec<Task>> {
        let conn = self.conn.lock();
        let mut result = Vec::new();
        let mut current = id;
        for _ in 0..max_depth {
            let parent_id: Option<i64> = conn
                .query_row("SELECT parent_id FROM tasks WHERE id = ?1", [current], |r| r.get(0))
                .map_err(|_| EngineError::TaskNotFound { id: current })?;
            match parent_id {
                None => break,
                Some(pid) => {
                    let task = conn.query_row("SELECT * FROM tasks WHERE id = ?1", [pid], row_to_task)?;
                    current = pid;
                    result.push(task);
                }
            }
        }
        result.reverse(); // root -> ... -> parent
        Ok(result)
    }

    pub fn get_children(&self, id: i64) -> EngineResult<Vec<Task>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE parent_id = ?1 ORDER BY priority, id")?;
        let rows = stmt.query_map([id], row_to_task)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_subtree(&self, id: i64, max_depth: usize) -> EngineResult<Vec<Task>> {
        let mut result = Vec::new();
        let mut frontier = vec![id];
        for _ in 0..=max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();
            for task_id in frontier {
                let children = self.get_children(task_id)?;
                for child in children {
                    next_frontier.push(child.id);
                    result.push(child);
                }
            }
            frontier = next_frontier;
        }
        Ok(result)
    }

    pub fn get_tasks_with_embeddings(&self, model: &str, workflow_id: &str) -> EngineResult<Vec<(Task, EmbeddingRecord)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT t.*, e.task_id, e.model_name, e.vector, e.dimension
             FROM tasks t JOIN task_embeddings e ON e.task_id = t.id
             WHERE e.model_name = ?1 AND t.workflow_id = ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![model, workflow_id], |row| {
                let task = row_to_task(row)?;
                let blob: Vec<u8> = row.get("vector")?;
                let vector = bytes_to_vector(&blob);
                let embedding = EmbeddingRecord {
                    task_id: task.id,
                    model_name: row.get("model_name")?,
                    vector,
                    dimension: row.get("dimension")?,
                };
                Ok((task, embedding))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn store_task_embedding(&self, task_id: i64, vector: &[f32], model: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        self.ensure_task_exists(&conn, task_id)?;
        let blob = vector_to_bytes(vector);
        conn.execute(
            "INSERT INTO task_embeddings (task_id, model_name, vector, dimension) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(task_id, model_name) DO UPDATE SET vector = excluded.vector, dimension = excluded.dimension",
            rusqlite::params![task_id, model, blob, vector.len() as i64],
        )?;
        Ok(())
    }

    pub fn upsert_task_context(
        &self,
        task_id: i64,
        combined: &str,
        sections: &[ContextSectionRow],
        metadata: serde_json::Value,
        label: &str,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        self.ensure_task_exists(&conn, task_id)?;
        let sections_json = serde_json::to_string(sections).map_err(|e| EngineError::Internal {
            message: e.to_string(),
        })?;
        conn.execute(
            "INSERT INTO task_contexts (task_id, label, combined, sections, metadata) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(task_id, label) DO UPDATE SET combined = excluded.combined, sections = excluded.sections,
                metadata = excluded.metadata, created_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')",
            rusqlite::params![task_id, label, combined, sections_json, metadata.to_string()],
        )?;
        Ok(())
    }

    pub fn get_snapshot(&self, task_id: i64, label: &str) -> EngineResult<Snapshot> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT task_id, label, combined, sections, metadata, created_at FROM task_contexts WHERE task_id = ?1 AND label = ?2",
            rusqlite::params![task_id, label],
            row_to_snapshot,
        )
        .map_err(|_| EngineError::SnapshotNotFound {
            task_id,
            label: label.to_string(),
        })
    }

    pub fn list_snapshots(&self, task_id: i64) -> EngineResult<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT task_id, label, combined, sections, metadata, created_at FROM task_contexts WHERE task_id = ?1 ORDER BY label",
        )?;
        let rows = stmt
            .query_map([task_id], row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn move_task(&self, id: i64, new_parent: Option<i64>) -> EngineResult<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let old_workflow: String = tx.query_row("SELECT workflow_id FROM tasks WHERE id = ?1", [id], |r| r.get(0))?;

        if let Some(pid) = new_parent {
            let new_workflow: String = tx
                .query_row("SELECT workflow_id FROM tasks WHERE id = ?1", [pid], |r| r.get(0))
                .map_err(|_| EngineError::TaskNotFound { id: pid })?;
            if new_workflow != old_workflow {
                return Err(EngineError::WorkflowIsolationViolation {
                    id,
                    expected: old_workflow,
                });
            }
        }

        tx.execute("UPDATE tasks SET parent_id = ?1 WHERE id = ?2", rusqlite::params![new_parent, id])?;

        // Recompute paths for the moved subtree.
        let new_parent_path: String = match new_parent {
            None => String::new(),
            Some(pid) => tx.query_row("SELECT path FROM tasks WHERE id = ?1", [pid], |r| r.get(0))?,
        };
        let new_path = if new_parent_path.is_empty() {
            format!("{id}")
        } else {
            format!("{new_parent_path}/{id}")
        };
        tx.execute("UPDATE tasks SET path = ?1 WHERE id = ?2", rusqlite::params![new_path, id])?;

        reparent_paths(&tx, id, &new_path)?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_task(&self, id: i64) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        Ok(())
    }

    fn workflow_of(&self, conn: &Connection, id: i64) -> EngineResult<String> {
        conn.query_row("SELECT workflow_id FROM tasks WHERE id = ?1", [id], |r| r.get(0))
            .map_err(|_| EngineError::TaskNotFound { id })
    }

    pub fn get_workflow(&self, workflow_id: &str) -> EngineResult<Workflow> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT workflow_id, session_id, root_task_id, title, metadata, created_at, updated_at FROM workflows WHERE workflow_id = ?1",
            [workflow_id],
            row_to_workflow,
        )
        .map_err(|_| EngineError::WorkflowNotFound {
            workflow_id: workflow_id.to_string(),
        })
    }

    /// Upserts by `(task_id, iteration)`: a fresh score/revision writes a new
    /// row, but `apply_human_override` re-recording the same iteration
    /// updates it in place instead of accumulating duplicates.
    pub fn record_evaluation_iteration(&self, iteration: &EvaluationIteration) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO evaluation_iterations (task_id, iteration, score, dimensions, suggestions, needs_revision, expert_scores, human_override)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(task_id, iteration) DO UPDATE SET
                score = excluded.score,
                dimensions = excluded.dimensions,
                suggestions = excluded.suggestions,
                needs_revision = excluded.needs_revision,
                expert_scores = excluded.expert_scores,
                human_override = excluded.human_override",
            rusqlite::params![
                iteration.task_id,
                iteration.iteration,
                iteration.score,
                iteration.dimensions.to_string(),
                serde_json::to_string(&iteration.suggestions).unwrap_or_default(),
                iteration.needs_revision as i64,
                iteration.expert_scores.as_ref().map(|s| serde_json::to_string(s).unwrap_or_default()),
                iteration.human_override.as_ref().map(|h| serde_json::to_string(h).unwrap_or_default()),
            ],
        )?;
        Ok(())
    }

    pub fn list_evaluation_iterations(&self, task_id: i64) -> EngineResult<Vec<EvaluationIteration>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT task_id, iteration, score, dimensions, suggestions, needs_revision, expert_scores, human_override, created_at
             FROM evaluation_iterations WHERE task_id = ?1 ORDER BY iteration",
        )?;
        let rows = stmt
            .query_map([task_id], row_to_evaluation_iteration)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Aggregate counts backing `/evaluation/supervision`: how many tasks
    /// are in each status, and how many recorded iterations still need
    /// revision with no human override superseding them.
    pub fn evaluation_supervision_report(&self) -> EngineResult<SupervisionReport> {
        let conn = self.conn.lock();
        let mut status_counts = std::collections::HashMap::new();
        let mut stmt = conn.prepare("SELECT status, count(*) FROM tasks GROUP BY status")?;
        let rows: Vec<(String, i64)> = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?.collect::<Result<_, _>>()?;
        for (status, count) in rows {
            status_counts.insert(status, count);
        }

        let unresolved_needs_revision: i64 = conn.query_row(
            "SELECT count(*) FROM evaluation_iterations WHERE needs_revision = 1 AND human_override IS NULL",
            [],
            |r| r.get(0),
        )?;

        Ok(SupervisionReport {
            tasks_by_status: status_counts,
            unresolved_needs_revision,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SupervisionReport {
    pub tasks_by_status: std::collections::HashMap<String, i64>,
    pub unresolved_needs_revision: i64,
}

fn reparent_paths(tx: &rusqlite::Transaction, root: i64, root_path: &str) -> EngineResult<()> {
    let mut stmt = tx.prepare("SELECT id FROM tasks WHERE parent_id = ?1")?;
    let children: Vec<i64> = stmt.query_map([root], |r| r.get(0))?.collect::<Result<_, _>>()?;
    drop(stmt);
    for child in children {
        let child_path = format!("{root_path}/{child}");
        tx.execute("UPDATE tasks SET path = ?1 WHERE id = ?2", rusqlite::params![child_path, child])?;
        reparent_paths(tx, child, &child_path)?;
    }
    Ok(())
}

fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vector(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let task_type: String = row.get("task_type")?;
    let metadata: Option<String> = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Task {
        id: row.get("id")?,
        parent_id: row.get("parent_id")?,
        root_id: row.get::<_, Option<i64>>("root_id")?.unwrap_or_default(),
        workflow_id: row.get::<_, Option<String>>("workflow_id")?.unwrap_or_default(),
        session_id: row.get("session_id")?,
        path: row.get("path")?,
        name: row.get("name")?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        priority: row.get("priority")?,
        task_type: TaskType::parse(&task_type).unwrap_or(TaskType::Atomic),
        input_prompt: None,
        output_content: None,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()).unwrap_or(serde_json::Value::Null),
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<Link> {
    let kind: String = row.get("kind")?;
    let created_at: String = row.get("created_at")?;
    Ok(Link {
        id: row.get("id")?,
        workflow_id: row.get("workflow_id")?,
        from_task: row.get("from_task")?,
        to_task: row.get("to_task")?,
        kind: LinkKind::parse(&kind).unwrap_or(LinkKind::Refers),
        created_at: parse_dt(&created_at),
    })
}

fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<Snapshot> {
    let sections: String = row.get("sections")?;
    let metadata: Option<String> = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    Ok(Snapshot {
        task_id: row.get("task_id")?,
        label: row.get("label")?,
        combined: row.get("combined")?,
        sections: serde_json::from_str(&sections).unwrap_or_default(),
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()).unwrap_or(serde_json::Value::Null),
        created_at: parse_dt(&created_at),
    })
}

fn row_to_workflow(row: &rusqlite::Row) -> rusqlite::Result<Workflow> {
    let metadata: Option<String> = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Workflow {
        workflow_id: row.get("workflow_id")?,
        session_id: row.get("session_id")?,
        root_task_id: row.get("root_task_id")?,
        title: row.get("title")?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()).unwrap_or(serde_json::Value::Null),
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

fn row_to_evaluation_iteration(row: &rusqlite::Row) -> rusqlite::Result<EvaluationIteration> {
    let dimensions: String = row.get("dimensions")?;
    let suggestions: String = row.get("suggestions")?;
    let expert_scores: Option<String> = row.get("expert_scores")?;
    let human_override: Option<String> = row.get("human_override")?;
    let created_at: String = row.get("created_at")?;
    Ok(EvaluationIteration {
        task_id: row.get("task_id")?,
        iteration: row.get::<_, i64>("iteration")? as u32,
        score: row.get("score")?,
        dimensions: serde_json::from_str(&dimensions).unwrap_or(serde_json::Value::Null),
        suggestions: serde_json::from_str(&suggestions).unwrap_or_default(),
        needs_revision: row.get::<_, i64>("needs_revision")? != 0,
        expert_scores: expert_scores.and_then(|s| serde_json::from_str(&s).ok()),
        human_override: human_override.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_dt(&created_at),
    })
}

fn parse_dt(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
                .map(|n| chrono::DateTime::from_naive_utc_and_offset(n, Utc))
                .unwrap_or_else(|_| Utc::now())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> TaskRepository {
        TaskRepository::open_in_memory().unwrap()
    }

    #[test]
    fn create_root_assigns_synthetic_workflow() {
        let repo = repo();
        let id = repo
            .create_task(None, "[Essay] Root", TaskStatus::Pending, 0, TaskType::Root, serde_json::Value::Null)
            .unwrap();
        let task = repo.get_task(id).unwrap();
        assert_eq!(task.workflow_id, format!("wf_{id}"));
        assert_eq!(task.path, id.to_string());
    }

    #[test]
    fn child_inherits_parent_workflow_and_path() {
        let repo = repo();
        let root = repo
            .create_task(None, "[Essay] Root", TaskStatus::Pending, 0, TaskType::Root, serde_json::Value::Null)
            .unwrap();
        let child = repo
            .create_task(Some(root), "[Essay] Intro", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null)
            .unwrap();
        let task = repo.get_task(child).unwrap();
        assert_eq!(task.workflow_id, format!("wf_{root}"));
        assert_eq!(task.path, format!("{root}/{child}"));
    }

    #[test]
    fn status_transition_enforced() {
        let repo = repo();
        let id = repo
            .create_task(None, "T", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null)
            .unwrap();
        assert!(repo.update_task_status(id, TaskStatus::Done, false).is_err());
        repo.update_task_status(id, TaskStatus::Running, false).unwrap();
        repo.update_task_status(id, TaskStatus::Done, false).unwrap();
        assert!(repo.update_task_status(id, TaskStatus::Running, false).is_err());
        repo.update_task_status(id, TaskStatus::Running, true).unwrap();
    }

    #[test]
    fn requires_link_rejects_cycle() {
        let repo = repo();
        let a = repo.create_task(None, "A", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let b = repo.create_task(Some(a), "B", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let c = repo.create_task(Some(a), "C", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        repo.create_link(a, b, LinkKind::Requires).unwrap();
        repo.create_link(b, c, LinkKind::Requires).unwrap();
        let err = repo.create_link(c, a, LinkKind::Requires).unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected { .. }));
    }

    #[test]
    fn list_dependencies_orders_requires_before_refers() {
        let repo = repo();
        let root = repo.create_task(None, "Root", TaskStatus::Pending, 0, TaskType::Root, serde_json::Value::Null).unwrap();
        let t = repo.create_task(Some(root), "T", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let r = repo.create_task(Some(root), "R", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let f = repo.create_task(Some(root), "F", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        repo.create_link(t, f, LinkKind::Refers).unwrap();
        repo.create_link(t, r, LinkKind::Requires).unwrap();
        let deps = repo.list_dependencies(t).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].kind, LinkKind::Requires);
        assert_eq!(deps[0].from_task, r);
    }

    #[test]
    fn embedding_round_trips_as_f32() {
        let repo = repo();
        let id = repo.create_task(None, "T", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        repo.store_task_embedding(id, &[1.0, -2.5, 3.25], "m1").unwrap();
        let pairs = repo.get_tasks_with_embeddings("m1", &format!("wf_{id}")).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1.vector, vec![1.0, -2.5, 3.25]);
    }

    #[test]
    fn snapshot_resave_replaces_same_label() {
        let repo = repo();
        let id = repo.create_task(None, "T", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        repo.upsert_task_context(id, "first", &[], serde_json::Value::Null, "latest").unwrap();
        repo.upsert_task_context(id, "second", &[], serde_json::Value::Null, "latest").unwrap();
        let snap = repo.get_snapshot(id, "latest").unwrap();
        assert_eq!(snap.combined, "second");
    }

    #[test]
    fn move_task_updates_subtree_paths() {
        let repo = repo();
        let root1 = repo.create_task(None, "R1", TaskStatus::Pending, 0, TaskType::Root, serde_json::Value::Null).unwrap();
        let root2 = repo.create_task(None, "R2", TaskStatus::Pending, 0, TaskType::Root, serde_json::Value::Null).unwrap();
        let child = repo.create_task(Some(root1), "C", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let grandchild = repo.create_task(Some(child), "GC", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();

        // moving across workflows is rejected
        assert!(repo.move_task(child, Some(root2)).is_err());

        let other_child = repo.create_task(Some(root1), "C2", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        repo.move_task(child, Some(other_child)).unwrap();
        let moved = repo.get_task(child).unwrap();
        assert_eq!(moved.path, format!("{root1}/{other_child}/{child}"));
        let gc = repo.get_task(grandchild).unwrap();
        assert_eq!(gc.path, format!("{root1}/{other_child}/{child}/{grandchild}"));
    }

    #[test]
    fn evaluation_iterations_round_trip() {
        let repo = repo();
        let id = repo.create_task(None, "T", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let iter = EvaluationIteration {
            task_id: id,
            iteration: 1,
            score: 0.6,
            dimensions: serde_json::json!({"clarity": 0.5}),
            suggestions: vec!["be clearer".into()],
            needs_revision: true,
            expert_scores: None,
            human_override: None,
            created_at: Utc::now(),
        };
        repo.record_evaluation_iteration(&iter).unwrap();
        let history = repo.list_evaluation_iterations(id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].score, 0.6);
    }

    #[test]
    fn re_recording_same_iteration_updates_in_place() {
        let repo = repo();
        let id = repo.create_task(None, "T", TaskStatus::Pending, 0, TaskType::Atomic, serde_json::Value::Null).unwrap();
        let mut iter = EvaluationIteration {
            task_id: id,
            iteration: 1,
            score: 0.6,
            dimensions: serde_json::json!({"clarity": 0.5}),
            suggestions: vec!["be clearer".into()],
            needs_revision: true,
            expert_scores: None,
            human_override: None,
            created_at: Utc::now(),
        };
        repo.record_evaluation_iteration(&iter).unwrap();

        iter.human_override = Some(crate::repository::models::HumanOverride {
            score: 0.95,
            reason: "looks fine to me".into(),
            overridden_at: Utc::now(),
        });
        repo.record_evaluation_iteration(&iter).unwrap();

        let history = repo.list_evaluation_iterations(id).unwrap();
        assert_eq!(history.len(), 1, "override must update the existing row, not add a new one");
        assert!(history[0].human_override.is_some());
    }
}
