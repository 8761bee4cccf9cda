//! 4.I — async job registry: tracks long-running plan decompositions and
//! streams progress to subscribers (SSE-ready).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::JobsConfig;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub cursor: u64,
    pub action: String,
    pub data: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    pub params: serde_json::Value,
    pub stats: serde_json::Value,
    pub logs: Vec<LogEntry>,
    pub action_logs: Vec<ActionEntry>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// An event broadcast to subscribers; also the SSE wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Event { level: String, message: String },
    Action { cursor: u64, action: String },
    Heartbeat { snapshot: Box<JobSnapshot> },
    Done { result: Option<serde_json::Value>, error: Option<String> },
    Overflow,
}

/// A point-in-time job view; `logs`/`action_logs` are omitted when the
/// caller does not ask for them (`include_logs=false`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    pub stats: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub logs: Option<Vec<LogEntry>>,
    pub action_logs: Option<Vec<ActionEntry>>,
}

struct JobEntry {
    record: Mutex<JobRecord>,
    cursor: AtomicU64,
    tx: broadcast::Sender<JobEvent>,
}

pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Arc<JobEntry>>>,
    next_id: AtomicI64,
    cfg: JobsConfig,
}

impl JobRegistry {
    pub fn new(cfg: JobsConfig) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            cfg,
        }
    }

    pub fn create_job(&self, kind: &str, params: serde_json::Value) -> String {
        let id = format!("job_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = JobRecord {
            id: id.clone(),
            kind: kind.to_string(),
            status: JobStatus::Queued,
            params,
            stats: serde_json::Value::Null,
            logs: Vec::new(),
            action_logs: Vec::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let (tx, _rx) = broadcast::channel(self.cfg.subscriber_buffer.max(1));
        let entry = Arc::new(JobEntry {
            record: Mutex::new(record),
            cursor: AtomicU64::new(0),
            tx,
        });
        self.jobs.lock().insert(id.clone(), entry);
        id
    }

    fn entry(&self, id: &str) -> EngineResult<Arc<JobEntry>> {
        self.jobs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Validation {
                message: format!("unknown job {id}"),
            })
    }

    pub fn start_job(&self, id: &str) -> EngineResult<()> {
        let entry = self.entry(id)?;
        let mut record = entry.record.lock();
        record.status = JobStatus::Running;
        record.started_at = Some(Utc::now());
        Ok(())
    }

    /// Appends a log entry and broadcasts it outside the job lock.
    pub fn append_log(&self, id: &str, level: &str, message: &str, data: Option<serde_json::Value>) -> EngineResult<()> {
        let entry = self.entry(id)?;
        {
            let mut record = entry.record.lock();
            record.logs.push(LogEntry {
                level: level.to_string(),
                message: message.to_string(),
                data: data.clone(),
                at: Utc::now(),
            });
        }
        let _ = entry.tx.send(JobEvent::Event {
            level: level.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    /// Appends an action entry with a monotonically advancing cursor (P8).
    pub fn append_action(&self, id: &str, action: &str, data: Option<serde_json::Value>) -> EngineResult<u64> {
        let entry = self.entry(id)?;
        let cursor = entry.cursor.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut record = entry.record.lock();
            record.action_logs.push(ActionEntry {
                cursor,
                action: action.to_string(),
                data: data.clone(),
                at: Utc::now(),
            });
        }
        let _ = entry.tx.send(JobEvent::Action {
            cursor,
            action: action.to_string(),
        });
        Ok(cursor)
    }

    pub fn complete_job(&self, id: &str, result: Option<serde_json::Value>, error: Option<String>) -> EngineResult<()> {
        let entry = self.entry(id)?;
        {
            let mut record = entry.record.lock();
            record.status = if error.is_some() { JobStatus::Failed } else { JobStatus::Succeeded };
            record.result = result.clone();
            record.error = error.clone();
            record.finished_at = Some(Utc::now());
        }
        let _ = entry.tx.send(JobEvent::Done { result, error });
        Ok(())
    }

    pub fn get_job(&self, id: &str, include_logs: bool) -> EngineResult<JobSnapshot> {
        let entry = self.entry(id)?;
        let record = entry.record.lock();
        Ok(JobSnapshot {
            id: record.id.clone(),
            kind: record.kind.clone(),
            status: record.status,
            stats: record.stats.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
            logs: include_logs.then(|| record.logs.clone()),
            action_logs: include_logs.then(|| record.action_logs.clone()),
        })
    }

    /// Subscribes to job events; the returned receiver drops the slowest
    /// subscriber's backlog on overflow rather than blocking the sender.
    pub fn subscribe(&self, id: &str) -> EngineResult<broadcast::Receiver<JobEvent>> {
        let entry = self.entry(id)?;
        Ok(entry.tx.subscribe())
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cfg.heartbeat_interval_secs)
    }

    /// Emits a log-less snapshot heartbeat to subscribers of `id`.
    pub fn heartbeat(&self, id: &str) -> EngineResult<()> {
        let snapshot = self.get_job(id, false)?;
        let entry = self.entry(id)?;
        let _ = entry.tx.send(JobEvent::Heartbeat {
            snapshot: Box::new(snapshot),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> JobRegistry {
        JobRegistry::new(JobsConfig {
            heartbeat_interval_secs: 15,
            subscriber_buffer: 8,
        })
    }

    #[test]
    fn create_and_start_transitions_status() {
        let reg = registry();
        let id = reg.create_job("decompose", serde_json::json!({"goal": "write essay"}));
        assert_eq!(reg.get_job(&id, false).unwrap().status, JobStatus::Queued);
        reg.start_job(&id).unwrap();
        assert_eq!(reg.get_job(&id, false).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn action_cursor_strictly_increases() {
        let reg = registry();
        let id = reg.create_job("decompose", serde_json::Value::Null);
        let c1 = reg.append_action(&id, "planned_task", None).unwrap();
        let c2 = reg.append_action(&id, "planned_task", None).unwrap();
        let c3 = reg.append_action(&id, "planned_task", None).unwrap();
        assert!(c1 < c2);
        assert!(c2 < c3);
    }

    #[tokio::test]
    async fn subscriber_receives_logs_and_completion() {
        let reg = registry();
        let id = reg.create_job("decompose", serde_json::Value::Null);
        let mut rx = reg.subscribe(&id).unwrap();
        reg.append_log(&id, "info", "starting", None).unwrap();
        reg.complete_job(&id, Some(serde_json::json!({"ok": true})), None).unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, JobEvent::Event { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, JobEvent::Done { .. }));
    }

    #[test]
    fn get_job_omits_logs_when_not_requested() {
        let reg = registry();
        let id = reg.create_job("decompose", serde_json::Value::Null);
        reg.append_log(&id, "info", "hello", None).unwrap();
        let snap = reg.get_job(&id, false).unwrap();
        assert!(snap.logs.is_none());
        let snap = reg.get_job(&id, true).unwrap();
        assert_eq!(snap.logs.unwrap().len(), 1);
    }

    #[test]
    fn unknown_job_is_an_error() {
        let reg = registry();
        assert!(reg.get_job("job_999", false).is_err());
    }
}
