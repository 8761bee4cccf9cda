//! Startup migrations for the embedded relational store.
//!
//! The schema migration and backfill algorithm are grounded verbatim in the
//! reference workflow-isolation migration: roots get a synthetic
//! `workflow_id = "wf_{root_id}"` when absent, descendants derive their
//! root/workflow from the first existing root ancestor, and `session_id`
//! propagates via `COALESCE` so an existing value is never clobbered.

use rusqlite::Connection;

use crate::error::{EngineError, EngineResult};

pub fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS workflows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workflow_id TEXT NOT NULL UNIQUE,
            session_id TEXT,
            root_task_id INTEGER UNIQUE,
            title TEXT,
            metadata TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            FOREIGN KEY (root_task_id) REFERENCES tasks(id) ON DELETE SET NULL
        );
        CREATE INDEX IF NOT EXISTS idx_workflows_session ON workflows(session_id);
        CREATE INDEX IF NOT EXISTS idx_workflows_root ON workflows(root_task_id);

        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER REFERENCES tasks(id) ON DELETE CASCADE,
            root_id INTEGER,
            workflow_id TEXT,
            session_id TEXT,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 0,
            task_type TEXT NOT NULL DEFAULT 'atomic',
            metadata TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_root_id ON tasks(root_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_workflow_id ON tasks(workflow_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_workflow_status ON tasks(workflow_id, status);
        CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);

        CREATE TABLE IF NOT EXISTS task_inputs (
            task_id INTEGER PRIMARY KEY REFERENCES tasks(id) ON DELETE CASCADE,
            prompt TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_outputs (
            task_id INTEGER PRIMARY KEY REFERENCES tasks(id) ON DELETE CASCADE,
            content TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_embeddings (
            task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            model_name TEXT NOT NULL,
            vector BLOB NOT NULL,
            dimension INTEGER NOT NULL,
            PRIMARY KEY (task_id, model_name)
        );

        CREATE TABLE IF NOT EXISTS task_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workflow_id TEXT NOT NULL,
            from_task INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            to_task INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            UNIQUE(from_task, to_task, kind)
        );
        CREATE INDEX IF NOT EXISTS idx_links_from ON task_links(from_task);
        CREATE INDEX IF NOT EXISTS idx_links_to ON task_links(to_task);

        CREATE TABLE IF NOT EXISTS task_contexts (
            task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            label TEXT NOT NULL,
            combined TEXT NOT NULL,
            sections TEXT NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            PRIMARY KEY (task_id, label)
        );

        CREATE TABLE IF NOT EXISTS evaluation_iterations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            iteration INTEGER NOT NULL,
            score REAL NOT NULL,
            dimensions TEXT NOT NULL,
            suggestions TEXT NOT NULL,
            needs_revision INTEGER NOT NULL,
            expert_scores TEXT,
            human_override TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            UNIQUE(task_id, iteration)
        );
        CREATE INDEX IF NOT EXISTS idx_eval_task ON evaluation_iterations(task_id);
        ",
    )
    .map_err(EngineError::from)?;

    backfill_workflow_isolation(conn)?;
    Ok(())
}

/// Faithful reproduction of the reference `20240501_add_workflow_isolation`
/// migration's backfill step, for rows that predate `workflow_id`.
fn backfill_workflow_isolation(conn: &Connection) -> EngineResult<()> {
    let mut root_stmt = conn.prepare(
        "SELECT id, name, session_id, workflow_id FROM tasks WHERE parent_id IS NULL AND root_id IS NULL",
    )?;
    let roots: Vec<(i64, String, Option<String>, Option<String>)> = root_stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                row.get(2)?,
                row.get(3)?,
            ))
        })?
        .collect::<Result<_, _>>()?;
    drop(root_stmt);

    for (root_id, name, session_id, workflow_id) in roots {
        let session_id = session_id.unwrap_or_else(|| "default".to_string());
        let workflow_id = workflow_id.unwrap_or_else(|| format!("wf_{root_id}"));
        let title = if name.is_empty() {
            format!("Root {root_id}")
        } else {
            name
        };

        conn.execute(
            "INSERT INTO workflows (workflow_id, session_id, root_task_id, title)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(workflow_id) DO UPDATE SET
                session_id = excluded.session_id,
                root_task_id = excluded.root_task_id,
                title = excluded.title",
            rusqlite::params![workflow_id, session_id, root_id, title],
        )?;

        conn.execute(
            "UPDATE tasks SET root_id = ?1, workflow_id = ?2, session_id = ?3 WHERE id = ?4",
            rusqlite::params![root_id, workflow_id, session_id, root_id],
        )?;
    }

    // Propagate root/workflow to descendants lacking them, following `path`.
    let mut desc_stmt = conn.prepare(
        "SELECT id, path, root_id, workflow_id, session_id FROM tasks
         WHERE parent_id IS NOT NULL AND (root_id IS NULL OR workflow_id IS NULL)",
    )?;
    let descendants: Vec<(i64, String, Option<i64>, Option<String>, Option<String>)> = desc_stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?
        .collect::<Result<_, _>>()?;
    drop(desc_stmt);

    for (task_id, path, parent_root, parent_workflow, session_id) in descendants {
        let derived_root = parent_root.or_else(|| extract_root_id(&path));
        let workflow_id = parent_workflow.or_else(|| derived_root.map(|r| format!("wf_{r}")));

        conn.execute(
            "UPDATE tasks SET root_id = ?1, workflow_id = ?2, session_id = COALESCE(session_id, ?3) WHERE id = ?4",
            rusqlite::params![derived_root, workflow_id, session_id, task_id],
        )?;
    }

    Ok(())
}

fn extract_root_id(path: &str) -> Option<i64> {
    path.trim_matches('/').split('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_gets_full_schema() {
        let conn = open();
        run_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='workflows'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn legacy_root_without_workflow_id_gets_synthetic_one() {
        let conn = open();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO tasks (id, parent_id, path, name, status, task_type) VALUES (1, NULL, '1', 'Root', 'done', 'root')",
            [],
        )
        .unwrap();
        backfill_workflow_isolation(&conn).unwrap();
        let workflow_id: String = conn
            .query_row("SELECT workflow_id FROM tasks WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(workflow_id, "wf_1");
        let wf_count: i64 = conn
            .query_row("SELECT count(*) FROM workflows WHERE workflow_id = 'wf_1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(wf_count, 1);
    }

    #[test]
    fn descendant_inherits_root_workflow_and_session() {
        let conn = open();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO tasks (id, parent_id, path, name, status, task_type, session_id) VALUES (1, NULL, '1', 'Root', 'done', 'root', 'sess-A')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tasks (id, parent_id, path, name, status, task_type) VALUES (2, 1, '1/2', 'Child', 'pending', 'atomic')",
            [],
        )
        .unwrap();
        backfill_workflow_isolation(&conn).unwrap();
        let (workflow_id, session_id): (String, String) = conn
            .query_row(
                "SELECT workflow_id, session_id FROM tasks WHERE id = 2",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(workflow_id, "wf_1");
        assert_eq!(session_id, "sess-A");
    }
}
