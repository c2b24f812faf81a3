//! SQLite-based storage for tasks, dependency edges and history logs.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use super::data_dir;
use super::migrations;
use super::store::{InterventionEntry, TaskStore};
use crate::error::{CoreError, DatabaseError, Result};
use crate::graph::DependencyEdge;
use crate::task::{
    ComparisonRecord, NewTask, PostponeRecord, PriorityTier, ReasonType, Task, TaskId, TaskState,
};

const TASK_COLUMNS: &str = "id, title, tier, rating, comparison_count, due_date, state,
    start_date, delegate_target, follow_up_date, context_id, created_at, updated_at,
    completed_at, last_resurfaced_at, resurface_count, revision";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// === Helper Functions ===

fn corrupt(column: &'static str, value: impl Into<String>) -> CoreError {
    DatabaseError::CorruptValue {
        column,
        value: value.into(),
    }
    .into()
}

fn parse_task_state(state_str: &str) -> Result<TaskState> {
    state_str
        .parse::<TaskState>()
        .map_err(|_| corrupt("state", state_str))
}

fn parse_reason_type(reason_str: &str) -> Result<ReasonType> {
    reason_str
        .parse::<ReasonType>()
        .map_err(|_| corrupt("reason_type", reason_str))
}

fn parse_datetime(column: &'static str, dt_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(dt_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(column, dt_str))
}

fn parse_opt_datetime(column: &'static str, dt_str: Option<String>) -> Result<Option<DateTime<Utc>>> {
    dt_str.map(|s| parse_datetime(column, &s)).transpose()
}

fn parse_opt_date(column: &'static str, date_str: Option<String>) -> Result<Option<NaiveDate>> {
    date_str
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| corrupt(column, s)))
        .transpose()
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn format_datetime(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(|d| d.to_rfc3339())
}

/// Raw column values; decoded into a `Task` outside the row callback so
/// decode failures surface as `DatabaseError::CorruptValue`.
struct TaskRow {
    id: i64,
    title: String,
    tier: u8,
    rating: f64,
    comparison_count: u32,
    due_date: Option<String>,
    state: String,
    start_date: Option<String>,
    delegate_target: Option<String>,
    follow_up_date: Option<String>,
    context_id: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
    last_resurfaced_at: Option<String>,
    resurface_count: u32,
    revision: i64,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(TaskRow {
            id: row.get(0)?,
            title: row.get(1)?,
            tier: row.get(2)?,
            rating: row.get(3)?,
            comparison_count: row.get(4)?,
            due_date: row.get(5)?,
            state: row.get(6)?,
            start_date: row.get(7)?,
            delegate_target: row.get(8)?,
            follow_up_date: row.get(9)?,
            context_id: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            completed_at: row.get(13)?,
            last_resurfaced_at: row.get(14)?,
            resurface_count: row.get(15)?,
            revision: row.get(16)?,
        })
    }

    fn into_task(self, project_tags: BTreeSet<String>) -> Result<Task> {
        let tier = PriorityTier::try_from(self.tier).map_err(|_| corrupt("tier", self.tier.to_string()))?;
        Ok(Task {
            id: TaskId(self.id),
            title: self.title,
            tier,
            rating: self.rating,
            comparison_count: self.comparison_count,
            due_date: parse_opt_date("due_date", self.due_date)?,
            state: parse_task_state(&self.state)?,
            start_date: parse_opt_date("start_date", self.start_date)?,
            delegate_target: self.delegate_target,
            follow_up_date: parse_opt_date("follow_up_date", self.follow_up_date)?,
            context_id: self.context_id,
            project_tags,
            created_at: parse_datetime("created_at", &self.created_at)?,
            updated_at: parse_datetime("updated_at", &self.updated_at)?,
            completed_at: parse_opt_datetime("completed_at", self.completed_at)?,
            last_resurfaced_at: parse_opt_datetime("last_resurfaced_at", self.last_resurfaced_at)?,
            resurface_count: self.resurface_count,
            revision: u64::try_from(self.revision).map_err(|_| corrupt("revision", self.revision.to_string()))?,
        })
    }
}

/// SQLite database for tasks and their history.
pub struct TaskDb {
    conn: Connection,
}

impl TaskDb {
    /// Open the task database at `~/.config/nextup/nextup.db`.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(data_dir()?.join("nextup.db"))
    }

    /// Open (or create) a database file at an explicit path.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(conn)
    }

    /// Open an in-memory database (tests and dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self { conn };
        db.migrate()
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                title              TEXT NOT NULL,
                tier               INTEGER NOT NULL CHECK (tier BETWEEN 1 AND 3),
                rating             REAL NOT NULL,
                comparison_count   INTEGER NOT NULL DEFAULT 0,
                due_date           TEXT,
                state              TEXT NOT NULL,
                start_date         TEXT,
                delegate_target    TEXT,
                follow_up_date     TEXT,
                context_id         TEXT,
                created_at         TEXT NOT NULL,
                updated_at         TEXT NOT NULL,
                completed_at       TEXT,
                last_resurfaced_at TEXT,
                resurface_count    INTEGER NOT NULL DEFAULT 0,
                revision           INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS task_tags (
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                tag     TEXT NOT NULL,
                PRIMARY KEY (task_id, tag)
            );

            CREATE TABLE IF NOT EXISTS dependencies (
                blocked_id  INTEGER NOT NULL REFERENCES tasks(id),
                blocking_id INTEGER NOT NULL REFERENCES tasks(id),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (blocked_id, blocking_id),
                CHECK (blocked_id <> blocking_id)
            );

            CREATE TABLE IF NOT EXISTS postpone_history (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id      INTEGER NOT NULL REFERENCES tasks(id),
                reason_type  TEXT NOT NULL,
                notes        TEXT,
                action_taken TEXT NOT NULL,
                recorded_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS comparison_history (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                winner_id            INTEGER NOT NULL REFERENCES tasks(id),
                loser_id             INTEGER NOT NULL REFERENCES tasks(id),
                winner_rating_before REAL NOT NULL,
                winner_rating_after  REAL NOT NULL,
                loser_rating_before  REAL NOT NULL,
                loser_rating_after   REAL NOT NULL,
                recorded_at          TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS intervention_log (
                task_id        INTEGER PRIMARY KEY REFERENCES tasks(id),
                alerted_at     TEXT NOT NULL,
                postpone_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        migrations::migrate(&self.conn)
    }

    fn load_tags(&self, task_id: TaskId) -> Result<BTreeSet<String>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM task_tags WHERE task_id = ?1 ORDER BY tag")?;
        let rows = stmt.query_map(params![task_id.0], |row| row.get::<_, String>(0))?;
        rows.collect()
    }

    fn set_tags(&self, task_id: TaskId, tags: &BTreeSet<String>) -> Result<(), rusqlite::Error> {
        self.conn
            .execute("DELETE FROM task_tags WHERE task_id = ?1", params![task_id.0])?;
        for tag in tags {
            self.conn.execute(
                "INSERT INTO task_tags (task_id, tag) VALUES (?1, ?2)",
                params![task_id.0, tag],
            )?;
        }
        Ok(())
    }

    fn query_tasks(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|row| {
                let tags = self.load_tags(TaskId(row.id))?;
                row.into_task(tags)
            })
            .collect()
    }

    fn exists(&self, id: TaskId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM tasks WHERE id = ?1", params![id.0], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }
}

impl TaskStore for TaskDb {
    fn get_by_id(&self, id: TaskId) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        Ok(self.query_tasks(&sql, params![id.0])?.into_iter().next())
    }

    fn get_by_state(&self, state: TaskState) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE state = ?1 ORDER BY id");
        self.query_tasks(&sql, params![state.as_str()])
    }

    fn list_all(&self) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id");
        self.query_tasks(&sql, [])
    }

    fn create(&self, draft: &NewTask, initial_rating: f64, now: DateTime<Utc>) -> Result<Task> {
        let created = format_datetime(Some(now));
        self.conn.execute(
            "INSERT INTO tasks (title, tier, rating, comparison_count, due_date, state,
                                start_date, context_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                draft.title,
                u8::from(draft.tier),
                initial_rating,
                format_date(draft.due_date),
                draft.initial_state().as_str(),
                format_date(draft.start_date),
                draft.context_id,
                created,
            ],
        )?;
        let id = TaskId(self.conn.last_insert_rowid());
        self.set_tags(id, &draft.project_tags)?;
        self.get_by_id(id)?.ok_or(CoreError::NotFound(id))
    }

    fn update(&self, task: &Task) -> Result<Task> {
        let revision = i64::try_from(task.revision)
            .map_err(|_| corrupt("revision", task.revision.to_string()))?;
        let changed = self.conn.execute(
            "UPDATE tasks SET
                title = ?1, tier = ?2, rating = ?3, comparison_count = ?4, due_date = ?5,
                state = ?6, start_date = ?7, delegate_target = ?8, follow_up_date = ?9,
                context_id = ?10, updated_at = ?11, completed_at = ?12,
                last_resurfaced_at = ?13, resurface_count = ?14, revision = revision + 1
             WHERE id = ?15 AND revision = ?16",
            params![
                task.title,
                u8::from(task.tier),
                task.rating,
                task.comparison_count,
                format_date(task.due_date),
                task.state.as_str(),
                format_date(task.start_date),
                task.delegate_target,
                format_date(task.follow_up_date),
                task.context_id,
                format_datetime(Some(task.updated_at)),
                format_datetime(task.completed_at),
                format_datetime(task.last_resurfaced_at),
                task.resurface_count,
                task.id.0,
                revision,
            ],
        )?;
        if changed == 0 {
            return Err(if self.exists(task.id)? {
                CoreError::ConcurrencyConflict { task_id: task.id }
            } else {
                CoreError::NotFound(task.id)
            });
        }
        self.set_tags(task.id, &task.project_tags)?;
        let mut stored = task.clone();
        stored.revision = task.revision + 1;
        Ok(stored)
    }

    fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    fn load_edges(&self) -> Result<Vec<DependencyEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT blocked_id, blocking_id FROM dependencies ORDER BY blocked_id, blocking_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DependencyEdge::new(TaskId(row.get(0)?), TaskId(row.get(1)?)))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn insert_edge(&self, edge: DependencyEdge, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO dependencies (blocked_id, blocking_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![edge.blocked_id.0, edge.blocking_id.0, now.to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete_edge(&self, edge: DependencyEdge) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM dependencies WHERE blocked_id = ?1 AND blocking_id = ?2",
            params![edge.blocked_id.0, edge.blocking_id.0],
        )?;
        Ok(removed > 0)
    }

    fn delete_edges_blocked_by(&self, blocking: TaskId) -> Result<Vec<TaskId>> {
        let dependents = {
            let mut stmt = self.conn.prepare(
                "SELECT blocked_id FROM dependencies WHERE blocking_id = ?1 ORDER BY blocked_id",
            )?;
            let rows = stmt.query_map(params![blocking.0], |row| row.get::<_, i64>(0))?;
            rows.map(|r| r.map(TaskId)).collect::<Result<Vec<_>, _>>()?
        };
        self.conn.execute(
            "DELETE FROM dependencies WHERE blocking_id = ?1",
            params![blocking.0],
        )?;
        Ok(dependents)
    }

    fn append_postpone(&self, record: &PostponeRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO postpone_history (task_id, reason_type, notes, action_taken, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.task_id.0,
                record.reason_type.as_str(),
                record.notes,
                record.action_taken,
                record.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn postpone_history(
        &self,
        task: Option<TaskId>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostponeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, reason_type, notes, action_taken, recorded_at
             FROM postpone_history
             WHERE (?1 IS NULL OR task_id = ?1)
             ORDER BY recorded_at, id",
        )?;
        let rows = stmt
            .query_map(params![task.map(|t| t.0)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (task_id, reason, notes, action_taken, recorded_at) in rows {
            let recorded_at = parse_datetime("recorded_at", &recorded_at)?;
            if since.is_some_and(|s| recorded_at < s) {
                continue;
            }
            records.push(PostponeRecord {
                task_id: TaskId(task_id),
                reason_type: parse_reason_type(&reason)?,
                notes,
                action_taken,
                recorded_at,
            });
        }
        Ok(records)
    }

    fn append_comparison(&self, record: &ComparisonRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO comparison_history (winner_id, loser_id, winner_rating_before,
                winner_rating_after, loser_rating_before, loser_rating_after, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.winner_id.0,
                record.loser_id.0,
                record.winner_rating_before,
                record.winner_rating_after,
                record.loser_rating_before,
                record.loser_rating_after,
                record.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn comparison_history(&self, task: Option<TaskId>) -> Result<Vec<ComparisonRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT winner_id, loser_id, winner_rating_before, winner_rating_after,
                    loser_rating_before, loser_rating_after, recorded_at
             FROM comparison_history
             WHERE (?1 IS NULL OR winner_id = ?1 OR loser_id = ?1)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![task.map(|t| t.0)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(w, l, wb, wa, lb, la, at)| {
                Ok(ComparisonRecord {
                    winner_id: TaskId(w),
                    loser_id: TaskId(l),
                    winner_rating_before: wb,
                    winner_rating_after: wa,
                    loser_rating_before: lb,
                    loser_rating_after: la,
                    recorded_at: parse_datetime("recorded_at", &at)?,
                })
            })
            .collect()
    }

    fn last_intervention(&self, task: TaskId) -> Result<Option<InterventionEntry>> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT alerted_at, postpone_count FROM intervention_log WHERE task_id = ?1",
                params![task.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(alerted_at, count)| {
            Ok(InterventionEntry {
                task_id: task,
                alerted_at: parse_datetime("alerted_at", &alerted_at)?,
                postpone_count: usize::try_from(count)
                    .map_err(|_| corrupt("postpone_count", count.to_string()))?,
            })
        })
        .transpose()
    }

    fn record_intervention(&self, entry: &InterventionEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO intervention_log (task_id, alerted_at, postpone_count)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
                alerted_at = excluded.alerted_at,
                postpone_count = excluded.postpone_count",
            params![
                entry.task_id.0,
                entry.alerted_at.to_rfc3339(),
                i64::try_from(entry.postpone_count).unwrap_or(i64::MAX),
            ],
        )?;
        Ok(())
    }

    fn get_kv(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set_kv(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::with_transaction;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    fn make_task(db: &TaskDb, title: &str) -> Task {
        let mut draft = NewTask::new(title, PriorityTier::High);
        draft.project_tags.insert("home".into());
        db.create(&draft, 1500.0, now()).unwrap()
    }

    #[test]
    fn create_and_get_task() {
        let db = TaskDb::open_in_memory().unwrap();
        let task = make_task(&db, "Test task");

        let retrieved = db.get_by_id(task.id).unwrap().unwrap();
        assert_eq!(retrieved.title, "Test task");
        assert_eq!(retrieved.tier, PriorityTier::High);
        assert_eq!(retrieved.rating, 1500.0);
        assert_eq!(retrieved.state, TaskState::Active);
        assert_eq!(retrieved.revision, 0);
        assert!(retrieved.project_tags.contains("home"));
        assert_eq!(retrieved.created_at, now());
    }

    #[test]
    fn deferred_draft_stores_start_date() {
        let db = TaskDb::open_in_memory().unwrap();
        let start = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let task = db
            .create(
                &NewTask::new("later", PriorityTier::Low).deferred_until(start),
                1500.0,
                now(),
            )
            .unwrap();
        assert_eq!(task.state, TaskState::Deferred);
        assert_eq!(task.start_date, Some(start));
    }

    #[test]
    fn get_by_state_filters() {
        let db = TaskDb::open_in_memory().unwrap();
        let a = make_task(&db, "a");
        let b = make_task(&db, "b");
        let mut done = b.clone();
        done.state = TaskState::Completed;
        done.completed_at = Some(now());
        db.update(&done).unwrap();

        let active = db.get_by_state(TaskState::Active).unwrap();
        assert_eq!(active.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a.id]);
        assert_eq!(db.get_by_state(TaskState::Completed).unwrap().len(), 1);
        assert_eq!(db.list_all().unwrap().len(), 2);
    }

    #[test]
    fn update_bumps_revision_and_rejects_stale_writes() {
        let db = TaskDb::open_in_memory().unwrap();
        let task = make_task(&db, "original");

        let mut first = task.clone();
        first.title = "first writer".into();
        let stored = db.update(&first).unwrap();
        assert_eq!(stored.revision, 1);

        let mut stale = task.clone();
        stale.title = "second writer".into();
        let err = db.update(&stale).unwrap_err();
        assert!(matches!(err, CoreError::ConcurrencyConflict { task_id } if task_id == task.id));
        assert_eq!(db.get_by_id(task.id).unwrap().unwrap().title, "first writer");
    }

    #[test]
    fn update_unknown_task_is_not_found() {
        let db = TaskDb::open_in_memory().unwrap();
        let mut ghost = make_task(&db, "ghost");
        ghost.id = TaskId(999);
        assert!(matches!(db.update(&ghost), Err(CoreError::NotFound(TaskId(999)))));
    }

    #[test]
    fn update_replaces_tags() {
        let db = TaskDb::open_in_memory().unwrap();
        let mut task = make_task(&db, "tagged");
        task.project_tags = ["work".to_string(), "q3".to_string()].into();
        db.update(&task).unwrap();
        let tags = db.get_by_id(task.id).unwrap().unwrap().project_tags;
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["q3", "work"]);
    }

    #[test]
    fn edges_round_trip_and_release() {
        let db = TaskDb::open_in_memory().unwrap();
        let a = make_task(&db, "a");
        let b = make_task(&db, "b");
        let c = make_task(&db, "c");
        db.insert_edge(DependencyEdge::new(a.id, c.id), now()).unwrap();
        db.insert_edge(DependencyEdge::new(b.id, c.id), now()).unwrap();
        db.insert_edge(DependencyEdge::new(b.id, c.id), now()).unwrap();
        assert_eq!(db.load_edges().unwrap().len(), 2);

        assert!(db.delete_edge(DependencyEdge::new(a.id, c.id)).unwrap());
        assert!(!db.delete_edge(DependencyEdge::new(a.id, c.id)).unwrap());

        assert_eq!(db.delete_edges_blocked_by(c.id).unwrap(), vec![b.id]);
        assert!(db.load_edges().unwrap().is_empty());
    }

    #[test]
    fn self_edge_violates_check_constraint() {
        let db = TaskDb::open_in_memory().unwrap();
        let a = make_task(&db, "a");
        assert!(db.insert_edge(DependencyEdge::new(a.id, a.id), now()).is_err());
    }

    #[test]
    fn postpone_history_filters_by_task_and_window() {
        let db = TaskDb::open_in_memory().unwrap();
        let a = make_task(&db, "a");
        let b = make_task(&db, "b");
        for (task, days_ago) in [(a.id, 20), (a.id, 2), (b.id, 1)] {
            db.append_postpone(&PostponeRecord {
                task_id: task,
                reason_type: ReasonType::Blocker,
                notes: None,
                action_taken: "deferred".into(),
                recorded_at: now() - ChronoDuration::days(days_ago),
            })
            .unwrap();
        }
        assert_eq!(db.postpone_history(None, None).unwrap().len(), 3);
        assert_eq!(db.postpone_history(Some(a.id), None).unwrap().len(), 2);
        let recent = db
            .postpone_history(None, Some(now() - ChronoDuration::days(7)))
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].task_id, a.id);
    }

    #[test]
    fn comparison_history_matches_either_side() {
        let db = TaskDb::open_in_memory().unwrap();
        let a = make_task(&db, "a");
        let b = make_task(&db, "b");
        db.append_comparison(&ComparisonRecord {
            winner_id: a.id,
            loser_id: b.id,
            winner_rating_before: 1500.0,
            winner_rating_after: 1516.0,
            loser_rating_before: 1500.0,
            loser_rating_after: 1484.0,
            recorded_at: now(),
        })
        .unwrap();
        assert_eq!(db.comparison_history(Some(b.id)).unwrap().len(), 1);
        assert_eq!(db.comparison_history(None).unwrap()[0].winner_rating_after, 1516.0);
    }

    #[test]
    fn intervention_log_upserts() {
        let db = TaskDb::open_in_memory().unwrap();
        let a = make_task(&db, "a");
        assert!(db.last_intervention(a.id).unwrap().is_none());
        for count in [3, 5] {
            db.record_intervention(&InterventionEntry {
                task_id: a.id,
                alerted_at: now(),
                postpone_count: count,
            })
            .unwrap();
        }
        assert_eq!(db.last_intervention(a.id).unwrap().unwrap().postpone_count, 5);
    }

    #[test]
    fn kv_upserts() {
        let db = TaskDb::open_in_memory().unwrap();
        assert!(db.get_kv("k").unwrap().is_none());
        db.set_kv("k", "1").unwrap();
        db.set_kv("k", "2").unwrap();
        assert_eq!(db.get_kv("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let db = TaskDb::open_in_memory().unwrap();
        let a = make_task(&db, "a");
        let result: Result<()> = with_transaction(&db, |store| {
            let mut renamed = a.clone();
            renamed.title = "renamed".into();
            store.update(&renamed)?;
            Err(CoreError::NotFound(TaskId(42)))
        });
        assert!(result.is_err());
        assert_eq!(db.get_by_id(a.id).unwrap().unwrap().title, "a");
        assert_eq!(db.get_by_id(a.id).unwrap().unwrap().revision, 0);
    }

    #[test]
    fn corrupt_state_surfaces_as_database_error() {
        let db = TaskDb::open_in_memory().unwrap();
        let a = make_task(&db, "a");
        db.conn
            .execute("UPDATE tasks SET state = 'RUNNING' WHERE id = ?1", params![a.id.0])
            .unwrap();
        assert!(matches!(
            db.get_by_id(a.id),
            Err(CoreError::Database(DatabaseError::CorruptValue { column: "state", .. }))
        ));
    }

    #[test]
    fn reopening_file_keeps_data_and_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nextup.db");
        let id = {
            let db = TaskDb::open_at(&path).unwrap();
            make_task(&db, "persisted").id
        };
        let db = TaskDb::open_at(&path).unwrap();
        assert_eq!(db.get_by_id(id).unwrap().unwrap().title, "persisted");
        assert_eq!(migrations::get_schema_version(&db.conn).unwrap(), 2);
    }
}
