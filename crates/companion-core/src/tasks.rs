//! SQLite-backed task store: reminders and to-dos the companion tracks
//! on the user's behalf, with priority ordering and due-date queries.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(CoreError::InvalidScheduleExpr(format!("unknown task status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(CoreError::InvalidScheduleExpr(format!("unknown task priority: {other}"))),
        }
    }

    /// Sort rank used for priority ordering (lower sorts first).
    fn rank(self) -> u8 {
        match self {
            Priority::Urgent => 1,
            Priority::High => 2,
            Priority::Medium => 3,
            Priority::Low => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub created_at: i64,
    pub due_date: Option<i64>,
    pub completed_at: Option<i64>,
    pub mood_on_creation: Option<String>,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub subtasks_total: u32,
    pub subtasks_completed: u32,
}

impl Task {
    pub fn is_overdue(&self, now: i64) -> bool {
        match self.due_date {
            Some(due) => self.status != TaskStatus::Completed && now > due,
            None => false,
        }
    }

    /// 100 if completed with no subtasks, else `completed / total * 100`.
    pub fn completion_percentage(&self) -> f64 {
        if self.subtasks_total == 0 {
            return if self.status == TaskStatus::Completed { 100.0 } else { 0.0 };
        }
        (self.subtasks_completed as f64 / self.subtasks_total as f64) * 100.0
    }
}

pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    pub fn open(db_path: &str) -> CoreResult<Self> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(db_path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let store = Self { conn: Mutex::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> CoreResult<()> {
        let conn = self.conn.lock().expect("task store mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'medium',
                created_at INTEGER NOT NULL,
                due_date INTEGER,
                completed_at INTEGER,
                mood_on_creation TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                project TEXT,
                subtasks_total INTEGER NOT NULL DEFAULT 0,
                subtasks_completed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_due_date ON tasks(due_date);
            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project);
            ",
        )?;
        Ok(())
    }

    pub fn create_task(
        &self,
        title: &str,
        description: Option<&str>,
        priority: Priority,
        due_date: Option<i64>,
        mood: Option<&str>,
        tags: Vec<String>,
        project: Option<&str>,
    ) -> CoreResult<Task> {
        let task = Task {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: description.map(String::from),
            status: TaskStatus::Pending,
            priority,
            created_at: chrono::Utc::now().timestamp(),
            due_date,
            completed_at: None,
            mood_on_creation: mood.map(String::from),
            tags,
            project: project.map(String::from),
            subtasks_total: 0,
            subtasks_completed: 0,
        };

        self.save_task(&task)?;
        Ok(task)
    }

    fn save_task(&self, task: &Task) -> CoreResult<()> {
        let tags_json = serde_json::to_string(&task.tags)?;
        let conn = self.conn.lock().expect("task store mutex poisoned");

        conn.execute(
            "INSERT OR REPLACE INTO tasks (
                id, title, description, status, priority,
                created_at, due_date, completed_at,
                mood_on_creation, tags, project,
                subtasks_total, subtasks_completed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                task.id.to_string(),
                task.title,
                task.description,
                task.status.as_str(),
                task.priority.as_str(),
                task.created_at,
                task.due_date,
                task.completed_at,
                task.mood_on_creation,
                tags_json,
                task.project,
                task.subtasks_total,
                task.subtasks_completed,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: Uuid) -> CoreResult<Option<Task>> {
        let conn = self.conn.lock().expect("task store mutex poisoned");
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
        let mut rows = stmt.query(params![id.to_string()])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row_to_task(row)?))
        } else {
            Ok(None)
        }
    }

    /// Lists tasks ordered by priority (urgent first) then due date, nulls
    /// last, then most-recently-created.
    pub fn list_tasks(&self, status: Option<TaskStatus>, project: Option<&str>, limit: Option<u32>) -> CoreResult<Vec<Task>> {
        let conn = self.conn.lock().expect("task store mutex poisoned");

        let mut query = String::from("SELECT * FROM tasks WHERE 1=1");
        if status.is_some() {
            query.push_str(" AND status = ?1");
        }
        if project.is_some() {
            query.push_str(if status.is_some() { " AND project = ?2" } else { " AND project = ?1" });
        }

        let mut stmt = conn.prepare(&query)?;
        let mut tasks: Vec<Task> = match (status, project) {
            (Some(s), Some(p)) => stmt.query_map(params![s.as_str(), p], row_to_task)?.collect::<Result<_, _>>()?,
            (Some(s), None) => stmt.query_map(params![s.as_str()], row_to_task)?.collect::<Result<_, _>>()?,
            (None, Some(p)) => stmt.query_map(params![p], row_to_task)?.collect::<Result<_, _>>()?,
            (None, None) => stmt.query_map([], row_to_task)?.collect::<Result<_, _>>()?,
        };

        tasks.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then_with(|| match (a.due_date, b.due_date) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => b.created_at.cmp(&a.created_at),
                })
        });

        if let Some(limit) = limit {
            tasks.truncate(limit as usize);
        }
        Ok(tasks)
    }

    pub fn complete_task(&self, id: Uuid) -> CoreResult<Option<Task>> {
        let Some(mut task) = self.get_task(id)? else {
            return Ok(None);
        };
        task.status = TaskStatus::Completed;
        task.completed_at = Some(chrono::Utc::now().timestamp());
        self.save_task(&task)?;
        Ok(Some(task))
    }

    pub fn delete_task(&self, id: Uuid) -> CoreResult<bool> {
        let conn = self.conn.lock().expect("task store mutex poisoned");
        let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    pub fn get_overdue_tasks(&self) -> CoreResult<Vec<Task>> {
        let now = chrono::Utc::now().timestamp();
        let mut tasks = self.list_tasks(Some(TaskStatus::Pending), None, None)?;
        tasks.extend(self.list_tasks(Some(TaskStatus::InProgress), None, None)?);
        Ok(tasks.into_iter().filter(|t| t.is_overdue(now)).collect())
    }

    pub fn get_due_soon(&self, days: i64) -> CoreResult<Vec<Task>> {
        let cutoff = chrono::Utc::now().timestamp() + days * 86_400;
        let mut tasks = self.list_tasks(Some(TaskStatus::Pending), None, None)?;
        tasks.extend(self.list_tasks(Some(TaskStatus::InProgress), None, None)?);
        Ok(tasks.into_iter().filter(|t| t.due_date.is_some_and(|d| d <= cutoff)).collect())
    }

    pub fn get_stats(&self) -> CoreResult<TaskStats> {
        let all = self.list_tasks(None, None, None)?;
        let pending = all.iter().filter(|t| t.status == TaskStatus::Pending).count();
        let in_progress = all.iter().filter(|t| t.status == TaskStatus::InProgress).count();
        let completed = all.iter().filter(|t| t.status == TaskStatus::Completed).count();

        let cutoff = chrono::Utc::now().timestamp() - 30 * 86_400;
        let created_last_30d = all.iter().filter(|t| t.created_at >= cutoff).count();
        let completed_last_30d = all
            .iter()
            .filter(|t| t.status == TaskStatus::Completed && t.completed_at.is_some_and(|c| c >= cutoff))
            .count();
        let completion_rate_30d = if created_last_30d == 0 {
            0.0
        } else {
            completed_last_30d as f64 / created_last_30d as f64 * 100.0
        };

        Ok(TaskStats {
            total: all.len(),
            pending,
            in_progress,
            completed,
            overdue: self.get_overdue_tasks()?.len(),
            due_soon: self.get_due_soon(3)?.len(),
            completion_rate_30d,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub overdue: usize,
    pub due_soon: usize,
    pub completion_rate_30d: f64,
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let id_str: String = row.get("id")?;
    let status_str: String = row.get("status")?;
    let priority_str: String = row.get("priority")?;
    let tags_str: String = row.get("tags")?;

    Ok(Task {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        title: row.get("title")?,
        description: row.get("description")?,
        status: TaskStatus::from_str(&status_str).unwrap_or(TaskStatus::Pending),
        priority: Priority::from_str(&priority_str).unwrap_or(Priority::Medium),
        created_at: row.get("created_at")?,
        due_date: row.get("due_date")?,
        completed_at: row.get("completed_at")?,
        mood_on_creation: row.get("mood_on_creation")?,
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        project: row.get("project")?,
        subtasks_total: row.get("subtasks_total")?,
        subtasks_completed: row.get("subtasks_completed")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch_round_trip() {
        let store = TaskStore::open(":memory:").unwrap();
        let task = store.create_task("Water the plants", None, Priority::Low, None, Some("happy"), vec![], None).unwrap();

        let fetched = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Water the plants");
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[test]
    fn list_tasks_orders_by_priority_then_due_date() {
        let store = TaskStore::open(":memory:").unwrap();
        store.create_task("Low", None, Priority::Low, None, None, vec![], None).unwrap();
        store.create_task("Urgent", None, Priority::Urgent, None, None, vec![], None).unwrap();
        store.create_task("High", None, Priority::High, None, None, vec![], None).unwrap();

        let tasks = store.list_tasks(None, None, None).unwrap();
        assert_eq!(tasks[0].title, "Urgent");
        assert_eq!(tasks[1].title, "High");
        assert_eq!(tasks[2].title, "Low");
    }

    #[test]
    fn complete_task_sets_status_and_timestamp() {
        let store = TaskStore::open(":memory:").unwrap();
        let task = store.create_task("Ship it", None, Priority::Medium, None, None, vec![], None).unwrap();

        let completed = store.complete_task(task.id).unwrap().unwrap();
        assert_eq!(completed.status, TaskStatus::Completed);
        assert!(completed.completed_at.is_some());
    }

    #[test]
    fn overdue_detection_excludes_completed_tasks() {
        let store = TaskStore::open(":memory:").unwrap();
        let past = chrono::Utc::now().timestamp() - 86_400;
        let task = store.create_task("Late", None, Priority::Medium, Some(past), None, vec![], None).unwrap();

        let overdue = store.get_overdue_tasks().unwrap();
        assert_eq!(overdue.len(), 1);

        store.complete_task(task.id).unwrap();
        let overdue_after = store.get_overdue_tasks().unwrap();
        assert!(overdue_after.is_empty());
    }

    #[test]
    fn delete_task_removes_it() {
        let store = TaskStore::open(":memory:").unwrap();
        let task = store.create_task("Temp", None, Priority::Low, None, None, vec![], None).unwrap();
        assert!(store.delete_task(task.id).unwrap());
        assert!(store.get_task(task.id).unwrap().is_none());
    }
}
