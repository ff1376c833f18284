//! Database module for planline

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::error::DomainResult;
use crate::models::{
    AuditEntry, Issue, Milestone, Priority, Project, ProjectMember, ProjectSummary, Role, Task,
    User,
};

/// Thread-safe database wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;
        Self::from_connection(conn)
    }

    /// Fresh private database for tests
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT,
                global_role TEXT NOT NULL DEFAULT 'MEMBER',
                token_id TEXT UNIQUE,
                token_hash TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                start_date TEXT NOT NULL,
                end_date_target TEXT,
                created_by_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_members (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (project_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                start_date TEXT NOT NULL,
                end_date_original TEXT NOT NULL,
                delay_days INTEGER NOT NULL DEFAULT 0,
                end_date_final TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                priority TEXT NOT NULL DEFAULT 'MEDIUM',
                owner_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                parent_task_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS issues (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                start_date TEXT NOT NULL,
                duration_days INTEGER NOT NULL,
                description TEXT,
                created_by_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS milestones (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                date TEXT NOT NULL,
                related_task_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL
            );

            -- Append-only; outlives the project it describes
            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                actor_id TEXT,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                payload TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_members_user ON project_members(user_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
            CREATE INDEX IF NOT EXISTS idx_issues_task ON issues(task_id);
            CREATE INDEX IF NOT EXISTS idx_milestones_project ON milestones(project_id);
            CREATE INDEX IF NOT EXISTS idx_audit_project ON audit_logs(project_id);
            "#,
        )?;

        Ok(())
    }

    /// Run read-only work against the store
    pub fn read<T>(&self, f: impl FnOnce(&Store<'_>) -> DomainResult<T>) -> DomainResult<T> {
        let conn = self.lock();
        f(&Store::new(&conn))
    }

    /// Run work inside one transaction; nothing is visible unless `f` succeeds
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Store<'_>) -> DomainResult<T>,
    ) -> DomainResult<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let out = f(&Store::new(&tx))?;
        tx.commit()?;
        Ok(out)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

const USER_COLUMNS: &str = "id, email, name, global_role, created_at";

const PROJECT_COLUMNS: &str =
    "id, name, description, start_date, end_date_target, created_by_id, created_at, updated_at";

const TASK_COLUMNS: &str = "id, project_id, title, description, start_date, end_date_original, \
     delay_days, end_date_final, progress, priority, owner_id, parent_task_id, created_at, updated_at";

const ISSUE_COLUMNS: &str =
    "id, task_id, title, start_date, duration_days, description, created_by_id, created_at";

const MILESTONE_COLUMNS: &str = "id, project_id, name, date, related_task_id, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        global_role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        start_date: row.get(3)?,
        end_date_target: row.get(4)?,
        created_by_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        start_date: row.get(4)?,
        end_date_original: row.get(5)?,
        delay_days: row.get(6)?,
        end_date_final: row.get(7)?,
        progress: row.get(8)?,
        priority: row.get(9)?,
        owner_id: row.get(10)?,
        parent_task_id: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        task_id: row.get(1)?,
        title: row.get(2)?,
        start_date: row.get(3)?,
        duration_days: row.get(4)?,
        description: row.get(5)?,
        created_by_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn milestone_from_row(row: &Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        date: row.get(3)?,
        related_task_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectMember> {
    Ok(ProjectMember {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        email: row.get(4)?,
        name: row.get(5)?,
    })
}

/// Fields of a task a caller may set at creation
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date_original: NaiveDate,
    pub delay_days: u32,
    pub progress: u8,
    pub priority: Priority,
    pub owner_id: Option<String>,
    pub parent_task_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub task_id: String,
    pub title: String,
    pub start_date: NaiveDate,
    pub duration_days: u32,
    pub description: Option<String>,
    pub created_by_id: Option<String>,
}

/// Record-level access over a connection or an open transaction
pub struct Store<'c> {
    conn: &'c Connection,
}

impl<'c> Store<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    // ---- users ----

    pub fn insert_user(&self, email: &str, name: Option<&str>, role: Role) -> DomainResult<User> {
        let user = User {
            id: new_id(),
            email: email.to_string(),
            name: name.map(str::to_string),
            global_role: role,
            created_at: now(),
        };
        self.conn.execute(
            "INSERT INTO users (id, email, name, global_role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&user.id, &user.email, &user.name, user.global_role, &user.created_at],
        )?;
        Ok(user)
    }

    pub fn find_user(&self, id: &str) -> DomainResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], user_from_row)
            .optional()?)
    }

    pub fn find_user_by_email(&self, email: &str) -> DomainResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![email], user_from_row)
            .optional()?)
    }

    /// Find by email, refreshing the name; unknown emails become global MEMBERs
    pub fn upsert_user_by_email(&self, email: &str, name: Option<&str>) -> DomainResult<User> {
        match self.find_user_by_email(email)? {
            Some(mut user) => {
                if let Some(name) = name {
                    self.conn.execute(
                        "UPDATE users SET name = ?2 WHERE id = ?1",
                        params![&user.id, name],
                    )?;
                    user.name = Some(name.to_string());
                }
                Ok(user)
            }
            None => self.insert_user(email, name, Role::Member),
        }
    }

    pub fn list_users(&self) -> DomainResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], user_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The oldest global admin, if any
    pub fn first_admin(&self) -> DomainResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE global_role = 'ADMIN' ORDER BY created_at LIMIT 1"
        );
        Ok(self.conn.query_row(&sql, [], user_from_row).optional()?)
    }

    /// Store a token's lookup id and argon2 hash, or clear both with `None`
    pub fn set_token(&self, user_id: &str, token: Option<(&str, &str)>) -> DomainResult<bool> {
        let (token_id, token_hash) = token.unzip();
        let changed = self.conn.execute(
            "UPDATE users SET token_id = ?2, token_hash = ?3 WHERE id = ?1",
            params![user_id, token_id, token_hash],
        )?;
        Ok(changed > 0)
    }

    /// The user holding the token with this lookup id, with the stored hash
    pub fn find_token_holder(&self, token_id: &str) -> DomainResult<Option<(User, String)>> {
        let sql = format!(
            "SELECT {USER_COLUMNS}, token_hash FROM users WHERE token_id = ?1 AND token_hash IS NOT NULL"
        );
        Ok(self
            .conn
            .query_row(&sql, params![token_id], |row| {
                Ok((user_from_row(row)?, row.get(5)?))
            })
            .optional()?)
    }

    /// Users holding an API token, with the token's lookup id
    pub fn token_holders(&self) -> DomainResult<Vec<(User, String)>> {
        let sql = format!(
            "SELECT {USER_COLUMNS}, token_id FROM users WHERE token_id IS NOT NULL ORDER BY created_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Ok((user_from_row(row)?, row.get(5)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- projects ----

    pub fn insert_project(
        &self,
        name: &str,
        description: Option<&str>,
        start_date: NaiveDate,
        end_date_target: Option<NaiveDate>,
        created_by_id: Option<&str>,
    ) -> DomainResult<Project> {
        let stamp = now();
        let project = Project {
            id: new_id(),
            name: name.to_string(),
            description: description.map(str::to_string),
            start_date,
            end_date_target,
            created_by_id: created_by_id.map(str::to_string),
            created_at: stamp.clone(),
            updated_at: stamp,
        };
        self.conn.execute(
            &format!("INSERT INTO projects ({PROJECT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                &project.id,
                &project.name,
                &project.description,
                project.start_date,
                project.end_date_target,
                &project.created_by_id,
                &project.created_at,
                &project.updated_at,
            ],
        )?;
        Ok(project)
    }

    pub fn find_project(&self, id: &str) -> DomainResult<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], project_from_row)
            .optional()?)
    }

    pub fn update_project(&self, project: &Project) -> DomainResult<Project> {
        let mut updated = project.clone();
        updated.updated_at = now();
        self.conn.execute(
            r#"UPDATE projects SET name = ?2, description = ?3, start_date = ?4,
               end_date_target = ?5, updated_at = ?6 WHERE id = ?1"#,
            params![
                &updated.id,
                &updated.name,
                &updated.description,
                updated.start_date,
                updated.end_date_target,
                &updated.updated_at,
            ],
        )?;
        Ok(updated)
    }

    pub fn delete_project(&self, id: &str) -> DomainResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Projects the user belongs to, newest first
    pub fn projects_for_user(&self, user_id: &str) -> DomainResult<Vec<ProjectSummary>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT p.id, p.name, p.description, m.role, p.start_date, p.end_date_target
               FROM project_members m JOIN projects p ON p.id = m.project_id
               WHERE m.user_id = ?1 ORDER BY p.created_at DESC"#,
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(ProjectSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                role: row.get(3)?,
                start_date: row.get(4)?,
                end_date_target: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- members ----

    pub fn membership_role(&self, project_id: &str, user_id: &str) -> DomainResult<Option<Role>> {
        Ok(self
            .conn
            .query_row(
                "SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn upsert_member(
        &self,
        project_id: &str,
        user_id: &str,
        role: Role,
    ) -> DomainResult<ProjectMember> {
        self.conn.execute(
            r#"INSERT INTO project_members (id, project_id, user_id, role, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(project_id, user_id) DO UPDATE SET role = excluded.role"#,
            params![new_id(), project_id, user_id, role, now()],
        )?;
        self.conn
            .query_row(
                r#"SELECT m.id, m.project_id, m.user_id, m.role, u.email, u.name
                   FROM project_members m JOIN users u ON u.id = m.user_id
                   WHERE m.project_id = ?1 AND m.user_id = ?2"#,
                params![project_id, user_id],
                member_from_row,
            )
            .map_err(Into::into)
    }

    pub fn remove_member(&self, project_id: &str, user_id: &str) -> DomainResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
        )?;
        Ok(changed > 0)
    }

    pub fn list_members(&self, project_id: &str) -> DomainResult<Vec<ProjectMember>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT m.id, m.project_id, m.user_id, m.role, u.email, u.name
               FROM project_members m JOIN users u ON u.id = m.user_id
               WHERE m.project_id = ?1 ORDER BY m.created_at"#,
        )?;
        let rows = stmt.query_map(params![project_id], member_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- tasks ----

    /// Insert a task. The final end date starts at the baseline; callers run
    /// the end-date recalculation in the same transaction.
    pub fn insert_task(&self, new: &NewTask) -> DomainResult<Task> {
        let stamp = now();
        let task = Task {
            id: new_id(),
            project_id: new.project_id.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            start_date: new.start_date,
            end_date_original: new.end_date_original,
            delay_days: new.delay_days,
            end_date_final: new.end_date_original,
            progress: new.progress,
            priority: new.priority,
            owner_id: new.owner_id.clone(),
            parent_task_id: new.parent_task_id.clone(),
            created_at: stamp.clone(),
            updated_at: stamp,
        };
        self.conn.execute(
            &format!(
                "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                &task.id,
                &task.project_id,
                &task.title,
                &task.description,
                task.start_date,
                task.end_date_original,
                task.delay_days,
                task.end_date_final,
                task.progress,
                task.priority,
                &task.owner_id,
                &task.parent_task_id,
                &task.created_at,
                &task.updated_at,
            ],
        )?;
        Ok(task)
    }

    pub fn find_task(&self, id: &str) -> DomainResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], task_from_row)
            .optional()?)
    }

    pub fn list_tasks(&self, project_id: &str) -> DomainResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 ORDER BY start_date, created_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], task_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Tasks across every project the user is a member of
    pub fn list_tasks_for_user(&self, user_id: &str) -> DomainResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id IN \
             (SELECT project_id FROM project_members WHERE user_id = ?1) \
             ORDER BY start_date, created_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], task_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Persist caller-editable fields. The final end date is left alone.
    pub fn update_task(&self, task: &Task) -> DomainResult<()> {
        self.conn.execute(
            r#"UPDATE tasks SET title = ?2, description = ?3, start_date = ?4,
               end_date_original = ?5, delay_days = ?6, progress = ?7, priority = ?8,
               owner_id = ?9, parent_task_id = ?10, updated_at = ?11
               WHERE id = ?1"#,
            params![
                &task.id,
                &task.title,
                &task.description,
                task.start_date,
                task.end_date_original,
                task.delay_days,
                task.progress,
                task.priority,
                &task.owner_id,
                &task.parent_task_id,
                now(),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn write_end_date_final(&self, task_id: &str, end_date_final: NaiveDate) -> DomainResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tasks SET end_date_final = ?2 WHERE id = ?1",
            params![task_id, end_date_final],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_task(&self, id: &str) -> DomainResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn parent_of(&self, task_id: &str) -> DomainResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT parent_task_id FROM tasks WHERE id = ?1",
                params![task_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten())
    }

    // ---- issues ----

    pub fn insert_issue(&self, new: &NewIssue) -> DomainResult<Issue> {
        let issue = Issue {
            id: new_id(),
            task_id: new.task_id.clone(),
            title: new.title.clone(),
            start_date: new.start_date,
            duration_days: new.duration_days,
            description: new.description.clone(),
            created_by_id: new.created_by_id.clone(),
            created_at: now(),
        };
        self.conn.execute(
            &format!("INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                &issue.id,
                &issue.task_id,
                &issue.title,
                issue.start_date,
                issue.duration_days,
                &issue.description,
                &issue.created_by_id,
                &issue.created_at,
            ],
        )?;
        Ok(issue)
    }

    pub fn find_issue(&self, id: &str) -> DomainResult<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], issue_from_row)
            .optional()?)
    }

    pub fn update_issue(&self, issue: &Issue) -> DomainResult<()> {
        self.conn.execute(
            r#"UPDATE issues SET title = ?2, start_date = ?3, duration_days = ?4, description = ?5
               WHERE id = ?1"#,
            params![
                &issue.id,
                &issue.title,
                issue.start_date,
                issue.duration_days,
                &issue.description,
            ],
        )?;
        Ok(())
    }

    pub fn delete_issue(&self, id: &str) -> DomainResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM issues WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn issue_durations(&self, task_id: &str) -> DomainResult<Vec<u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT duration_days FROM issues WHERE task_id = ?1")?;
        let rows = stmt.query_map(params![task_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_issues_for_task(&self, task_id: &str) -> DomainResult<Vec<Issue>> {
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE task_id = ?1 ORDER BY start_date DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![task_id], issue_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_issues_for_project(&self, project_id: &str) -> DomainResult<Vec<Issue>> {
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE task_id IN \
             (SELECT id FROM tasks WHERE project_id = ?1) ORDER BY start_date DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], issue_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_issues_for_user(&self, user_id: &str) -> DomainResult<Vec<Issue>> {
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE task_id IN \
             (SELECT t.id FROM tasks t JOIN project_members m ON m.project_id = t.project_id \
              WHERE m.user_id = ?1) ORDER BY start_date DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], issue_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- milestones ----

    pub fn insert_milestone(
        &self,
        project_id: &str,
        name: &str,
        date: NaiveDate,
        related_task_id: Option<&str>,
    ) -> DomainResult<Milestone> {
        let milestone = Milestone {
            id: new_id(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            date,
            related_task_id: related_task_id.map(str::to_string),
            created_at: now(),
        };
        self.conn.execute(
            &format!("INSERT INTO milestones ({MILESTONE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                &milestone.id,
                &milestone.project_id,
                &milestone.name,
                milestone.date,
                &milestone.related_task_id,
                &milestone.created_at,
            ],
        )?;
        Ok(milestone)
    }

    pub fn find_milestone(&self, id: &str) -> DomainResult<Option<Milestone>> {
        let sql = format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], milestone_from_row)
            .optional()?)
    }

    pub fn update_milestone(&self, milestone: &Milestone) -> DomainResult<()> {
        self.conn.execute(
            "UPDATE milestones SET name = ?2, date = ?3, related_task_id = ?4 WHERE id = ?1",
            params![
                &milestone.id,
                &milestone.name,
                milestone.date,
                &milestone.related_task_id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_milestone(&self, id: &str) -> DomainResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM milestones WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn list_milestones(&self, project_id: &str) -> DomainResult<Vec<Milestone>> {
        let sql = format!(
            "SELECT {MILESTONE_COLUMNS} FROM milestones WHERE project_id = ?1 ORDER BY date"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], milestone_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- audit ----

    pub fn append_audit(&self, entry: &AuditEntry) -> DomainResult<String> {
        let id = new_id();
        let payload = entry
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            r#"INSERT INTO audit_logs (id, project_id, actor_id, entity_type, entity_id, action, payload, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                &id,
                &entry.project_id,
                &entry.actor_id,
                entry.entity_type.as_str(),
                &entry.entity_id,
                entry.action.as_str(),
                payload,
                now(),
            ],
        )?;
        Ok(id)
    }

    /// `(entity_type, action)` pairs for a project in insertion order
    #[cfg(test)]
    pub fn audit_trail(&self, project_id: &str) -> DomainResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_type, action FROM audit_logs WHERE project_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![project_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
