//! Project, task, issue, milestone and membership workflows.
//!
//! Each mutation runs as one transaction: permission check, validation, the
//! write itself, end-date recalculation where delay inputs may have changed,
//! and the audit entry.

use chrono::NaiveDate;
use serde_json::json;

use crate::construction::project_schedule;
use crate::db::{Database, NewIssue, NewTask, Store};
use crate::error::{DomainError, DomainResult};
use crate::models::{
    AuditAction, AuditEntry, CreateIssue, CreateMilestone, CreateProject, CreateTask, EntityType,
    Issue, IssueChange, Milestone, Project, ProjectDashboard, ProjectDetail, ProjectMember,
    ProjectSummary, Role, SessionUser, Task, UpdateIssue, UpdateMilestone, UpdateProject,
    UpdateTask, UpsertMember,
};
use crate::permissions::{
    Operation, ensure_global_role, ensure_member_management, ensure_project_role,
    ensure_task_mutation, require_user,
};
use crate::schedule::{ReportOptions, ScheduleReport};
use crate::task_dates::recalc_task_end_date;

fn require_len(field: &str, value: &str, min: usize) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.chars().count() < min {
        return Err(DomainError::validation(format!(
            "{field} must be at least {min} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn percent(value: i64) -> DomainResult<u8> {
    u8::try_from(value)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| DomainError::validation("progress must be between 0 and 100"))
}

fn delay_days(value: i64) -> DomainResult<u32> {
    u32::try_from(value).map_err(|_| DomainError::validation("delayDays must be non-negative"))
}

fn duration_days(value: i64) -> DomainResult<u32> {
    u32::try_from(value)
        .ok()
        .filter(|d| *d >= 1)
        .ok_or_else(|| DomainError::validation("durationDays must be at least 1"))
}

fn ensure_ordered(start: NaiveDate, end: NaiveDate) -> DomainResult<()> {
    if end < start {
        return Err(DomainError::validation("End date must be after start date"));
    }
    Ok(())
}

/// `local@domain.tld`: one `@`, no whitespace, a dotted domain without empty labels
pub(crate) fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// Blank ids count as "no id"
fn normalize_id(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn audit(
    store: &Store<'_>,
    project_id: &str,
    actor: &SessionUser,
    entity_type: EntityType,
    entity_id: &str,
    action: AuditAction,
    payload: Option<serde_json::Value>,
) -> DomainResult<()> {
    store.append_audit(&AuditEntry {
        project_id: project_id.to_string(),
        actor_id: Some(actor.id.clone()),
        entity_type,
        entity_id: entity_id.to_string(),
        action,
        payload,
    })?;
    Ok(())
}

fn load_project(store: &Store<'_>, id: &str) -> DomainResult<Project> {
    store
        .find_project(id)?
        .ok_or_else(|| DomainError::not_found(format!("project {id}")))
}

fn load_task(store: &Store<'_>, id: &str) -> DomainResult<Task> {
    store
        .find_task(id)?
        .ok_or_else(|| DomainError::not_found(format!("task {id}")))
}

fn load_issue(store: &Store<'_>, id: &str) -> DomainResult<Issue> {
    store
        .find_issue(id)?
        .ok_or_else(|| DomainError::not_found(format!("issue {id}")))
}

fn load_milestone(store: &Store<'_>, id: &str) -> DomainResult<Milestone> {
    store
        .find_milestone(id)?
        .ok_or_else(|| DomainError::not_found(format!("milestone {id}")))
}

/// A referenced task must live in the same project
fn ensure_task_in_project(store: &Store<'_>, task_id: &str, project_id: &str) -> DomainResult<()> {
    match store.find_task(task_id)? {
        Some(task) if task.project_id == project_id => Ok(()),
        _ => Err(DomainError::validation(
            "Referenced task must exist within the same project",
        )),
    }
}

/// Reject a parent link that would make `task_id` its own ancestor
fn ensure_acyclic_parent(store: &Store<'_>, task_id: &str, parent_id: &str) -> DomainResult<()> {
    let mut cursor = Some(parent_id.to_string());
    while let Some(current) = cursor {
        if current == task_id {
            return Err(DomainError::validation(
                "A task cannot be its own ancestor",
            ));
        }
        cursor = store.parent_of(&current)?;
    }
    Ok(())
}

fn ensure_user_exists(store: &Store<'_>, user_id: &str) -> DomainResult<()> {
    if store.find_user(user_id)?.is_none() {
        return Err(DomainError::validation(format!("owner {user_id} does not exist")));
    }
    Ok(())
}

/// Filters for listing issues; the narrowest one given wins
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub task_id: Option<String>,
    pub project_id: Option<String>,
}

/// Entry point for every domain workflow
pub struct Planner<'d> {
    db: &'d Database,
}

impl<'d> Planner<'d> {
    pub fn new(db: &'d Database) -> Self {
        Self { db }
    }

    // ---- projects ----

    pub fn list_projects(&self, user: Option<&SessionUser>) -> DomainResult<Vec<ProjectSummary>> {
        let user = require_user(user)?;
        self.db.read(|store| store.projects_for_user(&user.id))
    }

    /// Global admins only; the creator joins as project ADMIN.
    pub fn create_project(
        &self,
        user: Option<&SessionUser>,
        req: CreateProject,
    ) -> DomainResult<ProjectDetail> {
        let user = ensure_global_role(user, &[Role::Admin])?;
        let name = require_len("name", &req.name, 3)?;
        if let Some(target) = req.end_date_target {
            ensure_ordered(req.start_date, target)?;
        }

        let detail = self.db.transaction(|store| {
            let project = store.insert_project(
                &name,
                req.description.as_deref(),
                req.start_date,
                req.end_date_target,
                Some(&user.id),
            )?;
            let member = store.upsert_member(&project.id, &user.id, Role::Admin)?;
            Ok(ProjectDetail {
                project,
                members: vec![member],
                tasks: Vec::new(),
                milestones: Vec::new(),
            })
        })?;

        tracing::info!(project_id = %detail.project.id, name = %detail.project.name, "Project created");
        Ok(detail)
    }

    pub fn get_project(&self, user: Option<&SessionUser>, id: &str) -> DomainResult<ProjectDetail> {
        self.db.read(|store| {
            ensure_project_role(store, user, id, Operation::ReadProject)?;
            let project = load_project(store, id)?;
            Ok(ProjectDetail {
                members: store.list_members(id)?,
                tasks: store.list_tasks(id)?,
                milestones: store.list_milestones(id)?,
                project,
            })
        })
    }

    pub fn update_project(
        &self,
        user: Option<&SessionUser>,
        id: &str,
        req: UpdateProject,
    ) -> DomainResult<Project> {
        let project = self.db.transaction(|store| {
            ensure_project_role(store, user, id, Operation::ManageProject)?;
            let mut project = load_project(store, id)?;
            if let Some(name) = &req.name {
                project.name = require_len("name", name, 3)?;
            }
            if let Some(description) = req.description {
                project.description = Some(description);
            }
            if let Some(start) = req.start_date {
                project.start_date = start;
            }
            if let Some(target) = req.end_date_target {
                project.end_date_target = Some(target);
            }
            if let Some(target) = project.end_date_target {
                ensure_ordered(project.start_date, target)?;
            }
            store.update_project(&project)
        })?;

        tracing::info!(project_id = %project.id, "Project updated");
        Ok(project)
    }

    pub fn delete_project(&self, user: Option<&SessionUser>, id: &str) -> DomainResult<()> {
        self.db.transaction(|store| {
            ensure_project_role(store, user, id, Operation::ManageProject)?;
            if !store.delete_project(id)? {
                return Err(DomainError::not_found(format!("project {id}")));
            }
            Ok(())
        })?;

        tracing::info!(project_id = id, "Project deleted");
        Ok(())
    }

    /// Headline numbers for a project overview
    pub fn project_dashboard(
        &self,
        user: Option<&SessionUser>,
        id: &str,
        today: NaiveDate,
    ) -> DomainResult<ProjectDashboard> {
        self.db.read(|store| {
            ensure_project_role(store, user, id, Operation::ReadProject)?;
            load_project(store, id)?;
            let tasks = store.list_tasks(id)?;
            let milestones = store.list_milestones(id)?;

            let total_progress: u32 = tasks.iter().map(|t| u32::from(t.progress)).sum();
            let average_progress = if tasks.is_empty() {
                0
            } else {
                (f64::from(total_progress) / tasks.len() as f64).round() as u32
            };

            Ok(ProjectDashboard {
                project_id: id.to_string(),
                task_count: tasks.len(),
                completed_count: tasks.iter().filter(|t| t.progress >= 100).count(),
                average_progress,
                milestone_count: milestones.len(),
                next_milestone: milestones.into_iter().find(|m| m.date >= today),
            })
        })
    }

    /// Schedule analytics over a project's own tasks
    pub fn project_report(
        &self,
        user: Option<&SessionUser>,
        id: &str,
        options: &ReportOptions,
    ) -> DomainResult<ScheduleReport> {
        let tasks = self.db.read(|store| {
            ensure_project_role(store, user, id, Operation::ReadProject)?;
            load_project(store, id)?;
            store.list_tasks(id)
        })?;
        ScheduleReport::build(project_schedule(&tasks), options)
    }

    // ---- members ----

    pub fn list_members(
        &self,
        user: Option<&SessionUser>,
        project_id: &str,
    ) -> DomainResult<Vec<ProjectMember>> {
        self.db.read(|store| {
            ensure_project_role(store, user, project_id, Operation::ReadProject)?;
            store.list_members(project_id)
        })
    }

    /// Invite by email or change an existing member's role
    pub fn upsert_member(
        &self,
        user: Option<&SessionUser>,
        project_id: &str,
        req: UpsertMember,
    ) -> DomainResult<ProjectMember> {
        let email = req.email.trim().to_ascii_lowercase();
        if !is_valid_email(&email) {
            return Err(DomainError::validation("email must be a valid address"));
        }

        let member = self.db.transaction(|store| {
            let grant = ensure_member_management(store, user, project_id)?;
            load_project(store, project_id)?;

            let invitee = store.upsert_user_by_email(&email, req.name.as_deref())?;
            let member = store.upsert_member(project_id, &invitee.id, req.role)?;
            audit(
                store,
                project_id,
                grant.user,
                EntityType::ProjectMember,
                &member.id,
                AuditAction::Upsert,
                Some(json!({ "email": invitee.email, "role": req.role })),
            )?;
            Ok(member)
        })?;

        tracing::info!(project_id, user_id = %member.user_id, role = %member.role, "Member upserted");
        Ok(member)
    }

    pub fn remove_member(
        &self,
        user: Option<&SessionUser>,
        project_id: &str,
        member_user_id: &str,
    ) -> DomainResult<()> {
        self.db.transaction(|store| {
            let grant = ensure_member_management(store, user, project_id)?;
            if !store.remove_member(project_id, member_user_id)? {
                return Err(DomainError::not_found(format!("member {member_user_id}")));
            }
            audit(
                store,
                project_id,
                grant.user,
                EntityType::ProjectMember,
                member_user_id,
                AuditAction::Removed,
                None,
            )
        })?;

        tracing::info!(project_id, user_id = member_user_id, "Member removed");
        Ok(())
    }

    // ---- tasks ----

    /// Tasks of one project, or of every project the caller belongs to
    pub fn list_tasks(
        &self,
        user: Option<&SessionUser>,
        project_id: Option<&str>,
    ) -> DomainResult<Vec<Task>> {
        self.db.read(|store| match project_id {
            Some(project_id) => {
                ensure_project_role(store, user, project_id, Operation::ReadProject)?;
                store.list_tasks(project_id)
            }
            None => {
                let user = require_user(user)?;
                store.list_tasks_for_user(&user.id)
            }
        })
    }

    pub fn get_task(&self, user: Option<&SessionUser>, id: &str) -> DomainResult<Task> {
        self.db.read(|store| {
            require_user(user)?;
            let task = load_task(store, id)?;
            ensure_project_role(store, user, &task.project_id, Operation::ReadProject)?;
            Ok(task)
        })
    }

    pub fn create_task(&self, user: Option<&SessionUser>, req: CreateTask) -> DomainResult<Task> {
        let title = require_len("title", &req.title, 3)?;
        let mut new = NewTask {
            project_id: req.project_id,
            title,
            description: req.description,
            start_date: req.start_date,
            end_date_original: req.end_date_original,
            delay_days: delay_days(req.delay_days)?,
            progress: percent(req.progress)?,
            priority: req.priority,
            owner_id: normalize_id(req.owner_id),
            parent_task_id: normalize_id(req.parent_task_id),
        };

        let task = self.db.transaction(|store| {
            let grant = ensure_project_role(store, user, &new.project_id, Operation::WriteTask)?;
            load_project(store, &new.project_id)?;
            // Members may only edit tasks they own
            if grant.role == Role::Member && new.owner_id.is_none() {
                new.owner_id = Some(grant.user.id.clone());
            }
            if let Some(parent_id) = &new.parent_task_id {
                ensure_task_in_project(store, parent_id, &new.project_id)?;
            }
            if let Some(owner_id) = &new.owner_id {
                ensure_user_exists(store, owner_id)?;
            }
            ensure_ordered(new.start_date, new.end_date_original)?;

            let created = store.insert_task(&new)?;
            let task = recalc_task_end_date(store, &created.id)?;
            audit(
                store,
                &task.project_id,
                grant.user,
                EntityType::Task,
                &task.id,
                AuditAction::Created,
                Some(json!({ "title": task.title, "ownerId": task.owner_id })),
            )?;
            Ok(task)
        })?;

        tracing::info!(task_id = %task.id, project_id = %task.project_id, "Task created");
        Ok(task)
    }

    pub fn update_task(
        &self,
        user: Option<&SessionUser>,
        id: &str,
        req: UpdateTask,
    ) -> DomainResult<Task> {
        let payload = serde_json::to_value(&req)?;

        let task = self.db.transaction(|store| {
            let mut task = load_task(store, id)?;
            let grant = ensure_task_mutation(store, user, &task)?;

            if let Some(title) = &req.title {
                task.title = require_len("title", title, 3)?;
            }
            if let Some(description) = req.description {
                task.description = Some(description);
            }
            if let Some(start) = req.start_date {
                task.start_date = start;
            }
            if let Some(end) = req.end_date_original {
                task.end_date_original = end;
            }
            if let Some(days) = req.delay_days {
                task.delay_days = delay_days(days)?;
            }
            if let Some(progress) = req.progress {
                task.progress = percent(progress)?;
            }
            if let Some(priority) = req.priority {
                task.priority = priority;
            }
            if let Some(owner) = req.owner_id {
                task.owner_id = normalize_id(owner);
                if let Some(owner_id) = &task.owner_id {
                    ensure_user_exists(store, owner_id)?;
                }
            }
            if let Some(parent) = req.parent_task_id {
                task.parent_task_id = normalize_id(parent);
                if let Some(parent_id) = &task.parent_task_id {
                    ensure_task_in_project(store, parent_id, &task.project_id)?;
                    ensure_acyclic_parent(store, &task.id, parent_id)?;
                }
            }
            ensure_ordered(task.start_date, task.end_date_original)?;

            store.update_task(&task)?;
            let task = recalc_task_end_date(store, id)?;
            audit(
                store,
                &task.project_id,
                grant.user,
                EntityType::Task,
                id,
                AuditAction::Updated,
                Some(payload),
            )?;
            Ok(task)
        })?;

        tracing::info!(task_id = %task.id, end_date_final = %task.end_date_final, "Task updated");
        Ok(task)
    }

    pub fn delete_task(&self, user: Option<&SessionUser>, id: &str) -> DomainResult<()> {
        self.db.transaction(|store| {
            let task = load_task(store, id)?;
            let grant = ensure_task_mutation(store, user, &task)?;
            store.delete_task(id)?;
            audit(
                store,
                &task.project_id,
                grant.user,
                EntityType::Task,
                id,
                AuditAction::Deleted,
                None,
            )
        })?;

        tracing::info!(task_id = id, "Task deleted");
        Ok(())
    }

    // ---- issues ----

    pub fn list_issues(
        &self,
        user: Option<&SessionUser>,
        filter: &IssueFilter,
    ) -> DomainResult<Vec<Issue>> {
        self.db.read(|store| {
            let caller = require_user(user)?;
            if let Some(task_id) = &filter.task_id {
                let task = load_task(store, task_id)?;
                ensure_project_role(store, user, &task.project_id, Operation::ReadProject)?;
                store.list_issues_for_task(task_id)
            } else if let Some(project_id) = &filter.project_id {
                ensure_project_role(store, user, project_id, Operation::ReadProject)?;
                store.list_issues_for_project(project_id)
            } else {
                store.list_issues_for_user(&caller.id)
            }
        })
    }

    pub fn create_issue(
        &self,
        user: Option<&SessionUser>,
        req: CreateIssue,
    ) -> DomainResult<IssueChange> {
        let new = NewIssue {
            title: require_len("title", &req.title, 3)?,
            duration_days: duration_days(req.duration_days)?,
            task_id: req.task_id,
            start_date: req.start_date,
            description: req.description,
            created_by_id: user.map(|u| u.id.clone()),
        };

        let change = self.db.transaction(|store| {
            let task = load_task(store, &new.task_id)?;
            let grant = ensure_project_role(store, user, &task.project_id, Operation::WriteIssue)?;

            let issue = store.insert_issue(&new)?;
            let task = recalc_task_end_date(store, &new.task_id)?;
            audit(
                store,
                &task.project_id,
                grant.user,
                EntityType::Issue,
                &issue.id,
                AuditAction::Created,
                Some(json!({ "durationDays": issue.duration_days, "taskId": issue.task_id })),
            )?;
            Ok(IssueChange {
                issue_id: issue.id.clone(),
                issue: Some(issue),
                task,
            })
        })?;

        tracing::info!(
            issue_id = %change.issue_id,
            task_id = %change.task.id,
            end_date_final = %change.task.end_date_final,
            "Issue created"
        );
        Ok(change)
    }

    pub fn update_issue(
        &self,
        user: Option<&SessionUser>,
        id: &str,
        req: UpdateIssue,
    ) -> DomainResult<IssueChange> {
        let payload = serde_json::to_value(&req)?;

        let change = self.db.transaction(|store| {
            let mut issue = load_issue(store, id)?;
            let task = load_task(store, &issue.task_id)?;
            let grant = ensure_project_role(store, user, &task.project_id, Operation::WriteIssue)?;

            if let Some(title) = &req.title {
                issue.title = require_len("title", title, 3)?;
            }
            if let Some(start) = req.start_date {
                issue.start_date = start;
            }
            if let Some(days) = req.duration_days {
                issue.duration_days = duration_days(days)?;
            }
            if let Some(description) = req.description {
                issue.description = Some(description);
            }

            store.update_issue(&issue)?;
            let task = recalc_task_end_date(store, &issue.task_id)?;
            audit(
                store,
                &task.project_id,
                grant.user,
                EntityType::Issue,
                id,
                AuditAction::Updated,
                Some(payload),
            )?;
            Ok(IssueChange {
                issue_id: issue.id.clone(),
                issue: Some(issue),
                task,
            })
        })?;

        tracing::info!(issue_id = id, task_id = %change.task.id, "Issue updated");
        Ok(change)
    }

    pub fn delete_issue(&self, user: Option<&SessionUser>, id: &str) -> DomainResult<IssueChange> {
        let change = self.db.transaction(|store| {
            let issue = load_issue(store, id)?;
            let task = load_task(store, &issue.task_id)?;
            let grant = ensure_project_role(store, user, &task.project_id, Operation::WriteIssue)?;

            store.delete_issue(id)?;
            let task = recalc_task_end_date(store, &issue.task_id)?;
            audit(
                store,
                &task.project_id,
                grant.user,
                EntityType::Issue,
                id,
                AuditAction::Deleted,
                None,
            )?;
            Ok(IssueChange {
                issue_id: issue.id,
                issue: None,
                task,
            })
        })?;

        tracing::info!(issue_id = id, task_id = %change.task.id, "Issue deleted");
        Ok(change)
    }

    // ---- milestones ----

    pub fn list_milestones(
        &self,
        user: Option<&SessionUser>,
        project_id: &str,
    ) -> DomainResult<Vec<Milestone>> {
        self.db.read(|store| {
            ensure_project_role(store, user, project_id, Operation::ReadProject)?;
            store.list_milestones(project_id)
        })
    }

    pub fn create_milestone(
        &self,
        user: Option<&SessionUser>,
        req: CreateMilestone,
    ) -> DomainResult<Milestone> {
        let name = require_len("name", &req.name, 2)?;
        let related = normalize_id(req.related_task_id);

        let milestone = self.db.transaction(|store| {
            ensure_project_role(store, user, &req.project_id, Operation::WriteMilestone)?;
            load_project(store, &req.project_id)?;
            if let Some(task_id) = &related {
                ensure_task_in_project(store, task_id, &req.project_id)?;
            }
            store.insert_milestone(&req.project_id, &name, req.date, related.as_deref())
        })?;

        tracing::info!(milestone_id = %milestone.id, project_id = %milestone.project_id, "Milestone created");
        Ok(milestone)
    }

    pub fn update_milestone(
        &self,
        user: Option<&SessionUser>,
        id: &str,
        req: UpdateMilestone,
    ) -> DomainResult<Milestone> {
        self.db.transaction(|store| {
            let mut milestone = load_milestone(store, id)?;
            ensure_project_role(store, user, &milestone.project_id, Operation::WriteMilestone)?;

            if let Some(name) = &req.name {
                milestone.name = require_len("name", name, 2)?;
            }
            if let Some(date) = req.date {
                milestone.date = date;
            }
            if let Some(related) = req.related_task_id {
                milestone.related_task_id = normalize_id(related);
                if let Some(task_id) = &milestone.related_task_id {
                    ensure_task_in_project(store, task_id, &milestone.project_id)?;
                }
            }

            store.update_milestone(&milestone)?;
            Ok(milestone)
        })
    }

    pub fn delete_milestone(&self, user: Option<&SessionUser>, id: &str) -> DomainResult<()> {
        self.db.transaction(|store| {
            let milestone = load_milestone(store, id)?;
            ensure_project_role(store, user, &milestone.project_id, Operation::WriteMilestone)?;
            store.delete_milestone(id)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn date(s: &str) -> NaiveDate {
        crate::dates::parse_calendar_date(s).unwrap()
    }

    struct Fixture {
        db: Database,
        admin: SessionUser,
        manager: SessionUser,
        member: SessionUser,
        viewer: SessionUser,
        project_id: String,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Database::open_in_memory().unwrap();
            let (admin, manager, member, viewer) = db
                .transaction(|store| {
                    let mk = |email: &str, role| -> DomainResult<SessionUser> {
                        Ok(store.insert_user(email, None, role)?.into())
                    };
                    Ok((
                        mk("admin@example.com", Role::Admin)?,
                        mk("pm@example.com", Role::Manager)?,
                        mk("member@example.com", Role::Member)?,
                        mk("viewer@example.com", Role::Viewer)?,
                    ))
                })
                .unwrap();

            let planner = Planner::new(&db);
            let project = planner
                .create_project(
                    Some(&admin),
                    CreateProject {
                        name: "Alpha Expansion".to_string(),
                        description: None,
                        start_date: date("2025-01-01"),
                        end_date_target: Some(date("2025-04-30")),
                    },
                )
                .unwrap()
                .project;
            for (who, role) in [
                (&manager, Role::Manager),
                (&member, Role::Member),
                (&viewer, Role::Viewer),
            ] {
                planner
                    .upsert_member(
                        Some(&admin),
                        &project.id,
                        UpsertMember {
                            email: who.email.clone(),
                            name: None,
                            role,
                        },
                    )
                    .unwrap();
            }

            Self {
                db,
                admin,
                manager,
                member,
                viewer,
                project_id: project.id,
            }
        }

        fn planner(&self) -> Planner<'_> {
            Planner::new(&self.db)
        }

        fn task_request(&self, title: &str, end: &str) -> CreateTask {
            CreateTask {
                project_id: self.project_id.clone(),
                title: title.to_string(),
                description: None,
                start_date: date("2025-01-01"),
                end_date_original: date(end),
                delay_days: 0,
                owner_id: None,
                progress: 0,
                priority: Priority::Medium,
                parent_task_id: None,
            }
        }

        fn issue_request(&self, task_id: &str, days: i64) -> CreateIssue {
            CreateIssue {
                task_id: task_id.to_string(),
                title: "Supplier delay".to_string(),
                start_date: date("2025-01-03"),
                duration_days: days,
                description: None,
            }
        }
    }

    #[test]
    fn only_global_admins_create_projects() {
        let fx = Fixture::new();
        let err = fx
            .planner()
            .create_project(
                Some(&fx.manager),
                CreateProject {
                    name: "Beta".to_string(),
                    description: None,
                    start_date: date("2025-01-01"),
                    end_date_target: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden));

        let projects = fx.planner().list_projects(Some(&fx.admin)).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].role, Role::Admin);
    }

    #[test]
    fn issue_lifecycle_moves_final_end_date() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let task = planner
            .create_task(Some(&fx.manager), fx.task_request("Pour slab", "2025-01-05"))
            .unwrap();
        assert_eq!(task.end_date_final, date("2025-01-05"));

        let created = planner
            .create_issue(Some(&fx.member), fx.issue_request(&task.id, 5))
            .unwrap();
        assert_eq!(created.task.end_date_final, date("2025-01-10"));

        let updated = planner
            .update_issue(
                Some(&fx.manager),
                &created.issue_id,
                UpdateIssue {
                    duration_days: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.task.end_date_final, date("2025-01-07"));

        let removed = planner
            .delete_issue(Some(&fx.manager), &created.issue_id)
            .unwrap();
        assert!(removed.issue.is_none());
        assert_eq!(removed.task.end_date_final, date("2025-01-05"));
        assert_eq!(
            planner.get_task(Some(&fx.viewer), &task.id).unwrap().end_date_final,
            date("2025-01-05")
        );
    }

    #[test]
    fn stored_final_end_date_tracks_every_mutation() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let mut req = fx.task_request("Frame walls", "2025-01-10");
        req.delay_days = 2;
        let task = planner.create_task(Some(&fx.admin), req).unwrap();
        assert_eq!(task.end_date_final, date("2025-01-12"));

        planner
            .create_issue(Some(&fx.manager), fx.issue_request(&task.id, 3))
            .unwrap();
        planner
            .create_issue(Some(&fx.manager), fx.issue_request(&task.id, 5))
            .unwrap();
        let task = planner
            .update_task(
                Some(&fx.manager),
                &task.id,
                UpdateTask {
                    delay_days: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();

        let durations: u32 = planner
            .list_issues(
                Some(&fx.viewer),
                &IssueFilter {
                    task_id: Some(task.id.clone()),
                    project_id: None,
                },
            )
            .unwrap()
            .iter()
            .map(|i| i.duration_days)
            .sum();
        let expected = crate::dates::add_days(
            task.end_date_original,
            u64::from(task.delay_days + durations),
        )
        .unwrap();
        assert_eq!(task.end_date_final, expected);
        assert_eq!(task.end_date_final, date("2025-01-18"));
    }

    #[test]
    fn member_edits_only_owned_tasks() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let mut owned = fx.task_request("Owned work", "2025-01-05");
        owned.owner_id = Some(fx.member.id.clone());
        let owned = planner.create_task(Some(&fx.manager), owned).unwrap();
        let foreign = planner
            .create_task(Some(&fx.manager), fx.task_request("Other work", "2025-01-05"))
            .unwrap();

        let progress = UpdateTask {
            progress: Some(50),
            ..Default::default()
        };
        assert_eq!(
            planner
                .update_task(Some(&fx.member), &owned.id, progress.clone())
                .unwrap()
                .progress,
            50
        );
        assert!(matches!(
            planner.update_task(Some(&fx.member), &foreign.id, progress),
            Err(DomainError::Forbidden)
        ));
        assert!(matches!(
            planner.delete_task(Some(&fx.member), &foreign.id),
            Err(DomainError::Forbidden)
        ));
    }

    #[test]
    fn member_created_tasks_default_to_their_creator() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let task = planner
            .create_task(Some(&fx.member), fx.task_request("Site walk", "2025-01-05"))
            .unwrap();
        assert_eq!(task.owner_id.as_deref(), Some(fx.member.id.as_str()));

        let renamed = planner
            .update_task(
                Some(&fx.member),
                &task.id,
                UpdateTask {
                    title: Some("Site walk and photos".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.title, "Site walk and photos");
        planner.delete_task(Some(&fx.member), &task.id).unwrap();

        let unowned = planner
            .create_task(Some(&fx.manager), fx.task_request("Permits", "2025-01-05"))
            .unwrap();
        assert!(unowned.owner_id.is_none());
    }

    #[test]
    fn viewers_and_outsiders_cannot_write() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let task = planner
            .create_task(Some(&fx.manager), fx.task_request("Survey", "2025-01-05"))
            .unwrap();

        assert!(matches!(
            planner.create_issue(Some(&fx.viewer), fx.issue_request(&task.id, 1)),
            Err(DomainError::Forbidden)
        ));
        assert!(matches!(
            planner.create_task(None, fx.task_request("Anonymous", "2025-01-05")),
            Err(DomainError::Unauthenticated)
        ));
        assert!(matches!(
            planner.create_milestone(
                Some(&fx.member),
                CreateMilestone {
                    project_id: fx.project_id.clone(),
                    name: "Handover".to_string(),
                    date: date("2025-03-01"),
                    related_task_id: None,
                }
            ),
            Err(DomainError::Forbidden)
        ));
    }

    #[test]
    fn rejects_invalid_task_input() {
        let fx = Fixture::new();
        let planner = fx.planner();

        let mut backwards = fx.task_request("Backwards", "2025-01-05");
        backwards.start_date = date("2025-01-06");
        assert!(matches!(
            planner.create_task(Some(&fx.manager), backwards),
            Err(DomainError::Validation(_))
        ));

        let mut over = fx.task_request("Overachiever", "2025-01-05");
        over.progress = 101;
        assert!(matches!(
            planner.create_task(Some(&fx.manager), over),
            Err(DomainError::Validation(_))
        ));

        let task = planner
            .create_task(Some(&fx.manager), fx.task_request("Valid", "2025-01-05"))
            .unwrap();
        let err = planner
            .update_task(
                Some(&fx.manager),
                &task.id,
                UpdateTask {
                    start_date: Some(date("2025-02-01")),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        assert!(matches!(
            planner.create_issue(Some(&fx.manager), fx.issue_request(&task.id, 0)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn parent_links_stay_acyclic_and_local() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let root = planner
            .create_task(Some(&fx.manager), fx.task_request("Root phase", "2025-01-05"))
            .unwrap();
        let mut child = fx.task_request("Child step", "2025-01-05");
        child.parent_task_id = Some(root.id.clone());
        let child = planner.create_task(Some(&fx.manager), child).unwrap();

        let reparent = |target: &str, parent: &str| {
            planner.update_task(
                Some(&fx.manager),
                target,
                UpdateTask {
                    parent_task_id: Some(Some(parent.to_string())),
                    ..Default::default()
                },
            )
        };
        assert!(matches!(
            reparent(&root.id, &child.id),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            reparent(&root.id, &root.id),
            Err(DomainError::Validation(_))
        ));

        let other = planner
            .create_project(
                Some(&fx.admin),
                CreateProject {
                    name: "Other site".to_string(),
                    description: None,
                    start_date: date("2025-01-01"),
                    end_date_target: None,
                },
            )
            .unwrap();
        let mut stray = fx.task_request("Stray", "2025-01-05");
        stray.project_id = other.project.id.clone();
        stray.parent_task_id = Some(root.id.clone());
        assert!(matches!(
            planner.create_task(Some(&fx.admin), stray),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rejects_malformed_invite_email() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let before = fx.db.read(|s| s.list_users()).unwrap().len();

        for email in [
            "@",
            "a@",
            "@b",
            "not an@email",
            "a@b",
            "a@@b.com",
            "a@b@c.com",
            "a@.com",
            "a@example.",
            "plainaddress",
        ] {
            let result = planner.upsert_member(
                Some(&fx.admin),
                &fx.project_id,
                UpsertMember {
                    email: email.to_string(),
                    name: None,
                    role: Role::Member,
                },
            );
            assert!(
                matches!(result, Err(DomainError::Validation(_))),
                "{email:?} was accepted"
            );
        }
        assert_eq!(fx.db.read(|s| s.list_users()).unwrap().len(), before);
        assert!(is_valid_email("new.hire@example.com"));
    }

    #[test]
    fn invite_creates_user_and_audits() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let member = planner
            .upsert_member(
                Some(&fx.manager),
                &fx.project_id,
                UpsertMember {
                    email: "New.Hire@Example.com".to_string(),
                    name: Some("New Hire".to_string()),
                    role: Role::Viewer,
                },
            )
            .unwrap();
        assert_eq!(member.email, "new.hire@example.com");
        assert_eq!(member.role, Role::Viewer);

        assert!(matches!(
            planner.upsert_member(
                Some(&fx.member),
                &fx.project_id,
                UpsertMember {
                    email: "x@example.com".to_string(),
                    name: None,
                    role: Role::Member,
                }
            ),
            Err(DomainError::Forbidden)
        ));

        planner
            .remove_member(Some(&fx.manager), &fx.project_id, &member.user_id)
            .unwrap();
        let trail = fx.db.read(|s| s.audit_trail(&fx.project_id)).unwrap();
        assert_eq!(
            trail.last(),
            Some(&("PROJECT_MEMBER".to_string(), "REMOVED".to_string()))
        );
        assert!(matches!(
            planner.remove_member(Some(&fx.manager), &fx.project_id, &member.user_id),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn task_mutations_are_audited() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let task = planner
            .create_task(Some(&fx.manager), fx.task_request("Audited", "2025-01-05"))
            .unwrap();
        let issue = planner
            .create_issue(Some(&fx.manager), fx.issue_request(&task.id, 1))
            .unwrap();
        planner.delete_issue(Some(&fx.manager), &issue.issue_id).unwrap();
        planner.delete_task(Some(&fx.manager), &task.id).unwrap();

        let trail: Vec<(String, String)> = fx
            .db
            .read(|s| s.audit_trail(&fx.project_id))
            .unwrap()
            .into_iter()
            .filter(|(entity, _)| entity != "PROJECT_MEMBER")
            .collect();
        let pairs: Vec<(&str, &str)> = trail
            .iter()
            .map(|(e, a)| (e.as_str(), a.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("TASK", "CREATED"),
                ("ISSUE", "CREATED"),
                ("ISSUE", "DELETED"),
                ("TASK", "DELETED"),
            ]
        );
    }

    #[test]
    fn dashboard_summarizes_progress_and_next_milestone() {
        let fx = Fixture::new();
        let planner = fx.planner();
        for (title, progress) in [("Done task", 100), ("Half task", 50), ("New task", 0)] {
            let mut req = fx.task_request(title, "2025-01-05");
            req.progress = progress;
            planner.create_task(Some(&fx.manager), req).unwrap();
        }
        for (name, day) in [("Kickoff", "2025-01-02"), ("Handover", "2025-03-01")] {
            planner
                .create_milestone(
                    Some(&fx.manager),
                    CreateMilestone {
                        project_id: fx.project_id.clone(),
                        name: name.to_string(),
                        date: date(day),
                        related_task_id: None,
                    },
                )
                .unwrap();
        }

        let dashboard = planner
            .project_dashboard(Some(&fx.viewer), &fx.project_id, date("2025-02-01"))
            .unwrap();
        assert_eq!(dashboard.task_count, 3);
        assert_eq!(dashboard.completed_count, 1);
        assert_eq!(dashboard.average_progress, 50);
        assert_eq!(dashboard.milestone_count, 2);
        assert_eq!(dashboard.next_milestone.unwrap().name, "Handover");
    }

    #[test]
    fn milestone_task_link_must_be_local() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let task = planner
            .create_task(Some(&fx.manager), fx.task_request("Linked", "2025-01-05"))
            .unwrap();
        let milestone = planner
            .create_milestone(
                Some(&fx.manager),
                CreateMilestone {
                    project_id: fx.project_id.clone(),
                    name: "Sign-off".to_string(),
                    date: date("2025-01-06"),
                    related_task_id: Some(task.id.clone()),
                },
            )
            .unwrap();
        assert_eq!(milestone.related_task_id.as_deref(), Some(task.id.as_str()));

        let cleared = planner
            .update_milestone(
                Some(&fx.manager),
                &milestone.id,
                UpdateMilestone {
                    related_task_id: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(cleared.related_task_id.is_none());

        assert!(matches!(
            planner.update_milestone(
                Some(&fx.manager),
                &milestone.id,
                UpdateMilestone {
                    related_task_id: Some(Some("missing".to_string())),
                    ..Default::default()
                },
            ),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn project_report_reflects_final_dates() {
        let fx = Fixture::new();
        let planner = fx.planner();
        let task = planner
            .create_task(Some(&fx.manager), fx.task_request("Excavation", "2025-01-05"))
            .unwrap();
        planner
            .create_issue(Some(&fx.manager), fx.issue_request(&task.id, 5))
            .unwrap();

        let options = ReportOptions {
            reference: chrono::DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            horizon_days: 3,
            resource: None,
        };
        let report = planner
            .project_report(Some(&fx.viewer), &fx.project_id, &options)
            .unwrap();
        assert_eq!(report.timeline.project_end.as_deref(), Some("2025-01-10"));
        assert_eq!(report.tasks[0].phase, "Excavation");
    }

    #[test]
    fn outsiders_cannot_read_projects() {
        let fx = Fixture::new();
        let outsider: SessionUser = fx
            .db
            .transaction(|s| s.insert_user("out@example.com", None, Role::Manager))
            .unwrap()
            .into();
        assert!(matches!(
            fx.planner().get_project(Some(&outsider), &fx.project_id),
            Err(DomainError::Forbidden)
        ));
        assert!(matches!(
            fx.planner().list_tasks(Some(&outsider), Some(&fx.project_id)),
            Err(DomainError::Forbidden)
        ));
        assert!(fx.planner().list_tasks(Some(&outsider), None).unwrap().is_empty());
    }
}
