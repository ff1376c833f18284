//! Demo dataset for local development.

use chrono::NaiveDate;
use serde_json::json;

use crate::dates::parse_calendar_date;
use crate::db::{Database, NewIssue, NewTask, Store};
use crate::error::DomainResult;
use crate::models::{AuditAction, AuditEntry, EntityType, Priority, Role, User};
use crate::task_dates::recalc_task_end_date;

const ADMIN_EMAIL: &str = "admin@example.com";

/// What a fresh seed created
#[derive(Debug, Clone)]
pub struct SeedReport {
    pub project_id: String,
    pub task_ids: Vec<String>,
    pub issue_id: String,
}

fn day(value: &str) -> DomainResult<NaiveDate> {
    parse_calendar_date(value)
}

fn ensure_user(store: &Store<'_>, email: &str, name: &str, role: Role) -> DomainResult<User> {
    match store.find_user_by_email(email)? {
        Some(user) => Ok(user),
        None => store.insert_user(email, Some(name), role),
    }
}

/// Load the demo users, project, tasks, milestones and issue.
///
/// Returns `None` when the demo admin already belongs to a project.
pub fn seed_demo(db: &Database) -> DomainResult<Option<SeedReport>> {
    db.transaction(|store| {
        if let Some(admin) = store.find_user_by_email(ADMIN_EMAIL)?
            && !store.projects_for_user(&admin.id)?.is_empty()
        {
            return Ok(None);
        }

        let admin = ensure_user(store, ADMIN_EMAIL, "Admin User", Role::Admin)?;
        let manager = ensure_user(store, "pm@example.com", "Project Manager", Role::Manager)?;
        let member = ensure_user(store, "member@example.com", "Team Member", Role::Member)?;

        let project = store.insert_project(
            "Alpha Expansion",
            Some("Migration of the legacy planner to a multi-tenant system."),
            day("2025-01-01")?,
            Some(day("2025-04-30")?),
            Some(&admin.id),
        )?;
        for user in [&admin, &manager, &member] {
            store.upsert_member(&project.id, &user.id, user.global_role)?;
        }

        let discovery = store.insert_task(&NewTask {
            project_id: project.id.clone(),
            title: "Discovery & Requirements".to_string(),
            description: Some("Interview stakeholders and define scope.".to_string()),
            start_date: day("2025-01-02")?,
            end_date_original: day("2025-01-20")?,
            delay_days: 2,
            progress: 80,
            priority: Priority::High,
            owner_id: Some(manager.id.clone()),
            parent_task_id: None,
        })?;
        let implementation = store.insert_task(&NewTask {
            project_id: project.id.clone(),
            title: "Core Implementation".to_string(),
            description: Some("Build scheduling engine and Gantt UI.".to_string()),
            start_date: day("2025-01-22")?,
            end_date_original: day("2025-03-01")?,
            delay_days: 0,
            progress: 25,
            priority: Priority::Critical,
            owner_id: Some(member.id.clone()),
            parent_task_id: Some(discovery.id.clone()),
        })?;

        store.insert_milestone(
            &project.id,
            "Requirements Sign-off",
            day("2025-01-21")?,
            Some(&discovery.id),
        )?;
        store.insert_milestone(
            &project.id,
            "MVP Complete",
            day("2025-03-05")?,
            Some(&implementation.id),
        )?;

        let issue = store.insert_issue(&NewIssue {
            task_id: implementation.id.clone(),
            title: "API Contract Change".to_string(),
            start_date: day("2025-02-10")?,
            duration_days: 5,
            description: Some("External dependency pushed a breaking change.".to_string()),
            created_by_id: Some(manager.id.clone()),
        })?;

        for task_id in [&discovery.id, &implementation.id] {
            recalc_task_end_date(store, task_id)?;
        }

        store.append_audit(&AuditEntry {
            project_id: project.id.clone(),
            actor_id: Some(manager.id.clone()),
            entity_type: EntityType::Issue,
            entity_id: issue.id.clone(),
            action: AuditAction::Created,
            payload: Some(json!({ "message": "Initial schedule variance recorded via seed." })),
        })?;

        tracing::info!(project_id = %project.id, "Demo data seeded");

        Ok(Some(SeedReport {
            project_id: project.id,
            task_ids: vec![discovery.id, implementation.id],
            issue_id: issue.id,
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_recalculates_and_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let report = seed_demo(&db).unwrap().expect("fresh database seeds");

        db.read(|store| {
            let discovery = store.find_task(&report.task_ids[0])?.unwrap();
            assert_eq!(discovery.end_date_final, day("2025-01-22")?);
            let implementation = store.find_task(&report.task_ids[1])?.unwrap();
            assert_eq!(implementation.end_date_final, day("2025-03-06")?);
            assert_eq!(store.list_members(&report.project_id)?.len(), 3);
            assert_eq!(
                store.audit_trail(&report.project_id)?,
                vec![("ISSUE".to_string(), "CREATED".to_string())]
            );
            Ok(())
        })
        .unwrap();

        assert!(seed_demo(&db).unwrap().is_none());
    }
}
