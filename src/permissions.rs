//! Role-based access checks.
//!
//! Every gated operation names an [`Operation`]; [`Operation::allowed_roles`]
//! is the whole permission table. A global ADMIN passes every project check
//! without a membership row.

use crate::db::Store;
use crate::error::{DomainError, DomainResult};
use crate::models::{Role, SessionUser, Task};

/// Something a caller can ask to do inside a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadProject,
    WriteTask,
    WriteIssue,
    WriteMilestone,
    ManageProject,
    ManageMembers,
}

impl Operation {
    #[cfg(test)]
    pub const ALL: [Operation; 6] = [
        Operation::ReadProject,
        Operation::WriteTask,
        Operation::WriteIssue,
        Operation::WriteMilestone,
        Operation::ManageProject,
        Operation::ManageMembers,
    ];

    /// Project roles permitted to perform the operation
    pub fn allowed_roles(self) -> &'static [Role] {
        match self {
            Operation::ReadProject => &[Role::Admin, Role::Manager, Role::Member, Role::Viewer],
            Operation::WriteTask | Operation::WriteIssue => {
                &[Role::Admin, Role::Manager, Role::Member]
            }
            Operation::WriteMilestone | Operation::ManageProject | Operation::ManageMembers => {
                &[Role::Admin, Role::Manager]
            }
        }
    }

    pub fn allows(self, role: Role) -> bool {
        self.allowed_roles().contains(&role)
    }
}

/// Membership lookup used by the project checks
pub trait MembershipLookup {
    fn project_role(&self, project_id: &str, user_id: &str) -> DomainResult<Option<Role>>;
}

impl MembershipLookup for Store<'_> {
    fn project_role(&self, project_id: &str, user_id: &str) -> DomainResult<Option<Role>> {
        self.membership_role(project_id, user_id)
    }
}

/// A caller cleared for a project operation, with the role that cleared them
#[derive(Debug, Clone, Copy)]
pub struct Grant<'u> {
    pub user: &'u SessionUser,
    pub role: Role,
}

pub fn require_user(user: Option<&SessionUser>) -> DomainResult<&SessionUser> {
    user.ok_or(DomainError::Unauthenticated)
}

/// Gate on the caller's global role alone
pub fn ensure_global_role<'u>(
    user: Option<&'u SessionUser>,
    allowed: &[Role],
) -> DomainResult<&'u SessionUser> {
    let user = require_user(user)?;
    if !allowed.contains(&user.global_role) {
        return Err(DomainError::Forbidden);
    }
    Ok(user)
}

pub fn ensure_project_role<'u>(
    lookup: &impl MembershipLookup,
    user: Option<&'u SessionUser>,
    project_id: &str,
    operation: Operation,
) -> DomainResult<Grant<'u>> {
    let user = require_user(user)?;

    if user.global_role == Role::Admin {
        return Ok(Grant {
            user,
            role: Role::Admin,
        });
    }

    match lookup.project_role(project_id, &user.id)? {
        Some(role) if operation.allows(role) => Ok(Grant { user, role }),
        _ => {
            tracing::debug!(
                user_id = %user.id,
                project_id,
                ?operation,
                "Project access denied"
            );
            Err(DomainError::Forbidden)
        }
    }
}

/// Clearance to modify one specific task. MEMBERs may only touch tasks they
/// own; ADMIN and MANAGER may touch any task in the project.
pub fn ensure_task_mutation<'u>(
    lookup: &impl MembershipLookup,
    user: Option<&'u SessionUser>,
    task: &Task,
) -> DomainResult<Grant<'u>> {
    let grant = ensure_project_role(lookup, user, &task.project_id, Operation::WriteTask)?;
    if grant.role == Role::Member && task.owner_id.as_deref() != Some(grant.user.id.as_str()) {
        return Err(DomainError::Forbidden);
    }
    Ok(grant)
}

pub fn can_manage_members(role: Role) -> bool {
    matches!(role, Role::Admin | Role::Manager)
}

/// Clearance to invite, remove or re-role project members
pub fn ensure_member_management<'u>(
    lookup: &impl MembershipLookup,
    user: Option<&'u SessionUser>,
    project_id: &str,
) -> DomainResult<Grant<'u>> {
    let grant = ensure_project_role(lookup, user, project_id, Operation::ManageMembers)?;
    if !can_manage_members(grant.role) {
        return Err(DomainError::Forbidden);
    }
    Ok(grant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Memberships(HashMap<(String, String), Role>);

    impl Memberships {
        fn with(mut self, project: &str, user: &str, role: Role) -> Self {
            self.0.insert((project.to_string(), user.to_string()), role);
            self
        }
    }

    impl MembershipLookup for Memberships {
        fn project_role(&self, project_id: &str, user_id: &str) -> DomainResult<Option<Role>> {
            Ok(self
                .0
                .get(&(project_id.to_string(), user_id.to_string()))
                .copied())
        }
    }

    fn user(id: &str, global_role: Role) -> SessionUser {
        SessionUser {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            name: None,
            global_role,
        }
    }

    fn task_owned_by(owner: Option<&str>) -> Task {
        let day = chrono::NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        Task {
            id: "t1".to_string(),
            project_id: "p1".to_string(),
            title: "Pour slab".to_string(),
            description: None,
            start_date: day,
            end_date_original: day,
            delay_days: 0,
            end_date_final: day,
            progress: 0,
            priority: Default::default(),
            owner_id: owner.map(str::to_string),
            parent_task_id: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn permission_table_matches_role_sets() {
        assert_eq!(Operation::ReadProject.allowed_roles(), &Role::ALL);
        assert!(Operation::WriteTask.allows(Role::Member));
        assert!(Operation::WriteIssue.allows(Role::Member));
        assert!(!Operation::WriteTask.allows(Role::Viewer));
        assert!(!Operation::WriteMilestone.allows(Role::Member));
        assert!(Operation::WriteMilestone.allows(Role::Manager));
    }

    #[test]
    fn write_roles_are_subsets_of_read_roles() {
        for op in Operation::ALL {
            for role in op.allowed_roles() {
                assert!(Operation::ReadProject.allows(*role), "{op:?} grants {role}");
            }
        }
    }

    #[test]
    fn missing_user_is_unauthenticated() {
        let lookup = Memberships::default();
        let err = ensure_project_role(&lookup, None, "p1", Operation::ReadProject).unwrap_err();
        assert!(matches!(err, DomainError::Unauthenticated));
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn global_admin_bypasses_membership() {
        let lookup = Memberships::default();
        let admin = user("root", Role::Admin);
        let grant =
            ensure_project_role(&lookup, Some(&admin), "p1", Operation::ManageMembers).unwrap();
        assert_eq!(grant.role, Role::Admin);
        assert!(ensure_task_mutation(&lookup, Some(&admin), &task_owned_by(Some("other"))).is_ok());
    }

    #[test]
    fn non_member_is_forbidden() {
        let lookup = Memberships::default();
        let outsider = user("u9", Role::Manager);
        let err =
            ensure_project_role(&lookup, Some(&outsider), "p1", Operation::ReadProject).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden));
    }

    #[test]
    fn viewer_cannot_write_tasks() {
        let lookup = Memberships::default().with("p1", "v1", Role::Viewer);
        let viewer = user("v1", Role::Viewer);
        assert!(ensure_project_role(&lookup, Some(&viewer), "p1", Operation::ReadProject).is_ok());
        let err = ensure_task_mutation(&lookup, Some(&viewer), &task_owned_by(Some("v1")))
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden));
    }

    #[test]
    fn member_mutates_only_owned_tasks() {
        let lookup = Memberships::default().with("p1", "m1", Role::Member);
        let member = user("m1", Role::Member);

        assert!(ensure_task_mutation(&lookup, Some(&member), &task_owned_by(Some("m1"))).is_ok());
        assert!(matches!(
            ensure_task_mutation(&lookup, Some(&member), &task_owned_by(Some("m2"))),
            Err(DomainError::Forbidden)
        ));
        assert!(matches!(
            ensure_task_mutation(&lookup, Some(&member), &task_owned_by(None)),
            Err(DomainError::Forbidden)
        ));
    }

    #[test]
    fn manager_mutates_any_project_task() {
        let lookup = Memberships::default().with("p1", "pm", Role::Manager);
        let manager = user("pm", Role::Member);
        assert!(ensure_task_mutation(&lookup, Some(&manager), &task_owned_by(Some("m2"))).is_ok());
    }

    #[test]
    fn member_management_needs_admin_or_manager() {
        assert!(can_manage_members(Role::Admin));
        assert!(can_manage_members(Role::Manager));
        assert!(!can_manage_members(Role::Member));
        assert!(!can_manage_members(Role::Viewer));

        let lookup = Memberships::default()
            .with("p1", "m1", Role::Member)
            .with("p1", "pm", Role::Manager);
        assert!(matches!(
            ensure_member_management(&lookup, Some(&user("m1", Role::Member)), "p1"),
            Err(DomainError::Forbidden)
        ));
        assert!(ensure_member_management(&lookup, Some(&user("pm", Role::Member)), "p1").is_ok());
    }

    #[test]
    fn global_role_gate() {
        let admin = user("a", Role::Admin);
        assert!(ensure_global_role(Some(&admin), &[Role::Admin, Role::Manager]).is_ok());
        assert!(matches!(
            ensure_global_role(Some(&user("v", Role::Viewer)), &[Role::Admin]),
            Err(DomainError::Forbidden)
        ));
        assert!(matches!(
            ensure_global_role(None, &[Role::Admin]),
            Err(DomainError::Unauthenticated)
        ));
    }
}
