//! crates/sapt_core/src/rules.rs
//!
//! Role-based access rules evaluated by every store adapter before a read or
//! write touches a document. The caller's role always comes from its
//! `users/{uid}` profile, never from the request.

use crate::domain::Role;
use crate::ports::{Collection, Fields, StoreError, StoreResult};

/// The kind of access being requested on one document.
#[derive(Debug, Clone, Copy)]
pub enum Access<'a> {
    Read(&'a Fields),
    Create(&'a Fields),
    Update { existing: &'a Fields, patch: &'a Fields },
    Delete(&'a Fields),
}

/// An authenticated principal with its resolved role. `role` is `None` when the
/// user has no profile document (or an unreadable role) yet.
#[derive(Debug, Clone, Copy)]
pub struct Principal<'a> {
    pub uid: &'a str,
    pub role: Option<Role>,
}

impl Principal<'_> {
    fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }

    fn manages_staff(&self) -> bool {
        self.role.is_some_and(Role::manages_staff)
    }

    fn is(&self, fields: &Fields, field: &str) -> bool {
        fields.get(field).and_then(|v| v.as_str()) == Some(self.uid)
    }
}

/// Checks one access against the rules of `collection`.
pub fn check(collection: Collection, principal: Principal<'_>, doc_id: &str, access: Access<'_>) -> StoreResult<()> {
    let allowed = match collection {
        Collection::Users => users(principal, doc_id, access),
        Collection::Attendance | Collection::Performance => subject_records(principal, access),
        Collection::Tasks => tasks(principal, access),
        Collection::Notifications => notifications(principal, access),
    };

    if allowed {
        Ok(())
    } else {
        Err(denied(collection, doc_id, access))
    }
}

/// The error every adapter returns for anonymous callers.
pub fn anonymous_denied(collection: Collection) -> StoreError {
    StoreError::PermissionDenied(format!("anonymous access to {} is not allowed", collection))
}

fn denied(collection: Collection, doc_id: &str, access: Access<'_>) -> StoreError {
    let verb = match access {
        Access::Read(_) => "read",
        Access::Create(_) => "create",
        Access::Update { .. } => "update",
        Access::Delete(_) => "delete",
    };
    StoreError::PermissionDenied(format!("{} on {}/{} is not allowed", verb, collection, doc_id))
}

fn users(p: Principal<'_>, doc_id: &str, access: Access<'_>) -> bool {
    let own = p.uid == doc_id;
    match access {
        Access::Read(_) => own || p.manages_staff(),
        Access::Create(_) => own || p.is_admin(),
        Access::Update { existing, patch } => {
            if p.is_admin() {
                return true;
            }
            // Non-admins may edit their own profile but never their role.
            let role_unchanged = patch
                .get("role")
                .map_or(true, |role| existing.get("role") == Some(role));
            own && role_unchanged
        }
        Access::Delete(_) => p.is_admin(),
    }
}

fn subject_records(p: Principal<'_>, access: Access<'_>) -> bool {
    match access {
        Access::Read(fields) => p.manages_staff() || p.is(fields, "userId"),
        _ => p.manages_staff(),
    }
}

fn tasks(p: Principal<'_>, access: Access<'_>) -> bool {
    match access {
        Access::Read(fields) => p.manages_staff() || p.is(fields, "assignedTo"),
        Access::Update { existing, patch } => {
            p.manages_staff() || (p.is(existing, "assignedTo") && only_touches(patch, &["status"]))
        }
        Access::Create(_) | Access::Delete(_) => p.manages_staff(),
    }
}

fn notifications(p: Principal<'_>, access: Access<'_>) -> bool {
    match access {
        Access::Read(fields) => p.is_admin() || p.is(fields, "userId"),
        Access::Create(_) => p.manages_staff(),
        Access::Update { existing, patch } => {
            p.is_admin() || (p.is(existing, "userId") && only_touches(patch, &["read"]))
        }
        Access::Delete(_) => p.is_admin(),
    }
}

fn only_touches(patch: &Fields, allowed: &[&str]) -> bool {
    patch.keys().all(|k| allowed.contains(&k.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn who(uid: &str, role: Role) -> Principal<'_> {
        Principal { uid, role: Some(role) }
    }

    #[test]
    fn only_managers_write_attendance() {
        let record = fields(json!({"userId": "s1", "status": "present"}));
        for role in [Role::Admin, Role::Supervisor] {
            assert!(check(Collection::Attendance, who("m", role), "a1", Access::Create(&record)).is_ok());
        }
        for role in [Role::Student, Role::Employee] {
            let err = check(Collection::Attendance, who("s1", role), "a1", Access::Create(&record)).unwrap_err();
            assert!(matches!(err, StoreError::PermissionDenied(_)));
        }
    }

    #[test]
    fn subjects_read_only_their_own_records() {
        let record = fields(json!({"userId": "s1"}));
        assert!(check(Collection::Performance, who("s1", Role::Student), "p1", Access::Read(&record)).is_ok());
        assert!(check(Collection::Performance, who("s2", Role::Student), "p1", Access::Read(&record)).is_err());
    }

    #[test]
    fn assignee_may_only_change_task_status() {
        let task = fields(json!({"assignedTo": "e1", "status": "pending"}));
        let status = fields(json!({"status": "in_progress"}));
        let rating = fields(json!({"rating": 5, "status": "completed"}));
        let p = who("e1", Role::Employee);

        assert!(check(Collection::Tasks, p, "t1", Access::Update { existing: &task, patch: &status }).is_ok());
        assert!(check(Collection::Tasks, p, "t1", Access::Update { existing: &task, patch: &rating }).is_err());
        assert!(check(Collection::Tasks, who("e2", Role::Employee), "t1", Access::Update { existing: &task, patch: &status }).is_err());
    }

    #[test]
    fn users_cannot_promote_themselves() {
        let profile = fields(json!({"role": "student", "name": "Sam"}));
        let rename = fields(json!({"name": "Samuel"}));
        let promote = fields(json!({"role": "admin"}));
        let p = who("s1", Role::Student);

        assert!(check(Collection::Users, p, "s1", Access::Update { existing: &profile, patch: &rename }).is_ok());
        assert!(check(Collection::Users, p, "s1", Access::Update { existing: &profile, patch: &promote }).is_err());
        assert!(check(Collection::Users, who("a", Role::Admin), "s1", Access::Update { existing: &profile, patch: &promote }).is_ok());
    }

    #[test]
    fn supervisors_read_profiles_but_only_admins_write_them() {
        let profile = fields(json!({"role": "student", "name": "Sam"}));
        let rename = fields(json!({"name": "Samuel"}));
        let sup = who("sup", Role::Supervisor);

        assert!(check(Collection::Users, sup, "s1", Access::Read(&profile)).is_ok());
        assert!(check(Collection::Users, who("s2", Role::Student), "s1", Access::Read(&profile)).is_err());
        assert!(check(Collection::Users, sup, "s1", Access::Create(&profile)).is_err());
        assert!(check(Collection::Users, sup, "s1", Access::Update { existing: &profile, patch: &rename }).is_err());
        assert!(check(Collection::Users, sup, "s1", Access::Delete(&profile)).is_err());
    }

    #[test]
    fn missing_profile_fails_closed() {
        let p = Principal { uid: "x", role: None };
        let record = fields(json!({"userId": "y"}));
        assert!(check(Collection::Attendance, p, "a1", Access::Read(&record)).is_err());
        assert!(check(Collection::Tasks, p, "t1", Access::Create(&record)).is_err());
    }

    #[test]
    fn recipients_flip_read_but_nothing_else() {
        let notif = fields(json!({"userId": "u1", "read": false}));
        let read = fields(json!({"read": true}));
        let retitle = fields(json!({"title": "x"}));
        let p = who("u1", Role::Student);
        assert!(check(Collection::Notifications, p, "n1", Access::Update { existing: &notif, patch: &read }).is_ok());
        assert!(check(Collection::Notifications, p, "n1", Access::Update { existing: &notif, patch: &retitle }).is_err());
        assert!(check(Collection::Notifications, p, "n1", Access::Create(&notif)).is_err());
    }
}
