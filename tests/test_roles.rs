use std::collections::HashMap;

use serde_json::json;

use pay_flow::auth::roles::{effective_permissions, has_permission, permission_matches};
use pay_flow::model::role::{Role, RoleAssignment, RoleContext};
use pay_flow::model::user::{User, UserStatus};

// ── Fixtures ────────────────────────────────────────────────────────

fn role(name: &str, permissions: &[&str], inherits: &[&str]) -> Role {
    Role {
        name: name.to_string(),
        display_name: name.to_string(),
        description: String::new(),
        permissions: permissions.iter().map(|s| s.to_string()).collect(),
        inherits: inherits.iter().map(|s| s.to_string()).collect(),
        priority: 0,
        active: true,
    }
}

fn roles(list: Vec<Role>) -> HashMap<String, Role> {
    list.into_iter().map(|r| (r.name.clone(), r)).collect()
}

fn assignment(role: &str, context: Option<RoleContext>) -> RoleAssignment {
    RoleAssignment {
        role: role.to_string(),
        context,
        assigned_at: 0,
        assigned_by: "test".to_string(),
        expires_at: None,
        active: true,
    }
}

fn user(assignments: Vec<RoleAssignment>, direct: &[&str]) -> User {
    User {
        id: "u1".to_string(),
        tenant_id: "t1".to_string(),
        email: "u1@example.com".to_string(),
        phone: None,
        password_hash: None,
        roles: assignments,
        permissions: direct.iter().map(|s| s.to_string()).collect(),
        two_factor_secret: None,
        two_factor_enabled: false,
        metadata: json!({}),
        status: UserStatus::Active,
        created_at: 0,
        updated_at: 0,
    }
}

// ── Wildcards ───────────────────────────────────────────────────────

#[test]
fn full_wildcard_permits_everything() {
    for required in ["users:read:own", "wallets:write:any", "a:b:c"] {
        assert!(permission_matches("*:*:*", required));
    }
}

#[test]
fn scope_wildcards_do_not_cross_segments() {
    assert!(permission_matches("users:*:own", "users:read:own"));
    assert!(permission_matches("users:*:own", "users:delete:own"));
    assert!(!permission_matches("users:*:own", "users:read:any"));
    assert!(!permission_matches("users:*:own", "wallets:read:own"));
}

// ── Resolution ──────────────────────────────────────────────────────

#[test]
fn inheritance_is_transitive() {
    let roles = roles(vec![
        role("viewer", &["users:read:any"], &[]),
        role("editor", &["users:write:any"], &["viewer"]),
        role("admin", &["roles:manage:any"], &["editor"]),
    ]);
    let user = user(vec![assignment("admin", None)], &[]);
    let perms = effective_permissions(&roles, &user, &RoleContext::default());

    assert!(has_permission(perms.iter(), "users:read:any"));
    assert!(has_permission(perms.iter(), "users:write:any"));
    assert!(has_permission(perms.iter(), "roles:manage:any"));
}

#[test]
fn inheritance_cycles_terminate() {
    let roles = roles(vec![
        role("a", &["x:read:any"], &["b"]),
        role("b", &["y:read:any"], &["a"]),
    ]);
    let user = user(vec![assignment("a", None)], &[]);
    let perms = effective_permissions(&roles, &user, &RoleContext::default());
    assert!(has_permission(perms.iter(), "x:read:any"));
    assert!(has_permission(perms.iter(), "y:read:any"));
}

#[test]
fn scoped_assignment_only_applies_in_its_scope() {
    let roles = roles(vec![role("support", &["tickets:write:any"], &[])]);
    let scoped = assignment(
        "support",
        Some(RoleContext {
            tenant: Some("t1".to_string()),
            ..Default::default()
        }),
    );
    let user = user(vec![scoped], &[]);

    let in_t1 = effective_permissions(
        &roles,
        &user,
        &RoleContext {
            tenant: Some("t1".to_string()),
            ..Default::default()
        },
    );
    assert!(has_permission(in_t1.iter(), "tickets:write:any"));

    let in_t2 = effective_permissions(
        &roles,
        &user,
        &RoleContext {
            tenant: Some("t2".to_string()),
            ..Default::default()
        },
    );
    assert!(!has_permission(in_t2.iter(), "tickets:write:any"));
}

#[test]
fn unscoped_assignment_applies_everywhere() {
    let roles = roles(vec![role("auditor", &["ledger:read:any"], &[])]);
    let user = user(vec![assignment("auditor", None)], &[]);
    let perms = effective_permissions(
        &roles,
        &user,
        &RoleContext {
            brand: Some("b3".to_string()),
            tenant: Some("t9".to_string()),
            resource: Some("wallets".to_string()),
        },
    );
    assert!(has_permission(perms.iter(), "ledger:read:any"));
}

#[test]
fn expired_and_inactive_assignments_grant_nothing() {
    let roles = roles(vec![role("vip", &["perks:use:own"], &[])]);

    let mut expired = assignment("vip", None);
    expired.expires_at = Some(chrono::Utc::now().timestamp() - 10);
    let mut inactive = assignment("vip", None);
    inactive.active = false;

    for a in [expired, inactive] {
        let user = user(vec![a], &[]);
        let perms = effective_permissions(&roles, &user, &RoleContext::default());
        assert!(!has_permission(perms.iter(), "perks:use:own"));
    }
}

#[test]
fn user_level_permissions_union_with_roles() {
    let roles = roles(vec![role("viewer", &["users:read:own"], &[])]);
    let user = user(vec![assignment("viewer", None)], &["wallets:export:own"]);
    let perms = effective_permissions(&roles, &user, &RoleContext::default());
    assert!(has_permission(perms.iter(), "users:read:own"));
    assert!(has_permission(perms.iter(), "wallets:export:own"));
    // Absence is denial.
    assert!(!has_permission(perms.iter(), "wallets:export:any"));
}

#[test]
fn inactive_roles_are_skipped_during_traversal() {
    let mut dormant = role("dormant", &["secrets:read:any"], &[]);
    dormant.active = false;
    let roles = roles(vec![role("base", &["users:read:own"], &["dormant"]), dormant]);
    let user = user(vec![assignment("base", None)], &[]);
    let perms = effective_permissions(&roles, &user, &RoleContext::default());
    assert!(has_permission(perms.iter(), "users:read:own"));
    assert!(!has_permission(perms.iter(), "secrets:read:any"));
}
