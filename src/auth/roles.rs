use std::collections::{HashMap, HashSet};

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use rusqlite::Connection;

use crate::db::Db;
use crate::error::CoreResult;
use crate::model::{Role, RoleContext, User};

// ── Wildcard permission matching ────────────────────────

/// `resource:action:scope` with `*` matching any single segment.
/// `"users:*:own"` permits `users:read:own` but not `users:read:any`.
pub fn permission_matches(granted: &str, required: &str) -> bool {
    let g: Vec<&str> = granted.split(':').collect();
    let r: Vec<&str> = required.split(':').collect();
    if g.len() != 3 || r.len() != 3 {
        return granted == required;
    }
    g.iter()
        .zip(r.iter())
        .all(|(g, r)| *g == "*" || g == r)
}

pub fn has_permission<'a>(
    granted: impl IntoIterator<Item = &'a String>,
    required: &str,
) -> bool {
    granted
        .into_iter()
        .any(|g| permission_matches(g, required))
}

// ── Assignment context filtering ────────────────────────

/// An assignment applies when every scope it names matches the request;
/// unset scopes match anything.
fn assignment_applies(assignment: &Option<RoleContext>, request: &RoleContext) -> bool {
    let Some(ctx) = assignment else {
        return true;
    };
    let field_ok = |a: &Option<String>, r: &Option<String>| match a {
        None => true,
        Some(v) => r.as_deref() == Some(v.as_str()),
    };
    field_ok(&ctx.brand, &request.brand)
        && field_ok(&ctx.tenant, &request.tenant)
        && field_ok(&ctx.resource, &request.resource)
}

// ── Resolution ──────────────────────────────────────────

/// Effective permissions for a user in a request context: filter the
/// assignments by context, walk `inherits` transitively (cycles are
/// harmless, the DFS visits each role once), then union role permissions
/// with user-level permissions.
pub fn effective_permissions(
    roles: &HashMap<String, Role>,
    user: &User,
    request: &RoleContext,
) -> HashSet<String> {
    let now = chrono::Utc::now().timestamp();

    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for role in roles.values() {
        graph.add_node(role.name.as_str());
        for parent in &role.inherits {
            if roles.contains_key(parent) {
                graph.add_edge(role.name.as_str(), parent.as_str(), ());
            }
        }
    }

    let mut permissions: HashSet<String> = HashSet::new();
    for assignment in &user.roles {
        if !assignment.active {
            continue;
        }
        if assignment.expires_at.is_some_and(|exp| exp <= now) {
            continue;
        }
        if !assignment_applies(&assignment.context, request) {
            continue;
        }
        let Some(start) = roles.get(&assignment.role) else {
            continue;
        };
        let mut dfs = Dfs::new(&graph, start.name.as_str());
        while let Some(name) = dfs.next(&graph) {
            if let Some(role) = roles.get(name) {
                if role.active {
                    permissions.extend(role.permissions.iter().cloned());
                }
            }
        }
    }

    permissions.extend(user.permissions.iter().cloned());
    permissions
}

// ── Storage + service ───────────────────────────────────

pub fn upsert_role(conn: &Connection, role: &Role) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO roles (name, display_name, description, permissions, inherits, priority, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(name) DO UPDATE SET
             display_name = ?2, description = ?3, permissions = ?4, inherits = ?5,
             priority = ?6, active = ?7",
        rusqlite::params![
            role.name,
            role.display_name,
            role.description,
            serde_json::to_string(&role.permissions)?,
            serde_json::to_string(&role.inherits)?,
            role.priority,
            role.active as i64,
        ],
    )?;
    Ok(())
}

pub fn load_roles(conn: &Connection) -> CoreResult<HashMap<String, Role>> {
    let mut stmt = conn.prepare(
        "SELECT name, display_name, description, permissions, inherits, priority, active FROM roles",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let permissions: String = row.get(3)?;
            let inherits: String = row.get(4)?;
            Ok(Role {
                name: row.get(0)?,
                display_name: row.get(1)?,
                description: row.get(2)?,
                permissions: serde_json::from_str(&permissions).unwrap_or_default(),
                inherits: serde_json::from_str(&inherits).unwrap_or_default(),
                priority: row.get(5)?,
                active: row.get::<_, i64>(6)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(|r| (r.name.clone(), r)).collect())
}

/// Role lookups over the core database with an in-memory snapshot,
/// invalidated on writes.
pub struct RoleStore {
    core: Db,
    snapshot: tokio::sync::Mutex<Option<HashMap<String, Role>>>,
}

impl RoleStore {
    pub fn new(core: Db) -> Self {
        RoleStore {
            core,
            snapshot: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn roles(&self) -> CoreResult<HashMap<String, Role>> {
        {
            let snapshot = self.snapshot.lock().await;
            if let Some(roles) = snapshot.as_ref() {
                return Ok(roles.clone());
            }
        }
        let roles = {
            let conn = self.core.lock().await;
            load_roles(&conn)?
        };
        *self.snapshot.lock().await = Some(roles.clone());
        Ok(roles)
    }

    pub async fn upsert(&self, role: &Role) -> CoreResult<()> {
        {
            let conn = self.core.lock().await;
            upsert_role(&conn, role)?;
        }
        *self.snapshot.lock().await = None;
        Ok(())
    }

    pub async fn resolve(
        &self,
        user: &User,
        request: &RoleContext,
    ) -> CoreResult<HashSet<String>> {
        let roles = self.roles().await?;
        Ok(effective_permissions(&roles, user, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_segments() {
        assert!(permission_matches("*:*:*", "users:read:own"));
        assert!(permission_matches("users:*:own", "users:read:own"));
        assert!(!permission_matches("users:*:own", "users:read:any"));
        assert!(permission_matches("users:read:own", "users:read:own"));
        assert!(!permission_matches("wallets:*:*", "users:read:own"));
    }
}
