use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::user::{User, UserStatus, normalize_email};

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let roles: String = row.get(5)?;
    let permissions: String = row.get(6)?;
    let metadata: String = row.get(9)?;
    let status: String = row.get(10)?;
    Ok(User {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        password_hash: row.get(4)?,
        roles: serde_json::from_str(&roles).unwrap_or_default(),
        permissions: serde_json::from_str(&permissions).unwrap_or_default(),
        two_factor_secret: row.get(7)?,
        two_factor_enabled: row.get::<_, i64>(8)? != 0,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        status: match status.as_str() {
            "suspended" => UserStatus::Suspended,
            "closed" => UserStatus::Closed,
            _ => UserStatus::Active,
        },
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

const USER_COLUMNS: &str =
    "id, tenant_id, email, phone, password_hash, roles, permissions, two_factor_secret,
     two_factor_enabled, metadata, status, created_at, updated_at";

pub fn create_user(
    conn: &Connection,
    tenant_id: &str,
    email: &str,
    password_hash: Option<&str>,
    metadata: Value,
) -> CoreResult<User> {
    let id = Uuid::new_v4().to_string();
    let email = normalize_email(email);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (id, tenant_id, email, password_hash, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, tenant_id, email, password_hash, metadata.to_string()],
    )?;
    if inserted == 0 {
        return Err(CoreError::Conflict(format!(
            "email {email} is already registered in this tenant"
        )));
    }
    get_user(conn, &id)?.ok_or_else(|| CoreError::not_found("user", id))
}

pub fn get_user(conn: &Connection, id: &str) -> CoreResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id], map_user_row)
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;
    Ok(row)
}

pub fn get_user_by_email(
    conn: &Connection,
    tenant_id: &str,
    email: &str,
) -> CoreResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE tenant_id = ?1 AND email = ?2");
    let email = normalize_email(email);
    let row = conn
        .query_row(&sql, [tenant_id, email.as_str()], map_user_row)
        .map(Some)
        .or_else(crate::registry::ignore_not_found)?;
    Ok(row)
}

/// Set one dotted-path flag inside the user's metadata.
pub fn set_metadata_flag(conn: &Connection, user_id: &str, path: &str, value: bool) -> CoreResult<()> {
    let user =
        get_user(conn, user_id)?.ok_or_else(|| CoreError::not_found("user", user_id))?;
    let mut metadata = if user.metadata.is_object() {
        user.metadata
    } else {
        Value::Object(serde_json::Map::new())
    };
    set_path(&mut metadata, path, Value::Bool(value));
    conn.execute(
        "UPDATE users SET metadata = ?1, updated_at = unixepoch() WHERE id = ?2",
        rusqlite::params![metadata.to_string(), user_id],
    )?;
    Ok(())
}

pub fn update_metadata(conn: &Connection, user_id: &str, metadata: &Value) -> CoreResult<()> {
    conn.execute(
        "UPDATE users SET metadata = ?1, updated_at = unixepoch() WHERE id = ?2",
        rusqlite::params![metadata.to_string(), user_id],
    )?;
    Ok(())
}

pub fn set_two_factor_secret(
    conn: &Connection,
    user_id: &str,
    ciphertext: Option<&str>,
) -> CoreResult<()> {
    conn.execute(
        "UPDATE users SET two_factor_secret = ?1, updated_at = unixepoch() WHERE id = ?2",
        rusqlite::params![ciphertext, user_id],
    )?;
    Ok(())
}

pub fn set_two_factor_enabled(conn: &Connection, user_id: &str, enabled: bool) -> CoreResult<()> {
    conn.execute(
        "UPDATE users SET two_factor_enabled = ?1, updated_at = unixepoch() WHERE id = ?2",
        rusqlite::params![enabled as i64, user_id],
    )?;
    Ok(())
}

pub fn set_roles(
    conn: &Connection,
    user_id: &str,
    roles: &[crate::model::RoleAssignment],
) -> CoreResult<()> {
    conn.execute(
        "UPDATE users SET roles = ?1, updated_at = unixepoch() WHERE id = ?2",
        rusqlite::params![serde_json::to_string(roles)?, user_id],
    )?;
    Ok(())
}

fn set_path(value: &mut Value, path: &str, leaf: Value) {
    let mut current = value;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().expect("just coerced to object");
        if i == segments.len() - 1 {
            map.insert(segment.to_string(), leaf);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}
