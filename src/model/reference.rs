use std::collections::HashMap;

use rusqlite::Connection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

/// The known entity kinds a generic reference can point at.
///
/// Cross-service references store `{ kind, id }` instead of a foreign key;
/// the owning table is registered per kind and batch resolution issues one
/// query per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    User,
    Wallet,
    LedgerAccount,
    LedgerTransaction,
    BonusTemplate,
    UserBonus,
    Brand,
    Tenant,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct EntityRef {
    pub kind: RefKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: RefKind, id: impl Into<String>) -> Self {
        EntityRef {
            kind,
            id: id.into(),
        }
    }
}

/// How to resolve one kind: the owning table and a SQL expression projecting
/// a row to a JSON summary.
#[derive(Clone, Copy)]
pub struct RefTarget {
    pub table: &'static str,
    pub id_column: &'static str,
    pub projection: &'static str,
}

/// Registry of owning tables, populated at startup; new kinds are registered
/// explicitly, never guessed.
pub struct RefResolver {
    targets: HashMap<RefKind, RefTarget>,
}

impl RefResolver {
    pub fn new() -> Self {
        let mut resolver = RefResolver {
            targets: HashMap::new(),
        };
        resolver.register(RefKind::User, RefTarget {
            table: "users",
            id_column: "id",
            projection: "json_object('id', id, 'tenant_id', tenant_id, 'email', email)",
        });
        resolver.register(RefKind::Wallet, RefTarget {
            table: "wallets",
            id_column: "id",
            projection: "json_object('id', id, 'user_id', user_id, 'currency', currency)",
        });
        resolver.register(RefKind::LedgerAccount, RefTarget {
            table: "ledger_accounts",
            id_column: "id",
            projection: "json_object('id', id, 'owner_id', owner_id, 'subtype', subtype, 'currency', currency)",
        });
        resolver.register(RefKind::LedgerTransaction, RefTarget {
            table: "ledger_transactions",
            id_column: "id",
            projection: "json_object('id', id, 'tx_type', tx_type, 'amount', amount, 'currency', currency, 'status', status)",
        });
        resolver.register(RefKind::BonusTemplate, RefTarget {
            table: "bonus_templates",
            id_column: "id",
            projection: "json_object('id', id, 'code', code, 'bonus_type', bonus_type)",
        });
        resolver.register(RefKind::UserBonus, RefTarget {
            table: "user_bonuses",
            id_column: "id",
            projection: "json_object('id', id, 'user_id', user_id, 'status', status)",
        });
        resolver.register(RefKind::Brand, RefTarget {
            table: "brands",
            id_column: "id",
            projection: "json_object('id', id, 'code', code, 'name', name)",
        });
        resolver.register(RefKind::Tenant, RefTarget {
            table: "tenants",
            id_column: "id",
            projection: "json_object('id', id, 'code', code, 'name', name)",
        });
        resolver
    }

    pub fn register(&mut self, kind: RefKind, target: RefTarget) {
        self.targets.insert(kind, target);
    }

    /// Resolve a batch of references against one connection. Groups by kind,
    /// one query per kind; unknown ids are simply absent from the result.
    pub fn resolve_batch(
        &self,
        conn: &Connection,
        refs: &[EntityRef],
    ) -> CoreResult<HashMap<EntityRef, Value>> {
        let mut by_kind: HashMap<RefKind, Vec<&str>> = HashMap::new();
        for r in refs {
            by_kind.entry(r.kind).or_default().push(r.id.as_str());
        }

        let mut resolved = HashMap::new();
        for (kind, ids) in by_kind {
            let Some(target) = self.targets.get(&kind) else {
                continue;
            };
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT {id}, {proj} FROM {table} WHERE {id} IN ({placeholders})",
                id = target.id_column,
                proj = target.projection,
                table = target.table,
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<(String, String)> = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (id, payload) in rows {
                let value: Value = serde_json::from_str(&payload)?;
                resolved.insert(EntityRef::new(kind, id), value);
            }
        }
        Ok(resolved)
    }
}

impl Default for RefResolver {
    fn default() -> Self {
        Self::new()
    }
}
