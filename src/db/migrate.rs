use rusqlite::Connection;

use crate::error::CoreResult;

/// Schema applied to every physical database on first open. All services
/// share one schema; a database only ever populates the tables its owning
/// service writes.
pub fn migrate(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS brands (
            id          TEXT PRIMARY KEY,
            code        TEXT UNIQUE NOT NULL,
            name        TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at  INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS tenants (
            id          TEXT PRIMARY KEY,
            code        TEXT UNIQUE NOT NULL,
            name        TEXT NOT NULL,
            brand_id    TEXT,
            active      INTEGER NOT NULL DEFAULT 1,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at  INTEGER NOT NULL DEFAULT (unixepoch())
        );

        -- brand/tenant of '' means unscoped; UNIQUE needs non-null columns.
        CREATE TABLE IF NOT EXISTS config_entries (
            service          TEXT NOT NULL,
            brand            TEXT NOT NULL DEFAULT '',
            tenant           TEXT NOT NULL DEFAULT '',
            key              TEXT NOT NULL,
            value            TEXT NOT NULL,
            sensitive_paths  TEXT NOT NULL DEFAULT '[]',
            created_at       INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at       INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE(service, brand, tenant, key)
        );

        CREATE TABLE IF NOT EXISTS users (
            id                  TEXT PRIMARY KEY,
            tenant_id           TEXT NOT NULL,
            email               TEXT NOT NULL,
            phone               TEXT,
            password_hash       TEXT,
            roles               TEXT NOT NULL DEFAULT '[]',
            permissions         TEXT NOT NULL DEFAULT '[]',
            two_factor_secret   TEXT,
            two_factor_enabled  INTEGER NOT NULL DEFAULT 0,
            metadata            TEXT NOT NULL DEFAULT '{}',
            status              TEXT NOT NULL DEFAULT 'active',
            created_at          INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at          INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE(tenant_id, email)
        );

        CREATE TABLE IF NOT EXISTS roles (
            name          TEXT PRIMARY KEY,
            display_name  TEXT NOT NULL,
            description   TEXT NOT NULL DEFAULT '',
            permissions   TEXT NOT NULL DEFAULT '[]',
            inherits      TEXT NOT NULL DEFAULT '[]',
            priority      INTEGER NOT NULL DEFAULT 0,
            active        INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS ledger_accounts (
            id              TEXT PRIMARY KEY,
            owner_id        TEXT NOT NULL,
            owner_type      TEXT NOT NULL,
            subtype         TEXT NOT NULL,
            currency        TEXT NOT NULL,
            allow_negative  INTEGER NOT NULL DEFAULT 0,
            credit_limit    INTEGER,
            balance         INTEGER NOT NULL DEFAULT 0,
            tenant_id       TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE(owner_type, owner_id, subtype, currency)
        );

        CREATE TABLE IF NOT EXISTS ledger_transactions (
            id                TEXT PRIMARY KEY,
            tx_type           TEXT NOT NULL,
            from_account_id   TEXT NOT NULL,
            to_account_id     TEXT NOT NULL,
            amount            INTEGER NOT NULL,
            currency          TEXT NOT NULL,
            from_currency     TEXT,
            to_currency       TEXT,
            exchange_rate     REAL,
            converted_amount  INTEGER,
            description       TEXT,
            external_ref      TEXT,
            status            TEXT NOT NULL DEFAULT 'committed',
            metadata          TEXT NOT NULL DEFAULT '{}',
            created_at        INTEGER NOT NULL DEFAULT (unixepoch())
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_tx_external_ref
            ON ledger_transactions(external_ref) WHERE external_ref IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_ledger_tx_from ON ledger_transactions(from_account_id);
        CREATE INDEX IF NOT EXISTS idx_ledger_tx_to ON ledger_transactions(to_account_id);

        CREATE TABLE IF NOT EXISTS holds (
            id          TEXT PRIMARY KEY,
            account_id  TEXT NOT NULL,
            amount      INTEGER NOT NULL,
            currency    TEXT NOT NULL,
            reason      TEXT NOT NULL DEFAULT '',
            expires_at  INTEGER,
            status      TEXT NOT NULL DEFAULT 'active',
            created_at  INTEGER NOT NULL DEFAULT (unixepoch())
        );
        CREATE INDEX IF NOT EXISTS idx_holds_account ON holds(account_id, status);

        CREATE TABLE IF NOT EXISTS wallets (
            id                  TEXT PRIMARY KEY,
            user_id             TEXT NOT NULL,
            tenant_id           TEXT NOT NULL,
            currency            TEXT NOT NULL,
            category            TEXT NOT NULL DEFAULT 'main',
            status              TEXT NOT NULL DEFAULT 'active',
            allow_negative      INTEGER NOT NULL DEFAULT 0,
            credit_limit        INTEGER,
            lifetime_deposited  INTEGER NOT NULL DEFAULT 0,
            lifetime_withdrawn  INTEGER NOT NULL DEFAULT 0,
            lifetime_bonus      INTEGER NOT NULL DEFAULT 0,
            last_activity_at    INTEGER,
            created_at          INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at          INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE(user_id, currency, category)
        );

        CREATE TABLE IF NOT EXISTS bonus_templates (
            id                      TEXT PRIMARY KEY,
            tenant_id               TEXT NOT NULL,
            code                    TEXT NOT NULL,
            name                    TEXT NOT NULL,
            bonus_type              TEXT NOT NULL,
            domain                  TEXT NOT NULL DEFAULT 'payments',
            value_type              TEXT NOT NULL,
            value                   REAL NOT NULL,
            currency                TEXT NOT NULL,
            supported_currencies    TEXT,
            max_value               INTEGER,
            min_deposit             INTEGER,
            turnover_multiplier     REAL NOT NULL DEFAULT 0,
            activity_contributions  TEXT NOT NULL DEFAULT '{}',
            valid_from              INTEGER,
            valid_until             INTEGER,
            max_uses_total          INTEGER,
            max_uses_per_user       INTEGER,
            current_uses_total      INTEGER NOT NULL DEFAULT 0,
            eligibility             TEXT NOT NULL DEFAULT '{}',
            stackable               INTEGER NOT NULL DEFAULT 1,
            excluded_bonus_types    TEXT,
            requires_approval       INTEGER NOT NULL DEFAULT 0,
            approval_threshold      INTEGER,
            priority                INTEGER NOT NULL DEFAULT 0,
            is_active               INTEGER NOT NULL DEFAULT 1,
            expiration_days         INTEGER,
            cooldown_hours          INTEGER,
            position_multipliers    TEXT,
            referral_config         TEXT,
            created_at              INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at              INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE(tenant_id, code)
        );

        CREATE TABLE IF NOT EXISTS user_bonuses (
            id                      TEXT PRIMARY KEY,
            user_id                 TEXT NOT NULL,
            tenant_id               TEXT NOT NULL,
            template_id             TEXT NOT NULL,
            template_code           TEXT NOT NULL,
            bonus_type              TEXT NOT NULL,
            domain                  TEXT NOT NULL,
            status                  TEXT NOT NULL,
            currency                TEXT NOT NULL,
            original_value          INTEGER NOT NULL,
            current_value           INTEGER NOT NULL,
            turnover_required       INTEGER NOT NULL DEFAULT 0,
            turnover_progress       INTEGER NOT NULL DEFAULT 0,
            wallet_id               TEXT,
            trigger_transaction_id  TEXT,
            referrer_id             TEXT,
            referee_id              TEXT,
            qualified_at            INTEGER,
            claimed_at              INTEGER,
            activated_at            INTEGER,
            completed_at            INTEGER,
            converted_at            INTEGER,
            forfeited_at            INTEGER,
            expires_at              INTEGER NOT NULL,
            history                 TEXT NOT NULL DEFAULT '[]',
            metadata                TEXT NOT NULL DEFAULT '{}',
            created_at              INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at              INTEGER NOT NULL DEFAULT (unixepoch())
        );
        CREATE INDEX IF NOT EXISTS idx_user_bonuses_user ON user_bonuses(user_id, bonus_type);

        CREATE TABLE IF NOT EXISTS bonus_transactions (
            id                      TEXT PRIMARY KEY,
            user_bonus_id           TEXT NOT NULL,
            user_id                 TEXT NOT NULL,
            tx_type                 TEXT NOT NULL,
            amount                  INTEGER NOT NULL,
            balance_before          INTEGER NOT NULL,
            balance_after           INTEGER NOT NULL,
            turnover_before         INTEGER,
            turnover_after          INTEGER,
            turnover_contribution   INTEGER,
            activity_category       TEXT,
            related_transaction_id  TEXT,
            created_at              INTEGER NOT NULL DEFAULT (unixepoch())
        );
        CREATE INDEX IF NOT EXISTS idx_bonus_tx_bonus ON bonus_transactions(user_bonus_id);

        CREATE TABLE IF NOT EXISTS events (
            id              TEXT NOT NULL,
            event_type      TEXT NOT NULL,
            tenant_id       TEXT NOT NULL,
            user_id         TEXT,
            payload         TEXT NOT NULL DEFAULT '{}',
            correlation_id  TEXT,
            occurred_at     INTEGER NOT NULL,
            PRIMARY KEY (event_type, id)
        );
        CREATE INDEX IF NOT EXISTS idx_events_tenant ON events(tenant_id, occurred_at);

        CREATE TABLE IF NOT EXISTS webhook_subscriptions (
            id           TEXT PRIMARY KEY,
            tenant_id    TEXT NOT NULL,
            url          TEXT NOT NULL,
            event_types  TEXT NOT NULL DEFAULT '[]',
            secret       TEXT NOT NULL,
            active       INTEGER NOT NULL DEFAULT 1,
            headers      TEXT,
            created_at   INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS webhook_deliveries (
            id               TEXT PRIMARY KEY,
            subscription_id  TEXT NOT NULL,
            event_id         TEXT NOT NULL,
            event_type       TEXT NOT NULL,
            tenant_id        TEXT NOT NULL,
            url              TEXT NOT NULL,
            body             TEXT NOT NULL,
            secret           TEXT NOT NULL,
            headers          TEXT,
            attempts         INTEGER NOT NULL DEFAULT 0,
            status           TEXT NOT NULL DEFAULT 'pending',
            last_error       TEXT,
            next_attempt_at  INTEGER,
            created_at       INTEGER NOT NULL DEFAULT (unixepoch())
        );
        CREATE INDEX IF NOT EXISTS idx_deliveries_status ON webhook_deliveries(status);

        CREATE TABLE IF NOT EXISTS rate_overrides (
            from_currency  TEXT NOT NULL,
            to_currency    TEXT NOT NULL,
            rate           REAL NOT NULL,
            updated_at     INTEGER NOT NULL DEFAULT (unixepoch()),
            PRIMARY KEY (from_currency, to_currency)
        );

        CREATE TABLE IF NOT EXISTS service_config (
            key    TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
