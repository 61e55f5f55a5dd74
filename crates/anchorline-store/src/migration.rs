//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration is a SQL batch that
//! transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// Idempotent: running it against an up-to-date database is a no-op.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: blocks, ledger events and the registry.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Content-addressed blocks
        CREATE TABLE blocks (
            address BLOB PRIMARY KEY,         -- 32 bytes, Blake3 of payload
            payload BLOB NOT NULL,
            stored_at INTEGER NOT NULL        -- local time of first put (Unix ms)
        );

        -- Shape metadata, keyed by block address
        CREATE TABLE block_shapes (
            address BLOB PRIMARY KEY REFERENCES blocks(address) ON DELETE CASCADE,
            shape BLOB NOT NULL               -- CBOR ShapeMetadata
        );

        -- Append-only product event log; seq is append order
        CREATE TABLE ledger_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL,
            kind INTEGER NOT NULL,            -- 0=data_added, 1=party_associated
            address BLOB,                     -- data_added only
            timestamp INTEGER,                -- data_added only, Unix us
            party_id TEXT,                    -- party_associated only
            anchor_key BLOB UNIQUE,           -- data_added only
            appended_at INTEGER NOT NULL
        );

        -- Registry
        CREATE TABLE contracts (
            contract_id TEXT PRIMARY KEY,
            deployed_at INTEGER NOT NULL
        );

        CREATE TABLE products (
            label TEXT PRIMARY KEY,
            added_at INTEGER NOT NULL
        );

        CREATE TABLE parties (
            party_id TEXT PRIMARY KEY,
            contact_info TEXT NOT NULL,
            added_at INTEGER NOT NULL
        );

        CREATE TABLE party_products (
            party_id TEXT NOT NULL REFERENCES parties(party_id),
            label TEXT NOT NULL REFERENCES products(label),
            PRIMARY KEY (party_id, label)
        );

        CREATE INDEX idx_ledger_events_label_seq ON ledger_events(label, seq);
        "#,
    )?;

    Ok(())
}

/// Migration v2: shape metadata moves from blocks onto data anchors.
///
/// Shapes stored per block cannot be attributed to a single anchor, so they
/// are dropped rather than copied.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE ledger_events ADD COLUMN shape BLOB;  -- data_added only, CBOR ShapeMetadata
        DROP TABLE block_shapes;
        "#,
    )?;

    Ok(())
}

pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
