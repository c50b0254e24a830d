//! Built-in schema changes, in the order they were introduced
//!
//! Identifiers must keep the `migration_<N>` shape; the number is the schema
//! version the unit brings the database to.

use super::MigrationUnit;
use crate::config::TableNames;
use rusqlite::Connection;

pub fn registry() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit {
            identifier: "migration_1",
            apply: add_liquidity_column,
        },
        MigrationUnit {
            identifier: "migration_2",
            apply: index_merge_reads,
        },
    ]
}

/// Bifrost site rows gain a free-form liquidity column
fn add_liquidity_column(conn: &Connection, tables: &TableNames) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN liq TEXT;", tables.bifrost_site))
}

/// Latest-batch lookups order by `(created_at, batch_id)` on every raw table
fn index_merge_reads(conn: &Connection, tables: &TableNames) -> rusqlite::Result<()> {
    for table in [
        &tables.bifrost_site,
        &tables.bifrost_staking,
        &tables.hydration_data,
        &tables.hydration_price,
        &tables.pool_data,
    ] {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_latest ON {table}(created_at DESC, batch_id DESC);",
            table = table
        ))?;
    }
    Ok(())
}
