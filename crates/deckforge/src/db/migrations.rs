//! Schema versioning for the job store.
//!
//! The applied version lives in SQLite's `user_version` header field.
//! `SCHEMA[n]` upgrades a database from version `n` to `n + 1`; each step
//! runs in its own transaction together with the version bump.

use rusqlite::Connection;

use super::error::DatabaseError;

const SCHEMA: &[&str] = &[include_str!("sql/001_conversion_jobs.sql")];

/// Version a fully migrated database reports.
pub const LATEST_VERSION: u32 = SCHEMA.len() as u32;

pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Brings the schema up to [`LATEST_VERSION`].
///
/// A database written by a newer build is refused rather than touched.
pub fn migrate(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;

    if current > LATEST_VERSION {
        return Err(DatabaseError::Migration {
            version: current,
            reason: format!("schema is newer than this build (v{})", LATEST_VERSION),
        });
    }

    for (index, sql) in SCHEMA.iter().enumerate().skip(current as usize) {
        let target = index as u32 + 1;
        log::info!("Upgrading job store schema to v{}", target);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql).map_err(|e| DatabaseError::Migration {
            version: target,
            reason: e.to_string(),
        })?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
    }

    Ok(())
}
