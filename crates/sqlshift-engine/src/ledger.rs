use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the applied-migrations table inside the target database.
pub const LEDGER_TABLE: &str = "_migrations";

/// Idempotent ledger schema. The engine creates this table on first use and
/// never drops it.
pub const ENSURE_LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Applied records sorted ascending by id, which for timestamp ids is also
/// chronological application order.
pub const LIST_APPLIED_SQL: &str =
    "SELECT id, name, applied_at FROM _migrations ORDER BY id ASC";

/// One row of the ledger: a migration that has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    pub id: String,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// The ledger mutation paired with a script execution.
///
/// Runs inside the same transaction as the script it belongs to; the two
/// commit or roll back together.
#[derive(Debug, Clone)]
pub enum LedgerOp {
    /// Record a forward application. Plain INSERT: a duplicate id is a
    /// primary-key violation, which the engine never produces because it
    /// only applies entries absent from the applied set.
    Insert {
        id: String,
        name: String,
        applied_at: DateTime<Utc>,
    },
    /// Remove the record for a reverted migration. Deleting an absent id is
    /// a no-op, not an error.
    Delete { id: String },
}

/// Parse a ledger timestamp. Rows written by the engine are RFC 3339; rows
/// defaulted by SQLite are `YYYY-MM-DD HH:MM:SS`.
pub fn parse_applied_at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}
