use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};
use sqlshift_common::{Error, Result};
use tracing::info;

use crate::ledger::{
    parse_applied_at, AppliedRecord, LedgerOp, ENSURE_LEDGER_SQL, LEDGER_TABLE, LIST_APPLIED_SQL,
};

/// Runs migration scripts against the target database.
///
/// The engine only talks to the database through this trait, so the driver
/// can be swapped without touching the selection logic.
pub trait Executor {
    /// Idempotently create the applied-ledger table if absent.
    fn ensure_ledger(&self) -> Result<()>;

    /// All ledger rows, sorted ascending by id.
    fn list_applied(&self) -> Result<Vec<AppliedRecord>>;

    /// Prepare every statement of `sql` without executing anything.
    ///
    /// Used by dry-run so authoring errors surface before a real apply.
    fn validate(&self, script: &str, sql: &str) -> Result<()>;

    /// Execute `sql` and run the paired ledger op in one transaction.
    ///
    /// Each statement is prepared immediately before it runs, so syntax
    /// errors are caught as preparation failures here too. Any failure rolls
    /// the whole transaction back; the script identifier is attached to the
    /// error for diagnostics.
    fn apply(&self, script: &str, sql: &str, op: &LedgerOp) -> Result<()>;
}

/// SQLite implementation over a single synchronous connection.
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening target database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("executor lock poisoned".into()))
    }
}

impl Executor for SqliteExecutor {
    fn ensure_ledger(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(ENSURE_LEDGER_SQL)
            .map_err(|e| Error::Database(format!("failed to create {LEDGER_TABLE} table: {e}")))?;
        Ok(())
    }

    fn list_applied(&self) -> Result<Vec<AppliedRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(LIST_APPLIED_SQL)
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    applied_at: parse_applied_at(&row.get::<_, String>(2)?),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            records
                .push(row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?);
        }
        Ok(records)
    }

    fn validate(&self, script: &str, sql: &str) -> Result<()> {
        let conn = self.connection()?;
        for stmt in split_statements(sql) {
            conn.prepare(&stmt)
                .map_err(|e| Error::ScriptPreparation {
                    script: script.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn apply(&self, script: &str, sql: &str, op: &LedgerOp) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to start transaction: {e}")))?;

        for stmt_sql in split_statements(sql) {
            let mut stmt = tx.prepare(&stmt_sql).map_err(|e| Error::ScriptPreparation {
                script: script.to_string(),
                message: e.to_string(),
            })?;
            stmt.execute([]).map_err(|e| Error::Execution {
                script: script.to_string(),
                message: e.to_string(),
            })?;
        }

        let ledger_result = match op {
            LedgerOp::Insert {
                id,
                name,
                applied_at,
            } => tx.execute(
                "INSERT INTO _migrations (id, name, applied_at) VALUES (?1, ?2, ?3)",
                params![id, name, applied_at.to_rfc3339()],
            ),
            LedgerOp::Delete { id } => {
                tx.execute("DELETE FROM _migrations WHERE id = ?1", params![id])
            }
        };
        ledger_result.map_err(|e| Error::Execution {
            script: script.to_string(),
            message: format!("ledger update failed: {e}"),
        })?;

        // a failed commit leaves the transaction rolled back on drop
        tx.commit().map_err(|e| Error::Execution {
            script: script.to_string(),
            message: format!("commit failed: {e}"),
        })?;
        Ok(())
    }
}

/// Split a script into individual statements on top-level semicolons.
///
/// Quote-aware: semicolons inside single/double-quoted strings or after a
/// `--` line comment do not split. Blank pieces are dropped.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            '-' if !in_single && !in_double && chars.peek() == Some(&'-') => {
                // line comment: swallow to end of line without splitting
                current.push(c);
                for c in chars.by_ref() {
                    current.push(c);
                    if c == '\n' {
                        break;
                    }
                }
            }
            ';' if !in_single && !in_double => {
                if !current.trim().is_empty() {
                    statements.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}
