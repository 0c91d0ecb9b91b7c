use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlshift_common::{Clock, Error, Result, SystemClock};
use sqlshift_store::{CreatedMigration, Direction, MigrationEntry, MigrationStore};
use tracing::info;

use crate::executor::Executor;
use crate::ledger::{AppliedRecord, LedgerOp};

/// The migration engine: computes pending vs. applied sets and moves
/// individual migrations between them atomically.
///
/// Each migration is a two-state machine, `Pending <-> Applied`. A
/// transition is one script execution plus its ledger mutation inside a
/// single database transaction, so a crash mid-call leaves the migration in
/// its prior state. Nothing prevents two engines from racing on the same
/// store and database; single-writer-at-a-time is an operational assumption.
pub struct Engine<E: Executor> {
    store: MigrationStore,
    executor: E,
    clock: Arc<dyn Clock>,
    dry_run: bool,
}

impl<E: Executor> Engine<E> {
    /// Build an engine and make sure the ledger table exists.
    pub fn new(store: MigrationStore, executor: E) -> Result<Self> {
        executor.ensure_ledger()?;
        Ok(Self {
            store,
            executor,
            clock: Arc::new(SystemClock),
            dry_run: false,
        })
    }

    /// Replace the clock used for ledger timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Toggle dry-run mode: scripts are validated but never executed, and
    /// neither the filesystem nor the ledger is mutated.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Author a new migration in the store.
    pub fn create(&self, name: &str, up_sql: &str, down_sql: &str) -> Result<CreatedMigration> {
        self.store.create(name, up_sql, down_sql, self.dry_run)
    }

    /// Store entries not yet recorded in the ledger, ascending by id.
    ///
    /// Recomputed from both sources on every call.
    pub fn pending_migrations(&self) -> Result<Vec<MigrationEntry>> {
        let applied: HashSet<String> = self
            .executor
            .list_applied()?
            .into_iter()
            .map(|r| r.id)
            .collect();
        // list_entries is already sorted ascending by id
        let pending = self
            .store
            .list_entries()?
            .into_iter()
            .filter(|e| !applied.contains(&e.id))
            .collect();
        Ok(pending)
    }

    /// Ledger records, ascending by id.
    pub fn applied_migrations(&self) -> Result<Vec<AppliedRecord>> {
        self.executor.list_applied()
    }

    /// Apply pending migrations in ascending order, optionally only up to
    /// (and including) the first pending entry matching `target`.
    ///
    /// A target matches if it equals the entry's id or is a prefix of its
    /// directory name; an unmatched target is `NotFound`. Earlier pending
    /// migrations are always applied before a later target. Returns the
    /// applied script identifiers in application order; an empty pending set
    /// is a normal outcome, not an error. On failure the error propagates
    /// and migrations applied earlier in the batch stay applied.
    pub fn up(&self, target: Option<&str>) -> Result<Vec<String>> {
        let mut pending = self.pending_migrations()?;

        if let Some(target) = target {
            let pos = pending
                .iter()
                .position(|e| e.id == target || e.dir_name.starts_with(target))
                .ok_or_else(|| {
                    Error::NotFound(format!("no pending migration matches {target:?}"))
                })?;
            pending.truncate(pos + 1);
        }

        let mut applied = Vec::with_capacity(pending.len());
        for entry in &pending {
            applied.push(self.apply_one(entry, Direction::Up)?);
        }
        Ok(applied)
    }

    /// Revert the `steps` most recently applied migrations, newest first.
    ///
    /// `steps < 1` reverts nothing (guards against an accidental zero
    /// argument); `steps` beyond the applied count is clamped. A ledger id
    /// with no migration directory is a `Consistency` error, raised before
    /// any reversion runs. Returns the reverted script identifiers in the
    /// order reverted; on failure, reversions already committed stay
    /// reverted.
    pub fn rollback(&self, steps: i64) -> Result<Vec<String>> {
        if steps < 1 {
            return Ok(Vec::new());
        }

        let applied = self.executor.list_applied()?;
        let steps = (steps as usize).min(applied.len());
        if steps == 0 {
            return Ok(Vec::new());
        }

        let entries = self.store.list_entries()?;
        let by_id: HashMap<&str, &MigrationEntry> =
            entries.iter().map(|e| (e.id.as_str(), e)).collect();

        // resolve every selected record before reverting anything
        let mut selected = Vec::with_capacity(steps);
        for record in applied.iter().rev().take(steps) {
            let entry = by_id.get(record.id.as_str()).ok_or_else(|| {
                Error::Consistency(format!(
                    "ledger entry {} ({}) has no migration directory",
                    record.id, record.name
                ))
            })?;
            selected.push(*entry);
        }

        let mut reverted = Vec::with_capacity(steps);
        for entry in selected {
            reverted.push(self.apply_one(entry, Direction::Down)?);
        }
        Ok(reverted)
    }

    /// The atomic primitive: run one script in one direction.
    ///
    /// The script is always loaded and prepared, dry-run included, so
    /// authoring mistakes surface immediately. In real mode the execution
    /// and the ledger mutation share one transaction.
    fn apply_one(&self, entry: &MigrationEntry, direction: Direction) -> Result<String> {
        let script = entry.script_id(direction);
        let sql = self.store.load_script(entry, direction)?;

        if self.dry_run {
            self.executor.validate(&script, &sql)?;
            info!("dry run: validated {script}");
            return Ok(script);
        }

        let op = match direction {
            Direction::Up => LedgerOp::Insert {
                id: entry.id.clone(),
                name: entry.name.clone(),
                applied_at: self.clock.now(),
            },
            Direction::Down => LedgerOp::Delete {
                id: entry.id.clone(),
            },
        };
        self.executor.apply(&script, &sql, &op)?;
        info!("applied {script}");
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SqliteExecutor;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::fs;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tempfile::TempDir;

    /// Clock that advances by one second per call, so consecutive `create`
    /// calls get distinct ids.
    struct SteppingClock {
        base: DateTime<Utc>,
        ticks: AtomicI64,
    }

    impl SteppingClock {
        fn new() -> Self {
            Self {
                base: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                ticks: AtomicI64::new(0),
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + Duration::seconds(self.ticks.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn test_engine(dir: &TempDir) -> Engine<SqliteExecutor> {
        let clock = Arc::new(SteppingClock::new());
        let store = MigrationStore::new(dir.path().join("migrations")).with_clock(clock.clone());
        Engine::new(store, SqliteExecutor::in_memory().unwrap())
            .unwrap()
            .with_clock(clock)
    }

    fn create_users_and_posts(engine: &Engine<SqliteExecutor>) -> (String, String) {
        let users = engine
            .create(
                "add users",
                "CREATE TABLE users(id INTEGER PRIMARY KEY);",
                "DROP TABLE users;",
            )
            .unwrap();
        let posts = engine
            .create(
                "add posts",
                "CREATE TABLE posts(id INTEGER PRIMARY KEY);",
                "DROP TABLE posts;",
            )
            .unwrap();
        (users.name, posts.name)
    }

    #[test]
    fn pending_is_entries_minus_applied() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, posts) = create_users_and_posts(&engine);

        let pending: Vec<_> = engine
            .pending_migrations()
            .unwrap()
            .into_iter()
            .map(|e| e.dir_name)
            .collect();
        assert_eq!(pending, vec![users.clone(), posts.clone()]);

        engine.up(Some(&users)).unwrap();
        let pending: Vec<_> = engine
            .pending_migrations()
            .unwrap()
            .into_iter()
            .map(|e| e.dir_name)
            .collect();
        assert_eq!(pending, vec![posts]);
    }

    #[test]
    fn up_applies_all_pending_in_ascending_order() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, posts) = create_users_and_posts(&engine);

        let applied = engine.up(None).unwrap();
        assert_eq!(applied, vec![format!("{users}/+.sql"), format!("{posts}/+.sql")]);

        let records = engine.applied_migrations().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "add-users");
        assert_eq!(records[1].name, "add-posts");
    }

    #[test]
    fn up_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        create_users_and_posts(&engine);

        assert_eq!(engine.up(None).unwrap().len(), 2);
        assert!(engine.up(None).unwrap().is_empty());
    }

    #[test]
    fn up_with_target_stops_inclusively() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, posts) = create_users_and_posts(&engine);

        let applied = engine.up(Some(&users)).unwrap();
        assert_eq!(applied, vec![format!("{users}/+.sql")]);

        let pending: Vec<_> = engine
            .pending_migrations()
            .unwrap()
            .into_iter()
            .map(|e| e.dir_name)
            .collect();
        assert_eq!(pending, vec![posts]);
    }

    #[test]
    fn up_target_matches_id_and_directory_prefix() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, _) = create_users_and_posts(&engine);

        // bare id
        let id = &users[..14];
        assert_eq!(engine.up(Some(id)).unwrap().len(), 1);
        engine.rollback(1).unwrap();

        // prefix of the composite directory name
        assert_eq!(engine.up(Some(&users[..18])).unwrap().len(), 1);
    }

    #[test]
    fn up_applies_earlier_pending_before_a_later_target() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, posts) = create_users_and_posts(&engine);

        let applied = engine.up(Some(&posts)).unwrap();
        assert_eq!(applied, vec![format!("{users}/+.sql"), format!("{posts}/+.sql")]);
    }

    #[test]
    fn up_with_unknown_target_is_not_found() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, _) = create_users_and_posts(&engine);

        let err = engine.up(Some("99990101000000")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // an already-applied target is also not found in the pending set
        engine.up(None).unwrap();
        let err = engine.up(Some(&users)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn rollback_reverts_newest_first() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, posts) = create_users_and_posts(&engine);
        engine.up(None).unwrap();

        let reverted = engine.rollback(2).unwrap();
        assert_eq!(reverted, vec![format!("{posts}/-.sql"), format!("{users}/-.sql")]);
        assert!(engine.applied_migrations().unwrap().is_empty());
        assert_eq!(engine.pending_migrations().unwrap().len(), 2);
    }

    #[test]
    fn rollback_clamps_steps_to_applied_count() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        create_users_and_posts(&engine);
        engine.up(None).unwrap();

        let reverted = engine.rollback(100).unwrap();
        assert_eq!(reverted.len(), 2);
        assert!(engine.applied_migrations().unwrap().is_empty());
    }

    #[test]
    fn rollback_guards_zero_and_negative_steps() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        create_users_and_posts(&engine);
        engine.up(None).unwrap();

        assert!(engine.rollback(0).unwrap().is_empty());
        assert!(engine.rollback(-1).unwrap().is_empty());
        assert_eq!(engine.applied_migrations().unwrap().len(), 2);
    }

    #[test]
    fn rollback_with_nothing_applied_is_empty() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        create_users_and_posts(&engine);

        assert!(engine.rollback(1).unwrap().is_empty());
    }

    #[test]
    fn rollback_flags_ledger_entry_without_directory() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (_users, posts) = create_users_and_posts(&engine);
        engine.up(None).unwrap();

        fs::remove_dir_all(dir.path().join("migrations").join(&posts)).unwrap();

        let err = engine.rollback(1).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        // nothing was reverted
        assert_eq!(engine.applied_migrations().unwrap().len(), 2);
    }

    #[test]
    fn rollback_resolves_every_record_before_reverting_any() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, _) = create_users_and_posts(&engine);
        engine.up(None).unwrap();

        // the OLDER directory is missing; rollback(2) must fail before it
        // reverts the newer migration
        fs::remove_dir_all(dir.path().join("migrations").join(&users)).unwrap();

        let err = engine.rollback(2).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        assert_eq!(engine.applied_migrations().unwrap().len(), 2);
    }

    #[test]
    fn up_stops_at_first_failing_migration() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        engine
            .create(
                "add users",
                "CREATE TABLE users(id INTEGER PRIMARY KEY);",
                "DROP TABLE users;",
            )
            .unwrap();
        engine
            .create("broken", "CREAT TABLE oops(id);", "")
            .unwrap();
        engine
            .create(
                "add posts",
                "CREATE TABLE posts(id INTEGER PRIMARY KEY);",
                "DROP TABLE posts;",
            )
            .unwrap();

        let err = engine.up(None).unwrap_err();
        assert!(matches!(err, Error::ScriptPreparation { .. }));

        // the first migration stayed applied, the third was never attempted
        let applied = engine.applied_migrations().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name, "add-users");
    }

    #[test]
    fn dry_run_up_validates_without_mutating() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, posts) = create_users_and_posts(&engine);

        let engine = engine.dry_run(true);
        let applied = engine.up(None).unwrap();
        assert_eq!(applied, vec![format!("{users}/+.sql"), format!("{posts}/+.sql")]);

        // ledger untouched, both migrations still pending
        let engine = engine.dry_run(false);
        assert!(engine.applied_migrations().unwrap().is_empty());
        assert_eq!(engine.pending_migrations().unwrap().len(), 2);
    }

    #[test]
    fn dry_run_still_flags_broken_scripts() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        engine
            .create("broken", "CREAT TABLE oops(id);", "")
            .unwrap();

        let err = engine.dry_run(true).up(None).unwrap_err();
        assert!(matches!(err, Error::ScriptPreparation { .. }));
    }

    #[test]
    fn dry_run_still_flags_missing_scripts() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, _) = create_users_and_posts(&engine);

        fs::remove_file(
            dir.path()
                .join("migrations")
                .join(&users)
                .join("+.sql"),
        )
        .unwrap();

        let err = engine.dry_run(true).up(None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn round_trip_restores_pending_state() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let (users, _) = create_users_and_posts(&engine);

        engine.up(Some(&users)).unwrap();
        assert_eq!(engine.applied_migrations().unwrap().len(), 1);

        let reverted = engine.rollback(1).unwrap();
        assert_eq!(reverted, vec![format!("{users}/-.sql")]);
        assert!(engine.applied_migrations().unwrap().is_empty());
        assert_eq!(engine.pending_migrations().unwrap().len(), 2);
    }
}
