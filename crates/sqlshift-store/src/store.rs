use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlshift_common::{Clock, Error, Result, SystemClock};
use tracing::{info, warn};

use crate::entry::{slugify, CreatedMigration, Direction, MigrationEntry};

/// Filesystem store for migration scripts.
///
/// One subdirectory per migration, named `{id}-{slug}`, each holding a
/// forward script (`+.sql`) and a backward script (`-.sql`). The store is
/// the only writer of these files; they are immutable once created.
pub struct MigrationStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl MigrationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock, for deterministic migration ids.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Author a new migration: a fresh timestamp id, the sanitized slug, and
    /// the two script files under `{id}-{slug}/`.
    ///
    /// With `dry_run` set, validates the name and computes the descriptor
    /// without touching the filesystem.
    pub fn create(
        &self,
        name: &str,
        up_sql: &str,
        down_sql: &str,
        dry_run: bool,
    ) -> Result<CreatedMigration> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("migration name cannot be blank".into()));
        }
        let slug = slugify(trimmed);
        if slug.is_empty() {
            return Err(Error::InvalidInput(format!(
                "migration name {trimmed:?} contains no usable characters"
            )));
        }

        let id = self.clock.now().format("%Y%m%d%H%M%S").to_string();
        let dir_name = format!("{id}-{slug}");
        let created = CreatedMigration {
            up: format!("{dir_name}/{}", Direction::Up.script_file()),
            down: format!("{dir_name}/{}", Direction::Down.script_file()),
            name: dir_name.clone(),
        };

        if dry_run {
            info!("dry run: would create migration {dir_name}");
            return Ok(created);
        }

        let dir = self.root.join(&dir_name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(Direction::Up.script_file()), up_sql)?;
        fs::write(dir.join(Direction::Down.script_file()), down_sql)?;
        info!("created migration {dir_name}");

        Ok(created)
    }

    /// All migration entries under the root, sorted ascending by id.
    ///
    /// A missing root is first use: it is created and an empty list is
    /// returned. Directory entries that do not match the `{id}-{slug}` shape
    /// are skipped with a warning.
    pub fn list_entries(&self) -> Result<Vec<MigrationEntry>> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dent in fs::read_dir(&self.root)? {
            let dent = dent?;
            if !dent.file_type()?.is_dir() {
                continue;
            }
            let file_name = dent.file_name();
            let Some(dir_name) = file_name.to_str() else {
                warn!("skipping non-UTF-8 directory name under {}", self.root.display());
                continue;
            };
            match MigrationEntry::parse(dir_name) {
                Some(entry) => entries.push(entry),
                None => warn!("skipping {dir_name}: not a migration directory"),
            }
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    /// Read the script content for one direction of a migration.
    pub fn load_script(&self, entry: &MigrationEntry, direction: Direction) -> Result<String> {
        let path = self.root.join(&entry.dir_name).join(direction.script_file());
        match fs::read_to_string(&path) {
            Ok(sql) => Ok(sql),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(format!(
                "script {} does not exist",
                entry.script_id(direction)
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
