use serde::{Deserialize, Serialize};

/// Length of a migration id: `YYYYMMDDHHMMSS`.
pub const ID_LEN: usize = 14;

/// Which of a migration's two scripts to work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// File name of the script for this direction inside a migration directory.
    pub fn script_file(&self) -> &'static str {
        match self {
            Direction::Up => "+.sql",
            Direction::Down => "-.sql",
        }
    }
}

/// One migration unit on disk, identified by its `{id}-{slug}` directory.
///
/// The id is a 14-digit UTC timestamp, so lexicographic order of ids is
/// chronological order is application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEntry {
    pub id: String,
    pub name: String,
    pub dir_name: String,
}

impl MigrationEntry {
    /// Parse a directory name of the form `{14 digits}-{slug}`.
    ///
    /// The id is a fixed-width prefix, never a delimiter split, so the slug
    /// may itself contain dashes without ambiguity.
    pub fn parse(dir_name: &str) -> Option<Self> {
        let (id, rest) = dir_name.split_at_checked(ID_LEN)?;
        if !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let slug = rest.strip_prefix('-')?;
        if slug.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            name: slug.to_string(),
            dir_name: dir_name.to_string(),
        })
    }

    /// Relative script identifier, e.g. `20240101000000-add-users/+.sql`.
    pub fn script_id(&self, direction: Direction) -> String {
        format!("{}/{}", self.dir_name, direction.script_file())
    }
}

/// Descriptor returned by `create`: the new directory name and the relative
/// identifiers of its two scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedMigration {
    pub name: String,
    pub up: String,
    pub down: String,
}

/// Sanitize a human-supplied migration name into a directory-safe slug:
/// lowercase, every run of non-alphanumeric characters collapsed to a single
/// dash, no leading or trailing dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut gap = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if gap && !slug.is_empty() {
                slug.push('-');
            }
            gap = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            gap = true;
        }
    }
    slug
}
