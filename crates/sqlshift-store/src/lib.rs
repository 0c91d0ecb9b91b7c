pub mod entry;
pub mod store;

pub use entry::{CreatedMigration, Direction, MigrationEntry};
pub use store::MigrationStore;
