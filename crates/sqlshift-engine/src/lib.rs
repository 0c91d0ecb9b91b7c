pub mod engine;
pub mod executor;
pub mod ledger;

pub use engine::Engine;
pub use executor::{Executor, SqliteExecutor};
pub use ledger::{AppliedRecord, LedgerOp};
