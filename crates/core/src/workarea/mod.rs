//! Working area: tracked local files, their persisted records, and the
//! status/update/commit/diff state machine.

pub mod engine;
pub mod record;
pub mod tools;

pub use engine::{CommitOutcome, ItemState, SyncSession, UpdateOutcome};
pub use record::{Record, WorkArea};
pub use tools::{Diff3MergeTool, DiffTool, Merged};
