//! Terminal presentation: status rows, progress snapshots and renderers.

pub mod renderer;
pub mod snapshot;
pub mod status;

pub use renderer::{InlineRenderer, PlainRenderer, Renderer};
pub use snapshot::SnapshotModel;
pub use status::{TaskModel, TaskStatus};
