pub mod context;
pub mod process_manager;
pub mod snapshot;

pub use context::SupervisorContext;
pub use process_manager::{ManagerCommand, ProcessManager};
pub use snapshot::StatusSnapshot;
