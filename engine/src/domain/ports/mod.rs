pub mod alert_sink;
pub mod process_inspector;
pub mod restart_handler;

pub use alert_sink::{Alert, AlertSeverity, AlertSink};
pub use process_inspector::ProcessInspector;
pub use restart_handler::RestartHandler;
