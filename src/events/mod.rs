pub mod log;

pub use log::{EventLog, LogCategory, LogEntry};
