//! Root of the `toybox-core` library.
//!
//! Runs an interactive terminal program under a pseudo-terminal, keeps a
//! bounded tail of its output and turns recognised output lines into
//! newline-delimited JSON domain events.

pub mod adapter;
pub mod command;
pub mod config;
pub mod event_log;
pub mod parser;
pub mod pipeline;
mod reader;
pub mod supervisor;

pub use adapter::AdapterSettings;
pub use adapter::AdapterSpec;
pub use config::ConfigError;
pub use config::SupervisorSettings;
pub use config::ToyboxConfig;
pub use event_log::DomainEvent;
pub use event_log::EventLog;
pub use pipeline::LinePipeline;
pub use reader::READ_CHUNK_BYTES;
pub use supervisor::SessionState;
pub use supervisor::StatusSnapshot;
pub use supervisor::Supervisor;
pub use supervisor::SupervisorError;
