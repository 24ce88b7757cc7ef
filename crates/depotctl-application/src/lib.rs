//! Application layer for depotctl.
//!
//! This crate provides the use cases a UI drives: profile management with
//! corrupt-store recovery, and asynchronous upload/download operations that
//! report progress through an event channel.

pub mod backend;
pub mod events;
pub mod operation_service;
pub mod profile_service;

pub use backend::{ConsoleBackend, SimulatedBackend, ToolBackend};
pub use events::{EventSink, EventingPrompt};
pub use operation_service::{OperationHandle, OperationRequest, OperationService};
pub use profile_service::{OpenWarning, ProfileService};
