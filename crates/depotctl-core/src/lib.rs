pub mod credentials;
pub mod error;
pub mod history;
pub mod installation;
pub mod markers;
pub mod operation;
pub mod profile;
pub mod session;
pub mod settings;

// Re-export common error type
pub use error::{AuthFailure, DepotError, Result};
