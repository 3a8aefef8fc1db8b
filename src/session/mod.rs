//! Console session identity and prompt context

pub mod console;
mod id;

pub use console::{ConsoleSession, ExecutionContext, TableSelection, DEFAULT_TABLE_SOFT_LIMIT};
pub use id::SessionId;
