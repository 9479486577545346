//! Shared utilities: error taxonomy and code formatting.

pub mod errors;
pub mod pretty;

pub use errors::{FlowError, FlowResult};
pub use pretty::CodeFormatter;
