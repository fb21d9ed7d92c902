mod error;
pub mod tracing_setup;

pub use crate::error::{prettify_failure, Error, ErrorKind, ResultExt};
