//! unishim shared code
//!
//! Error types and constants used by the shim core and its test support
//! crate.

pub mod constants;
pub mod errors;

pub use errors::{ShimError, ShimResult};
