pub mod logging;
pub mod task;

pub use logging::{init_logging, register_to_tracing};
pub use task::TaskSet;
