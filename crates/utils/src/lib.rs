pub mod logger;

pub use logger::{init_logging, init_test_logging};
