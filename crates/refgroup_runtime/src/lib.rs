pub mod config;
pub mod error;
pub mod ffi;
pub mod memory;

pub use error::{Error, Result};
pub use memory::{Header, Managed, Shared};
