//! Intrusive reference counting for groups of objects.
//!
//! A group is a contiguous run of same-sized objects, each starting with a
//! [`Header`]. The first object leads the group and owns its reference count;
//! the whole group is torn down, last member first, when the last reference to
//! any member is dropped.
//!
//! [`Shared<T>`] is the typed entry point; the raw operations live in
//! [`memory`] and are exported to C through [`ffi`].

pub use refgroup_metrics::{MemoryProfiler, get_profiler};
pub use refgroup_runtime::config::{ConfigManager, RuntimeConfig, get_config};
pub use refgroup_runtime::{Error, Header, Managed, Result, Shared, ffi, memory};
pub use utils::logger::init_logging;
