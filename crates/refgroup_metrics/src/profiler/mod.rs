// Allocation Profiling Infrastructure
pub mod memory_profiler;

pub use memory_profiler::{AllocationEvent, DeallocationEvent, MemoryProfiler, SiteMemoryStats};

/// Global allocation profiler shared by every group allocator in the process
static GLOBAL_PROFILER: once_cell::sync::Lazy<MemoryProfiler> =
    once_cell::sync::Lazy::new(MemoryProfiler::new);

/// Get the global allocation profiler
pub fn get_profiler() -> &'static MemoryProfiler {
    &GLOBAL_PROFILER
}
