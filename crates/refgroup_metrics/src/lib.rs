//! Allocation tracking for reference-counted object groups

pub mod profiler;

pub use profiler::{MemoryProfiler, SiteMemoryStats, get_profiler};
