//! Memory profiling for tracking group block allocations and releases

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// Group block allocation event
#[derive(Debug, Clone)]
pub struct AllocationEvent {
    /// Block address
    pub ptr: usize,

    /// Size in bytes
    pub size: usize,

    /// Number of objects carved out of the block
    pub objects: usize,

    /// Allocation site label (usually the payload type name)
    pub site: String,

    /// Timestamp (milliseconds since epoch)
    pub timestamp_ms: u64,
}

/// Group block release event
#[derive(Debug, Clone)]
pub struct DeallocationEvent {
    /// Block address
    pub ptr: usize,

    /// Size in bytes, if the block was known to the profiler
    pub size: Option<usize>,

    /// Timestamp (milliseconds since epoch)
    pub timestamp_ms: u64,
}

/// Memory usage statistics for one allocation site
#[derive(Debug, Clone, Default)]
pub struct SiteMemoryStats {
    /// Site label
    pub site: String,

    /// Total bytes allocated
    pub total_allocated: usize,

    /// Total bytes released
    pub total_deallocated: usize,

    /// Current bytes in use
    pub current_usage: usize,

    /// Peak memory usage
    pub peak_usage: usize,

    /// Number of blocks allocated
    pub allocation_count: u64,

    /// Number of blocks released
    pub deallocation_count: u64,

    /// Objects per block histogram (group size bucket -> count)
    pub group_histogram: HashMap<usize, u64>,
}

impl SiteMemoryStats {
    pub fn new(site: String) -> Self {
        Self {
            site,
            ..Default::default()
        }
    }

    /// Record a block allocation
    pub fn record_allocation(&mut self, size: usize, objects: usize) {
        self.total_allocated += size;
        self.current_usage += size;
        self.allocation_count += 1;

        if self.current_usage > self.peak_usage {
            self.peak_usage = self.current_usage;
        }

        // Bucket by power of 2
        let bucket = objects.max(1).next_power_of_two();
        *self.group_histogram.entry(bucket).or_insert(0) += 1;
    }

    /// Record a block release
    pub fn record_deallocation(&mut self, size: usize) {
        self.total_deallocated += size;
        self.current_usage = self.current_usage.saturating_sub(size);
        self.deallocation_count += 1;
    }

    /// Blocks allocated but not yet released
    pub fn outstanding(&self) -> u64 {
        self.allocation_count
            .saturating_sub(self.deallocation_count)
    }

    /// Check if the site looks like it is leaking groups
    pub fn potential_leak(&self) -> bool {
        let leak_threshold = 0.8; // 80% of blocks never released
        let outstanding = self.outstanding();

        outstanding as f64 / self.allocation_count.max(1) as f64 > leak_threshold
            && self.current_usage > 1024 * 1024 // At least 1MB outstanding
    }

    /// Get average block size
    pub fn avg_allocation_size(&self) -> f64 {
        if self.allocation_count == 0 {
            0.0
        } else {
            self.total_allocated as f64 / self.allocation_count as f64
        }
    }
}

/// Tracks live group blocks, per-site statistics and a bounded event history
pub struct MemoryProfiler {
    /// Per-site memory statistics
    site_stats: RwLock<HashMap<String, SiteMemoryStats>>,

    /// Live blocks (ptr -> (size, site))
    active_allocations: RwLock<HashMap<usize, (usize, String)>>,

    /// Allocation history (for debugging)
    allocation_history: RwLock<VecDeque<AllocationEvent>>,

    /// Release history (for debugging)
    deallocation_history: RwLock<VecDeque<DeallocationEvent>>,

    /// Maximum history size per event kind
    max_history_size: RwLock<usize>,
}

impl MemoryProfiler {
    pub fn new() -> Self {
        Self::with_history_limit(10_000)
    }

    pub fn with_history_limit(max_history_size: usize) -> Self {
        Self {
            site_stats: RwLock::new(HashMap::new()),
            active_allocations: RwLock::new(HashMap::new()),
            allocation_history: RwLock::new(VecDeque::new()),
            deallocation_history: RwLock::new(VecDeque::new()),
            max_history_size: RwLock::new(max_history_size),
        }
    }

    /// Change the history bound; older events are dropped first
    pub fn set_max_history_size(&self, max_history_size: usize) {
        *self.max_history_size.write() = max_history_size;
        truncate_front(&mut self.allocation_history.write(), max_history_size);
        truncate_front(&mut self.deallocation_history.write(), max_history_size);
    }

    /// Record a block allocation
    pub fn record_allocation(&self, ptr: usize, size: usize, objects: usize, site: &str) {
        let mut stats = self.site_stats.write();
        stats
            .entry(site.to_string())
            .or_insert_with(|| SiteMemoryStats::new(site.to_string()))
            .record_allocation(size, objects);
        drop(stats);

        self.active_allocations
            .write()
            .insert(ptr, (size, site.to_string()));

        let limit = *self.max_history_size.read();
        let mut history = self.allocation_history.write();
        history.push_back(AllocationEvent {
            ptr,
            size,
            objects,
            site: site.to_string(),
            timestamp_ms: current_time_ms(),
        });
        truncate_front(&mut history, limit);
    }

    /// Record a block release
    pub fn record_deallocation(&self, ptr: usize) {
        let released = self.active_allocations.write().remove(&ptr);
        let size = released.as_ref().map(|(size, _)| *size);

        if let Some((size, site)) = released {
            let mut stats = self.site_stats.write();
            if let Some(site_stats) = stats.get_mut(&site) {
                site_stats.record_deallocation(size);
            }
        }

        let limit = *self.max_history_size.read();
        let mut history = self.deallocation_history.write();
        history.push_back(DeallocationEvent {
            ptr,
            size,
            timestamp_ms: current_time_ms(),
        });
        truncate_front(&mut history, limit);
    }

    /// Whether the block starting at `ptr` is currently live
    pub fn is_live(&self, ptr: usize) -> bool {
        self.active_allocations.read().contains_key(&ptr)
    }

    /// Number of live blocks
    pub fn live_count(&self) -> usize {
        self.active_allocations.read().len()
    }

    /// Get statistics for a site
    pub fn get_site_stats(&self, site: &str) -> Option<SiteMemoryStats> {
        self.site_stats.read().get(site).cloned()
    }

    /// Get all site statistics
    pub fn get_all_stats(&self) -> Vec<SiteMemoryStats> {
        self.site_stats.read().values().cloned().collect()
    }

    /// Get total bytes held by live blocks
    pub fn total_memory_usage(&self) -> usize {
        self.site_stats
            .read()
            .values()
            .map(|s| s.current_usage)
            .sum()
    }

    /// Get sites with potential leaks
    pub fn get_potential_leaks(&self) -> Vec<SiteMemoryStats> {
        self.site_stats
            .read()
            .values()
            .filter(|s| s.potential_leak())
            .cloned()
            .collect()
    }

    /// Get allocation history
    pub fn get_allocation_history(&self) -> Vec<AllocationEvent> {
        self.allocation_history.read().iter().cloned().collect()
    }

    /// Get release history
    pub fn get_deallocation_history(&self) -> Vec<DeallocationEvent> {
        self.deallocation_history.read().iter().cloned().collect()
    }

    /// Clear all statistics
    pub fn clear(&self) {
        self.site_stats.write().clear();
        self.active_allocations.write().clear();
        self.allocation_history.write().clear();
        self.deallocation_history.write().clear();
    }
}

impl Default for MemoryProfiler {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_front<T>(history: &mut VecDeque<T>, limit: usize) {
    while history.len() > limit {
        history.pop_front();
    }
}

/// Get current time in milliseconds
fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
