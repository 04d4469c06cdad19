//! Heap blocks backing heap allocated groups.
//!
//! A group block holds `count` objects of `object_size` bytes back to back. The
//! layout of every live block is kept by address, so the teardown of a group
//! whose heap flag is set hands the block back through [`free_group`] with
//! exactly the layout it was allocated with, whatever the leader's state says
//! by then.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::mem::size_of;
use std::ptr::NonNull;

use parking_lot::Mutex;
use refgroup_metrics::get_profiler;

use crate::config::get_config;
use crate::error::{Error, Result};
use crate::memory::header::Header;
use crate::memory::violation::{Violation, fatal};

/// Layouts of the blocks handed out and not yet freed, by address.
static BLOCKS: once_cell::sync::Lazy<Mutex<HashMap<usize, Layout>>> =
    once_cell::sync::Lazy::new(|| Mutex::new(HashMap::new()));

/// Layout of a block of `count` objects of `object_size` bytes.
pub fn group_layout(object_size: usize, object_align: usize, count: usize) -> Result<Layout> {
    if count == 0 {
        return Err(Error::EmptyGroup);
    }
    if object_size < size_of::<Header>() {
        return Err(Error::ObjectTooSmall {
            size: object_size,
            min: size_of::<Header>(),
        });
    }
    let overflow = || Error::LayoutOverflow {
        object_size,
        objects: count,
    };
    let size = object_size.checked_mul(count).ok_or_else(overflow)?;
    Layout::from_size_align(size, object_align).map_err(|_| overflow())
}

/// Allocates a zeroed block for `count` objects. `site` labels the allocation
/// in the profiler.
pub fn allocate_group(
    object_size: usize,
    object_align: usize,
    count: usize,
    site: &str,
) -> Result<NonNull<u8>> {
    let layout = group_layout(object_size, object_align, count)?;
    // SAFETY: `group_layout` never produces a zero-sized layout.
    let block = unsafe { alloc::alloc_zeroed(layout) };
    let block = NonNull::new(block).ok_or(Error::OutOfMemory {
        size: layout.size(),
    })?;

    BLOCKS.lock().insert(block.as_ptr() as usize, layout);
    if get_config().is_tracking_enabled() {
        get_profiler().record_allocation(block.as_ptr() as usize, layout.size(), count, site);
    }
    tracing::trace!(block = ?block, size = layout.size(), count, site, "group block allocated");

    Ok(block)
}

/// Allocates a zeroed block for a single object.
pub fn allocate_object(object_size: usize, object_align: usize, site: &str) -> Result<NonNull<u8>> {
    allocate_group(object_size, object_align, 1, site)
}

/// Whether `block` is a live block handed out by [`allocate_group`].
pub fn is_group_block(block: NonNull<u8>) -> bool {
    BLOCKS.lock().contains_key(&(block.as_ptr() as usize))
}

/// Returns a block obtained from [`allocate_group`], using the layout it was
/// allocated with. Unknown blocks are fatal.
///
/// # Safety
///
/// `block` must not be used afterwards.
#[track_caller]
pub unsafe fn free_group(block: NonNull<u8>) {
    let addr = block.as_ptr() as usize;
    let Some(layout) = BLOCKS.lock().remove(&addr) else {
        fatal(Violation::UnknownBlock { addr });
    };

    let profiler = get_profiler();
    if get_config().is_tracking_enabled() || profiler.is_live(addr) {
        profiler.record_deallocation(addr);
    }
    tracing::trace!(block = ?block, size = layout.size(), align = layout.align(), "group block released");

    unsafe { alloc::dealloc(block.as_ptr(), layout) };
}

#[cfg(test)]
mod tests {
    use std::mem::align_of;

    use super::*;

    #[test]
    fn layout_rejects_empty_groups() {
        assert!(matches!(
            group_layout(Header::SIZE, align_of::<Header>(), 0),
            Err(Error::EmptyGroup)
        ));
    }

    #[test]
    fn layout_rejects_overflow() {
        assert!(matches!(
            group_layout(usize::MAX / 2, 8, 3),
            Err(Error::LayoutOverflow { objects: 3, .. })
        ));
        assert!(matches!(
            group_layout(Header::SIZE, 3, 1),
            Err(Error::LayoutOverflow { .. })
        ));
    }

    #[test]
    fn layout_rejects_objects_smaller_than_the_header() {
        assert!(matches!(
            group_layout(1, 1, 1),
            Err(Error::ObjectTooSmall { size: 1, .. })
        ));
    }

    #[test]
    fn blocks_are_zeroed_and_tracked() {
        get_config().update(|config| config.memory.track_allocations = true);

        let size = Header::SIZE * 2;
        let block = allocate_group(size, 64, 3, "allocator-test").unwrap();
        assert_eq!(block.as_ptr() as usize % 64, 0);
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), size * 3) };
        assert!(bytes.iter().all(|b| *b == 0));

        let addr = block.as_ptr() as usize;
        assert!(is_group_block(block));
        assert!(get_profiler().is_live(addr));

        unsafe { free_group(block) };
        let released = get_profiler().get_deallocation_history();
        assert!(released.iter().any(|event| event.ptr == addr));
    }

    #[test]
    #[should_panic(expected = "not a group block")]
    fn freeing_a_foreign_block_is_fatal() {
        let mut storage = [0_u64; 16];
        let block = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
        unsafe { free_group(block) };
    }
}
