//! Reference counting on the group leader.
//!
//! The count tracks bound references beyond the implicit owner: a freshly
//! constructed object has a count of zero and is owned by whoever constructed
//! it. Every access resolves the manager relation and holds the leader's guard
//! for that single access only.

use std::ptr::NonNull;

use crate::memory::allocator::is_group_block;
use crate::memory::header::{Header, Managed};
use crate::memory::violation::{Violation, ensure, fatal};

/// Whether the last reference to the group is the one about to be dropped.
///
/// # Safety
///
/// `object` must belong to a live group.
#[track_caller]
pub unsafe fn may_destroy<T: Managed>(object: NonNull<T>) -> bool {
    let leader = unsafe { Header::leader(Header::of(object)) };
    let count = leader.state().ref_count;
    if count < 0 {
        fatal(Violation::NegativeCount {
            leader: leader.addr(),
            count,
        });
    }
    count == 0
}

/// Takes one more reference to the group.
///
/// # Safety
///
/// `object` must belong to a live group.
#[track_caller]
pub unsafe fn retain<T: Managed>(object: NonNull<T>) {
    let leader = unsafe { Header::leader(Header::of(object)) };
    leader.state().ref_count += 1;
}

/// Gives one reference back. Releasing with no bound reference left is fatal;
/// the count never goes below zero.
///
/// # Safety
///
/// `object` must belong to a live group.
#[track_caller]
pub unsafe fn release<T: Managed>(object: NonNull<T>) {
    let leader = unsafe { Header::leader(Header::of(object)) };
    let mut state = leader.state();
    if state.ref_count <= 0 {
        let count = state.ref_count - 1;
        drop(state);
        fatal(Violation::NegativeCount {
            leader: leader.addr(),
            count,
        });
    }
    state.ref_count -= 1;
}

/// Drops one reference, or claims the teardown when it was the last one.
///
/// The test and the decrement happen under a single acquisition of the guard,
/// so two threads dropping their references at the same time can neither both
/// decrement past zero nor both tear the group down.
#[track_caller]
pub(crate) unsafe fn release_or_claim(object: NonNull<Header>) -> bool {
    let leader = unsafe { Header::leader(object) };
    let mut state = leader.state();
    let count = state.ref_count;
    match count {
        0 => true,
        count if count > 0 => {
            state.ref_count -= 1;
            false
        }
        count => {
            drop(state);
            fatal(Violation::NegativeCount {
                leader: leader.addr(),
                count,
            })
        }
    }
}

/// Current number of bound references (excluding the implicit owner).
///
/// # Safety
///
/// `object` must belong to a live group.
pub unsafe fn ref_count<T: Managed>(object: NonNull<T>) -> isize {
    unsafe { Header::leader(Header::of(object)) }.state().ref_count
}

/// Whether teardown hands the group's block back to the allocator.
///
/// # Safety
///
/// `object` must belong to a live group.
pub unsafe fn heap_allocated<T: Managed>(object: NonNull<T>) -> bool {
    unsafe { Header::leader(Header::of(object)) }
        .state()
        .heap_allocated
}

/// Sets the allocation flag of the group. Setting it on a leader that does not
/// start a block from [`allocate_group`](crate::memory::allocate_group) is
/// fatal.
///
/// # Safety
///
/// `object` must belong to a live group.
#[track_caller]
pub unsafe fn set_heap_allocated<T: Managed>(object: NonNull<T>, heap_allocated: bool) {
    let leader = unsafe { Header::leader(Header::of(object)) };
    if heap_allocated {
        let block = NonNull::from(leader).cast::<u8>();
        ensure(is_group_block(block), || Violation::UnknownBlock {
            addr: leader.addr(),
        });
    }
    leader.state().heap_allocated = heap_allocated;
}
