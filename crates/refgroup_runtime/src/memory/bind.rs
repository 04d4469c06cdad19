//! Binding and unbinding references, and the group teardown.

use std::ptr::NonNull;

use crate::memory::allocator::free_group;
use crate::memory::group::member_at;
use crate::memory::header::{Destructor, Header, Managed, check_identity};
use crate::memory::refcount::{release_or_claim, retain};
use crate::memory::violation::{Violation, ensure};

/// Takes a reference to `object` and hands the same address back, ready to be
/// stored in a new owning slot.
///
/// # Safety
///
/// `object` must belong to a live group.
#[inline]
#[track_caller]
pub unsafe fn bind<T: Managed>(object: NonNull<T>) -> NonNull<T> {
    unsafe { retain(object) };
    object
}

/// Drops the reference held by `slot` and empties it.
///
/// An empty slot, or one pointing at a destroyed header, is simply cleared.
/// Otherwise one reference is released; if it was the last one the whole group
/// is torn down: every member's destructor runs, last member first and leader
/// last, then the block is freed if the group is heap allocated.
///
/// # Safety
///
/// A non-empty slot must own a reference to a live (or destroyed, zeroed)
/// object. When the last reference goes, no other thread may still be using the
/// group.
#[track_caller]
pub unsafe fn unbind<T: Managed>(slot: &mut Option<NonNull<T>>) {
    let Some(object) = slot.take() else {
        return;
    };
    let header = Header::of(object);
    if unsafe { Header::manager_of(header) }.is_none() {
        return;
    }
    if unsafe { release_or_claim(header) } {
        unsafe { teardown(header) };
    }
}

/// What the teardown needs from the leader, read once under its guard, plus
/// how many members are still to be retired.
///
/// Dropping it retires whatever is left and frees the block, so a teardown cut
/// short by a fatal check on one member still releases the others.
struct Teardown {
    leader: NonNull<Header>,
    remaining: usize,
    stride: usize,
    heap_allocated: bool,
    destructor: Option<Destructor>,
}

impl Teardown {
    unsafe fn plan(object: NonNull<Header>) -> Teardown {
        let leader = unsafe { Header::leader(object) };
        let state = leader.state();
        Teardown {
            leader: NonNull::from(leader),
            remaining: state.managed_count,
            stride: state.object_size,
            heap_allocated: state.heap_allocated,
            destructor: state.destructor,
        }
    }

    /// Runs the destructor of the highest member not yet retired.
    #[track_caller]
    unsafe fn retire_next(&mut self) -> bool {
        let Some(index) = self.remaining.checked_sub(1) else {
            return false;
        };
        self.remaining = index;

        let member = unsafe { member_at(self.leader, self.stride, index) };
        if index > 0 {
            unsafe { check_identity(member) };
            let intact = unsafe {
                Header::manager_of(member) == Some(self.leader)
                    && Header::state_mut(member).managed_count == 0
            };
            ensure(intact, || Violation::CorruptMember {
                leader: self.leader.as_ptr() as usize,
                index,
            });
        }
        if let Some(destructor) = self.destructor {
            unsafe { destructor(member.as_ptr()) };
        }
        true
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        while unsafe { self.retire_next() } {}
        if self.heap_allocated {
            unsafe { free_group(self.leader.cast()) };
        }
    }
}

// Runs without the leader's guard: the last reference is gone, so nothing else
// may be touching the group.
#[track_caller]
unsafe fn teardown(object: NonNull<Header>) {
    let mut plan = unsafe { Teardown::plan(object) };
    tracing::debug!(
        leader = ?plan.leader,
        members = plan.remaining,
        heap = plan.heap_allocated,
        "tearing down group"
    );

    while unsafe { plan.retire_next() } {}
    drop(plan);
}
