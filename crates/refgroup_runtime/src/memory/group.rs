//! Groups: contiguous arrays of same-sized objects sharing one leader.
//!
//! Member `i` of a group lives at `leader + object_size * i`. Only the leader's
//! state is authoritative; members keep a back reference to the leader and a
//! group size of zero.

use std::ptr::NonNull;

use crate::memory::header::{Header, Managed, check_identity};
use crate::memory::violation::{Violation, ensure};

/// Turns the `count` constructed objects starting at `leader` into one group.
///
/// Not thread-safe: it must complete before any member is shared.
///
/// # Safety
///
/// `leader` must be the first of `count` contiguous, constructed objects of the
/// leader's object size, none of which is in use by another thread.
#[track_caller]
pub unsafe fn establish_group<T: Managed>(leader: NonNull<T>, count: usize) {
    let leader = Header::of(leader);
    unsafe { check_identity(leader) };
    ensure(
        unsafe { Header::manager_of(leader) } == Some(leader),
        || Violation::NotSelfManaged {
            addr: leader.as_ptr() as usize,
        },
    );
    ensure(count >= 1, || Violation::EmptyGroup);

    let state = unsafe { Header::state_mut(leader) };
    state.managed_count = count;
    let stride = state.object_size;

    for index in 1..count {
        let member = unsafe { member_at(leader, stride, index) };
        unsafe {
            check_identity(member);
            Header::set_manager(member, Some(leader));
            Header::state_mut(member).managed_count = 0;
        }
    }

    tracing::trace!(leader = ?leader, count, stride, "group established");
}

/// Number of objects in the group `object` belongs to.
///
/// # Safety
///
/// `object` must belong to a live group.
pub unsafe fn group_size<T: Managed>(object: NonNull<T>) -> usize {
    unsafe { Header::leader(Header::of(object)) }
        .state()
        .managed_count
}

/// Byte length of one object of the group, i.e. the member stride.
///
/// # Safety
///
/// `object` must belong to a live group.
pub unsafe fn object_size<T: Managed>(object: NonNull<T>) -> usize {
    unsafe { Header::leader(Header::of(object)) }
        .state()
        .object_size
}

/// The leader of the group `object` belongs to.
///
/// # Safety
///
/// `object` must belong to a live group whose members all have type `T`.
pub unsafe fn leader_of<T: Managed>(object: NonNull<T>) -> NonNull<T> {
    NonNull::from(unsafe { Header::leader(Header::of(object)) }).cast()
}

/// Member `index` of the group led by `leader`.
///
/// # Safety
///
/// `leader` must lead a live group whose members all have type `T`.
#[track_caller]
pub unsafe fn member<T: Managed>(leader: NonNull<T>, index: usize) -> NonNull<T> {
    let header = Header::of(leader);
    ensure(
        unsafe { Header::manager_of(header) } == Some(header),
        || Violation::NotLeader {
            addr: header.as_ptr() as usize,
        },
    );
    let (count, stride) = {
        let state = unsafe { Header::leader(header) }.state();
        (state.managed_count, state.object_size)
    };
    ensure(index < count, || Violation::IndexOutOfRange { index, count });
    unsafe { member_at(header, stride, index) }.cast()
}

/// Position of `object` within its group.
///
/// # Safety
///
/// `object` must belong to a live group.
pub unsafe fn index_of<T: Managed>(object: NonNull<T>) -> usize {
    let header = Header::of(object);
    let leader = unsafe { Header::leader(header) };
    let stride = leader.state().object_size;
    (header.as_ptr() as usize - leader.addr()) / stride
}

#[inline]
pub(crate) unsafe fn member_at(leader: NonNull<Header>, stride: usize, index: usize) -> NonNull<Header> {
    unsafe { leader.byte_add(stride * index) }
}
