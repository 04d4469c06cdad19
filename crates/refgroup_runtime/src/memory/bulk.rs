//! Bulk bind/unbind helpers and the checked release entry points.

use std::ptr::NonNull;

use crate::memory::bind::{bind, unbind};
use crate::memory::group::{group_size, member_at, object_size};
use crate::memory::header::{Header, Managed};
use crate::memory::violation::{Violation, ensure, fatal};

/// Binds the `count` consecutive members of a group starting at `base`.
///
/// The stride is the group's object size, so `T` only needs to be the header
/// type of the members, not their full layout.
///
/// # Safety
///
/// `base` and the `count - 1` objects following it at the group's stride must
/// all belong to the same live group.
#[track_caller]
pub unsafe fn bind_vector<T: Managed>(base: NonNull<T>, count: usize) -> Vec<NonNull<T>> {
    if count == 0 {
        return Vec::new();
    }
    let stride = unsafe { object_size(base) };
    let base = Header::of(base);
    (0..count)
        .map(|index| unsafe { bind(member_at(base, stride, index)) }.cast())
        .collect()
}

/// Binds every object of `objects`, which need not be contiguous or share a
/// group.
///
/// # Safety
///
/// Every element must belong to a live group.
#[track_caller]
pub unsafe fn bind_list<T: Managed>(objects: &[NonNull<T>]) -> Vec<NonNull<T>> {
    objects.iter().map(|object| unsafe { bind(*object) }).collect()
}

/// Unbinds every slot of `slots`, in order. Each slot goes through [`unbind`]
/// on its own, so empty slots are skipped and each one may tear its group down.
///
/// # Safety
///
/// Same as [`unbind`] for every slot.
#[track_caller]
pub unsafe fn unbind_list<T: Managed>(slots: &mut [Option<NonNull<T>>]) {
    for slot in slots {
        unsafe { unbind(slot) };
    }
}

/// Drops the reference held in `slot`, which must not be empty.
///
/// # Safety
///
/// Same as [`unbind`].
#[track_caller]
pub unsafe fn release_single<T: Managed>(slot: &mut Option<NonNull<T>>) {
    ensure(slot.is_some(), || Violation::EmptySlot);
    unsafe { unbind(slot) };
}

/// Drops the reference held in `slot` after checking that it is the leader of
/// a group of exactly `expected_count` objects.
///
/// # Safety
///
/// Same as [`unbind`].
#[track_caller]
pub unsafe fn release_group<T: Managed>(slot: &mut Option<NonNull<T>>, expected_count: usize) {
    let Some(object) = *slot else {
        fatal(Violation::EmptySlot);
    };
    let header = Header::of(object);
    ensure(
        unsafe { Header::manager_of(header) } == Some(header),
        || Violation::NotLeader {
            addr: header.as_ptr() as usize,
        },
    );
    let found = unsafe { group_size(object) };
    ensure(found == expected_count, || Violation::GroupSizeMismatch {
        expected: expected_count,
        found,
    });
    unsafe { unbind(slot) };
}
