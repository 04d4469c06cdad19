//! The intrusive ownership header and its in-place lifecycle.
//!
//! Every managed object is a `#[repr(C)]` struct whose first field is a
//! [`Header`]. The header of a group's leader holds the state shared by the whole
//! group behind its guard; the headers of the other members only carry the back
//! reference to the leader.

use std::alloc::Layout;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};

use parking_lot::{Mutex, MutexGuard};

use crate::memory::violation::{Violation, ensure, fatal};

/// Sentinel stored in every live header.
pub const IDENTITY_TAG: u32 = 0x643B_2B47;

/// Per-object cleanup invoked during group teardown.
///
/// Receives the address of the object (its header). It must not free the
/// object's memory; the block is released by the teardown itself when the group
/// is heap allocated. Being `extern "C"`, a destructor cannot unwind: a panic
/// escaping it aborts the process.
pub type Destructor = unsafe extern "C" fn(*mut Header);

/// Destructor for objects whose payload needs no cleanup.
pub unsafe extern "C" fn no_destructor(_object: *mut Header) {}

/// Capability of types that embed a [`Header`].
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` (or `#[repr(transparent)]` over a header)
/// with a [`Header`] as their first field, so that a pointer to the object is
/// also a valid pointer to its header.
pub unsafe trait Managed {}

unsafe impl Managed for Header {}

/// State that is only authoritative on the leader.
///
/// All fields are valid when zeroed, so a destroyed header is still a valid value.
pub(crate) struct LeaderState {
    pub(crate) heap_allocated: bool,
    pub(crate) ref_count: isize,
    pub(crate) object_size: usize,
    pub(crate) destructor: Option<Destructor>,
    pub(crate) managed_count: usize,
}

/// Ownership header embedded at the start of every managed object.
#[repr(C)]
pub struct Header {
    identity: u32,
    guard: Mutex<LeaderState>,
    manager: Option<NonNull<Header>>,
}

// The manager relation is only written while establishing a group, which must
// happen-before any shared use. Everything else sits behind the guard.
unsafe impl Send for Header {}
unsafe impl Sync for Header {}

impl Header {
    /// Size every managed object must at least have.
    pub const SIZE: usize = size_of::<Header>();

    #[inline]
    pub(crate) fn of<T: Managed>(object: NonNull<T>) -> NonNull<Header> {
        object.cast()
    }

    /// Reads the manager relation without forming a reference to the header.
    #[inline]
    pub(crate) unsafe fn manager_of(object: NonNull<Header>) -> Option<NonNull<Header>> {
        unsafe { ptr::addr_of!((*object.as_ptr()).manager).read() }
    }

    #[inline]
    pub(crate) unsafe fn set_manager(object: NonNull<Header>, manager: Option<NonNull<Header>>) {
        unsafe { ptr::addr_of_mut!((*object.as_ptr()).manager).write(manager) }
    }

    /// Resolves `object` to its leader, fatal if the relation is absent.
    #[inline]
    #[track_caller]
    pub(crate) unsafe fn leader<'a>(object: NonNull<Header>) -> &'a Header {
        unsafe { check_identity(object) };
        match unsafe { Header::manager_of(object) } {
            Some(manager) => {
                unsafe { check_identity(manager) };
                unsafe { &*manager.as_ptr() }
            }
            None => fatal(Violation::Unmanaged {
                addr: object.as_ptr() as usize,
            }),
        }
    }

    /// Locks the shared state; meaningful on the leader only.
    #[inline]
    pub(crate) fn state(&self) -> MutexGuard<'_, LeaderState> {
        self.guard.lock()
    }

    /// Exclusive access to this header's own state, bypassing the guard.
    #[inline]
    pub(crate) unsafe fn state_mut<'a>(object: NonNull<Header>) -> &'a mut LeaderState {
        unsafe { (*object.as_ptr()).guard.get_mut() }
    }

    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self as *const Header as usize
    }
}

/// Validates the identity tag of `object` (`validate` feature).
#[cfg(feature = "validate")]
#[inline]
#[track_caller]
pub(crate) unsafe fn check_identity(object: NonNull<Header>) {
    let found = unsafe { ptr::addr_of!((*object.as_ptr()).identity).read() };
    ensure(found == IDENTITY_TAG, || Violation::IdentityMismatch {
        addr: object.as_ptr() as usize,
        found,
        expected: IDENTITY_TAG,
    });
}

#[cfg(not(feature = "validate"))]
#[inline(always)]
pub(crate) unsafe fn check_identity(_object: NonNull<Header>) {}

/// Initializes the header of `object` in place as a standalone, self-managing
/// object of `object_size` bytes with no bound references.
///
/// # Safety
///
/// `object` must be valid for writes of `object_size` bytes and aligned for
/// `Header`. Any previous header contents are overwritten without being dropped.
#[track_caller]
pub unsafe fn construct<T: Managed>(object: NonNull<T>, object_size: usize, destructor: Destructor) {
    ensure(object_size >= Header::SIZE, || Violation::ObjectTooSmall {
        size: object_size,
        min: Header::SIZE,
    });
    let layout = match Layout::from_size_align(object_size, align_of::<Header>()) {
        Ok(layout) => layout,
        Err(_) => fatal(Violation::ObjectTooSmall {
            size: object_size,
            min: Header::SIZE,
        }),
    };
    unsafe { construct_layout(object, layout, destructor) }
}

/// Same as [`construct`] with the object size taken from a type layout.
///
/// # Safety
///
/// See [`construct`]; `object` must also be aligned for `layout`.
#[track_caller]
pub unsafe fn construct_layout<T: Managed>(object: NonNull<T>, layout: Layout, destructor: Destructor) {
    ensure(layout.size() >= Header::SIZE, || Violation::ObjectTooSmall {
        size: layout.size(),
        min: Header::SIZE,
    });
    let header = Header::of(object);
    let fresh = Header {
        identity: IDENTITY_TAG,
        guard: Mutex::new(LeaderState {
            heap_allocated: false,
            ref_count: 0,
            object_size: layout.size(),
            destructor: Some(destructor),
            managed_count: 1,
        }),
        manager: Some(header),
    };
    unsafe { header.as_ptr().write(fresh) };
}

/// Tears down the guard and zeroes the header. Neither runs the destructor nor
/// frees memory; a later [`unbind`](crate::memory::unbind) through this object
/// is a no-op.
///
/// # Safety
///
/// `object` must point at a constructed header that no other thread is using.
#[track_caller]
pub unsafe fn destroy<T: Managed>(object: NonNull<T>) {
    let header = Header::of(object);
    unsafe {
        check_identity(header);
        ptr::drop_in_place(header.as_ptr());
        ptr::write_bytes(header.as_ptr().cast::<u8>(), 0, Header::SIZE);
    }
}

/// Replaces the object size and destructor of the whole group, through the
/// leader.
///
/// # Safety
///
/// `object` must belong to a live group.
#[track_caller]
pub unsafe fn reassign<T: Managed>(object: NonNull<T>, object_size: usize, destructor: Destructor) {
    ensure(object_size >= Header::SIZE, || Violation::ObjectTooSmall {
        size: object_size,
        min: Header::SIZE,
    });
    let leader = unsafe { Header::leader(Header::of(object)) };
    let mut state = leader.state();
    state.object_size = object_size;
    state.destructor = Some(destructor);
}

/// Zeroes the payload of `object`, i.e. the bytes following its header up to
/// the group's object size.
///
/// # Safety
///
/// `object` must be valid for writes of the group's object size, and the payload
/// must be valid when zeroed.
#[track_caller]
pub unsafe fn zero_payload<T: Managed>(object: NonNull<T>) {
    let header = Header::of(object);
    let object_size = unsafe { Header::leader(header) }.state().object_size;
    ensure(object_size >= Header::SIZE, || Violation::ObjectTooSmall {
        size: object_size,
        min: Header::SIZE,
    });
    unsafe {
        let payload = header.as_ptr().cast::<u8>().add(Header::SIZE);
        ptr::write_bytes(payload, 0, object_size - Header::SIZE);
    }
}

#[cfg(test)]
mod tests {
    use std::mem::MaybeUninit;

    use super::*;

    #[repr(C)]
    struct Blob {
        header: Header,
        payload: [u8; 24],
    }

    unsafe impl Managed for Blob {}

    fn blob() -> Box<MaybeUninit<Blob>> {
        Box::new(MaybeUninit::zeroed())
    }

    #[test]
    fn construct_makes_self_managing_leader() {
        let mut storage = blob();
        let object = NonNull::from(&mut *storage).cast::<Blob>();
        unsafe { construct(object, size_of::<Blob>(), no_destructor) };

        let header = Header::of(object);
        assert_eq!(unsafe { Header::manager_of(header) }, Some(header));
        let state = unsafe { Header::leader(header) }.state();
        assert_eq!(state.managed_count, 1);
        assert_eq!(state.ref_count, 0);
        assert_eq!(state.object_size, size_of::<Blob>());
        assert!(!state.heap_allocated);
    }

    #[test]
    #[should_panic(expected = "smaller than")]
    fn construct_rejects_undersized_objects() {
        let mut storage = blob();
        let object = NonNull::from(&mut *storage).cast::<Blob>();
        unsafe { construct(object, Header::SIZE - 1, no_destructor) };
    }

    #[test]
    fn destroy_clears_manager_relation() {
        let mut storage = blob();
        let object = NonNull::from(&mut *storage).cast::<Blob>();
        unsafe {
            construct(object, size_of::<Blob>(), no_destructor);
            destroy(object);
            assert_eq!(Header::manager_of(Header::of(object)), None);
        }
    }

    #[test]
    fn zero_payload_keeps_header() {
        let mut storage = blob();
        let object = NonNull::from(&mut *storage).cast::<Blob>();
        unsafe {
            construct(object, size_of::<Blob>(), no_destructor);
            (*object.as_ptr()).payload = [0xAB; 24];
            zero_payload(object);
            assert_eq!((*object.as_ptr()).payload, [0; 24]);
            assert_eq!(Header::manager_of(Header::of(object)), Some(Header::of(object)));
        }
    }

    #[test]
    fn reassign_updates_leader_state() {
        unsafe extern "C" fn other(_object: *mut Header) {}

        let mut storage = blob();
        let object = NonNull::from(&mut *storage).cast::<Blob>();
        unsafe {
            construct(object, size_of::<Blob>(), no_destructor);
            reassign(object, Header::SIZE, other);
            let state = Header::leader(Header::of(object)).state();
            assert_eq!(state.object_size, Header::SIZE);
            assert_eq!(state.destructor.map(|d| d as usize), Some(other as usize));
        }
    }

    #[test]
    #[cfg(feature = "validate")]
    #[should_panic(expected = "identity mismatch")]
    fn validate_rejects_unconstructed_headers() {
        let mut storage = blob();
        let object = NonNull::from(&mut *storage).cast::<Blob>();
        unsafe { Header::set_manager(Header::of(object), Some(Header::of(object))) };
        let _ = unsafe { Header::leader(Header::of(object)) };
    }
}
