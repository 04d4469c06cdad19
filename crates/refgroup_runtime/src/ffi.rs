//! C bindings for the ownership primitives
//!
//! Objects cross the boundary as `*mut Header`, i.e. the address of the object
//! whose memory starts with the header. Null objects are fatal.

use std::mem::align_of;
use std::ptr::{self, NonNull};
use std::slice;

use crate::memory::{self, Destructor, Header, Violation, fatal};

#[inline]
#[track_caller]
fn object(ptr: *mut Header) -> NonNull<Header> {
    match NonNull::new(ptr) {
        Some(object) => object,
        None => fatal(Violation::NullObject),
    }
}

#[inline]
#[track_caller]
unsafe fn slot_ref<'a>(slot: *mut *mut Header) -> &'a mut *mut Header {
    match unsafe { slot.as_mut() } {
        Some(slot) => slot,
        None => fatal(Violation::NullObject),
    }
}

/// Byte size of the header every object has to start with.
#[unsafe(no_mangle)]
pub extern "C" fn refgroup_header_size() -> usize {
    Header::SIZE
}

/// Allocate a zeroed block for `count` objects of `obj_len` bytes. Returns null
/// on failure.
///
/// # Safety
/// This function is safe to call from any context. The block is only returned
/// by a teardown once the leader's heap flag is set.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_alloc(obj_len: usize, count: usize) -> *mut Header {
    match memory::allocate_group(obj_len, align_of::<Header>(), count, "ffi") {
        Ok(block) => block.as_ptr().cast(),
        Err(error) => {
            tracing::warn!(%error, obj_len, count, "group allocation failed");
            ptr::null_mut()
        }
    }
}

/// Construct the header at `ptr` as a standalone object of `len` bytes.
/// A null destructor means the object needs no cleanup.
///
/// # Safety
/// `ptr` must be valid for writes of `len` bytes and aligned for the header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_ctor(ptr: *mut Header, len: usize, dtor: Option<Destructor>) {
    let destructor = dtor.unwrap_or(memory::no_destructor);
    unsafe { memory::construct(object(ptr), len, destructor) };
}

/// Destroy the header at `ptr` without running the destructor.
///
/// # Safety
/// `ptr` must point at a constructed header no other thread is using.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_dtor(ptr: *mut Header) {
    unsafe { memory::destroy(object(ptr)) };
}

/// Replace the object size and destructor of the group `ptr` belongs to.
///
/// # Safety
/// `ptr` must belong to a live group.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_set_obj(ptr: *mut Header, len: usize, dtor: Option<Destructor>) {
    let destructor = dtor.unwrap_or(memory::no_destructor);
    unsafe { memory::reassign(object(ptr), len, destructor) };
}

/// Zero the payload following the header of `ptr`.
///
/// # Safety
/// `ptr` must belong to a live group and its payload must be valid when zeroed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_zero_obj(ptr: *mut Header) {
    unsafe { memory::zero_payload(object(ptr)) };
}

/// Make the `count` objects starting at `ptr` one group led by `ptr`.
///
/// # Safety
/// Not thread-safe. The objects must be constructed and contiguous.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_set_managed(ptr: *mut Header, count: usize) {
    unsafe { memory::establish_group(object(ptr), count) };
}

/// Number of objects in the group of `ptr`.
///
/// # Safety
/// `ptr` must belong to a live group.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_num_managed(ptr: *mut Header) -> usize {
    unsafe { memory::group_size(object(ptr)) }
}

/// Whether dropping one more reference would tear the group down.
///
/// # Safety
/// `ptr` must belong to a live group.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_destroy_ok(ptr: *mut Header) -> bool {
    unsafe { memory::may_destroy(object(ptr)) }
}

/// # Safety
/// `ptr` must belong to a live group.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_get_heap(ptr: *mut Header) -> bool {
    unsafe { memory::heap_allocated(object(ptr)) }
}

/// # Safety
/// `ptr` must belong to a live group whose block came from `refgroup_alloc`
/// when `heap` is true.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_set_heap(ptr: *mut Header, heap: bool) {
    unsafe { memory::set_heap_allocated(object(ptr), heap) };
}

/// # Safety
/// `ptr` must belong to a live group.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_retain(ptr: *mut Header) {
    unsafe { memory::retain(object(ptr)) };
}

/// # Safety
/// `ptr` must belong to a live group.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_release(ptr: *mut Header) {
    unsafe { memory::release(object(ptr)) };
}

/// Take a reference and return the same object.
///
/// # Safety
/// `ptr` must belong to a live group.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_bind(ptr: *mut Header) -> *mut Header {
    unsafe { memory::bind(object(ptr)) }.as_ptr()
}

/// Drop the reference stored in `*slot` and null the slot.
///
/// # Safety
/// `slot` must be valid; a non-null `*slot` must own a reference.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_unbind(slot_ptr: *mut *mut Header) {
    let slot = unsafe { slot_ref(slot_ptr) };
    let mut owned = NonNull::new(*slot);
    unsafe { memory::unbind(&mut owned) };
    *slot = ptr::null_mut();
}

/// Bind `count` consecutive members starting at `base` into `out`.
///
/// # Safety
/// `out` must be valid for `count` writes; the members must belong to one live group.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_vbindl(base: *mut Header, count: usize, out: *mut *mut Header) {
    if count == 0 {
        return;
    }
    let bound = unsafe { memory::bind_vector(object(base), count) };
    let out = unsafe { slice::from_raw_parts_mut(out, count) };
    for (slot, object) in out.iter_mut().zip(bound) {
        *slot = object.as_ptr();
    }
}

/// Bind each of the `count` objects in `objects` into `out`.
///
/// # Safety
/// `objects` must be valid for `count` reads and `out` for `count` writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_lbindl(objects: *const *mut Header, count: usize, out: *mut *mut Header) {
    if count == 0 {
        return;
    }
    let objects: Vec<_> = unsafe { slice::from_raw_parts(objects, count) }
        .iter()
        .map(|ptr| object(*ptr))
        .collect();
    let bound = unsafe { memory::bind_list(&objects) };
    let out = unsafe { slice::from_raw_parts_mut(out, count) };
    for (slot, object) in out.iter_mut().zip(bound) {
        *slot = object.as_ptr();
    }
}

/// Unbind each of the `count` slots in `slots`, nulling them.
///
/// # Safety
/// `slots` must be valid for `count` reads and writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_lunbind(slots: *mut *mut Header, count: usize) {
    if count == 0 {
        return;
    }
    let slots = unsafe { slice::from_raw_parts_mut(slots, count) };
    let mut owned: Vec<_> = slots.iter().map(|ptr| NonNull::new(*ptr)).collect();
    unsafe { memory::unbind_list(&mut owned) };
    slots.fill(ptr::null_mut());
}

/// Release a standalone object held in `*slot`.
///
/// # Safety
/// `slot` must be valid and hold a reference.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_free_obj(slot_ptr: *mut *mut Header) {
    let slot = unsafe { slot_ref(slot_ptr) };
    let mut owned = NonNull::new(*slot);
    unsafe { memory::release_single(&mut owned) };
    *slot = ptr::null_mut();
}

/// Release the group of `count` objects led by `*slot`.
///
/// # Safety
/// `slot` must be valid and hold a reference to the leader.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn refgroup_vfree_obj(slot_ptr: *mut *mut Header, count: usize) {
    let slot = unsafe { slot_ref(slot_ptr) };
    let mut owned = NonNull::new(*slot);
    unsafe { memory::release_group(&mut owned, count) };
    *slot = ptr::null_mut();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static RETIRED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_retired(_object: *mut Header) {
        RETIRED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn heap_group_through_the_c_surface() {
        let len = refgroup_header_size() + 16;
        unsafe {
            let base = refgroup_alloc(len, 3);
            assert!(!base.is_null());
            for index in 0..3 {
                refgroup_ctor(base.byte_add(len * index), len, Some(count_retired));
            }
            refgroup_set_managed(base, 3);
            refgroup_set_heap(base, true);
            assert_eq!(refgroup_num_managed(base.byte_add(len * 2)), 3);
            assert!(refgroup_get_heap(base));

            let mut bound = [ptr::null_mut(); 3];
            refgroup_vbindl(base, 3, bound.as_mut_ptr());
            assert_eq!(bound[1], base.byte_add(len));
            assert!(!refgroup_destroy_ok(base));

            let mut owner = base;
            refgroup_unbind(&mut owner);
            assert!(owner.is_null());

            let before = RETIRED.load(Ordering::SeqCst);
            refgroup_lunbind(bound.as_mut_ptr(), 3);
            assert!(bound.iter().all(|slot| slot.is_null()));
            assert!(RETIRED.load(Ordering::SeqCst) >= before + 3);
        }
    }

    #[test]
    fn null_destructor_means_no_cleanup() {
        let mut storage = Box::new([0_u64; 32]);
        let object = storage.as_mut_ptr().cast::<Header>();
        unsafe {
            refgroup_ctor(object, refgroup_header_size(), None);
            let mut handle = refgroup_bind(object);
            refgroup_release(object);
            refgroup_free_obj(&mut handle);
            assert!(handle.is_null());
        }
    }

    #[test]
    fn alloc_reports_failure_as_null() {
        assert!(unsafe { refgroup_alloc(1, 1) }.is_null());
        assert!(unsafe { refgroup_alloc(refgroup_header_size(), 0) }.is_null());
    }

    #[test]
    #[should_panic(expected = "null object")]
    fn null_objects_are_fatal() {
        unsafe { refgroup_retain(ptr::null_mut()) };
    }
}
