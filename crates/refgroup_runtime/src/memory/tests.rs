//! End-to-end ownership scenarios over the raw operations.

use std::mem::{MaybeUninit, align_of, size_of};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicIsize, Ordering};

use parking_lot::Mutex;
use refgroup_metrics::get_profiler;

use super::*;
use crate::config::get_config;

#[repr(C)]
struct Item {
    header: Header,
    live: *const AtomicIsize,
    log: *const Mutex<Vec<usize>>,
    tag: usize,
}

unsafe impl Managed for Item {}

unsafe extern "C" fn retire(object: *mut Header) {
    let item = object.cast::<Item>();
    unsafe {
        (*(*item).live).fetch_sub(1, Ordering::SeqCst);
        (*(*item).log).lock().push((*item).tag);
        destroy(NonNull::new_unchecked(item));
    }
}

unsafe fn make_item(object: NonNull<Item>, live: &AtomicIsize, log: &Mutex<Vec<usize>>, tag: usize) {
    unsafe {
        construct(object, size_of::<Item>(), retire);
        (*object.as_ptr()).live = live;
        (*object.as_ptr()).log = log;
        (*object.as_ptr()).tag = tag;
    }
    live.fetch_add(1, Ordering::SeqCst);
}

fn heap_item(live: &AtomicIsize, log: &Mutex<Vec<usize>>, tag: usize) -> NonNull<Item> {
    let block = allocate_object(size_of::<Item>(), align_of::<Item>(), "scenario-object").unwrap();
    let object = block.cast::<Item>();
    unsafe {
        make_item(object, live, log, tag);
        set_heap_allocated(object, true);
    }
    object
}

fn track_allocations() {
    get_config().update(|config| config.memory.track_allocations = true);
}

fn was_released(block: NonNull<Item>) -> bool {
    let addr = block.as_ptr() as usize;
    get_profiler()
        .get_deallocation_history()
        .iter()
        .any(|event| event.ptr == addr)
}

#[test]
fn standalone_object_lives_until_its_last_binding() {
    let live = AtomicIsize::new(0);
    let log = Mutex::new(Vec::new());
    let mut storage = Box::new(MaybeUninit::<Item>::zeroed());
    let object = NonNull::from(&mut *storage).cast::<Item>();

    unsafe {
        make_item(object, &live, &log, 0);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(ref_count(object), 0);

        let mut handle = Some(bind(object));
        release(object);
        unbind(&mut handle);
        assert!(handle.is_none());
    }

    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert_eq!(*log.lock(), vec![0]);
}

#[test]
fn heap_group_tears_down_in_reverse_after_the_last_unbind() {
    track_allocations();
    let live = AtomicIsize::new(0);
    let log = Mutex::new(Vec::new());
    let block = allocate_group(size_of::<Item>(), align_of::<Item>(), 3, "scenario-group")
        .unwrap()
        .cast::<Item>();

    unsafe {
        for index in 0..3 {
            make_item(block.add(index), &live, &log, index);
        }
        establish_group(block, 3);
        set_heap_allocated(block, true);

        let mut handles: Vec<_> = (0..3).map(|index| Some(bind(member(block, index)))).collect();
        release(block);

        unbind(&mut handles[0]);
        unbind(&mut handles[1]);
        assert!(log.lock().is_empty());
        assert_eq!(live.load(Ordering::SeqCst), 3);

        unbind(&mut handles[2]);
        assert!(handles.iter().all(Option::is_none));
    }

    assert_eq!(*log.lock(), vec![2, 1, 0]);
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert!(was_released(block));
}

#[test]
fn separate_objects_bound_as_a_list() {
    track_allocations();
    let live = AtomicIsize::new(0);
    let log = Mutex::new(Vec::new());
    let objects: Vec<_> = (0..3).map(|tag| heap_item(&live, &log, tag)).collect();

    unsafe {
        let mut handles: Vec<_> = bind_list(&objects).into_iter().map(Some).collect();
        for object in &objects {
            release(*object);
        }
        unbind_list(&mut handles);
        assert!(handles.iter().all(Option::is_none));
    }

    assert_eq!(*log.lock(), vec![0, 1, 2]);
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert!(objects.iter().all(|object| was_released(*object)));
}

#[test]
fn partial_unbinds_never_destroy() {
    let live = AtomicIsize::new(0);
    let log = Mutex::new(Vec::new());
    let object = heap_item(&live, &log, 9);

    unsafe {
        let mut handles: Vec<_> = (0..5).map(|_| Some(bind(object))).collect();
        unbind_list(&mut handles[..3]);
        assert!(!may_destroy(object));
        assert_eq!(ref_count(object), 2);
        assert!(log.lock().is_empty());

        unbind_list(&mut handles[3..]);
        assert!(may_destroy(object));

        let mut owner = Some(object);
        release_single(&mut owner);
        assert!(owner.is_none());
    }

    assert_eq!(*log.lock(), vec![9]);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
#[should_panic(expected = "went negative")]
fn releasing_the_implicit_owner_twice_is_fatal() {
    let live = AtomicIsize::new(0);
    let log = Mutex::new(Vec::new());
    let mut storage = Box::new(MaybeUninit::<Item>::zeroed());
    let object = NonNull::from(&mut *storage).cast::<Item>();
    unsafe {
        make_item(object, &live, &log, 0);
        retain(object);
        release(object);
        release(object);
    }
}

#[test]
#[should_panic(expected = "group size mismatch")]
fn releasing_a_group_of_the_wrong_size_is_fatal() {
    let live = AtomicIsize::new(0);
    let log = Mutex::new(Vec::new());
    let mut storage = [const { MaybeUninit::<Item>::zeroed() }; 4];
    let base = NonNull::new(storage.as_mut_ptr().cast::<Item>()).unwrap();
    unsafe {
        for index in 0..4 {
            make_item(base.add(index), &live, &log, index);
        }
        establish_group(base, 4);
        let mut slot = Some(base);
        release_group(&mut slot, 3);
    }
}

#[test]
fn shrinking_a_heap_object_still_frees_its_whole_block() {
    track_allocations();
    let live = AtomicIsize::new(0);
    let log = Mutex::new(Vec::new());
    let object = heap_item(&live, &log, 4);
    unsafe {
        reassign(object, Header::SIZE, retire);
        let mut owner = Some(object);
        unbind(&mut owner);
    }
    assert_eq!(*log.lock(), vec![4]);
    assert!(was_released(object));
}

#[test]
fn reassign_switches_the_destructor_for_the_whole_group() {
    unsafe extern "C" fn silent(_object: *mut Header) {}

    let live = AtomicIsize::new(0);
    let log = Mutex::new(Vec::new());
    let mut storage = [const { MaybeUninit::<Item>::zeroed() }; 2];
    let base = NonNull::new(storage.as_mut_ptr().cast::<Item>()).unwrap();
    unsafe {
        for index in 0..2 {
            make_item(base.add(index), &live, &log, index);
        }
        establish_group(base, 2);
        reassign(member(base, 1), size_of::<Item>(), silent);
        let mut slot = Some(base);
        release_group(&mut slot, 2);
    }
    assert!(log.lock().is_empty());
}
