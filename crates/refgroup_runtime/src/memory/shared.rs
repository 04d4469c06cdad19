//! Typed handles over heap allocated groups.
//!
//! [`Shared<T>`] owns one reference into a group of `T` values laid out back to
//! back, each behind its own [`Header`]. Cloning binds, dropping unbinds; the
//! values are dropped together, last member first, when the last handle into
//! the group goes away.

use std::alloc::Layout;
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};
use crate::memory::allocator::allocate_group;
use crate::memory::bind::{bind, unbind};
use crate::memory::bulk::bind_vector;
use crate::memory::group::{establish_group, group_size, index_of, leader_of, member};
use crate::memory::header::{Header, Managed, construct_layout};
use crate::memory::refcount::{may_destroy, ref_count, set_heap_allocated};

#[repr(C)]
struct Node<T> {
    header: Header,
    value: ManuallyDrop<T>,
}

unsafe impl<T> Managed for Node<T> {}

unsafe extern "C" fn drop_node<T>(object: *mut Header) {
    let node = object.cast::<Node<T>>();
    unsafe { ManuallyDrop::drop(&mut (*node).value) };
}

/// A reference-counted handle to one member of a group.
pub struct Shared<T> {
    node: NonNull<Node<T>>,
    _owns: PhantomData<Node<T>>,
}

unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Moves `value` into a new standalone group.
    pub fn new(value: T) -> Result<Self> {
        Self::group([value])
    }

    /// Moves `values` into one contiguous group and returns the handle on its
    /// leader.
    pub fn group(values: impl IntoIterator<Item = T>) -> Result<Self> {
        let values: Vec<T> = values.into_iter().collect();
        let count = values.len();
        if count == 0 {
            return Err(Error::EmptyGroup);
        }

        let layout = Layout::new::<Node<T>>();
        let block = allocate_group(layout.size(), layout.align(), count, type_name::<T>())?
            .cast::<Node<T>>();

        for (index, value) in values.into_iter().enumerate() {
            // SAFETY: the block holds `count` zeroed nodes of this layout.
            unsafe {
                let node = block.add(index);
                construct_layout(node, layout, drop_node::<T>);
                ptr::addr_of_mut!((*node.as_ptr()).value).write(ManuallyDrop::new(value));
            }
        }
        // SAFETY: every node is constructed and nothing else can see them yet.
        unsafe {
            establish_group(block, count);
            set_heap_allocated(block, true);
        }

        Ok(Self::adopt(block))
    }

    fn adopt(node: NonNull<Node<T>>) -> Self {
        Self {
            node,
            _owns: PhantomData,
        }
    }

    /// Position of this handle's member within its group.
    pub fn index(&self) -> usize {
        unsafe { index_of(self.node) }
    }

    pub fn group_size(&self) -> usize {
        unsafe { group_size(self.node) }
    }

    /// A new handle to member `index` of this handle's group.
    pub fn member(&self, index: usize) -> Option<Self> {
        if index >= self.group_size() {
            return None;
        }
        let node = unsafe { member(leader_of(self.node), index) };
        Some(Self::adopt(unsafe { bind(node) }))
    }

    /// Handles to every member of the group, in index order.
    pub fn members(&self) -> Vec<Self> {
        let leader = unsafe { leader_of(self.node) };
        unsafe { bind_vector(leader, self.group_size()) }
            .into_iter()
            .map(Self::adopt)
            .collect()
    }

    /// A new handle to the group's leader.
    pub fn leader(&self) -> Self {
        Self::adopt(unsafe { bind(leader_of(self.node)) })
    }

    /// Whether this is the only handle into the group.
    pub fn is_unique(&self) -> bool {
        unsafe { may_destroy(self.node) }
    }

    /// Number of live handles into the group.
    pub fn strong_count(&self) -> usize {
        let bound = unsafe { ref_count(self.node) };
        usize::try_from(bound).unwrap_or_default() + 1
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.node == other.node
    }

    /// The member's header, for interop with the raw operations.
    pub fn as_header(this: &Self) -> NonNull<Header> {
        Header::of(this.node)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self::adopt(unsafe { bind(self.node) })
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let mut slot = Some(self.node);
        unsafe { unbind(&mut slot) };
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*(*self.node.as_ptr()).value }
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("value", &**self)
            .field("index", &self.index())
            .field("group_size", &self.group_size())
            .finish()
    }
}
