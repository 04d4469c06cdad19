//! Intrusive ownership for groups of objects
//!
//! Provides the ownership header, leader-based reference counting, the
//! bind/unbind protocol with its group teardown, and a typed handle on top

pub mod allocator;
pub mod bind;
pub mod bulk;
pub mod config;
pub mod group;
pub mod header;
pub mod refcount;
pub mod shared;
pub mod violation;

#[cfg(test)]
mod tests;

pub use allocator::{allocate_group, allocate_object, free_group, group_layout, is_group_block};
pub use bind::{bind, unbind};
pub use bulk::{bind_list, bind_vector, release_group, release_single, unbind_list};
pub use config::{MemoryConfig, ViolationAction};
pub use group::{establish_group, group_size, index_of, leader_of, member, object_size};
pub use header::{
    Destructor, Header, IDENTITY_TAG, Managed, construct, construct_layout, destroy, no_destructor, reassign,
    zero_payload,
};
pub use refcount::{heap_allocated, may_destroy, ref_count, release, retain, set_heap_allocated};
pub use shared::Shared;
pub use violation::{Violation, fatal};
