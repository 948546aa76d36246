//! End-to-end lifecycle tests for the instrumented build.
//!
//! These exercise whole handle lifetimes — allocate, alias, access, delete,
//! dangle — through the public surface, not individual registry calls in
//! isolation.

#![cfg(feature = "track")]

use tether::{Handle, Registry, RegistryConfig, ViewAs};

#[test]
fn array_lifecycle_with_aliasing() {
    let registry = Registry::new();

    // Allocate a tracked array of 5 integers.
    let mut values: Handle<i32> = Handle::new_array_in(&registry, 5);
    for i in 0..5 {
        values[i] = (i as i32) * 3;
    }

    // Copying the handle makes the alias count 2.
    let alias = values.clone();
    assert_eq!(values.alias_count(), Some(2));

    // The last element is reachable through either alias.
    assert_eq!(values[4], 12);
    assert_eq!(alias[4], 12);

    // Dropping one copy brings the count back to 1.
    drop(alias);
    assert_eq!(values.alias_count(), Some(1));

    // Retiring the array succeeds and the record is gone.
    let id = values.id().unwrap();
    values.delete_array();
    assert!(!registry.is_live(id));
    assert_eq!(registry.leak_count(), 0);
}

#[test]
#[should_panic(expected = "index out of bounds")]
fn array_index_at_len_is_rejected() {
    let registry = Registry::new();
    let values: Handle<i32> = Handle::new_array_in(&registry, 5);
    let _ = values[5];
}

#[test]
#[should_panic(expected = "use after free")]
fn dangling_alias_is_rejected_after_delete() {
    let registry = Registry::new();
    let mut owner: Handle<i32> = Handle::new_array_in(&registry, 5);
    let dangling = owner.clone();

    owner.delete_array();
    let _ = dangling[0];
}

#[test]
#[should_panic(expected = "double free")]
fn delete_through_an_alias_is_rejected_after_delete() {
    let registry = Registry::new();
    let mut owner = Handle::new_in(&registry, 9u64);
    let mut alias = owner.clone();

    owner.delete();
    alias.delete();
}

#[test]
fn address_reuse_after_delete_yields_an_independent_record() {
    let registry = Registry::new();

    let mut first = Handle::new_in(&registry, 1u32);
    let first_id = first.id().unwrap();
    let addr = first.addr();
    first.delete();

    // Simulate the allocator handing the same address back out.
    let fresh = Handle::tracked(&registry, addr as *mut u32);
    let fresh_id = fresh.id().unwrap();

    assert_ne!(first_id, fresh_id);
    assert!(!registry.is_live(first_id));
    assert!(registry.is_live(fresh_id));
    assert_eq!(registry.live_id_at(addr), Some(fresh_id));
}

#[test]
fn aliases_agree_on_liveness_across_independent_wrapping() {
    let registry = Registry::new();

    // One handle produced by allocation, one captured separately from the
    // raw address: both must observe the same record.
    let owner = Handle::new_in(&registry, 5i16);
    let captured = Handle::tracked(&registry, owner.as_ptr());

    assert_eq!(owner.id(), captured.id());
    assert_eq!(owner.alias_count(), Some(2));
    assert_eq!(*captured, 5);
}

#[test]
fn untracked_handles_behave_as_plain_pointers() {
    let registry = Registry::new();
    let mut local = 7u32;
    let mut h = Handle::borrowed(&registry, &mut local);

    assert_eq!(h.id(), None);
    *h = 8;
    assert_eq!(local, 8);
    assert_eq!(registry.record_count(), 0);
}

#[test]
fn leaked_records_are_reported_but_not_fatal() {
    let registry = Registry::new();
    let kept = Handle::new_in(&registry, 3u8);
    let mut retired = Handle::new_in(&registry, 4u8);
    retired.delete();

    assert_eq!(registry.leak_count(), 1);
    assert_eq!(registry.report_leaks(), 1);

    // The leak report is advisory: the leaked handle still works.
    assert_eq!(*kept, 3);
}

#[test]
fn trace_logging_does_not_alter_behaviour() {
    let registry = Registry::with_config(RegistryConfig {
        trace: true,
        ..RegistryConfig::new()
    });

    let mut h: Handle<u32> = Handle::new_array_in(&registry, 2);
    let alias = h.clone();
    h[1] = 5;
    assert_eq!(alias[1], 5);
    drop(alias);
    h.delete_array();
    assert_eq!(registry.leak_count(), 0);
}

// A small tagged family for the capability-checked downcast.

#[derive(Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Leaf,
    Branch,
}

#[repr(C)]
struct Node {
    kind: NodeKind,
}

#[repr(C)]
struct Leaf {
    node: Node,
    value: i32,
}

impl ViewAs<Leaf> for Node {
    fn can_view_as(&self) -> bool {
        self.kind == NodeKind::Leaf
    }
}

#[test]
fn downcast_recovers_the_concrete_type() {
    let registry = Registry::new();
    let leaf = Handle::new_in(
        &registry,
        Leaf {
            node: Node {
                kind: NodeKind::Leaf,
            },
            value: 31,
        },
    );
    let id = leaf.id();

    let base: Handle<Node> = leaf.cast();
    assert_eq!(base.id(), id);

    let mut leaf: Handle<Leaf> = base.downcast();
    assert_eq!(leaf.value, 31);
    assert_eq!(leaf.alias_count(), Some(1));
    leaf.delete();
}

#[test]
#[should_panic(expected = "downcast mismatch")]
fn downcast_of_the_wrong_variant_is_rejected() {
    let registry = Registry::new();
    let base = Handle::new_in(
        &registry,
        Node {
            kind: NodeKind::Branch,
        },
    );
    let _leaf: Handle<Leaf> = base.downcast();
}
