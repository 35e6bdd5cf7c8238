//! Integration coverage of the coalescing heap allocator as a standalone
//! component, independent of the interpreter.

use terp_vm::heap::Heap;

fn heap_of(size: u64) -> Heap {
    let mut heap = Heap::new();
    heap.initialize(0, size);
    heap
}

#[test]
fn exact_fit_allocations_are_reused_without_splitting() {
    let mut heap = heap_of(256);
    let a = heap.alloc(256).unwrap();
    assert_eq!(heap.size_of(a), Some(256));
    assert!(heap.alloc(1).is_none());
}

#[test]
fn a_large_surplus_is_split_so_the_remainder_stays_available() {
    let mut heap = heap_of(1024);
    let a = heap.alloc(100).unwrap();
    assert_eq!(heap.size_of(a), Some(100));
    // The remaining ~924 bytes should still be allocatable as a separate
    // block, proving the surplus was split off rather than wasted.
    let b = heap.alloc(800).unwrap();
    assert_ne!(a, b);
    assert_eq!(heap.size_of(b), Some(800));
}

#[test]
fn freeing_a_block_between_two_others_merges_on_release_not_immediately() {
    let mut heap = heap_of(1024);
    let a = heap.alloc(100).unwrap();
    let b = heap.alloc(100).unwrap();
    let c = heap.alloc(100).unwrap();

    heap.free(b);
    // a and c are still both live; freeing b alone must not disturb them.
    assert_eq!(heap.size_of(a), Some(100));
    assert_eq!(heap.size_of(c), Some(100));

    heap.free(a);
    heap.free(c);
    // Now the whole arena should be one free run again.
    let whole = heap.alloc(1024).unwrap();
    assert_eq!(heap.size_of(whole), Some(1024));
}

#[test]
fn freeing_an_address_the_allocator_never_handed_out_is_a_no_op() {
    let mut heap = heap_of(256);
    let a = heap.alloc(64).unwrap();
    heap.free(a + 1000); // never allocated
    assert_eq!(heap.size_of(a), Some(64));
}

#[test]
fn exhausting_the_heap_reports_failure_instead_of_an_invalid_address() {
    let mut heap = heap_of(64);
    assert!(heap.alloc(64).is_some());
    assert!(heap.alloc(1).is_none());
}

#[test]
fn allocated_bytes_never_exceed_the_heaps_total_capacity() {
    let capacity = 512u64;
    let mut heap = heap_of(capacity);
    let mut total = 0u64;
    let mut sizes = Vec::new();
    for request in [64, 32, 128, 96, 64, 200] {
        if let Some(addr) = heap.alloc(request) {
            let actual = heap.size_of(addr).unwrap();
            total += actual;
            sizes.push((addr, actual));
        }
    }
    assert!(total <= capacity);
    for (addr, size) in sizes {
        assert!(addr >= heap.base());
        assert!(addr + size <= heap.base() + heap.capacity());
    }
}
