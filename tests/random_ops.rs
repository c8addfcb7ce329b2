use std::ptr::NonNull;

use proptest::prelude::*;
use segalloc::{ALIGN, BufferProvider, Config, Heap, SENTINEL_OVERHEAD};

#[derive(Clone, Debug)]
enum Op {
    Allocate(usize),
    Free(usize),
    Resize(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1..6000usize).prop_map(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
        2 => (any::<usize>(), 0..8000usize).prop_map(|(index, size)| Op::Resize(index, size)),
    ]
}

fn config() -> impl Strategy<Value = Config> {
    (
        prop_oneof![Just(3264usize), 64..4096usize],
        1..16usize,
        prop_oneof![Just(4096usize), 64..16384usize],
    )
        .prop_map(|(granularity, probe_limit, chunk_size)| {
            Config::default()
                .with_granularity(granularity)
                .with_probe_limit(probe_limit)
                .with_chunk_size(chunk_size)
        })
}

/// A live allocation and the byte pattern written into it.
struct Live {
    ptr: NonNull<u8>,
    len: usize,
    seed: u8,
}

impl Live {
    fn new(ptr: NonNull<u8>, len: usize, seed: u8) -> Self {
        for i in 0..len {
            unsafe { ptr.as_ptr().add(i).write(seed.wrapping_add(i as u8)) };
        }
        Self { ptr, len, seed }
    }

    fn intact_up_to(&self, len: usize) -> bool {
        (0..len.min(self.len))
            .all(|i| unsafe { self.ptr.as_ptr().add(i).read() } == self.seed.wrapping_add(i as u8))
    }
}

proptest! {
    /// Random sequences of allocations, frees and resizes keep every heap invariant
    /// after each step, never corrupt live data and, once everything is freed, leave
    /// a single free block covering the whole region.
    #[test]
    fn random_operations_keep_the_heap_consistent(
        config in config(),
        ops in prop::collection::vec(op(), 1..80),
    ) {
        let _ = env_logger::try_init();

        let mut buffer = vec![0u8; 1 << 20];
        let mut heap = Heap::init(BufferProvider::new(&mut buffer), config).unwrap();
        let mut live: Vec<Live> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            let seed = step as u8;

            match op {
                Op::Allocate(size) => {
                    if let Some(ptr) = heap.allocate(size) {
                        prop_assert_eq!(ptr.as_ptr() as usize % ALIGN, 0);
                        let usable = unsafe { heap.usable_size(ptr) };
                        prop_assert!(usable >= size);
                        live.push(Live::new(ptr, size, seed));
                    }
                }
                Op::Free(index) => {
                    if !live.is_empty() {
                        let old = live.swap_remove(index % live.len());
                        prop_assert!(old.intact_up_to(old.len));
                        unsafe { heap.free(old.ptr) };
                    }
                }
                Op::Resize(index, size) => {
                    if !live.is_empty() {
                        let index = index % live.len();
                        let old = &live[index];

                        match unsafe { heap.resize(Some(old.ptr), size) } {
                            Some(ptr) => {
                                prop_assert_eq!(ptr.as_ptr() as usize % ALIGN, 0);
                                let usable = unsafe { heap.usable_size(ptr) };
                                prop_assert!(usable >= size);

                                let moved = Live { ptr, len: old.len, seed: old.seed };
                                prop_assert!(moved.intact_up_to(size));

                                live[index] = Live::new(ptr, size, seed);
                            }
                            None if size == 0 => {
                                live.swap_remove(index);
                            }
                            // Out of memory, the old allocation is still there.
                            None => prop_assert!(old.intact_up_to(old.len)),
                        }
                    }
                }
            }

            let stats = heap.check();
            prop_assert!(stats.is_ok(), "step {}: {:?}", step, stats);
        }

        for old in live.drain(..) {
            prop_assert!(old.intact_up_to(old.len));
            unsafe { heap.free(old.ptr) };
        }

        let stats = heap.check().unwrap();
        prop_assert_eq!(stats.allocated_blocks, 0);
        prop_assert_eq!(stats.free_blocks, 1);
        prop_assert_eq!(stats.free_bytes, heap.region_size() - SENTINEL_OVERHEAD);
    }
}
