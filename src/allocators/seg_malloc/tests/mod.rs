use super::*;
use crate::block::HEAP_OVERHEAD;
use crate::error::GrowError;
use crate::growers::ArenaGrower;
use crate::header::{BLOCK_OVERHEAD, MAX_BLOCK_SIZE};

use self::format::init_logging;


/// An allocator over `buf` that checks the heap around every operation.
fn allocator(buf: &mut [u64]) -> SegMalloc<ArenaGrower<'_>> {
    init_logging();
    SegMalloc::with_config(ArenaGrower::new(buf), Config::new().with_heap_checks(true))
}

/// Same as [`allocator`] but corruption is left for [`SegMalloc::check`] to find.
fn unchecked_allocator(buf: &mut [u64]) -> SegMalloc<ArenaGrower<'_>> {
    init_logging();
    SegMalloc::with_config(ArenaGrower::new(buf), Config::new().with_heap_checks(false))
}

fn heap_start(allocator: &SegMalloc<ArenaGrower<'_>>) -> usize {
    allocator.grower().bounds().unwrap().0.as_ptr() as usize
}

/// Every byte obtained from the grower is covered by a block or the fixed overhead.
fn assert_consistent(allocator: &SegMalloc<ArenaGrower<'_>>) {
    assert_eq!(allocator.check(true), Ok(()));
    let stats = allocator.stats();
    assert_eq!(stats.block_bytes + HEAP_OVERHEAD, stats.heap_size);
    assert_eq!(stats.heap_size, allocator.grower().used());
    assert_eq!(stats.free_blocks, stats.bucket_lengths.iter().sum::<usize>());
    assert_eq!(
        stats.block_bytes,
        PROLOGUE_SIZE + stats.free_bytes + stats.allocated_bytes
    );
}

fn fill(ptr: NonNull<u8>, len: usize, seed: u8) {
    for i in 0..len {
        unsafe { ptr.as_ptr().add(i).write(seed.wrapping_add(i as u8)) };
    }
}

fn verify(ptr: NonNull<u8>, len: usize, seed: u8) {
    for i in 0..len {
        assert_eq!(unsafe { ptr.as_ptr().add(i).read() }, seed.wrapping_add(i as u8));
    }
}

#[test]
fn test_init() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    assert!(!allocator.is_initialized());
    assert_eq!(allocator.stats(), HeapStats::default());
    assert_eq!(allocator.check(false), Ok(()));

    allocator.init().unwrap();
    assert!(allocator.is_initialized());
    let stats = allocator.stats();
    assert_eq!(stats.heap_size, INITIAL_HEAP_SIZE + Config::DEFAULT_CHUNK_SIZE);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, Config::DEFAULT_CHUNK_SIZE);
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.bucket_lengths[bucket_index(Config::DEFAULT_CHUNK_SIZE)], 1);
    assert_consistent(&allocator);

    // A second init changes nothing.
    allocator.init().unwrap();
    assert_eq!(allocator.stats(), stats);
    assert_eq!(allocator.grower().used(), stats.heap_size);
}

#[test]
fn test_lazy_init() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    let p = allocator.allocate(1).unwrap();
    assert!(allocator.is_initialized());
    assert_eq!(p.as_ptr() as usize, heap_start(&allocator) + FIRST_BLOCK.offset());
    assert_consistent(&allocator);
}

#[test]
fn test_init_failure() {
    let mut buf = vec![0_u64; 1];
    let mut allocator = allocator(&mut buf);
    assert_eq!(
        allocator.init(),
        Err(AllocError::OutOfMemory {
            bytes: INITIAL_HEAP_SIZE,
            source: GrowError::Exhausted {
                requested: INITIAL_HEAP_SIZE
            },
        })
    );
    assert!(!allocator.is_initialized());
    assert!(allocator.allocate(8).is_none());
}

#[test]
fn test_first_chunk_does_not_fit() {
    // Room for the prologue and epilogue but not for the first chunk.
    let mut buf = vec![0_u64; 16];
    let mut allocator = allocator(&mut buf);
    assert!(matches!(
        allocator.init(),
        Err(AllocError::OutOfMemory { bytes: Config::DEFAULT_CHUNK_SIZE, .. })
    ));
    assert_eq!(allocator.stats().heap_size, INITIAL_HEAP_SIZE);
    assert_consistent(&allocator);
    assert!(allocator.allocate(8).is_none());
}

#[test]
fn test_zero_size() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    assert_eq!(allocator.try_allocate(0), Err(AllocError::ZeroSize));
    assert!(!allocator.is_initialized());
    assert_eq!(allocator.grower().used(), 0);

    allocator.init().unwrap();
    let stats = allocator.stats();
    assert!(allocator.allocate(0).is_none());
    assert!(allocator.zero_allocate(0, 8).is_none());
    assert!(allocator.zero_allocate(8, 0).is_none());
    assert_eq!(allocator.stats(), stats);
}

#[test]
fn test_too_large() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    assert_eq!(
        allocator.try_allocate(usize::MAX),
        Err(AllocError::TooLarge {
            requested: usize::MAX
        })
    );
    assert!(!allocator.is_initialized());

    allocator.init().unwrap();
    let stats = allocator.stats();
    assert!(allocator.allocate(MAX_BLOCK_SIZE).is_none());
    assert_eq!(allocator.stats(), stats);
}

#[test]
fn test_heap_limit() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    allocator.init().unwrap();
    let stats = allocator.stats();

    // The largest block there is, but the heap already holds the initial chunk.
    assert_eq!(
        allocator.try_allocate(MAX_BLOCK_SIZE - BLOCK_OVERHEAD),
        Err(AllocError::HeapLimit {
            bytes: MAX_BLOCK_SIZE
        })
    );
    assert_eq!(allocator.stats(), stats);
    assert_eq!(allocator.grower().used(), stats.heap_size);
}

#[test]
fn test_out_of_memory_keeps_heap() {
    let mut buf = vec![0_u64; 64];
    let mut allocator = allocator(&mut buf);
    let p = allocator.allocate(100).unwrap();
    fill(p, 100, 7);
    let stats = allocator.stats();

    assert_eq!(
        allocator.try_allocate(1000),
        Err(AllocError::OutOfMemory {
            bytes: 1008,
            source: GrowError::Exhausted { requested: 1008 },
        })
    );
    assert_eq!(allocator.stats(), stats);
    verify(p, 100, 7);
    assert_consistent(&allocator);

    // Whatever is left is still usable.
    assert!(allocator.allocate(100).is_some());
    assert_consistent(&allocator);
}

#[test]
fn test_alignment_and_usable_size() {
    let mut buf = vec![0_u64; 8 * 1024];
    let mut allocator = allocator(&mut buf);
    let mut ptrs = vec![];
    for size in 1..=200 {
        let p = allocator.allocate(size).unwrap();
        assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
        let usable = unsafe { allocator.usable_size(p) };
        assert!(usable >= size);
        ptrs.push((p, usable));
    }

    // No two allocations overlap.
    ptrs.sort_by_key(|(p, _)| p.as_ptr() as usize);
    for pair in ptrs.windows(2) {
        let ((a, len), (b, _)) = (pair[0], pair[1]);
        assert!(a.as_ptr() as usize + len + BLOCK_OVERHEAD <= b.as_ptr() as usize);
    }
    assert_eq!(allocator.stats().allocated_blocks, 200);
    assert_consistent(&allocator);
}

#[test]
fn test_release_none() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    unsafe { allocator.release(None) };
    assert!(!allocator.is_initialized());

    allocator.init().unwrap();
    let stats = allocator.stats();
    unsafe { allocator.release(None) };
    assert_eq!(allocator.stats(), stats);
}

#[test]
fn test_allocate_release_restores_heap() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    allocator.init().unwrap();
    let initial = allocator.stats();

    for size in [1, 8, 16, 24, 100, 380, 392] {
        let p = allocator.allocate(size).unwrap();
        unsafe { allocator.release(Some(p)) };
        assert_eq!(allocator.stats(), initial, "size {size}");
    }
    assert_consistent(&allocator);
}

#[test]
fn test_split() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    let p = allocator.allocate(16).unwrap();
    assert_eq!(unsafe { allocator.usable_size(p) }, 16);

    let stats = allocator.stats();
    let remainder = Config::DEFAULT_CHUNK_SIZE - 24;
    assert_eq!(stats.allocated_bytes, 24);
    assert_eq!(stats.free_bytes, remainder);
    assert_eq!(stats.bucket_lengths[bucket_index(remainder)], 1);
    assert_consistent(&allocator);
}

#[test]
fn test_no_split_below_min_block() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    // 392 byte block out of 400, the 8 byte rest can't be a block.
    let p = allocator.allocate(380).unwrap();
    assert_eq!(unsafe { allocator.usable_size(p) }, 392);

    let stats = allocator.stats();
    assert_eq!(stats.free_blocks, 0);
    assert_eq!(stats.allocated_bytes, Config::DEFAULT_CHUNK_SIZE);
    assert_consistent(&allocator);
}

#[test]
fn test_lifo_reuse() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    let ptrs: Vec<_> = (0..5).map(|_| allocator.allocate(16).unwrap()).collect();

    unsafe {
        // Neither has a free neighbor, both end up in the smallest bucket.
        allocator.release(Some(ptrs[1]));
        allocator.release(Some(ptrs[3]));
        assert_eq!(allocator.stats().bucket_lengths[0], 2);

        assert_eq!(allocator.allocate(16), Some(ptrs[3]));
        assert_eq!(allocator.allocate(16), Some(ptrs[1]));
    }
    assert_consistent(&allocator);
}

#[test]
fn test_reuse_after_release() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);

    // Forces a heap extension that merges with the free initial chunk.
    let p = allocator.allocate(1000).unwrap();
    assert_eq!(p.as_ptr() as usize, heap_start(&allocator) + FIRST_BLOCK.offset());
    let stats = allocator.stats();
    assert_eq!(stats.heap_size, INITIAL_HEAP_SIZE + Config::DEFAULT_CHUNK_SIZE + 1008);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, Config::DEFAULT_CHUNK_SIZE);
    assert_consistent(&allocator);

    // The released block is split again, handing out its front.
    unsafe { allocator.release(Some(p)) };
    let merged = Config::DEFAULT_CHUNK_SIZE + 1008;
    let stats = allocator.stats();
    assert_eq!(stats.free_bytes, merged);
    assert_eq!(stats.bucket_lengths[bucket_index(merged)], 1);

    let q = allocator.allocate(10).unwrap();
    assert_eq!(q, p);
    let rest = merged - 24;
    let stats = allocator.stats();
    assert_eq!(stats.free_bytes, rest);
    assert_eq!(stats.bucket_lengths[bucket_index(rest)], 1);

    // What the first 1000 bytes leave over after `q` still comes out of the same block.
    let r = allocator.allocate(1000 - 10 - BLOCK_OVERHEAD).unwrap();
    assert_eq!(r.as_ptr() as usize, q.as_ptr() as usize + 24);
    let rest = rest - 992;
    let stats = allocator.stats();
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, rest);
    assert_eq!(stats.bucket_lengths[bucket_index(merged)], 0);
    assert_eq!(stats.bucket_lengths[bucket_index(rest)], 1);
    assert_consistent(&allocator);
}

#[test]
fn test_extension_uses_chunk_size() {
    let mut buf = vec![0_u64; 1024];
    let config = Config::new().with_chunk_size(64).with_heap_checks(true);
    init_logging();
    let mut allocator = SegMalloc::with_config(ArenaGrower::new(&mut buf), config);

    let p = allocator.allocate(8).unwrap();
    assert_eq!(allocator.stats().heap_size, INITIAL_HEAP_SIZE + 64);
    // 112 bytes are needed, more than one chunk: the heap grows by exactly that.
    let q = allocator.allocate(100).unwrap();
    let stats = allocator.stats();
    assert_eq!(stats.heap_size, INITIAL_HEAP_SIZE + 64 + 112);
    assert_eq!(q.as_ptr() as usize, p.as_ptr() as usize + MIN_BLOCK_SIZE);
    assert_eq!(stats.free_bytes, 64 - MIN_BLOCK_SIZE);
    assert_consistent(&allocator);
}

#[test]
fn test_coalesce_every_order() {
    let orders = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in orders {
        let mut buf = vec![0_u64; 1024];
        let mut allocator = allocator(&mut buf);
        let blocks: Vec<_> = (0..3).map(|_| allocator.allocate(16).unwrap()).collect();
        // Keeps the third block from merging with the rest of the chunk.
        let _guard = allocator.allocate(16).unwrap();

        for index in order {
            unsafe { allocator.release(Some(blocks[index])) };
            assert_consistent(&allocator);
        }

        let stats = allocator.stats();
        assert_eq!(stats.free_blocks, 2, "order {order:?}");
        assert_eq!(stats.free_bytes, Config::DEFAULT_CHUNK_SIZE - 24, "order {order:?}");
        assert_eq!(stats.bucket_lengths[bucket_index(72)], 1, "order {order:?}");

        // The merged block starts at the first one and fits all three.
        assert_eq!(allocator.allocate(64), Some(blocks[0]), "order {order:?}");
    }
}

#[test]
fn test_reallocate_degenerate_cases() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    unsafe {
        let p = allocator.reallocate(None, 32).unwrap();
        assert_eq!(allocator.stats().allocated_blocks, 1);
        assert_eq!(allocator.try_reallocate(Some(p), 0), Ok(None));
        assert_eq!(allocator.stats().allocated_blocks, 0);
        assert_eq!(allocator.try_reallocate(None, 0), Ok(None));
    }
    assert_consistent(&allocator);
}

#[test]
fn test_reallocate_preserves_contents() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    unsafe {
        let p = allocator.allocate(40).unwrap();
        fill(p, 40, 3);

        let q = allocator.reallocate(Some(p), 200).unwrap();
        assert_ne!(q, p);
        verify(q, 40, 3);
        assert!(allocator.usable_size(q) >= 200);
        assert_eq!(allocator.stats().allocated_blocks, 1);

        let r = allocator.reallocate(Some(q), 8).unwrap();
        verify(r, 8, 3);
        assert_eq!(allocator.stats().allocated_blocks, 1);
    }
    assert_consistent(&allocator);
}

#[test]
fn test_failed_reallocate_keeps_old_block() {
    let mut buf = vec![0_u64; 64];
    let mut allocator = allocator(&mut buf);
    unsafe {
        let p = allocator.allocate(100).unwrap();
        fill(p, 100, 11);
        assert_eq!(
            allocator.try_reallocate(Some(p), usize::MAX),
            Err(AllocError::TooLarge {
                requested: usize::MAX
            })
        );
        assert!(allocator.reallocate(Some(p), 1000).is_none());
        verify(p, 100, 11);
        assert!(allocator.usable_size(p) >= 100);
        assert_eq!(allocator.stats().allocated_blocks, 1);
    }
    assert_consistent(&allocator);
}

#[test]
fn test_zero_allocate() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    let p = allocator.allocate(64).unwrap();
    unsafe {
        p.as_ptr().write_bytes(0xAB, 64);
        allocator.release(Some(p));
    }

    let q = allocator.zero_allocate(8, 8).unwrap();
    assert_eq!(q, p);
    let usable = unsafe { allocator.usable_size(q) };
    for i in 0..usable {
        assert_eq!(unsafe { q.as_ptr().add(i).read() }, 0);
    }
    assert_consistent(&allocator);
}

#[test]
fn test_zero_allocate_overflow() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    assert_eq!(
        allocator.try_zero_allocate(usize::MAX, 2),
        Err(AllocError::Overflow {
            count: usize::MAX,
            elem_size: 2
        })
    );
    assert!(allocator.zero_allocate(1 << 40, 1 << 40).is_none());
    assert!(!allocator.is_initialized());
}

#[test]
fn test_check_detects_footer_overwrite() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = unchecked_allocator(&mut buf);
    let p = allocator.allocate(16).unwrap();
    unsafe {
        // One word past the payload is the footer.
        let usable = allocator.usable_size(p);
        p.as_ptr().add(usable).cast::<u32>().write(0);
    }

    let violations = allocator.check(false).unwrap_err();
    assert!(violations.contains(&Violation::TagMismatch {
        addr: p.as_ptr() as usize,
        header: Tag::new(24, true),
        footer: Tag::new(0, false),
    }));
}

#[test]
fn test_check_detects_listed_allocated_block() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = unchecked_allocator(&mut buf);
    let p = allocator.allocate(16).unwrap();
    let remainder = Config::DEFAULT_CHUNK_SIZE - 24;
    let rest = unsafe { p.as_ptr().add(24) };
    let tag = Tag::new(remainder, true).encode();
    unsafe {
        rest.sub(4).cast::<u32>().write(tag);
        rest.add(remainder - 8).cast::<u32>().write(tag);
    }

    let violations = allocator.check(true).unwrap_err();
    assert!(violations.contains(&Violation::ListNodeAllocated {
        bucket: bucket_index(remainder),
        addr: rest as usize,
    }));
    assert!(violations.contains(&Violation::FreeCountMismatch {
        heap_scan: 0,
        listed: 1
    }));
}

#[test]
fn test_check_detects_adjacent_free_blocks() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = unchecked_allocator(&mut buf);
    let _a = allocator.allocate(16).unwrap();
    let b = allocator.allocate(16).unwrap();
    // Flags `b` free without listing or merging it.
    let tag = Tag::new(24, false).encode();
    unsafe {
        b.as_ptr().sub(4).cast::<u32>().write(tag);
        b.as_ptr().add(16).cast::<u32>().write(tag);
    }

    let violations = allocator.check(false).unwrap_err();
    assert!(violations.contains(&Violation::AdjacentFree {
        addr: b.as_ptr() as usize,
        next: b.as_ptr() as usize + 24,
    }));
    assert!(violations.contains(&Violation::FreeCountMismatch {
        heap_scan: 2,
        listed: 1
    }));
}

#[test]
fn test_check_detects_broken_epilogue() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = unchecked_allocator(&mut buf);
    allocator.init().unwrap();
    let heap_end = heap_start(&allocator) + allocator.stats().heap_size;
    unsafe { (heap_end as *mut u8).sub(4).cast::<u32>().write(0) };

    let violations = allocator.check(false).unwrap_err();
    assert_eq!(
        violations,
        vec![Violation::Epilogue {
            addr: heap_end,
            heap_end,
            expected: Tag::new(0, true),
            found: Tag::new(0, false),
        }]
    );
}

/// Overwrites the `u32` at `addr`.
unsafe fn poke(addr: usize, word: u32) {
    (addr as *mut u32).write(word)
}

/// An initialized allocator whose heap is a single free block at `FIRST_BLOCK`.
/// Returns the allocator and the address of that block.
fn single_free_block(buf: &mut [u64]) -> (SegMalloc<ArenaGrower<'_>>, usize) {
    let mut allocator = unchecked_allocator(buf);
    allocator.init().unwrap();
    let block = heap_start(&allocator) + FIRST_BLOCK.offset();
    (allocator, block)
}

#[test]
fn test_check_detects_broken_prologue() {
    let mut buf = vec![0_u64; 1024];
    let (allocator, block) = single_free_block(&mut buf);
    let prologue = block - FIRST_BLOCK.offset() + PROLOGUE.offset();
    unsafe { poke(prologue - 4, 0) };

    assert_eq!(
        allocator.check(false),
        Err(vec![Violation::Prologue {
            addr: prologue,
            expected: Tag::new(PROLOGUE_SIZE, true),
            header: Some(Tag::new(0, false)),
            footer: Some(Tag::new(PROLOGUE_SIZE, true)),
        }])
    );
}

#[test]
fn test_check_detects_block_past_heap_end() {
    let mut buf = vec![0_u64; 1024];
    let (allocator, block) = single_free_block(&mut buf);
    unsafe { poke(block - 4, Tag::new(800, false).encode()) };

    let violations = allocator.check(false).unwrap_err();
    assert!(violations.contains(&Violation::OutOfBounds {
        addr: block,
        size: 800,
        heap_end: block - FIRST_BLOCK.offset() + INITIAL_HEAP_SIZE + Config::DEFAULT_CHUNK_SIZE,
    }));
}

#[test]
fn test_check_detects_undersized_block() {
    let mut buf = vec![0_u64; 1024];
    let (allocator, block) = single_free_block(&mut buf);
    unsafe { poke(block - 4, Tag::new(8, false).encode()) };

    let violations = allocator.check(false).unwrap_err();
    assert!(violations.contains(&Violation::BlockTooSmall { addr: block, size: 8 }));
}

#[test]
fn test_check_detects_misaligned_link() {
    let mut buf = vec![0_u64; 1024];
    let (allocator, block) = single_free_block(&mut buf);
    let base = block - FIRST_BLOCK.offset();
    // `next_free` of the only listed block.
    unsafe { poke(block + 4, 28) };

    assert_eq!(
        allocator.check(false),
        Err(vec![Violation::Misaligned { addr: base + 28 }])
    );
}

#[test]
fn test_check_detects_link_out_of_heap() {
    let mut buf = vec![0_u64; 1024];
    let (allocator, block) = single_free_block(&mut buf);
    let base = block - FIRST_BLOCK.offset();
    unsafe { poke(block + 4, 4096) };

    assert_eq!(
        allocator.check(false),
        Err(vec![Violation::ListNodeOutOfBounds {
            bucket: bucket_index(Config::DEFAULT_CHUNK_SIZE),
            addr: base + 4096,
        }])
    );
}

#[test]
fn test_check_detects_broken_back_link() {
    let mut buf = vec![0_u64; 1024];
    let (allocator, block) = single_free_block(&mut buf);
    let base = block - FIRST_BLOCK.offset();
    // The head of a bucket must not have a `prev_free`.
    unsafe { poke(block, 40) };

    assert_eq!(
        allocator.check(false),
        Err(vec![Violation::BrokenLink {
            bucket: bucket_index(Config::DEFAULT_CHUNK_SIZE),
            addr: block,
            expected: None,
            found: Some(base + 40),
        }])
    );
}

#[test]
fn test_check_detects_list_cycle() {
    let mut buf = vec![0_u64; 1024];
    let (allocator, block) = single_free_block(&mut buf);
    // `next_free` points back to the block itself.
    unsafe { poke(block + 4, FIRST_BLOCK.offset() as u32) };

    assert_eq!(
        allocator.check(true),
        Err(vec![Violation::ListCycle {
            bucket: bucket_index(Config::DEFAULT_CHUNK_SIZE),
        }])
    );
}

#[test]
fn test_check_detects_wrong_bucket() {
    let mut buf = vec![0_u64; 1024];
    let (allocator, block) = single_free_block(&mut buf);
    // Carve the listed 400 byte block into 24 free and 376 allocated bytes, behind the
    // buckets' back.
    let small = Tag::new(24, false).encode();
    let large = Tag::new(Config::DEFAULT_CHUNK_SIZE - 24, true).encode();
    unsafe {
        poke(block - 4, small);
        poke(block + 16, small);
        poke(block + 20, large);
        poke(block + Config::DEFAULT_CHUNK_SIZE - 8, large);
    }

    assert_eq!(
        allocator.check(false),
        Err(vec![Violation::WrongBucket {
            addr: block,
            size: 24,
            bucket: bucket_index(Config::DEFAULT_CHUNK_SIZE),
            expected: 0,
        }])
    );
}

/// Grows like the wrapped arena but never admits to having handed anything out.
struct BoundlessGrower<'a>(ArenaGrower<'a>);

unsafe impl Grower for BoundlessGrower<'_> {
    fn grow(&mut self, size: usize) -> Result<NonNull<u8>, GrowError> {
        self.0.grow(size)
    }

    fn bounds(&self) -> Option<(NonNull<u8>, NonNull<u8>)> {
        None
    }
}

#[test]
fn test_check_detects_heap_outside_grower() {
    let mut buf = vec![0_u64; 1024];
    let start = buf.as_ptr() as usize;
    init_logging();
    let config = Config::new().with_heap_checks(false);
    let mut allocator = SegMalloc::with_config(BoundlessGrower(ArenaGrower::new(&mut buf)), config);
    allocator.init().unwrap();

    let heap_size = allocator.stats().heap_size;
    assert_eq!(
        allocator.check(false),
        Err(vec![Violation::HeapBounds {
            heap_lo: start,
            heap_hi: start + heap_size - 1,
            grower: None,
        }])
    );
}

#[test]
#[should_panic(expected = "heap consistency check failed")]
fn test_automatic_check_panics() {
    let mut buf = vec![0_u64; 1024];
    let mut allocator = allocator(&mut buf);
    let p = allocator.allocate(16).unwrap();
    unsafe { p.as_ptr().add(16).cast::<u32>().write(0) };
    let _ = allocator.allocate(16);
}
