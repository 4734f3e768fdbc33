//! The heap consistency checker.
//!
//! [`SegMalloc::check`] walks every block from the prologue to the epilogue and every
//! bucket from head to tail. It only ever reads through the bounds-checked accessors of
//! [`Heap`], so a corrupt heap can make it report garbage but never read out of bounds or
//! loop forever.
//!
//! Bytes lost to a corrupt size show up as a walk that misses the epilogue
//! ([`Violation::Epilogue`] or [`Violation::OutOfBounds`]).

use core::ptr::NonNull;
use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::SegMalloc;
use crate::block::{BlockRef, Heap, FIRST_BLOCK, PROLOGUE, PROLOGUE_SIZE};
use crate::freelist::{bucket_index, Buckets, NUM_BUCKETS};
use crate::growers::Grower;
use crate::header::{Tag, ALIGNMENT, MIN_BLOCK_SIZE, TAG_SIZE};

/// A structural invariant the checker found broken. Addresses are absolute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("prologue at {addr:#x} should be {expected}, found header {header:?} and footer {footer:?}")]
    Prologue {
        addr: usize,
        expected: Tag,
        header: Option<Tag>,
        footer: Option<Tag>,
    },
    #[error("epilogue at {addr:#x} should be {expected} at the heap end {heap_end:#x}, found {found}")]
    Epilogue {
        addr: usize,
        heap_end: usize,
        expected: Tag,
        found: Tag,
    },
    #[error("block at {addr:#x} is misaligned")]
    Misaligned { addr: usize },
    #[error("block at {addr:#x} of size {size} reaches past the heap end {heap_end:#x}")]
    OutOfBounds {
        addr: usize,
        size: usize,
        heap_end: usize,
    },
    #[error("block at {addr:#x} has size {size}, below the minimum block size")]
    BlockTooSmall { addr: usize, size: usize },
    #[error("block at {addr:#x} has header {header} but footer {footer}")]
    TagMismatch { addr: usize, header: Tag, footer: Tag },
    #[error("free blocks at {addr:#x} and {next:#x} are adjacent")]
    AdjacentFree { addr: usize, next: usize },
    #[error("bucket {bucket} links to {addr:#x}, outside of the heap")]
    ListNodeOutOfBounds { bucket: usize, addr: usize },
    #[error("bucket {bucket} lists {addr:#x}, which is not free")]
    ListNodeAllocated { bucket: usize, addr: usize },
    #[error("block at {addr:#x} in bucket {bucket} links back to {} instead of {}", link(.found), link(.expected))]
    BrokenLink {
        bucket: usize,
        addr: usize,
        expected: Option<usize>,
        found: Option<usize>,
    },
    #[error("block at {addr:#x} of size {size} belongs in bucket {expected}, found in bucket {bucket}")]
    WrongBucket {
        addr: usize,
        size: usize,
        bucket: usize,
        expected: usize,
    },
    #[error("bucket {bucket} runs into a block it already listed")]
    ListCycle { bucket: usize },
    #[error("the heap holds {heap_scan} free blocks but the buckets list {listed}")]
    FreeCountMismatch { heap_scan: usize, listed: usize },
    #[error("heap {heap_lo:#x}..={heap_hi:#x} is not within the grower bounds {}", bounds(.grower))]
    HeapBounds {
        heap_lo: usize,
        heap_hi: usize,
        grower: Option<(usize, usize)>,
    },
}

impl Violation {
    /// The offending address, if the violation is tied to one.
    pub fn addr(&self) -> Option<usize> {
        match *self {
            Violation::Prologue { addr, .. }
            | Violation::Epilogue { addr, .. }
            | Violation::Misaligned { addr }
            | Violation::OutOfBounds { addr, .. }
            | Violation::BlockTooSmall { addr, .. }
            | Violation::TagMismatch { addr, .. }
            | Violation::AdjacentFree { addr, .. }
            | Violation::ListNodeOutOfBounds { addr, .. }
            | Violation::ListNodeAllocated { addr, .. }
            | Violation::BrokenLink { addr, .. }
            | Violation::WrongBucket { addr, .. } => Some(addr),
            Violation::HeapBounds { heap_lo, .. } => Some(heap_lo),
            Violation::ListCycle { .. } | Violation::FreeCountMismatch { .. } => None,
        }
    }
}

fn link(addr: &Option<usize>) -> String {
    match addr {
        Some(addr) => format!("{addr:#x}"),
        None => "none".to_owned(),
    }
}

fn bounds(grower: &Option<(usize, usize)>) -> String {
    match grower {
        Some((lo, hi)) => format!("{lo:#x}..={hi:#x}"),
        None => "none".to_owned(),
    }
}

impl<G: Grower> SegMalloc<G> {
    /// Verifies every structural invariant of the heap and the buckets.
    ///
    /// Returns every violation found. The check never modifies the heap.
    /// With `verbose` set every block is logged at `debug` level.
    #[instrument(level = "debug", skip(self))]
    pub fn check(&self, verbose: bool) -> Result<(), Vec<Violation>> {
        if !self.initialized {
            return Ok(());
        }

        let mut violations = vec![];
        let heap = &self.heap;

        check_bounds(heap, self.grower.bounds(), &mut violations);
        check_prologue(heap, &mut violations);
        let heap_scan = check_blocks(heap, verbose, &mut violations);
        let listed = check_buckets(heap, &self.buckets, &mut violations);

        if let Some(heap_scan) = heap_scan {
            if heap_scan != listed {
                violations.push(Violation::FreeCountMismatch { heap_scan, listed });
            }
        }

        if verbose {
            debug!(free_blocks = listed, violations = violations.len(), "Heap check done.");
        }
        if violations.is_empty() {
            Ok(())
        } else {
            warn!(violations = violations.len(), "Heap check failed.");
            Err(violations)
        }
    }
}

fn check_bounds(
    heap: &Heap,
    grower: Option<(NonNull<u8>, NonNull<u8>)>,
    violations: &mut Vec<Violation>,
) {
    let heap_lo = heap.address(0);
    let heap_hi = heap.address(heap.len() - 1);
    let grower = grower.map(|(lo, hi)| (lo.as_ptr() as usize, hi.as_ptr() as usize));

    if heap_lo % ALIGNMENT != 0 {
        violations.push(Violation::Misaligned { addr: heap_lo });
    }
    match grower {
        Some((lo, hi)) if lo <= heap_lo && heap_hi <= hi => {}
        _ => violations.push(Violation::HeapBounds {
            heap_lo,
            heap_hi,
            grower,
        }),
    }
}

fn check_prologue(heap: &Heap, violations: &mut Vec<Violation>) {
    let expected = Tag::new(PROLOGUE_SIZE, true);
    let header = heap.try_tag(Heap::header_at(PROLOGUE));
    let footer = heap.try_tag(Heap::footer_at(PROLOGUE, PROLOGUE_SIZE));
    if header != Some(expected) || footer != Some(expected) {
        violations.push(Violation::Prologue {
            addr: heap.address(PROLOGUE.offset()),
            expected,
            header,
            footer,
        });
    }
}

/// Walks the blocks between the prologue and the epilogue.
/// Returns the number of free blocks, or `None` if the walk couldn't reach the epilogue.
fn check_blocks(heap: &Heap, verbose: bool, violations: &mut Vec<Violation>) -> Option<usize> {
    let len = heap.len();
    let heap_end = heap.address(len);
    let mut free_blocks = 0;
    let mut last_free: Option<usize> = None;
    let mut offset = FIRST_BLOCK.offset();

    loop {
        let addr = heap.address(offset);
        let Some(header) = heap.try_tag(offset - TAG_SIZE) else {
            violations.push(Violation::OutOfBounds {
                addr,
                size: 0,
                heap_end,
            });
            return None;
        };
        let size = header.size();

        if size == 0 {
            let expected = Tag::new(0, true);
            if offset != len || header != expected {
                violations.push(Violation::Epilogue {
                    addr,
                    heap_end,
                    expected,
                    found: header,
                });
            }
            if offset != len {
                return None;
            }
            break;
        }
        if size < MIN_BLOCK_SIZE {
            violations.push(Violation::BlockTooSmall { addr, size });
            return None;
        }
        let end = match offset.checked_add(size) {
            Some(end) if end <= len => end,
            _ => {
                violations.push(Violation::OutOfBounds {
                    addr,
                    size,
                    heap_end,
                });
                return None;
            }
        };

        // In bounds, the footer sits below the next header.
        let footer = heap.try_tag(Heap::footer_at(BlockRef::from_offset(offset), size));
        match footer {
            Some(footer) if footer == header => {}
            Some(footer) => violations.push(Violation::TagMismatch {
                addr,
                header,
                footer,
            }),
            None => violations.push(Violation::OutOfBounds {
                addr,
                size,
                heap_end,
            }),
        }
        if verbose {
            debug!(addr = format_args!("{addr:#x}"), %header, footer = ?footer, "Block.");
        }

        if header.is_free() {
            free_blocks += 1;
            if let Some(prev) = last_free {
                violations.push(Violation::AdjacentFree { addr: prev, next: addr });
            }
            last_free = Some(addr);
        } else {
            last_free = None;
        }

        offset = end;
    }
    Some(free_blocks)
}

/// Walks every bucket and returns the number of blocks listed in total.
fn check_buckets(heap: &Heap, buckets: &Buckets, violations: &mut Vec<Violation>) -> usize {
    let addr_of = |block: BlockRef| heap.address(block.offset());
    let mut listed = 0;

    for bucket in 0..NUM_BUCKETS {
        let mut expected_prev: Option<BlockRef> = None;
        let mut p = buckets.head(bucket);
        let mut seen = HashSet::new();

        while let Some(block) = p {
            if !seen.insert(block) {
                violations.push(Violation::ListCycle { bucket });
                break;
            }
            let addr = addr_of(block);

            if block.offset() % ALIGNMENT != 0 {
                violations.push(Violation::Misaligned { addr });
                break;
            }
            let in_heap = block >= FIRST_BLOCK && block.offset() + MIN_BLOCK_SIZE <= heap.len();
            let node = in_heap
                .then(|| Some((heap.try_tag(Heap::header_at(block))?, heap.try_links(block)?)))
                .flatten();
            let Some((header, (prev, next))) = node else {
                violations.push(Violation::ListNodeOutOfBounds { bucket, addr });
                break;
            };

            if header.is_allocated() {
                violations.push(Violation::ListNodeAllocated { bucket, addr });
            }
            let expected = bucket_index(header.size());
            if expected != bucket {
                violations.push(Violation::WrongBucket {
                    addr,
                    size: header.size(),
                    bucket,
                    expected,
                });
            }

            listed += 1;
            // Past a broken link the rest of the list can't be trusted.
            if prev != expected_prev {
                violations.push(Violation::BrokenLink {
                    bucket,
                    addr,
                    expected: expected_prev.map(addr_of),
                    found: prev.map(addr_of),
                });
                break;
            }
            expected_prev = Some(block);
            p = next;
        }
    }
    listed
}
