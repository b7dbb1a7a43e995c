use std::{
  cell::Cell,
  collections::HashSet,
  panic::{self, AssertUnwindSafe},
  ptr::NonNull,
  sync::{Arc, Mutex},
  thread,
};

use blockalloc::{
  AllocError, AllocatorConfig, Backing, BlockAllocator, CountingReporter, Fault, FaultKind, PanicOnFault,
  SystemBacking,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;

/// Delegates to the C heap but refuses the `fail_at`-th acquisition.
struct FailingBacking<'a> {
  fail_at: Option<usize>,
  acquired: &'a Cell<usize>,
  outstanding: &'a Cell<usize>,
}

unsafe impl Backing for FailingBacking<'_> {
  fn acquire(
    &self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    let call = self.acquired.get();
    self.acquired.set(call + 1);
    if self.fail_at == Some(call) {
      return None;
    }
    let ptr = SystemBacking.acquire(bytes)?;
    self.outstanding.set(self.outstanding.get() + 1);
    Some(ptr)
  }

  unsafe fn release(
    &self,
    ptr: NonNull<u8>,
    bytes: usize,
  ) {
    self.outstanding.set(self.outstanding.get() - 1);
    unsafe { SystemBacking.release(ptr, bytes) }
  }
}

fn config(
  block: usize,
  total: usize,
  header: bool,
  stomp: bool,
) -> AllocatorConfig {
  AllocatorConfig::new(block, total)
    .with_debug_header(header)
    .with_stomp_detection(stomp)
}

#[rstest]
#[case::plain(false, false)]
#[case::header(true, false)]
#[case::stomp(false, true)]
#[case::both(true, true)]
fn scenario_single_block_round_trip(
  #[case] header: bool,
  #[case] stomp: bool,
) {
  let reporter = CountingReporter::new();
  let mut allocator = BlockAllocator::with_reporter(config(12, 12, header, stomp), &reporter).unwrap();
  assert_eq!(allocator.total_blocks(), 1);

  let first = allocator.allocate(None).unwrap();
  assert!(allocator.allocate(None).is_none());

  allocator.release(first.as_ptr());
  assert!(!allocator.bitmap().test(0));

  let third = allocator.allocate(None).unwrap();
  assert_eq!(third, first);

  allocator.teardown();
  assert_eq!(reporter.count(), 0);
}

#[rstest]
#[case::plain(false, false)]
#[case::header(true, false)]
#[case::stomp(false, true)]
#[case::both(true, true)]
fn scenario_exhaust_large_arena(
  #[case] header: bool,
  #[case] stomp: bool,
) {
  let mut allocator = BlockAllocator::new(config(640, 4 * 1024 * 1024, header, stomp)).unwrap();
  assert_eq!(allocator.total_blocks(), 6553);

  let mut seen = HashSet::new();
  let blocks: Vec<_> = (0..6553)
    .map(|i| {
      let block = allocator.allocate(None).unwrap();
      assert!(allocator.bitmap().test(i));
      assert!(seen.insert(block));
      block
    })
    .collect();
  assert!(allocator.allocate(None).is_none());
  assert_eq!(allocator.free_blocks(), 0);

  for (i, block) in blocks.iter().enumerate() {
    allocator.release(block.as_ptr());
    assert!(!allocator.bitmap().test(i));
  }
  assert_eq!(allocator.used_blocks(), 0);
}

#[rstest]
#[case::plain(false, false)]
#[case::both(true, true)]
fn nearly_full_allocator_hands_out_last_block(
  #[case] header: bool,
  #[case] stomp: bool,
) {
  let mut allocator = BlockAllocator::new(config(640, 4 * 1024 * 1024, header, stomp)).unwrap();
  let last_index = allocator.total_blocks() - 1;

  for _ in 0..last_index {
    allocator.allocate(None).unwrap();
  }
  let last = allocator.allocate(None).unwrap();

  assert!(allocator.bitmap().test(last_index));
  assert_eq!(last.as_ptr() as *const u8, unsafe {
    allocator
      .arena_base()
      .add(last_index * allocator.stride() + allocator.data_offset())
  });
}

#[rstest]
#[case::plain(false, false, 0)]
#[case::header(true, false, 8)]
#[case::stomp(false, true, 8)]
#[case::both(true, true, 16)]
fn layout_grows_with_features(
  #[case] header: bool,
  #[case] stomp: bool,
  #[case] data_offset: usize,
) {
  let allocator = BlockAllocator::new(config(100, 1000, header, stomp)).unwrap();
  let instrumentation = usize::from(header) * 8 + usize::from(stomp) * 16;

  assert_eq!(allocator.total_blocks(), 10);
  assert_eq!(allocator.stride(), 100 + instrumentation);
  assert_eq!(allocator.data_offset(), data_offset);
  assert_eq!(allocator.total_size(), 10 * allocator.stride());
}

#[rstest]
#[case::arena(0)]
#[case::bitmap(1)]
fn backing_failure_releases_everything(#[case] fail_at: usize) {
  let acquired = Cell::new(0);
  let outstanding = Cell::new(0);
  let backing = FailingBacking {
    fail_at: Some(fail_at),
    acquired: &acquired,
    outstanding: &outstanding,
  };

  let result = BlockAllocator::with_parts(config(640, 4 * 1024 * 1024, true, true), CountingReporter::new(), backing);

  assert!(matches!(result, Err(AllocError::OutOfMemory { .. })));
  assert_eq!(acquired.get(), fail_at + 1);
  assert_eq!(outstanding.get(), 0);
}

#[test]
fn teardown_returns_both_buffers() {
  let acquired = Cell::new(0);
  let outstanding = Cell::new(0);
  let backing = FailingBacking {
    fail_at: None,
    acquired: &acquired,
    outstanding: &outstanding,
  };

  let mut allocator = BlockAllocator::with_parts(config(64, 4096, false, false), CountingReporter::new(), backing).unwrap();
  allocator.allocate(None).unwrap();
  assert_eq!(outstanding.get(), 2);

  allocator.teardown();
  assert_eq!(acquired.get(), 2);
  assert_eq!(outstanding.get(), 0);
}

#[test]
fn teardown_returns_buffers_when_the_sweep_panics() {
  let acquired = Cell::new(0);
  let outstanding = Cell::new(0);
  let backing = FailingBacking {
    fail_at: None,
    acquired: &acquired,
    outstanding: &outstanding,
  };

  let mut allocator = BlockAllocator::with_parts(config(32, 256, true, true), PanicOnFault, backing).unwrap();
  let block = allocator.allocate(None).unwrap();
  unsafe { block.as_ptr().sub(1).write(0) };

  let result = panic::catch_unwind(AssertUnwindSafe(|| allocator.teardown()));

  assert!(result.is_err());
  assert_eq!(acquired.get(), 2);
  assert_eq!(outstanding.get(), 0);
}

#[rstest]
#[case::pre_guard_edge(-1)]
#[case::pre_guard_far(-8)]
#[case::post_guard_edge(32)]
#[case::post_guard_far(39)]
fn single_byte_stomp_is_flagged(#[case] offset: isize) {
  let reporter = CountingReporter::new();
  let mut allocator = BlockAllocator::with_reporter(config(32, 32 * 8, true, true), &reporter).unwrap();

  let neighbour = allocator.allocate(None).unwrap();
  let block = allocator.allocate(None).unwrap();
  unsafe { block.as_ptr().offset(offset).write(0x00) };

  allocator.check_for_corruption();
  assert_eq!(reporter.count(), 1);
  assert_eq!(reporter.count_kind(FaultKind::Corruption), 1);

  reporter.clear();
  allocator.release(neighbour.as_ptr());
  assert_eq!(reporter.count(), 0);

  allocator.release(block.as_ptr());
  assert!(matches!(reporter.faults().as_slice(), [Fault::GuardCorrupted { index: 1, .. }]));
}

#[test]
fn allocator_can_be_shared_behind_a_mutex() {
  let allocator = Arc::new(Mutex::new(BlockAllocator::new(AllocatorConfig::new(64, 64 * 32)).unwrap()));

  let handles: Vec<_> = (0..4)
    .map(|_| {
      let allocator = Arc::clone(&allocator);
      thread::spawn(move || {
        for _ in 0..8 {
          let mut allocator = allocator.lock().unwrap();
          let block = allocator.allocate(None).unwrap();
          allocator.release(block.as_ptr());
        }
      })
    })
    .collect();

  for handle in handles {
    handle.join().unwrap();
  }
  assert_eq!(allocator.lock().unwrap().used_blocks(), 0);
}

proptest! {
  #[test]
  fn prop_total_blocks_matches_division(
    block in 1usize..512,
    extra in 0usize..8192,
    header in any::<bool>(),
    stomp in any::<bool>(),
  ) {
    let allocator = BlockAllocator::new(config(block, block + extra, header, stomp)).unwrap();

    prop_assert_eq!(allocator.total_blocks(), (block + extra) / block);
    prop_assert!(allocator.bitmap().as_bytes().iter().all(|&byte| byte == 0));
  }

  #[test]
  fn prop_released_subset_leaves_exact_bits(
    k in 1usize..64,
    release_mask in proptest::collection::vec(any::<bool>(), 64),
    stomp in any::<bool>(),
  ) {
    let mut allocator = BlockAllocator::new(config(24, 24 * 64, false, stomp)).unwrap();
    let blocks: Vec<_> = (0..k).map(|_| allocator.allocate(None).unwrap()).collect();

    let mut kept = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
      if release_mask[index] {
        allocator.release(block.as_ptr());
      } else {
        kept.push(index);
      }
    }

    prop_assert_eq!(allocator.used_blocks(), kept.len());
    prop_assert_eq!(allocator.bitmap().iter_set().collect::<Vec<_>>(), kept);
  }

  #[test]
  fn prop_allocation_takes_lowest_free_index(
    frees in proptest::collection::vec(0usize..16, 1..8),
  ) {
    let mut allocator = BlockAllocator::new(config(16, 16 * 16, true, false)).unwrap();
    let blocks: Vec<_> = (0..16).map(|_| allocator.allocate(None).unwrap()).collect();

    let mut freed = frees;
    freed.sort_unstable();
    freed.dedup();
    for &index in &freed {
      allocator.release(blocks[index].as_ptr());
    }

    for &index in &freed {
      prop_assert_eq!(allocator.allocate(None), Some(blocks[index]));
    }
    prop_assert!(allocator.allocate(None).is_none());
  }

  #[test]
  fn prop_round_trip_returns_same_address(rounds in 1usize..32) {
    let mut allocator = BlockAllocator::new(config(48, 48 * 10, true, true)).unwrap();
    let first = allocator.allocate(None).unwrap();
    allocator.release(first.as_ptr());

    for _ in 0..rounds {
      let block = allocator.allocate(None).unwrap();
      prop_assert_eq!(block, first);
      allocator.release(block.as_ptr());
    }
  }
}
