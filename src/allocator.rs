use std::{fmt, ops::Range, ptr::NonNull};

use crate::{
  AllocError, AllocatorConfig,
  backing::{Backing, Region, SystemBacking},
  bitmap::Bitmap,
  fault::{Fault, FaultReporter, GuardRegion, PanicOnFault},
  header::{AllocatorDump, BlockView, CallSite, HEADER_BYTES, HeaderView, LiveBlock, SiteTable},
  layout::Layout,
  stomp::{check_guard, write_guard},
};

/// Hands out equal-size blocks from one preallocated arena.
///
/// The arena and the bitmap are acquired once, in the constructor, and
/// returned when the allocator is dropped. Allocation takes the lowest free
/// block; nothing ever grows.
pub struct BlockAllocator<R: FaultReporter = PanicOnFault, B: Backing = SystemBacking> {
  config: AllocatorConfig,
  layout: Layout,
  arena: Region,
  bitmap: Bitmap<Region>,
  sites: SiteTable,
  reporter: R,
  backing: B,
}

// SAFETY: the arena and bitmap regions are owned exclusively by the
// allocator; moving it to another thread moves that ownership with it.
unsafe impl<R: FaultReporter + Send, B: Backing + Send> Send for BlockAllocator<R, B> {}

impl BlockAllocator {
  /// Builds an allocator on the C heap that panics on faults.
  pub fn new(config: AllocatorConfig) -> Result<Self, AllocError> {
    Self::with_parts(config, PanicOnFault, SystemBacking)
  }
}

impl<R: FaultReporter> BlockAllocator<R> {
  pub fn with_reporter(
    config: AllocatorConfig,
    reporter: R,
  ) -> Result<Self, AllocError> {
    Self::with_parts(config, reporter, SystemBacking)
  }
}

impl<R: FaultReporter, B: Backing> BlockAllocator<R, B> {
  /// Builds an allocator drawing its memory from `backing`.
  ///
  /// Sizes that cannot hold a single block are a fault. If the backing
  /// refuses either buffer, whatever was already acquired is handed back
  /// before returning.
  pub fn with_parts(
    config: AllocatorConfig,
    reporter: R,
    backing: B,
  ) -> Result<Self, AllocError> {
    if let Err(fault) = config.validate() {
      reporter.report(fault);
      return Err(AllocError::InvalidLayout {
        block_data_size: config.block_data_size,
        total_size: config.total_size,
      });
    }

    let layout = Layout::compute(&config)?;

    let arena = Region::acquire(&backing, layout.total_size()).ok_or(AllocError::OutOfMemory {
      bytes: layout.total_size(),
    })?;

    let Some(bitmap) = Region::acquire(&backing, layout.bitmap_bytes()) else {
      unsafe { arena.release(&backing) };
      return Err(AllocError::OutOfMemory {
        bytes: layout.bitmap_bytes(),
      });
    };

    tracing::debug!(
      block_data_size = layout.block_data_size(),
      stride = layout.stride(),
      data_offset = layout.data_offset(),
      total_blocks = layout.total_blocks(),
      total_size = layout.total_size(),
      "block allocator initialized"
    );

    Ok(Self {
      config,
      layout,
      arena,
      bitmap: Bitmap::new(bitmap, layout.total_blocks()),
      sites: SiteTable::default(),
      reporter,
      backing,
    })
  }

  /// Takes the lowest free block and returns its data address, or `None`
  /// when every block is in use.
  ///
  /// `call_site` is recorded in the block's debug header, if there is one.
  pub fn allocate(
    &mut self,
    call_site: Option<CallSite>,
  ) -> Option<NonNull<u8>> {
    let index = self.bitmap.first_clear()?;
    self.bitmap.set(index);

    if let Some(range) = self.layout.header_range(index) {
      self.sites.encode(call_site, self.arena.bytes_mut(range));
    }
    if let Some(range) = self.layout.pre_guard_range(index) {
      write_guard(GuardRegion::Pre, self.arena.bytes_mut(range));
    }
    if let Some(range) = self.layout.post_guard_range(index) {
      write_guard(GuardRegion::Post, self.arena.bytes_mut(range));
    }

    Some(self.arena.ptr_at(self.layout.data_range(index).start))
  }

  /// Returns a block to the free pool. Null is ignored.
  ///
  /// A pointer that is not the data address of an allocated block is a
  /// fault and leaves the bitmap alone. Damaged guards are a fault too, but
  /// the block is still freed.
  pub fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }
    let Some(index) = self.locate(ptr) else {
      return;
    };
    if !self.bitmap.test(index) {
      self.reporter.report(Fault::NotAllocated { index });
      return;
    }

    self.check_block(index);
    self.bitmap.clear(index);
  }

  /// Whether `ptr` is the data address of a block currently handed out.
  ///
  /// Null is simply not allocated; any other foreign pointer is a fault.
  pub fn is_allocated(
    &self,
    ptr: *const u8,
  ) -> bool {
    if ptr.is_null() {
      return false;
    }
    self
      .locate(ptr)
      .is_some_and(|index| self.bitmap.test(index))
  }

  /// Validates the guards of every allocated block, lowest index first.
  pub fn check_for_corruption(&self) {
    if !self.layout.has_guards() {
      return;
    }
    for index in self.bitmap.iter_set() {
      self.check_block(index);
    }
  }

  /// Drops the allocator, sweeping live blocks for corruption first.
  pub fn teardown(self) {
    drop(self)
  }

  /// Every allocated block with the call site that allocated it.
  pub fn dump_state(&self) -> AllocatorDump {
    let live = self
      .bitmap
      .iter_set()
      .map(|index| LiveBlock {
        index,
        call_site: self.call_site(index),
      })
      .collect();

    AllocatorDump {
      total_blocks: self.layout.total_blocks(),
      live,
    }
  }

  /// The raw contents of the block `ptr` points into, split along the
  /// layout. Works on free blocks as well; null is `None`.
  pub fn inspect_block(
    &self,
    ptr: *const u8,
  ) -> Option<BlockView> {
    if ptr.is_null() {
      return None;
    }
    let index = self.locate(ptr)?;

    let header = self.layout.header_range(index).map(|range| {
      let mut raw = [0u8; HEADER_BYTES];
      raw.copy_from_slice(self.arena.bytes(range));
      HeaderView {
        call_site: self.sites.decode(&raw),
        raw,
      }
    });
    let guard = |range: Option<Range<usize>>| range.map(|range| self.arena.bytes(range).to_vec());

    Some(BlockView {
      index,
      allocated: self.bitmap.test(index),
      stride: self.layout.stride(),
      header,
      pre_guard: guard(self.layout.pre_guard_range(index)),
      data: self.arena.bytes(self.layout.data_range(index)).to_vec(),
      post_guard: guard(self.layout.post_guard_range(index)),
    })
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn layout(&self) -> &Layout {
    &self.layout
  }

  pub fn block_data_size(&self) -> usize {
    self.layout.block_data_size()
  }

  pub fn stride(&self) -> usize {
    self.layout.stride()
  }

  pub fn data_offset(&self) -> usize {
    self.layout.data_offset()
  }

  pub fn total_blocks(&self) -> usize {
    self.layout.total_blocks()
  }

  pub fn total_size(&self) -> usize {
    self.layout.total_size()
  }

  pub fn used_blocks(&self) -> usize {
    self.bitmap.count_ones()
  }

  pub fn free_blocks(&self) -> usize {
    self.layout.total_blocks() - self.bitmap.count_ones()
  }

  pub fn bitmap(&self) -> &Bitmap<Region> {
    &self.bitmap
  }

  /// First byte of the arena. Block `i` starts at `arena_base() + i * stride()`.
  pub fn arena_base(&self) -> *const u8 {
    self.arena.base()
  }

  pub fn reporter(&self) -> &R {
    &self.reporter
  }

  fn locate(
    &self,
    ptr: *const u8,
  ) -> Option<usize> {
    match self.layout.locate(self.arena.base().addr(), ptr.addr()) {
      Ok(index) => Some(index),
      Err(fault) => {
        self.reporter.report(fault);
        None
      }
    }
  }

  fn call_site(
    &self,
    index: usize,
  ) -> Option<CallSite> {
    let range = self.layout.header_range(index)?;
    self.sites.decode(self.arena.bytes(range))
  }

  /// Reports every damaged guard of block `index`.
  fn check_block(
    &self,
    index: usize,
  ) {
    let guards = [
      (GuardRegion::Pre, self.layout.pre_guard_range(index)),
      (GuardRegion::Post, self.layout.post_guard_range(index)),
    ];

    for (region, range) in guards {
      let Some(range) = range else {
        continue;
      };
      if let Err(fault) = check_guard(index, region, self.arena.bytes(range)) {
        self.reporter.report(fault);
      }
    }
  }
}

/// Hands both buffers back when dropped, even while a fault reported by the
/// teardown sweep unwinds.
struct ReleaseOnExit<'a, B: Backing> {
  arena: &'a Region,
  bitmap: &'a Region,
  backing: &'a B,
}

impl<B: Backing> Drop for ReleaseOnExit<'_, B> {
  fn drop(&mut self) {
    unsafe {
      self.arena.release(self.backing);
      self.bitmap.release(self.backing);
    }
  }
}

impl<R: FaultReporter, B: Backing> Drop for BlockAllocator<R, B> {
  fn drop(&mut self) {
    tracing::debug!(
      used_blocks = self.bitmap.count_ones(),
      total_blocks = self.layout.total_blocks(),
      call_sites = self.sites.len(),
      "block allocator torn down"
    );

    let _release = ReleaseOnExit {
      arena: &self.arena,
      bitmap: self.bitmap.storage(),
      backing: &self.backing,
    };

    if !std::thread::panicking() {
      self.check_for_corruption();
    }
  }
}

impl<R: FaultReporter, B: Backing> fmt::Debug for BlockAllocator<R, B> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("BlockAllocator")
      .field("layout", &self.layout)
      .field("arena", &self.arena.base())
      .field("used_blocks", &self.used_blocks())
      .finish()
  }
}
