//! Arena geometry.
//!
//! ```text
//!   One block (stride bytes), both features enabled:
//!
//!   ┌──────────┬───────────┬──────────────────────────┬────────────┐
//!   │  header  │ pre-guard │       client data        │ post-guard │
//!   │ 8 bytes  │  8 bytes  │  block_data_size bytes   │  8 bytes   │
//!   └──────────┴───────────┴──────────────────────────┴────────────┘
//!   ▲                      ▲
//!   block base             block base + data_offset (returned to client)
//! ```
//!
//! Every offset the allocator uses is derived from one [`Layout`]; no other
//! module does its own offset arithmetic.

use std::ops::Range;

use crate::{AllocError, AllocatorConfig, fault::Fault, header::HEADER_BYTES, stomp::GUARD_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
  block_data_size: usize,
  header_bytes: usize,
  guard_bytes: usize,
  stride: usize,
  data_offset: usize,
  total_blocks: usize,
  total_size: usize,
}

impl Layout {
  pub fn compute(config: &AllocatorConfig) -> Result<Self, AllocError> {
    if config.validate().is_err() {
      return Err(AllocError::InvalidLayout {
        block_data_size: config.block_data_size,
        total_size: config.total_size,
      });
    }

    let block_data_size = config.block_data_size;
    let total_blocks = config.total_size / block_data_size;

    let header_bytes = if config.enable_debug_header { HEADER_BYTES } else { 0 };
    let guard_bytes = if config.enable_stomp_detection { GUARD_BYTES } else { 0 };

    let stride = block_data_size
      .checked_add(header_bytes + 2 * guard_bytes)
      .ok_or(AllocError::LayoutOverflow {
        total_blocks,
        stride: block_data_size,
      })?;
    let total_size = total_blocks
      .checked_mul(stride)
      .ok_or(AllocError::LayoutOverflow { total_blocks, stride })?;

    Ok(Self {
      block_data_size,
      header_bytes,
      guard_bytes,
      stride,
      data_offset: header_bytes + guard_bytes,
      total_blocks,
      total_size,
    })
  }

  pub fn block_data_size(&self) -> usize {
    self.block_data_size
  }

  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn data_offset(&self) -> usize {
    self.data_offset
  }

  pub fn total_blocks(&self) -> usize {
    self.total_blocks
  }

  /// Bytes of arena actually reserved. At least the requested size minus the
  /// remainder of the division, and more when features are enabled.
  pub fn total_size(&self) -> usize {
    self.total_size
  }

  pub fn has_header(&self) -> bool {
    self.header_bytes > 0
  }

  pub fn has_guards(&self) -> bool {
    self.guard_bytes > 0
  }

  /// Bitmap bytes needed for one bit per block.
  pub fn bitmap_bytes(&self) -> usize {
    self.total_blocks.div_ceil(8)
  }

  pub fn block_range(
    &self,
    index: usize,
  ) -> Range<usize> {
    let base = index * self.stride;
    base..base + self.stride
  }

  pub fn header_range(
    &self,
    index: usize,
  ) -> Option<Range<usize>> {
    let base = index * self.stride;
    self.has_header().then(|| base..base + self.header_bytes)
  }

  pub fn pre_guard_range(
    &self,
    index: usize,
  ) -> Option<Range<usize>> {
    let start = index * self.stride + self.header_bytes;
    self.has_guards().then(|| start..start + self.guard_bytes)
  }

  pub fn data_range(
    &self,
    index: usize,
  ) -> Range<usize> {
    let start = index * self.stride + self.data_offset;
    start..start + self.block_data_size
  }

  pub fn post_guard_range(
    &self,
    index: usize,
  ) -> Option<Range<usize>> {
    let start = self.data_range(index).end;
    self.has_guards().then(|| start..start + self.guard_bytes)
  }

  /// Maps the address of a block's client data back to the block index.
  ///
  /// `base` is the arena's first byte. Anything that is not exactly the data
  /// start of one of the arena's blocks is a fault.
  pub fn locate(
    &self,
    base: usize,
    address: usize,
  ) -> Result<usize, Fault> {
    if address < base {
      return Err(Fault::OutsideArena { address });
    }

    let offset = address - base;
    let misaligned = Fault::Misaligned {
      address,
      offset,
      stride: self.stride,
    };
    let Some(relative) = offset.checked_sub(self.data_offset) else {
      return Err(misaligned);
    };
    if relative % self.stride != 0 {
      return Err(misaligned);
    }

    let index = relative / self.stride;
    if index >= self.total_blocks {
      return Err(Fault::OutsideArena { address });
    }

    Ok(index)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use proptest::prelude::*;

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

  #[test]
  fn test_plain_layout() {
    let layout = Layout::compute(&config(640, 4 * 1024 * 1024, false, false)).unwrap();

    assert_eq!(layout.total_blocks(), 6553);
    assert_eq!(layout.stride(), 640);
    assert_eq!(layout.data_offset(), 0);
    assert_eq!(layout.total_size(), 6553 * 640);
    assert_eq!(layout.bitmap_bytes(), 820);
    assert_eq!(layout.header_range(0), None);
    assert_eq!(layout.pre_guard_range(0), None);
  }

  #[test]
  fn test_instrumented_layout_ranges() {
    let layout = Layout::compute(&config(12, 24, true, true)).unwrap();

    assert_eq!(layout.stride(), 12 + 8 + 16);
    assert_eq!(layout.data_offset(), 16);
    assert_eq!(layout.header_range(1), Some(36..44));
    assert_eq!(layout.pre_guard_range(1), Some(44..52));
    assert_eq!(layout.data_range(1), 52..64);
    assert_eq!(layout.post_guard_range(1), Some(64..72));
    assert_eq!(layout.block_range(1), 36..72);
  }

  #[test]
  fn test_stomp_only_places_guard_at_block_base() {
    let layout = Layout::compute(&config(8, 16, false, true)).unwrap();

    assert_eq!(layout.data_offset(), 8);
    assert_eq!(layout.pre_guard_range(0), Some(0..8));
    assert_eq!(layout.post_guard_range(0), Some(16..24));
  }

  #[test]
  fn test_invalid_sizes_are_rejected() {
    assert!(matches!(
      Layout::compute(&config(0, 16, false, false)),
      Err(AllocError::InvalidLayout { .. })
    ));
    assert!(matches!(
      Layout::compute(&config(32, 16, false, false)),
      Err(AllocError::InvalidLayout { .. })
    ));
  }

  #[test]
  fn test_overflow_is_reported() {
    let result = Layout::compute(&config(1, usize::MAX, true, true));
    assert!(matches!(result, Err(AllocError::LayoutOverflow { .. })));
  }

  #[test]
  fn test_locate() {
    let layout = Layout::compute(&config(12, 48, true, false)).unwrap();
    let base = 0x1000;

    assert_eq!(layout.locate(base, base + 8), Ok(0));
    assert_eq!(layout.locate(base, base + 8 + 20 * 2), Ok(2));
    assert_eq!(
      layout.locate(base, base - 20),
      Err(Fault::OutsideArena { address: base - 20 })
    );
    assert_eq!(
      layout.locate(base, base + 9),
      Err(Fault::Misaligned {
        address: base + 9,
        offset: 9,
        stride: 20
      })
    );
    assert!(matches!(layout.locate(base, base + 4), Err(Fault::Misaligned { .. })));
    assert_eq!(
      layout.locate(base, base + 8 + 20 * 4),
      Err(Fault::OutsideArena {
        address: base + 8 + 80
      })
    );
  }

  proptest! {
    #[test]
    fn prop_layout_invariants(
      block in 1usize..4096,
      extra in 0usize..65536,
      header in any::<bool>(),
      stomp in any::<bool>(),
    ) {
      let total = block + extra;
      let layout = Layout::compute(&config(block, total, header, stomp)).unwrap();
      let header_bytes = if header { HEADER_BYTES } else { 0 };
      let guard_bytes = if stomp { 2 * GUARD_BYTES } else { 0 };

      prop_assert_eq!(layout.total_blocks(), total / block);
      prop_assert!(layout.total_blocks() >= 1);
      prop_assert_eq!(layout.stride(), block + header_bytes + guard_bytes);
      prop_assert_eq!(layout.total_size(), layout.total_blocks() * layout.stride());

      let last = layout.total_blocks() - 1;
      prop_assert_eq!(layout.block_range(last).end, layout.total_size());
      prop_assert_eq!(layout.locate(0, layout.data_range(last).start), Ok(last));
    }
  }
}
