/// Allocates a block, recording the invoking file and line in its debug
/// header.
///
/// # Examples
///
/// ```rust
/// use blockalloc::{AllocatorConfig, BlockAllocator, block_alloc, block_free};
///
/// let config = AllocatorConfig::new(64, 4096).with_debug_header(true);
/// let mut allocator = BlockAllocator::new(config).unwrap();
///
/// let block = block_alloc!(allocator).unwrap();
/// let dump = allocator.dump_state();
/// assert_eq!(dump.live[0].call_site.unwrap().file, file!());
///
/// block_free!(allocator, block.as_ptr());
/// assert_eq!(allocator.used_blocks(), 0);
/// ```
#[macro_export]
macro_rules! block_alloc {
  ($allocator:expr) => {
    $allocator.allocate(::core::option::Option::Some($crate::CallSite::new(
      file!(),
      line!(),
    )))
  };
}

/// Releases a block obtained from [`block_alloc!`].
#[macro_export]
macro_rules! block_free {
  ($allocator:expr, $ptr:expr) => {
    $allocator.release($ptr)
  };
}

#[cfg(test)]
mod tests {
  use crate::{AllocatorConfig, BlockAllocator};

  #[test]
  fn test_block_alloc_records_line() {
    let config = AllocatorConfig::new(16, 64).with_debug_header(true);
    let mut allocator = BlockAllocator::new(config).unwrap();

    let line = line!() + 1;
    let block = block_alloc!(allocator).unwrap();

    let site = allocator.dump_state().live[0].call_site.unwrap();
    assert_eq!(site.file, file!());
    assert_eq!(site.line, line);

    block_free!(allocator, block.as_ptr());
    assert!(!allocator.is_allocated(block.as_ptr()));
  }

  #[test]
  fn test_block_alloc_without_header() {
    let mut allocator = BlockAllocator::new(AllocatorConfig::new(16, 64)).unwrap();

    let block = block_alloc!(allocator).unwrap();
    assert_eq!(allocator.dump_state().live[0].call_site, None);

    block_free!(allocator, block.as_ptr());
  }
}
