use thiserror::Error;

/// Recoverable reasons a [`BlockAllocator`](crate::BlockAllocator) could not
/// be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
  /// The sizes cannot describe even one block. Reported as a fault first.
  #[error("invalid layout: block_data_size={block_data_size}, total_size={total_size}")]
  InvalidLayout {
    block_data_size: usize,
    total_size: usize,
  },

  /// `total_blocks * stride` does not fit in `usize`.
  #[error("arena size overflows: {total_blocks} blocks of {stride} bytes")]
  LayoutOverflow { total_blocks: usize, stride: usize },

  /// The backing refused to hand out a buffer.
  #[error("backing memory exhausted: could not acquire {bytes} bytes")]
  OutOfMemory { bytes: usize },
}
