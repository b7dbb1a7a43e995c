use serde::{Deserialize, Serialize};

use crate::fault::Fault;

/// Construction-time settings of a [`BlockAllocator`](crate::BlockAllocator).
///
/// Both instrumentation features are off by default, which yields the
/// minimal stride: a plain bitmap allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
  /// Usable bytes per block.
  pub block_data_size: usize,
  /// Requested arena size. The block count is `total_size / block_data_size`.
  pub total_size: usize,
  /// Record the call site of each allocation in a header in front of the block.
  #[serde(default)]
  pub enable_debug_header: bool,
  /// Flank every block's data with guard patterns checked on release.
  #[serde(default)]
  pub enable_stomp_detection: bool,
}

impl AllocatorConfig {
  pub fn new(
    block_data_size: usize,
    total_size: usize,
  ) -> Self {
    Self {
      block_data_size,
      total_size,
      enable_debug_header: false,
      enable_stomp_detection: false,
    }
  }

  pub fn with_debug_header(
    mut self,
    enabled: bool,
  ) -> Self {
    self.enable_debug_header = enabled;
    self
  }

  pub fn with_stomp_detection(
    mut self,
    enabled: bool,
  ) -> Self {
    self.enable_stomp_detection = enabled;
    self
  }

  /// Checks the layout preconditions: a non-zero block size and room for at
  /// least one block.
  pub fn validate(&self) -> Result<(), Fault> {
    if self.block_data_size == 0 || self.total_size < self.block_data_size {
      return Err(Fault::InvalidLayout {
        block_data_size: self.block_data_size,
        total_size: self.total_size,
      });
    }
    Ok(())
  }
}
