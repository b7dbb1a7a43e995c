//! Contract violations and the capability that reports them.
//!
//! Running out of blocks or out of backing memory is an ordinary outcome and
//! never shows up here. A [`Fault`] is always a programmer error: a pointer
//! that does not belong to the allocator, a construction request that cannot
//! produce a single block, or a guard pattern that client code overwrote.
//!
//! ```text
//!   allocator ──► FaultReporter::report(fault)
//!                     │
//!                     ├── PanicOnFault      log + panic (default)
//!                     ├── AbortOnFault      log + process::abort
//!                     └── CountingReporter  log + record, keep going
//! ```

use std::{cell::RefCell, fmt, rc::Rc};

use thiserror::Error;

/// Which guard region of a block was found damaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRegion {
  /// The guard in front of the client data.
  Pre,
  /// The guard behind the client data.
  Post,
}

impl fmt::Display for GuardRegion {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      GuardRegion::Pre => f.write_str("pre-guard"),
      GuardRegion::Post => f.write_str("post-guard"),
    }
  }
}

/// Broad category of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
  /// The caller passed arguments the allocator cannot accept.
  Misuse,
  /// Client code wrote outside the region it was granted.
  Corruption,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
  #[error("invalid layout: block_data_size={block_data_size}, total_size={total_size}")]
  InvalidLayout {
    block_data_size: usize,
    total_size: usize,
  },

  #[error("address {address:#x} is outside the arena")]
  OutsideArena { address: usize },

  #[error("address {address:#x} is not the start of a block's data (arena offset {offset}, stride {stride})")]
  Misaligned {
    address: usize,
    offset: usize,
    stride: usize,
  },

  #[error("block {index} is not allocated")]
  NotAllocated { index: usize },

  #[error("block {index}: {region} stomped at byte {position} (expected {expected:#04x}, found {found:#04x})")]
  GuardCorrupted {
    index: usize,
    region: GuardRegion,
    position: usize,
    expected: u8,
    found: u8,
  },
}

impl Fault {
  pub fn kind(&self) -> FaultKind {
    match self {
      Fault::GuardCorrupted { .. } => FaultKind::Corruption,
      _ => FaultKind::Misuse,
    }
  }
}

/// Receives every fault an allocator detects.
///
/// If `report` returns, the allocator carries on with a conservative
/// fallback (the operation is skipped, or reports "not allocated").
pub trait FaultReporter {
  fn report(
    &self,
    fault: Fault,
  );
}

impl<R: FaultReporter + ?Sized> FaultReporter for &R {
  fn report(
    &self,
    fault: Fault,
  ) {
    (**self).report(fault)
  }
}

impl<R: FaultReporter + ?Sized> FaultReporter for Rc<R> {
  fn report(
    &self,
    fault: Fault,
  ) {
    (**self).report(fault)
  }
}

/// Logs the fault and panics. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicOnFault;

impl FaultReporter for PanicOnFault {
  fn report(
    &self,
    fault: Fault,
  ) {
    tracing::error!(kind = ?fault.kind(), "{fault}");
    panic!("block allocator fault: {fault}");
  }
}

/// Logs the fault and aborts the process without unwinding.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortOnFault;

impl FaultReporter for AbortOnFault {
  fn report(
    &self,
    fault: Fault,
  ) {
    tracing::error!(kind = ?fault.kind(), "{fault}; aborting");
    std::process::abort();
  }
}

/// Records faults instead of stopping, so the allocator's own checks can be
/// exercised.
#[derive(Debug, Default)]
pub struct CountingReporter {
  faults: RefCell<Vec<Fault>>,
}

impl CountingReporter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn count(&self) -> usize {
    self.faults.borrow().len()
  }

  pub fn count_kind(
    &self,
    kind: FaultKind,
  ) -> usize {
    self
      .faults
      .borrow()
      .iter()
      .filter(|fault| fault.kind() == kind)
      .count()
  }

  pub fn faults(&self) -> Vec<Fault> {
    self.faults.borrow().clone()
  }

  pub fn clear(&self) {
    self.faults.borrow_mut().clear();
  }
}

impl FaultReporter for CountingReporter {
  fn report(
    &self,
    fault: Fault,
  ) {
    tracing::warn!(kind = ?fault.kind(), "{fault}");
    self.faults.borrow_mut().push(fault);
  }
}
