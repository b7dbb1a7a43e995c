//! # blockalloc - A Fixed-Size Block Allocator
//!
//! This crate provides a **fixed-size block allocator** (also known as a
//! pool allocator): one preallocated arena carved into equal slots, handed
//! out and taken back in bounded time, with no fragmentation and no growth.
//!
//! ## Overview
//!
//! ```text
//!   Block Allocator Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              ARENA                                   │
//!   │                                                                      │
//!   │   ┌────────┬────────┬────────┬────────┬────────┬────────┬────────┐   │
//!   │   │ blk 0  │ blk 1  │ blk 2  │ blk 3  │ blk 4  │ blk 5  │ blk 6  │   │
//!   │   │ used   │ free   │ used   │ used   │ free   │ free   │ free   │   │
//!   │   └────────┴────────┴────────┴────────┴────────┴────────┴────────┘   │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Bitmap:   1  0  1  1  0  0  0      (one bit per block, 1 = allocated)
//!                ▲
//!                └── next allocation: lowest free index (first fit)
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   blockalloc
//!   ├── allocator  - BlockAllocator: allocate / release / query / teardown
//!   ├── backing    - Where arena and bitmap memory comes from (libc calloc)
//!   ├── bitmap     - Bit set with first-fit scan
//!   ├── config     - AllocatorConfig (sizes, feature toggles)
//!   ├── error      - AllocError (recoverable construction failures)
//!   ├── fault      - Fault + FaultReporter (contract violations)
//!   ├── header     - Call-site tracking, dump and inspection views
//!   ├── layout     - Stride, data offset and pointer-to-index mapping
//!   ├── macros     - block_alloc!, block_free!
//!   └── stomp      - Guard patterns around client data
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use blockalloc::{AllocatorConfig, BlockAllocator};
//!
//! let mut allocator = BlockAllocator::new(AllocatorConfig::new(12, 12)).unwrap();
//!
//! let first = allocator.allocate(None).unwrap();
//! assert!(allocator.allocate(None).is_none());
//!
//! unsafe { first.as_ptr().write_bytes(0x42, 12) };
//!
//! allocator.release(first.as_ptr());
//! assert_eq!(allocator.allocate(None), Some(first));
//! ```
//!
//! ## Instrumentation
//!
//! Two features, chosen once in [`AllocatorConfig`], grow every block:
//!
//! ```text
//!   ┌──────────┬───────────┬──────────────────────────┬────────────┐
//!   │  header  │ pre-guard │       client data        │ post-guard │
//!   └──────────┴───────────┴──────────────────────────┴────────────┘
//!    debug       stomp                                  stomp
//!    header      detection                              detection
//! ```
//!
//! - **Debug header**: the call site of the latest allocation, reported by
//!   [`BlockAllocator::dump_state`] and [`BlockAllocator::inspect_block`].
//! - **Stomp detection**: fixed byte patterns checked on release, on
//!   [`BlockAllocator::check_for_corruption`] and at teardown.
//!
//! ## Faults
//!
//! Running out of blocks is `None`; running out of backing memory is an
//! [`AllocError`]. Everything else (foreign or misaligned pointers, damaged
//! guards) is a [`Fault`] handed to the allocator's [`FaultReporter`], which
//! panics by default and can be swapped for a [`CountingReporter`].
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no internal locking; wrap in a `Mutex` to share
//! - **One size**: every block has the same size
//! - **Fixed capacity**: the arena never grows or shrinks
//!
//! ## Safety
//!
//! The allocator hands out raw pointers. Reading and writing through them is
//! `unsafe` and must stay within `block_data_size` bytes.

mod allocator;
pub mod backing;
pub mod bitmap;
mod config;
mod error;
pub mod fault;
pub mod header;
pub mod layout;
mod macros;
pub mod stomp;

pub use allocator::BlockAllocator;
pub use backing::{Backing, SystemBacking};
pub use config::AllocatorConfig;
pub use error::AllocError;
pub use fault::{
  AbortOnFault, CountingReporter, Fault, FaultKind, FaultReporter, GuardRegion, PanicOnFault,
};
pub use header::{AllocatorDump, BlockView, CallSite, LiveBlock};
pub use layout::Layout;
