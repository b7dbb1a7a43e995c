//! Where the arena and bitmap bytes come from.
//!
//! The allocator asks its backing for exactly two buffers, once, at
//! construction time and hands both back at teardown. Nothing in between
//! touches the backing, so allocation latency never depends on it.

use std::{ops::Range, ptr::NonNull, slice};

use libc::{c_void, calloc, free};

/// A source of zero-filled raw memory.
///
/// # Safety
///
/// A pointer returned by [`acquire`](Backing::acquire) must be valid for
/// reads and writes of `bytes` bytes, all of them initialized to zero, until
/// it is passed back to [`release`](Backing::release).
pub unsafe trait Backing {
  fn acquire(
    &self,
    bytes: usize,
  ) -> Option<NonNull<u8>>;

  /// # Safety
  ///
  /// `ptr` must come from `acquire` on this backing with the same `bytes`,
  /// and must not be used afterwards.
  unsafe fn release(
    &self,
    ptr: NonNull<u8>,
    bytes: usize,
  );
}

/// The C heap, through `calloc(3)` and `free(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBacking;

unsafe impl Backing for SystemBacking {
  fn acquire(
    &self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    let address = unsafe { calloc(bytes.max(1), 1) };
    NonNull::new(address as *mut u8)
  }

  unsafe fn release(
    &self,
    ptr: NonNull<u8>,
    _bytes: usize,
  ) {
    unsafe { free(ptr.as_ptr() as *mut c_void) }
  }
}

/// A buffer acquired from a [`Backing`]. Returning it is the owner's job.
pub struct Region {
  ptr: NonNull<u8>,
  len: usize,
}

impl Region {
  pub(crate) fn acquire<B: Backing>(
    backing: &B,
    len: usize,
  ) -> Option<Self> {
    backing.acquire(len).map(|ptr| Self { ptr, len })
  }

  /// # Safety
  ///
  /// `backing` must be the one this region was acquired from, and the region
  /// must not be touched afterwards.
  pub(crate) unsafe fn release<B: Backing>(
    &self,
    backing: &B,
  ) {
    unsafe { backing.release(self.ptr, self.len) }
  }

  pub(crate) fn base(&self) -> *mut u8 {
    self.ptr.as_ptr()
  }

  pub(crate) fn ptr_at(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    assert!(offset < self.len, "offset {offset} outside region of {} bytes", self.len);
    unsafe { self.ptr.add(offset) }
  }

  pub(crate) fn contains(
    &self,
    range: &Range<usize>,
  ) -> bool {
    range.start <= range.end && range.end <= self.len
  }

  pub(crate) fn bytes(
    &self,
    range: Range<usize>,
  ) -> &[u8] {
    assert!(self.contains(&range), "range {range:?} outside region of {} bytes", self.len);
    unsafe { slice::from_raw_parts(self.ptr.as_ptr().add(range.start), range.len()) }
  }

  pub(crate) fn bytes_mut(
    &mut self,
    range: Range<usize>,
  ) -> &mut [u8] {
    assert!(self.contains(&range), "range {range:?} outside region of {} bytes", self.len);
    unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().add(range.start), range.len()) }
  }
}

impl AsRef<[u8]> for Region {
  fn as_ref(&self) -> &[u8] {
    self.bytes(0..self.len)
  }
}

impl AsMut<[u8]> for Region {
  fn as_mut(&mut self) -> &mut [u8] {
    self.bytes_mut(0..self.len)
  }
}
