//! One bit per block, `1` meaning allocated.
//!
//! ```text
//!   byte 0                 byte 1
//!   ┌─┬─┬─┬─┬─┬─┬─┬─┐      ┌─┬─┬─┬─┬─┬─┬─┬─┐
//!   │7│6│5│4│3│2│1│0│      │ │ │ │ │ │ │9│8│   bit (i % 8) of byte (i / 8)
//!   └─┴─┴─┴─┴─┴─┴─┴─┘      └─┴─┴─┴─┴─┴─┴─┴─┘
//!                                ▲
//!                                padding bits past `len` are never used
//! ```

/// A fixed-length bit set over any byte storage.
pub struct Bitmap<S> {
  storage: S,
  len: usize,
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> Bitmap<S> {
  /// Wraps `storage`, clearing it. Panics if it is too short for `len` bits.
  pub fn new(
    mut storage: S,
    len: usize,
  ) -> Self {
    let bytes = storage.as_mut();
    assert!(
      bytes.len() >= len.div_ceil(8),
      "bitmap storage of {} bytes cannot hold {len} bits",
      bytes.len()
    );
    bytes.fill(0);
    Self { storage, len }
  }

  /// Number of tracked bits.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn set(
    &mut self,
    index: usize,
  ) {
    self.check(index);
    self.storage.as_mut()[index / 8] |= 1 << (index % 8);
  }

  pub fn clear(
    &mut self,
    index: usize,
  ) {
    self.check(index);
    self.storage.as_mut()[index / 8] &= !(1 << (index % 8));
  }

  pub fn test(
    &self,
    index: usize,
  ) -> bool {
    self.check(index);
    self.storage.as_ref()[index / 8] & (1 << (index % 8)) != 0
  }

  /// Lowest clear bit, if any.
  ///
  /// Full bytes are skipped whole; within a byte bits are tried in
  /// ascending order.
  pub fn first_clear(&self) -> Option<usize> {
    let bytes = &self.storage.as_ref()[..self.len.div_ceil(8)];

    for (i, &byte) in bytes.iter().enumerate() {
      if byte == 0xFF {
        continue;
      }
      let first = i * 8;
      let last = (first + 8).min(self.len);
      if let Some(index) = (first..last).find(|&index| byte & (1 << (index % 8)) == 0) {
        return Some(index);
      }
    }

    None
  }

  /// Set bits in ascending order.
  pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
    let bytes = &self.storage.as_ref()[..self.len.div_ceil(8)];

    bytes
      .iter()
      .enumerate()
      .filter(|&(_, &byte)| byte != 0)
      .flat_map(move |(i, &byte)| {
        let first = i * 8;
        let last = (first + 8).min(self.len);
        (first..last).filter(move |&index| byte & (1 << (index % 8)) != 0)
      })
  }

  pub fn count_ones(&self) -> usize {
    self.storage.as_ref()[..self.len.div_ceil(8)]
      .iter()
      .map(|byte| byte.count_ones() as usize)
      .sum()
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.storage.as_ref()[..self.len.div_ceil(8)]
  }

  pub(crate) fn storage(&self) -> &S {
    &self.storage
  }

  fn check(
    &self,
    index: usize,
  ) {
    assert!(index < self.len, "bit index {index} out of range for {} blocks", self.len);
  }
}
