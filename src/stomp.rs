//! Guard patterns around each block's client data.
//!
//! A write that runs off either end of a block lands in a guard first. The
//! guards are checked when the block is released, on an explicit sweep and
//! at teardown.

use crate::fault::{Fault, GuardRegion};

/// Size of each guard region.
pub const GUARD_BYTES: usize = 8;

/// Written in front of the client data.
pub const PRE_GUARD: [u8; GUARD_BYTES] = pattern(0xDECA_FBAD, 0x5A5A_5A5A);

/// Written behind the client data.
pub const POST_GUARD: [u8; GUARD_BYTES] = pattern(0xDEAD_FADE, 0xC5C5_C5C5);

const fn pattern(
  first: u32,
  second: u32,
) -> [u8; GUARD_BYTES] {
  let a = first.to_ne_bytes();
  let b = second.to_ne_bytes();
  [a[0], a[1], a[2], a[3], b[0], b[1], b[2], b[3]]
}

impl GuardRegion {
  pub fn pattern(&self) -> &'static [u8; GUARD_BYTES] {
    match self {
      GuardRegion::Pre => &PRE_GUARD,
      GuardRegion::Post => &POST_GUARD,
    }
  }
}

pub(crate) fn write_guard(
  region: GuardRegion,
  bytes: &mut [u8],
) {
  bytes.copy_from_slice(region.pattern());
}

/// Compares a guard byte-for-byte; reports the first mismatch only.
pub(crate) fn check_guard(
  index: usize,
  region: GuardRegion,
  bytes: &[u8],
) -> Result<(), Fault> {
  let expected = region.pattern();

  match bytes.iter().zip(expected).position(|(found, want)| found != want) {
    None => Ok(()),
    Some(position) => Err(Fault::GuardCorrupted {
      index,
      region,
      position,
      expected: expected[position],
      found: bytes[position],
    }),
  }
}

/// Renders a guard the way it was defined: as native-endian 32-bit words.
pub(crate) fn guard_words(bytes: &[u8]) -> Vec<u32> {
  bytes
    .chunks_exact(4)
    .map(|word| u32::from_ne_bytes([word[0], word[1], word[2], word[3]]))
    .collect()
}
