//! Call-site tracking and the diagnostics built on it.
//!
//! With the debug header enabled every block starts with eight bytes naming
//! who allocated it last:
//!
//! ```text
//!   ┌─────────────────┬─────────────────┐
//!   │ site id (u32)   │ line (u32)      │   native endian
//!   └─────────────────┴─────────────────┘
//! ```
//!
//! The site id indexes the allocator's table of interned source files, `0`
//! meaning "no call site". The header is left as is on release, so a freed
//! block still shows its last owner.

use std::{fmt, panic::Location};

use crate::stomp::guard_words;

pub const HEADER_BYTES: usize = 8;

/// Source location an allocation was made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
  pub file: &'static str,
  pub line: u32,
}

impl CallSite {
  pub const fn new(
    file: &'static str,
    line: u32,
  ) -> Self {
    Self { file, line }
  }

  /// The location of the caller, for functions marked `#[track_caller]`.
  #[track_caller]
  pub fn caller() -> Self {
    Location::caller().into()
  }
}

impl From<&'static Location<'static>> for CallSite {
  fn from(location: &'static Location<'static>) -> Self {
    Self::new(location.file(), location.line())
  }
}

impl fmt::Display for CallSite {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{}:{}", self.file, self.line)
  }
}

/// Distinct source files one allocator can name in its headers.
pub const SITE_CAPACITY: usize = 64;

/// Interned source file names, keyed on the address of the `&'static str`.
///
/// The slots are allocated once, up front; interning is a bounded probe and
/// never touches the heap. Ids are slot + 1. Once every slot is taken, new
/// files are recorded as id `0` and only their line survives.
#[derive(Debug)]
pub(crate) struct SiteTable {
  slots: Box<[Option<&'static str>; SITE_CAPACITY]>,
}

impl Default for SiteTable {
  fn default() -> Self {
    Self {
      slots: Box::new([None; SITE_CAPACITY]),
    }
  }
}

impl SiteTable {
  fn intern(
    &mut self,
    file: &'static str,
  ) -> u32 {
    let start = (file.as_ptr().addr() >> 3) % SITE_CAPACITY;

    for step in 0..SITE_CAPACITY {
      let slot = (start + step) % SITE_CAPACITY;
      match self.slots[slot] {
        Some(known) if std::ptr::eq(known, file) => return slot as u32 + 1,
        Some(_) => continue,
        None => {
          self.slots[slot] = Some(file);
          return slot as u32 + 1;
        }
      }
    }

    0
  }

  fn resolve(
    &self,
    id: u32,
  ) -> Option<&'static str> {
    let slot = (id as usize).checked_sub(1)?;
    self.slots.get(slot).copied().flatten()
  }

  /// Number of files interned so far.
  pub(crate) fn len(&self) -> usize {
    self.slots.iter().filter(|slot| slot.is_some()).count()
  }

  pub(crate) fn encode(
    &mut self,
    call_site: Option<CallSite>,
    header: &mut [u8],
  ) {
    let (id, line) = match call_site {
      Some(site) => (self.intern(site.file), site.line),
      None => (0, 0),
    };
    header[..4].copy_from_slice(&id.to_ne_bytes());
    header[4..HEADER_BYTES].copy_from_slice(&line.to_ne_bytes());
  }

  /// Unknown ids, as left by a stomped header, decode to `None`.
  pub(crate) fn decode(
    &self,
    header: &[u8],
  ) -> Option<CallSite> {
    let id = u32::from_ne_bytes([header[0], header[1], header[2], header[3]]);
    let line = u32::from_ne_bytes([header[4], header[5], header[6], header[7]]);
    self.resolve(id).map(|file| CallSite::new(file, line))
  }
}

/// One live block in an [`AllocatorDump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveBlock {
  pub index: usize,
  pub call_site: Option<CallSite>,
}

/// Snapshot of which blocks are allocated, and by whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorDump {
  pub total_blocks: usize,
  pub live: Vec<LiveBlock>,
}

impl AllocatorDump {
  pub fn used(&self) -> usize {
    self.live.len()
  }

  pub fn free(&self) -> usize {
    self.total_blocks - self.live.len()
  }
}

impl fmt::Display for AllocatorDump {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "Allocator state:")?;
    for block in &self.live {
      match block.call_site {
        Some(site) => writeln!(f, "Block {}: Allocated at {site}", block.index)?,
        None => writeln!(f, "Block {}: Allocated", block.index)?,
      }
    }
    write!(
      f,
      "Total blocks: {}, Used: {}, Free: {}",
      self.total_blocks,
      self.used(),
      self.free()
    )
  }
}

/// The debug header of an inspected block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderView {
  pub call_site: Option<CallSite>,
  pub raw: [u8; HEADER_BYTES],
}

/// Every byte of one block, split along the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockView {
  pub index: usize,
  pub allocated: bool,
  pub stride: usize,
  pub header: Option<HeaderView>,
  pub pre_guard: Option<Vec<u8>>,
  pub data: Vec<u8>,
  pub post_guard: Option<Vec<u8>>,
}

impl BlockView {
  /// Bytes covered by the view; always the stride.
  pub fn bytes_covered(&self) -> usize {
    self.header.map_or(0, |header| header.raw.len())
      + self.pre_guard.as_ref().map_or(0, Vec::len)
      + self.data.len()
      + self.post_guard.as_ref().map_or(0, Vec::len)
  }
}

fn write_words(
  f: &mut fmt::Formatter<'_>,
  title: &str,
  bytes: &[u8],
) -> fmt::Result {
  write!(f, "\n{title}:\n ")?;
  for word in guard_words(bytes) {
    write!(f, " 0x{word:08X}")?;
  }
  Ok(())
}

impl fmt::Display for BlockView {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "Block {} ({})",
      self.index,
      if self.allocated { "allocated" } else { "free" }
    )?;

    if let Some(header) = &self.header {
      match header.call_site {
        Some(site) => write!(f, "\nHeader:\n  File: {}\n  Line: {}", site.file, site.line)?,
        None => write!(f, "\nHeader:\n  (no call site)")?,
      }
    }
    if let Some(pre) = &self.pre_guard {
      write_words(f, "Pre Stomp Region", pre)?;
    }

    write!(f, "\nData:")?;
    for (i, byte) in self.data.iter().enumerate() {
      if i % 32 == 0 {
        write!(f, "\n ")?;
      }
      write!(f, " 0x{byte:02X}")?;
    }

    if let Some(post) = &self.post_guard {
      write_words(f, "Post Stomp Region", post)?;
    }

    write!(
      f,
      "\nBytes printed: {}, block_size={}",
      self.bytes_covered(),
      self.stride
    )
  }
}
