//! Boundary-tag codec.
//!
//! Every block carries a 4-byte header and a 4-byte footer, each holding the
//! block size with the allocated flag packed into bit 0. Sizes are always
//! multiples of [`ALIGNMENT`], so the low three bits are free for flags.
//!
//! ```text
//!        header                                     footer
//!   ┌────────────┬──────────────────────────────┬────────────┐
//!   │ size | a   │          payload             │ size | a   │
//!   └────────────┴──────────────────────────────┴────────────┘
//!   ▲            ▲                                           ▲
//!   payload - 4  payload (Block)            payload + size - 8
//! ```

use std::fmt;

use crate::align::{ALIGNMENT, checked_align};

/// Size of one boundary tag.
pub const WSIZE: usize = 4;
/// Header plus footer.
pub const DSIZE: usize = 8;
/// Smallest block the allocator will ever carve out.
pub const MIN_BLOCK_SIZE: usize = 3 * DSIZE;

const ALLOCATED: u32 = 1;
const SIZE_MASK: u32 = !(ALIGNMENT as u32 - 1);

/// A packed `(size, allocated)` boundary tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(u32);

impl Tag {
  /// Tag of the zero-size epilogue sentinel.
  pub const EPILOGUE: Self = Self(ALLOCATED);

  pub fn pack(
    size: usize,
    allocated: bool,
  ) -> Self {
    debug_assert!(size % ALIGNMENT == 0, "unaligned block size {size}");
    debug_assert!(u32::try_from(size).is_ok(), "block size {size} overflows a tag");
    Self(size as u32 | u32::from(allocated))
  }

  pub fn from_raw(raw: u32) -> Self {
    Self(raw)
  }

  pub fn raw(self) -> u32 {
    self.0
  }

  pub fn size(self) -> usize {
    (self.0 & SIZE_MASK) as usize
  }

  pub fn is_allocated(self) -> bool {
    self.0 & ALLOCATED != 0
  }
}

impl fmt::Debug for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "[{}:{}]", self.size(), if self.is_allocated() { 'a' } else { 'f' })
  }
}

/// Descriptor of a block: the heap offset of its payload.
///
/// All neighbor arithmetic is derived from sizes, so a descriptor never needs
/// to know which free list (if any) the block belongs to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(usize);

impl Block {
  pub const fn from_payload(offset: usize) -> Self {
    Self(offset)
  }

  pub const fn payload(self) -> usize {
    self.0
  }

  pub const fn header(self) -> usize {
    self.0 - WSIZE
  }

  pub const fn footer(
    self,
    size: usize,
  ) -> usize {
    self.0 + size - DSIZE
  }

  /// Physical successor of a block of `size` bytes.
  pub const fn next(
    self,
    size: usize,
  ) -> Self {
    Self(self.0 + size)
  }

  /// Offset of the physical predecessor's footer.
  pub const fn prev_footer(self) -> usize {
    self.0 - DSIZE
  }

  /// Physical predecessor, given the size read from its footer.
  pub const fn prev(
    self,
    prev_size: usize,
  ) -> Self {
    Self(self.0 - prev_size)
  }
}

impl fmt::Debug for Block {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "Block({:#x})", self.0)
  }
}

/// Block size needed to serve a request of `request` payload bytes.
///
/// Returns `None` when the adjusted size cannot be represented.
pub fn adjusted_size(request: usize) -> Option<usize> {
  if request <= 2 * DSIZE {
    return Some(MIN_BLOCK_SIZE);
  }
  checked_align(request.checked_add(DSIZE)?)
}

/// Payload bytes available in a block of `size` bytes.
pub const fn usable_size(size: usize) -> usize {
  size - DSIZE
}
