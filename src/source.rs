//! Memory-extension primitives.
//!
//! A [`MemorySource`] behaves like `sbrk(2)`: it hands out one contiguous
//! range that only ever grows at its high end and reports the previous top on
//! success. Failure leaves the source exactly as it was.

use std::{
  alloc::{self, Layout},
  io,
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};
use snafu::{IntoError as _, Location, Snafu};

/// Alignment guaranteed for [`MemorySource::base`].
pub const SOURCE_ALIGN: usize = 16;

/// Default capacity of an [`ArenaSource`]: 20 MiB.
pub const DEFAULT_ARENA_CAPACITY: usize = 20 * (1 << 20);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SourceError {
  #[snafu(display("cannot grow by {increment} bytes: {size} of {limit} bytes in use"))]
  Exhausted {
    increment: usize,
    size: usize,
    limit: usize,
    #[snafu(implicit)]
    location: Location,
  },
  #[snafu(display("sbrk failed to move the program break by {increment} bytes"))]
  Sbrk {
    increment: usize,
    source: io::Error,
    #[snafu(implicit)]
    location: Location,
  },
  #[snafu(display("program break moved behind our back: expected {expected:#x}, found {found:#x}"))]
  NonContiguous {
    expected: usize,
    found: usize,
    #[snafu(implicit)]
    location: Location,
  },
}

/// An `sbrk`-like provider of one contiguous, growable byte range.
pub trait MemorySource {
  /// Start of the range. Aligned to [`SOURCE_ALIGN`] and stable for the
  /// lifetime of the source.
  fn base(&self) -> NonNull<u8>;

  /// Bytes handed out so far.
  fn size(&self) -> usize;

  /// Grows the range by `increment` bytes and returns the previous size.
  fn extend(
    &mut self,
    increment: usize,
  ) -> Result<usize, SourceError>;
}

/// A fixed-capacity arena owned by the source and freed on drop.
///
/// The whole capacity is reserved up front so growth never moves the range.
#[derive(Debug)]
pub struct ArenaSource {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

impl ArenaSource {
  /// Reserves a zeroed arena of `capacity` bytes.
  ///
  /// # Panics
  ///
  /// Panics if `capacity` is zero or not representable as a [`Layout`].
  pub fn new(capacity: usize) -> Self {
    assert!(capacity > 0, "arena capacity must be non-zero");
    let layout = Self::layout(capacity);
    let base = unsafe { alloc::alloc_zeroed(layout) };
    let Some(base) = NonNull::new(base) else {
      alloc::handle_alloc_error(layout);
    };
    Self {
      base,
      capacity,
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  fn layout(capacity: usize) -> Layout {
    match Layout::from_size_align(capacity, SOURCE_ALIGN) {
      Ok(layout) => layout,
      Err(_) => panic!("arena capacity {capacity} is not a valid layout"),
    }
  }
}

impl Default for ArenaSource {
  fn default() -> Self {
    Self::new(DEFAULT_ARENA_CAPACITY)
  }
}

impl MemorySource for ArenaSource {
  fn base(&self) -> NonNull<u8> {
    self.base
  }

  fn size(&self) -> usize {
    self.brk
  }

  fn extend(
    &mut self,
    increment: usize,
  ) -> Result<usize, SourceError> {
    let old = self.brk;
    match old.checked_add(increment) {
      Some(new) if new <= self.capacity => {
        self.brk = new;
        Ok(old)
      }
      _ => ExhaustedSnafu {
        increment,
        size: old,
        limit: self.capacity,
      }
      .fail(),
    }
  }
}

impl Drop for ArenaSource {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout(self.capacity)) };
  }
}

/// The process program break, grown with `sbrk(2)`.
///
/// Other code in the process (the system allocator included) may also move
/// the break. Growth that would leave a hole is refused with
/// [`SourceError::NonContiguous`] and the stray increment is returned.
///
/// Giving memory back reads the break and then lowers it in two steps, so
/// while an `SbrkSource` exists nothing else may move the program break
/// concurrently. That includes a `brk`-backed system allocator running on
/// another thread.
#[derive(Debug)]
pub struct SbrkSource {
  base: NonNull<u8>,
  padding: usize,
  brk: usize,
}

impl SbrkSource {
  /// Starts a range at the current program break, aligned to
  /// [`SOURCE_ALIGN`].
  pub fn new() -> Result<Self, SourceError> {
    let current = unsafe { sbrk(0) };
    if is_sbrk_failure(current) {
      return Err(last_sbrk_error(0));
    }

    let current = current.cast::<u8>();
    let padding = current.align_offset(SOURCE_ALIGN);
    if padding > 0 {
      let old = unsafe { sbrk(padding as intptr_t) };
      if is_sbrk_failure(old) {
        return Err(last_sbrk_error(padding));
      }
      if old.cast::<u8>() != current {
        return NonContiguousSnafu {
          expected: current.addr(),
          found: old.addr(),
        }
        .fail();
      }
    }

    let base = current.wrapping_add(padding);
    let Some(base) = NonNull::new(base) else {
      return NonContiguousSnafu {
        expected: current.addr(),
        found: 0usize,
      }
      .fail();
    };
    log::debug!("sbrk source starts at {base:p} ({padding} bytes of padding)");
    Ok(Self {
      base,
      padding,
      brk: 0,
    })
  }

  fn top(&self) -> *mut u8 {
    self.base.as_ptr().wrapping_add(self.brk)
  }
}

impl MemorySource for SbrkSource {
  fn base(&self) -> NonNull<u8> {
    self.base
  }

  fn size(&self) -> usize {
    self.brk
  }

  fn extend(
    &mut self,
    increment: usize,
  ) -> Result<usize, SourceError> {
    let Ok(delta) = intptr_t::try_from(increment) else {
      return ExhaustedSnafu {
        increment,
        size: self.brk,
        limit: intptr_t::MAX as usize,
      }
      .fail();
    };

    let old = unsafe { sbrk(delta) };
    if is_sbrk_failure(old) {
      return Err(last_sbrk_error(increment));
    }

    let expected = self.top();
    if old.cast::<u8>() != expected {
      // Someone else owns the bytes between our top and `old`; give the new
      // range back rather than leave a hole in the heap.
      unsafe {
        if sbrk(0).cast::<u8>() == old.cast::<u8>().wrapping_add(increment) {
          sbrk(-delta);
        }
      }
      return NonContiguousSnafu {
        expected: expected.addr(),
        found: old.addr(),
      }
      .fail();
    }

    let previous = self.brk;
    self.brk += increment;
    Ok(previous)
  }
}

impl Drop for SbrkSource {
  fn drop(&mut self) {
    unsafe {
      if sbrk(0).cast::<u8>() == self.top() {
        let total = self.brk + self.padding;
        if let Ok(total) = intptr_t::try_from(total) {
          sbrk(-total);
        }
      }
    }
  }
}

fn is_sbrk_failure(address: *mut c_void) -> bool {
  address == usize::MAX as *mut c_void
}

fn last_sbrk_error(increment: usize) -> SourceError {
  SbrkSnafu { increment }.into_error(io::Error::last_os_error())
}
