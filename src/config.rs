use crate::{align::ALIGNMENT, block::MIN_BLOCK_SIZE};

/// Default upper bound on a single heap extension, in bytes.
pub const DEFAULT_GROWTH_CHUNK: usize = 1024;

/// Tunables of a [`SegregatedAllocator`](crate::SegregatedAllocator).
///
/// ```rust
/// use segalloc::AllocatorConfig;
///
/// let config = AllocatorConfig::default()
///   .with_growth_chunk(4096)
///   .with_fit_candidates(5);
/// assert_eq!(config.growth_chunk, 4096);
/// assert_eq!(config.initial_extension, 256);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Extensions grow with the heap until they reach this many bytes.
  pub growth_chunk: usize,
  /// Size of the free block created by initialization.
  pub initial_extension: usize,
  /// Fitting blocks compared in the request's own bucket before settling.
  pub fit_candidates: usize,
  /// Run the consistency checker after every mutating call and panic on the
  /// first violation.
  pub check_each_operation: bool,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      growth_chunk: DEFAULT_GROWTH_CHUNK,
      initial_extension: DEFAULT_GROWTH_CHUNK / 4,
      fit_candidates: 3,
      check_each_operation: false,
    }
  }
}

impl AllocatorConfig {
  #[must_use]
  pub fn with_growth_chunk(
    mut self,
    bytes: usize,
  ) -> Self {
    self.growth_chunk = bytes;
    self
  }

  #[must_use]
  pub fn with_initial_extension(
    mut self,
    bytes: usize,
  ) -> Self {
    self.initial_extension = bytes;
    self
  }

  #[must_use]
  pub fn with_fit_candidates(
    mut self,
    candidates: usize,
  ) -> Self {
    self.fit_candidates = candidates;
    self
  }

  #[must_use]
  pub fn with_check_each_operation(
    mut self,
    enabled: bool,
  ) -> Self {
    self.check_each_operation = enabled;
    self
  }

  /// Rounds sizes up to the allocator's alignment, keeps a non-empty initial
  /// block no smaller than the minimum block, and at least one fit candidate.
  #[must_use]
  pub fn normalized(self) -> Self {
    Self {
      growth_chunk: crate::align!(self.growth_chunk.max(ALIGNMENT)),
      initial_extension: match self.initial_extension {
        0 => 0,
        bytes => crate::align!(bytes.max(MIN_BLOCK_SIZE)),
      },
      fit_candidates: self.fit_candidates.max(1),
      ..self
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = AllocatorConfig::default();
    assert_eq!(config.growth_chunk, 1024);
    assert_eq!(config.initial_extension, 256);
    assert_eq!(config.fit_candidates, 3);
    assert!(!config.check_each_operation);
    assert_eq!(config.normalized(), config);
  }

  #[test]
  fn test_normalized() {
    let config = AllocatorConfig::default()
      .with_growth_chunk(1000)
      .with_initial_extension(13)
      .with_fit_candidates(0)
      .normalized();
    assert_eq!(config.growth_chunk, 1000);
    assert_eq!(config.initial_extension, MIN_BLOCK_SIZE);
    assert_eq!(config.fit_candidates, 1);

    let config = AllocatorConfig::default()
      .with_growth_chunk(0)
      .with_initial_extension(0)
      .normalized();
    assert_eq!(config.growth_chunk, ALIGNMENT);
    assert_eq!(config.initial_extension, 0);

    let config = AllocatorConfig::default()
      .with_initial_extension(100)
      .normalized();
    assert_eq!(config.initial_extension, 104);
  }
}
