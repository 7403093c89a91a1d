use crate::align::MIN_BLOCK_SIZE;

/// Smallest number of bytes requested from the heap when no free block fits.
pub const DEFAULT_GROWTH_CHUNK: usize = 512;

/// Allocator tuning.
///
/// ```rust
/// use tagalloc::Config;
///
/// let config = Config::default().with_growth_chunk(4096).with_paranoid(true);
/// assert_eq!(config.growth_chunk(), 4096);
/// assert!(config.paranoid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  growth_chunk: usize,
  paranoid: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      growth_chunk: DEFAULT_GROWTH_CHUNK,
      paranoid: false,
    }
  }
}

impl Config {
  /// Aligned up, and never below the minimum block size.
  pub fn with_growth_chunk(
    mut self,
    bytes: usize,
  ) -> Self {
    self.growth_chunk = crate::align!(bytes.min(usize::MAX / 2)).max(MIN_BLOCK_SIZE);
    self
  }

  /// Run the full heap check after every `malloc`, `free` and `realloc`.
  pub fn with_paranoid(
    mut self,
    paranoid: bool,
  ) -> Self {
    self.paranoid = paranoid;
    self
  }

  pub fn growth_chunk(&self) -> usize {
    self.growth_chunk
  }

  pub fn paranoid(&self) -> bool {
    self.paranoid
  }
}
