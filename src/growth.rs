use std::ptr::NonNull;

/// Errors reported by a [`HeapGrowth`] service.
#[derive(Debug, thiserror::Error)]
pub enum GrowthError {
  #[error("heap exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },
  #[error("invalid heap capacity: {0} bytes")]
  InvalidCapacity(usize),
  #[error("heap is not contiguous: expected break at {expected:#x}, found {actual:#x}")]
  Discontiguous { expected: usize, actual: usize },
  #[error("growth of {0} bytes overflows the address range")]
  Overflow(usize),
  #[error("sbrk failed: {0}")]
  Sbrk(#[from] std::io::Error),
}

/// A single contiguous address range that can only grow at its high end.
///
/// This is the allocator's sole source of memory. Implementations must hand
/// out memory that stays valid and writable for as long as the service lives,
/// and the start of the range must be aligned to [`ALIGNMENT`](crate::ALIGNMENT).
pub trait HeapGrowth {
  /// Extends the range by `delta` bytes and returns the old end of the range,
  /// i.e. the first byte of the newly added region.
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<NonNull<u8>, GrowthError>;

  /// First byte of the range.
  fn low(&self) -> *mut u8;

  /// Last byte of the range (one below `low` while the range is empty).
  fn high(&self) -> *mut u8 {
    self.low().wrapping_add(self.size()).wrapping_sub(1)
  }

  /// Current size of the range in bytes.
  fn size(&self) -> usize;

  /// Whether `p` lies inside `[low, high]`.
  fn contains(
    &self,
    p: *const u8,
  ) -> bool {
    let p = p as usize;
    p >= self.low() as usize && p <= self.high() as usize
  }
}
