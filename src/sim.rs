use std::{alloc, ptr::NonNull};

use crate::{
  ALIGNMENT,
  growth::{GrowthError, HeapGrowth},
};

/// Default capacity of a [`SimHeap`]: 20 MiB.
pub const DEFAULT_CAPACITY: usize = 20 * (1 << 20);

/// A simulated heap: one fixed-capacity buffer with a movable break.
///
/// Growth never moves the buffer, so addresses handed out stay valid until the
/// `SimHeap` is dropped. Several instances can live side by side, which is
/// what the tests rely on.
pub struct SimHeap {
  start: NonNull<u8>,
  brk: usize,
  capacity: usize,
}

impl SimHeap {
  /// A simulated heap with [`DEFAULT_CAPACITY`] bytes of room.
  pub fn new() -> Self {
    match Self::with_capacity(DEFAULT_CAPACITY) {
      Ok(heap) => heap,
      Err(_) => alloc::handle_alloc_error(Self::layout(DEFAULT_CAPACITY)),
    }
  }

  /// A simulated heap that refuses to grow past `capacity` bytes.
  ///
  /// `capacity` is rounded up to the alignment unit and must not be zero.
  pub fn with_capacity(capacity: usize) -> Result<Self, GrowthError> {
    if capacity == 0 || capacity > isize::MAX as usize - ALIGNMENT {
      return Err(GrowthError::InvalidCapacity(capacity));
    }

    let capacity = crate::align!(capacity);
    let layout = Self::layout(capacity);

    // Zeroed so that reads of never-written words are deterministic.
    let start = unsafe { alloc::alloc_zeroed(layout) };
    let Some(start) = NonNull::new(start) else {
      return Err(GrowthError::Exhausted {
        requested: capacity,
        available: 0,
      });
    };

    Ok(Self {
      start,
      brk: 0,
      capacity,
    })
  }

  /// Maximum size the range may reach.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Moves the break back to the start, discarding everything handed out.
  ///
  /// Any heap built on top of this service must be re-initialized afterwards.
  pub fn reset(&mut self) {
    self.brk = 0;
  }

  fn layout(capacity: usize) -> alloc::Layout {
    // Only called with a non-zero, aligned capacity below isize::MAX.
    unsafe { alloc::Layout::from_size_align_unchecked(capacity, ALIGNMENT) }
  }
}

impl Default for SimHeap {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapGrowth for SimHeap {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<NonNull<u8>, GrowthError> {
    let available = self.capacity - self.brk;
    if delta > available {
      return Err(GrowthError::Exhausted {
        requested: delta,
        available,
      });
    }

    let old = unsafe { self.start.add(self.brk) };
    self.brk += delta;
    Ok(old)
  }

  fn low(&self) -> *mut u8 {
    self.start.as_ptr()
  }

  fn size(&self) -> usize {
    self.brk
  }
}

impl Drop for SimHeap {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.start.as_ptr(), Self::layout(self.capacity)) }
  }
}

impl core::fmt::Debug for SimHeap {
  fn fmt(
    &self,
    f: &mut core::fmt::Formatter<'_>,
  ) -> core::fmt::Result {
    f.debug_struct("SimHeap")
      .field("start", &self.start)
      .field("size", &self.brk)
      .field("capacity", &self.capacity)
      .finish()
  }
}
