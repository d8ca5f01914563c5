use std::{io, ptr::NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::growth::{GrowthError, HeapGrowth};

/// Returns the current program break.
pub fn program_break() -> *mut u8 {
  unsafe { sbrk(0) as *mut u8 }
}

/// A growth service backed by the process' real program break.
///
/// The break is shared with everything else in the process that calls
/// `sbrk(2)`, including the system allocator. If somebody else moves it between
/// two of our requests the range would no longer be contiguous; such a request
/// fails with [`GrowthError::Discontiguous`] instead of handing out memory the
/// heap cannot walk.
pub struct SbrkHeap {
  low: *mut u8,
  size: usize,
}

impl SbrkHeap {
  /// Claims the current program break as the start of the range, padding it
  /// up to the alignment unit first.
  pub fn new() -> Result<Self, GrowthError> {
    let current = program_break();
    let padding = crate::align!(current as usize) - current as usize;

    let low = if padding == 0 {
      current
    } else {
      unsafe { Self::raw_sbrk(padding)? }.wrapping_add(padding)
    };

    Ok(Self { low, size: 0 })
  }

  unsafe fn raw_sbrk(delta: usize) -> Result<*mut u8, GrowthError> {
    let increment = intptr_t::try_from(delta).map_err(|_| GrowthError::Overflow(delta))?;
    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return Err(GrowthError::Sbrk(io::Error::last_os_error()));
    }

    Ok(address as *mut u8)
  }
}

impl HeapGrowth for SbrkHeap {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<NonNull<u8>, GrowthError> {
    let expected = self.low.wrapping_add(self.size);
    let current = program_break();
    if current != expected {
      return Err(GrowthError::Discontiguous {
        expected: expected as usize,
        actual: current as usize,
      });
    }

    let address = unsafe { Self::raw_sbrk(delta)? };
    self.size += delta;

    log::trace!(
      "grew program break by {} bytes, address = {:?}, program break = {:?}",
      delta,
      address,
      program_break()
    );

    NonNull::new(address).ok_or(GrowthError::Overflow(delta))
  }

  fn low(&self) -> *mut u8 {
    self.low
  }

  fn size(&self) -> usize {
    self.size
  }
}

impl core::fmt::Debug for SbrkHeap {
  fn fmt(
    &self,
    f: &mut core::fmt::Formatter<'_>,
  ) -> core::fmt::Result {
    f.debug_struct("SbrkHeap")
      .field("low", &self.low)
      .field("size", &self.size)
      .finish()
  }
}
