//! Boundary tags and block address arithmetic.
//!
//! A block is laid out as
//!
//! ```text
//!   ┌────────┬──────────────────────────────┬────────┐
//!   │ header │           payload            │ footer │
//!   └────────┴──────────────────────────────┴────────┘
//!            ▲
//!            └── block pointer (bp) handed to the caller
//! ```
//!
//! Header and footer hold the same [`Tag`]. Every helper here takes the block
//! pointer, never the header address.

use crate::{ALIGNMENT, WSIZE};

const SIZE_MASK: u64 = !(ALIGNMENT as u64 - 1);
const ALLOC_BIT: u64 = 1;

/// A packed `(size, allocated)` boundary tag.
///
/// The size lives in the upper bits (always a multiple of 16), the allocated
/// flag in the least-significant bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Tag(u64);

impl Tag {
  /// Packs `size` and `allocated` into a single word.
  ///
  /// `size` must have its low four bits clear.
  #[inline]
  pub const fn pack(
    size: usize,
    allocated: bool,
  ) -> Self {
    debug_assert!(size as u64 & !SIZE_MASK == 0);
    Self(size as u64 | allocated as u64)
  }

  #[inline]
  pub const fn from_bits(bits: u64) -> Self {
    Self(bits)
  }

  #[inline]
  pub const fn bits(self) -> u64 {
    self.0
  }

  #[inline]
  pub const fn size(self) -> usize {
    (self.0 & SIZE_MASK) as usize
  }

  #[inline]
  pub const fn is_allocated(self) -> bool {
    self.0 & ALLOC_BIT != 0
  }

  /// Same size, allocated flag cleared.
  #[inline]
  pub const fn freed(self) -> Self {
    Self(self.0 & !ALLOC_BIT)
  }
}

impl core::fmt::Debug for Tag {
  fn fmt(
    &self,
    f: &mut core::fmt::Formatter<'_>,
  ) -> core::fmt::Result {
    f.debug_struct("Tag")
      .field("size", &self.size())
      .field("allocated", &self.is_allocated())
      .finish()
  }
}

/// Reads the tag stored at `p`.
///
/// # Safety
/// `p` must be valid for an 8-byte aligned read.
#[inline]
pub unsafe fn get(p: *const u8) -> Tag {
  Tag(unsafe { p.cast::<u64>().read() })
}

/// Writes `tag` at `p`.
///
/// # Safety
/// `p` must be valid for an 8-byte aligned write.
#[inline]
pub unsafe fn put(
  p: *mut u8,
  tag: Tag,
) {
  unsafe { p.cast::<u64>().write(tag.0) }
}

/// Address of the header word of `bp`.
#[inline]
pub fn header(bp: *mut u8) -> *mut u8 {
  bp.wrapping_sub(WSIZE)
}

/// Address of the footer word of `bp`, derived from the size in its header.
///
/// # Safety
/// The header of `bp` must be readable.
#[inline]
pub unsafe fn footer(bp: *mut u8) -> *mut u8 {
  let size = unsafe { get(header(bp)) }.size();
  bp.wrapping_add(size).wrapping_sub(2 * WSIZE)
}

/// Block pointer of the block following `bp`.
///
/// The result is only meaningful while it stays inside the heap; callers
/// walking untrusted memory must bound-check it before dereferencing.
///
/// # Safety
/// The header of `bp` must be readable.
#[inline]
pub unsafe fn next_block(bp: *mut u8) -> *mut u8 {
  bp.wrapping_add(unsafe { get(header(bp)) }.size())
}

/// Block pointer of the block preceding `bp`, found through its footer.
///
/// # Safety
/// The word two words below `bp` (the previous footer) must be readable.
#[inline]
pub unsafe fn prev_block(bp: *mut u8) -> *mut u8 {
  bp.wrapping_sub(unsafe { get(bp.wrapping_sub(2 * WSIZE)) }.size())
}

/// Writes `tag` into both the header and the footer of `bp`.
///
/// The footer position is computed from `tag`, so this also resizes the block.
///
/// # Safety
/// The whole span `[header(bp), header(bp) + tag.size())` must be writable.
#[inline]
pub unsafe fn set_tags(
  bp: *mut u8,
  tag: Tag,
) {
  unsafe {
    put(header(bp), tag);
    put(footer(bp), tag);
  }
}
