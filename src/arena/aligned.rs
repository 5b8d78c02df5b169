use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

/// A fixed size, zero initialized heap buffer with a guaranteed alignment.
///
/// The buffer never grows, so pointers derived from it stay valid for as long
/// as the buffer is alive.
#[derive(Debug)]
pub(super) struct AlignedVec {
  ptr: NonNull<u8>,
  cap: usize,
  align: usize,
}

impl Drop for AlignedVec {
  #[inline]
  fn drop(&mut self) {
    if self.cap != 0 {
      // Safety: the ptr was allocated with exactly this layout in `new`.
      unsafe {
        dealloc(self.ptr.as_ptr(), self.layout());
      }
    }
  }
}

impl AlignedVec {
  #[inline]
  pub(super) fn new(capacity: usize, align: usize) -> Self {
    assert!(
      capacity <= Self::max_capacity(align),
      "`capacity` cannot exceed isize::MAX - {}",
      align - 1
    );

    if capacity == 0 {
      return Self {
        ptr: NonNull::dangling(),
        cap: 0,
        align,
      };
    }

    let ptr = unsafe {
      let layout = Layout::from_size_align_unchecked(capacity, align);
      let ptr = alloc_zeroed(layout);
      if ptr.is_null() {
        handle_alloc_error(layout);
      }
      NonNull::new_unchecked(ptr)
    };

    Self {
      ptr,
      cap: capacity,
      align,
    }
  }

  #[inline]
  const fn max_capacity(align: usize) -> usize {
    isize::MAX as usize - (align - 1)
  }

  #[inline]
  fn layout(&self) -> Layout {
    unsafe { Layout::from_size_align_unchecked(self.cap, self.align) }
  }

  #[inline]
  pub(super) const fn as_ptr(&self) -> *mut u8 {
    self.ptr.as_ptr()
  }

  #[inline]
  pub(super) const fn capacity(&self) -> usize {
    self.cap
  }
}
