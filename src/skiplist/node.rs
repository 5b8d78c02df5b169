use core::{
  mem,
  sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use crate::{
  arena::{Arena, ArenaError},
  value::ValueRef,
  MAX_HEIGHT,
};

#[derive(Debug)]
#[repr(C)]
pub(crate) struct Node {
  // A byte slice is 16 bytes. We are trying to save space here.
  /// Multiple parts of the value are encoded as a single uint64 so that it
  /// can be atomically loaded and stored:
  ///   value offset: u32 (bits 0-31)
  ///   value size  : u32 (bits 32-63)
  value: AtomicU64,
  // Immutable. No need to lock to access key.
  key_offset: u32,
  // Immutable. No need to lock to access key.
  key_size: u16,
  height: u16,
  // ** DO NOT REMOVE BELOW COMMENT**
  // The tower is attached right after the header. Most nodes do not need the
  // full height of the tower, since the probability of each successive level
  // decreases exponentially, so the arena only reserves `height` links for a
  // node. All accesses to the links go through CAS, with no need to lock.
  //
  // tower: [AtomicU32; MAX_HEIGHT],
}

impl Node {
  pub(crate) const SIZE: usize = mem::size_of::<Self>();

  pub(crate) const MAX_NODE_SIZE: usize = Self::SIZE + MAX_HEIGHT * mem::size_of::<AtomicU32>();

  #[inline]
  pub(crate) const fn new(
    key_offset: u32,
    key_size: u16,
    value_offset: u32,
    value_size: u32,
    height: u16,
  ) -> Self {
    Self {
      value: AtomicU64::new(encode_value(value_offset, value_size)),
      key_offset,
      key_size,
      height,
    }
  }

  #[inline]
  pub(crate) const fn height(&self) -> usize {
    self.height as usize
  }

  #[inline]
  pub(crate) fn key<'a>(&self, arena: &'a Arena) -> &'a [u8] {
    arena.get_key(self.key_offset, self.key_size)
  }

  #[inline]
  pub(crate) fn value<'a>(&self, arena: &'a Arena) -> ValueRef<'a> {
    let (offset, size) = decode_value(self.value.load(Ordering::Acquire));
    arena.get_value(offset, size)
  }

  /// Replaces the value of the node. The key and the tower are untouched.
  pub(crate) fn set_value(&self, arena: &Arena, value: ValueRef<'_>) -> Result<(), ArenaError> {
    let offset = arena.allocate_value(value)?;
    self.value.store(
      encode_value(offset, value.encoded_size() as u32),
      Ordering::Release,
    );
    Ok(())
  }

  #[inline]
  pub(crate) fn next_offset(&self, arena: &Arena, level: usize) -> u32 {
    arena.tower(self, level).load(Ordering::Acquire)
  }

  /// Only valid before the node is linked at `level`.
  #[inline]
  pub(crate) fn set_next_offset(&self, arena: &Arena, level: usize, offset: u32) {
    arena.tower(self, level).store(offset, Ordering::Release);
  }

  #[inline]
  pub(crate) fn cas_next_offset(&self, arena: &Arena, level: usize, old: u32, new: u32) -> bool {
    arena
      .tower(self, level)
      .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }
}

#[inline]
const fn encode_value(offset: u32, val_size: u32) -> u64 {
  (val_size as u64) << 32 | offset as u64
}

#[inline]
const fn decode_value(value: u64) -> (u32, u32) {
  let offset = value as u32;
  let val_size = (value >> 32) as u32;
  (offset, val_size)
}
