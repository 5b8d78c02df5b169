use core::{
  mem, ptr, slice,
  sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use crossbeam_utils::CachePadded;

use crate::{skiplist::node::Node, value::ValueRef, MAX_HEIGHT};

mod aligned;
use aligned::AlignedVec;

/// Node records hold 64-bit atomics, so they are always 8-byte aligned.
const NODE_ALIGN: u64 = mem::align_of::<u64>() as u64;

const OFFSET_SIZE: usize = mem::size_of::<AtomicU32>();

/// An error indicating that the arena is full
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct ArenaError;

impl core::fmt::Display for ArenaError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "allocation failed because arena is full")
  }
}

impl std::error::Error for ArenaError {}

/// A lock-free, bump-pointer allocator over one pre-sized buffer.
///
/// Every allocation is addressed by a 32-bit offset relative to the start of
/// the buffer. Offset `0` is never handed out, so it can be stored in atomic
/// fields as the "null" link. The buffer is never grown, moved or reused, so
/// an offset stays valid for as long as the arena is alive.
///
/// Reading and writing the allocated bytes is internal to the skiplist, only
/// the accounting is public:
///
/// ```compile_fail
/// use memskl::Arena;
///
/// let arena = Arena::new(1024);
/// let offset = arena.allocate_key(b"key").unwrap();
/// arena.get_key(offset, 3);
/// ```
pub struct Arena {
  buf: AlignedVec,
  n: CachePadded<AtomicU64>,
  cap: u32,
}

// Safety: the only shared mutable state is the allocation counter (atomic),
// and writes into the buffer only ever target a range freshly reserved by the
// writing thread.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl core::fmt::Debug for Arena {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Arena")
      .field("cap", &self.cap)
      .field("allocated", &self.size())
      .finish()
  }
}

impl Arena {
  /// Creates a new arena with exactly `cap` bytes of zeroed memory.
  pub fn new(cap: u32) -> Self {
    Self {
      buf: AlignedVec::new(cap as usize, NODE_ALIGN as usize),
      // Don't store data at position 0 in order to reserve offset=0 as a kind
      // of nil pointer.
      n: CachePadded::new(AtomicU64::new(1)),
      cap,
    }
  }

  /// Returns the number of bytes allocated by the arena.
  #[inline]
  pub fn size(&self) -> usize {
    self.n.load(Ordering::Acquire).min(self.cap as u64) as usize
  }

  /// Returns the capacity of the arena.
  #[inline]
  pub const fn capacity(&self) -> usize {
    self.cap as usize
  }

  /// Returns the number of bytes that can still be allocated.
  #[inline]
  pub fn remaining(&self) -> usize {
    self.capacity().saturating_sub(self.size())
  }

  /// Reserves `size` bytes aligned to `align` with a single fetch-and-add.
  ///
  /// The counter is never rolled back, once an allocation overflows the
  /// capacity every later allocation fails as well.
  fn reserve(&self, size: u32, align: u64) -> Result<u32, ArenaError> {
    // Pad the allocation with enough bytes to ensure the requested alignment.
    let padded = size as u64 + align - 1;
    let current = self.n.fetch_add(padded, Ordering::AcqRel);

    if current + padded > self.cap as u64 {
      // Every allocation after this one fails too, report only the first.
      if crosses_capacity(current, self.cap) {
        tracing::warn!(
          cap = self.cap,
          allocated = current,
          want = padded,
          "arena is full"
        );
      }
      return Err(ArenaError);
    }

    // Return the aligned offset.
    Ok(((current + align - 1) & !(align - 1)) as u32)
  }

  /// Reserves an 8-byte aligned node record whose tower holds exactly
  /// `height` links.
  ///
  /// The unused part of the tower is not allocated, so the record must never
  /// be accessed above its height.
  pub(crate) fn allocate_node(&self, height: usize) -> Result<u32, ArenaError> {
    assert!(
      (1..=MAX_HEIGHT).contains(&height),
      "height must be in 1..={MAX_HEIGHT}, got {height}"
    );

    let unused = (MAX_HEIGHT - height) * OFFSET_SIZE;
    self.reserve((Node::MAX_NODE_SIZE - unused) as u32, NODE_ALIGN)
  }

  /// Copies `key` into the arena, returns its offset.
  pub(crate) fn allocate_key(&self, key: &[u8]) -> Result<u32, ArenaError> {
    let offset = self.reserve(checked_len(key.len())?, 1)?;
    // Safety: the range was just reserved by this call.
    unsafe {
      self
        .bytes_mut(offset, key.len())
        .copy_from_slice(key);
    }
    Ok(offset)
  }

  /// Encodes `value` into the arena, returns its offset. The encoded length is
  /// [`ValueRef::encoded_size`].
  pub(crate) fn allocate_value(&self, value: ValueRef<'_>) -> Result<u32, ArenaError> {
    let size = value.encoded_size();
    let offset = self.reserve(checked_len(size)?, 1)?;
    // Safety: the range was just reserved by this call.
    unsafe {
      value.encode(self.bytes_mut(offset, size));
    }
    Ok(offset)
  }

  /// Returns the key bytes stored at `offset`.
  ///
  /// Offset `0` maps to the empty key.
  #[inline]
  pub(crate) fn get_key(&self, offset: u32, size: u16) -> &[u8] {
    self.bytes(offset, size as usize)
  }

  /// Decodes the value stored at `offset`.
  #[inline]
  pub(crate) fn get_value(&self, offset: u32, size: u32) -> ValueRef<'_> {
    ValueRef::decode(self.bytes(offset, size as usize))
  }

  /// Writes a node header into a record reserved by [`Arena::allocate_node`].
  ///
  /// Must be called before the offset is published to other threads.
  pub(crate) fn write_node(&self, offset: u32, node: Node) {
    self.check_node_offset(offset);
    // Safety: the offset is in bounds and aligned, and the record has not been
    // published yet, so no other reference to it exists.
    unsafe {
      ptr::write(self.buf.as_ptr().add(offset as usize).cast::<Node>(), node);
    }
  }

  /// Returns the node stored at `offset`, `None` for the null offset.
  #[inline]
  pub(crate) fn get_node(&self, offset: u32) -> Option<&Node> {
    if offset == 0 {
      return None;
    }
    Some(self.node(offset))
  }

  /// Returns the node stored at the non-null `offset`.
  #[inline]
  pub(crate) fn node(&self, offset: u32) -> &Node {
    self.check_node_offset(offset);
    // Safety: the offset is in bounds and aligned, the buffer is zero
    // initialized and every field of `Node` is valid for any bit pattern.
    unsafe { &*self.buf.as_ptr().add(offset as usize).cast::<Node>() }
  }

  /// Returns the offset of a node that lives in this arena.
  #[inline]
  pub(crate) fn node_offset(&self, node: &Node) -> u32 {
    let addr = node as *const Node as usize;
    let base = self.buf.as_ptr() as usize;
    assert!(
      addr > base && addr + Node::SIZE <= base + self.capacity(),
      "node does not belong to this arena"
    );
    (addr - base) as u32
  }

  /// Returns the `level`-th link of the node tower.
  #[inline]
  pub(crate) fn tower(&self, node: &Node, level: usize) -> &AtomicU32 {
    assert!(
      level < node.height(),
      "level {level} is above the node height {}",
      node.height()
    );
    let offset = self.node_offset(node) as usize + Node::SIZE + level * OFFSET_SIZE;
    // Safety: the link is inside the record reserved for this node, and the
    // record is 8-byte aligned, so the link is 4-byte aligned.
    unsafe { &*self.buf.as_ptr().add(offset).cast::<AtomicU32>() }
  }

  #[inline]
  fn check_node_offset(&self, offset: u32) {
    assert!(
      offset as u64 % NODE_ALIGN == 0 && offset as usize + Node::SIZE <= self.capacity(),
      "invalid node offset {offset}"
    );
  }

  #[inline]
  fn bytes(&self, offset: u32, size: usize) -> &[u8] {
    if offset == 0 {
      return &[];
    }

    assert!(
      offset as usize + size <= self.capacity(),
      "range {offset}+{size} is out of the arena bounds"
    );
    // Safety: the range is in bounds, and allocated ranges are immutable once
    // published.
    unsafe { slice::from_raw_parts(self.buf.as_ptr().add(offset as usize), size) }
  }

  /// ## Safety
  /// - The range must have been reserved by the caller and not yet published.
  #[allow(clippy::mut_from_ref)]
  #[inline]
  unsafe fn bytes_mut(&self, offset: u32, size: usize) -> &mut [u8] {
    assert!(offset as usize + size <= self.buf.capacity());
    slice::from_raw_parts_mut(self.buf.as_ptr().add(offset as usize), size)
  }
}

/// Converts an allocation length to the 32-bit size the arena reserves.
#[inline]
fn checked_len(len: usize) -> Result<u32, ArenaError> {
  u32::try_from(len).map_err(|_| ArenaError)
}

/// Returns true if an allocation starting at `current` is the one that runs
/// past `cap`, rather than one of those failing after it.
#[inline]
const fn crosses_capacity(current: u64, cap: u32) -> bool {
  current <= cap as u64
}
