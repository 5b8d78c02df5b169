use core::{
  cmp,
  ptr::NonNull,
  sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};

use crossbeam_utils::CachePadded;

use crate::{
  arena::Arena,
  error::Error,
  key::{self, TIMESTAMP_SIZE},
  options::Options,
  random_height,
  value::ValueRef,
  MAX_HEIGHT,
};

pub(crate) mod node;
use node::Node;

mod iterator;
pub use iterator::{KvIterator, ListIterator, UniIterator};


/// State shared by every handle of one skiplist.
struct Core {
  arena: Arena,
  /// Offset of the sentinel head node, which has a full height tower and an
  /// empty key.
  head: u32,
  /// Current height. 1 <= height <= MAX_HEIGHT. CAS.
  height: CachePadded<AtomicU32>,
  /// Number of distinct nodes linked at the base level.
  len: CachePadded<AtomicU32>,
  refs: AtomicUsize,
  opts: Options,
}

/// A lock-free, arena based skiplist ordered by versioned keys.
///
/// Keys are versioned keys built by [`key::with_timestamp`]: for the same
/// user key, newer versions sort first. Every version is a distinct node,
/// putting the exact same versioned key twice only replaces the value.
///
/// `SkipList` is a reference counted handle. Cloning it (or calling
/// [`SkipList::incr_ref`]) shares the same arena, and the arena is released
/// when the last handle, iterators included, is dropped.
///
/// ## Example
///
/// ```
/// use memskl::{key, SkipList, ValueStruct};
///
/// let list = SkipList::new(1 << 20).unwrap();
/// list.put(&key::with_timestamp(b"foo", 1), &ValueStruct::from("bar")).unwrap();
///
/// let val = list.get(&key::with_timestamp(b"foo", 2)).unwrap();
/// assert_eq!(val.value(), b"bar");
/// assert_eq!(val.version(), 1);
/// ```
pub struct SkipList {
  core: NonNull<Core>,
}

// Safety: the core is only mutated through atomics and the lock-free arena.
unsafe impl Send for SkipList {}
unsafe impl Sync for SkipList {}

impl Clone for SkipList {
  #[inline]
  fn clone(&self) -> Self {
    self.core().refs.fetch_add(1, Ordering::Relaxed);
    Self { core: self.core }
  }
}

impl Drop for SkipList {
  fn drop(&mut self) {
    let core = self.core();
    if core.refs.fetch_sub(1, Ordering::Release) != 1 {
      return;
    }

    // Synchronize with the decrements of the other handles, so that every
    // write made through them happens before the arena is released.
    core.refs.load(Ordering::Acquire);

    tracing::debug!(
      used = core.arena.size(),
      entries = core.len.load(Ordering::Relaxed),
      "releasing skiplist arena"
    );

    // Safety: this was the last handle, and the core was leaked from a box in
    // `SkipList::with_options`.
    unsafe {
      drop(Box::from_raw(self.core.as_ptr()));
    }
  }
}

impl core::fmt::Debug for SkipList {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("SkipList")
      .field("height", &self.height())
      .field("len", &self.len())
      .field("arena", self.arena())
      .finish()
  }
}

impl SkipList {
  /// Creates a new skiplist backed by an arena of `capacity` bytes.
  ///
  /// Shorthand for `SkipList::with_options(Options::new().with_capacity(capacity))`.
  #[inline]
  pub fn new(capacity: u32) -> Result<Self, Error> {
    Self::with_options(Options::new().with_capacity(capacity))
  }

  /// Creates a new skiplist with the given options.
  ///
  /// Returns [`Error::Full`] if the arena cannot even hold the head node.
  pub fn with_options(opts: Options) -> Result<Self, Error> {
    let arena = Arena::new(opts.capacity());
    let head = arena.allocate_node(MAX_HEIGHT)?;
    arena.write_node(head, Node::new(0, 0, 0, 0, MAX_HEIGHT as u16));

    tracing::debug!(capacity = opts.capacity(), "created skiplist");

    let core = Box::new(Core {
      arena,
      head,
      height: CachePadded::new(AtomicU32::new(1)),
      len: CachePadded::new(AtomicU32::new(0)),
      refs: AtomicUsize::new(1),
      opts,
    });

    Ok(Self {
      core: NonNull::from(Box::leak(core)),
    })
  }

  #[inline]
  fn core(&self) -> &Core {
    // Safety: the core stays alive for as long as any handle does.
    unsafe { self.core.as_ref() }
  }

  /// Returns a new handle to the same skiplist, increasing the reference count.
  #[inline]
  pub fn incr_ref(&self) -> Self {
    self.clone()
  }

  /// Releases this handle. The arena is freed once the last handle is released.
  #[inline]
  pub fn decr_ref(self) {
    drop(self);
  }

  /// Returns the number of live handles, iterators included.
  #[inline]
  pub fn ref_count(&self) -> usize {
    self.core().refs.load(Ordering::Acquire)
  }

  /// Returns the options the skiplist was created with.
  #[inline]
  pub fn options(&self) -> &Options {
    &self.core().opts
  }

  /// Returns the arena backing the skiplist.
  #[inline]
  pub fn arena(&self) -> &Arena {
    &self.core().arena
  }

  /// Returns the current height of the skiplist.
  #[inline]
  pub fn height(&self) -> usize {
    self.core().height.load(Ordering::Acquire) as usize
  }

  /// Returns the number of entries, every version of a user key counts.
  #[inline]
  pub fn len(&self) -> usize {
    self.core().len.load(Ordering::Acquire) as usize
  }

  /// Returns true if the skiplist holds no entries.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.find_last().is_none()
  }

  /// Returns the number of arena bytes used so far.
  #[inline]
  pub fn mem_size(&self) -> usize {
    self.arena().size()
  }

  /// Returns the capacity of the arena.
  #[inline]
  pub fn capacity(&self) -> usize {
    self.arena().capacity()
  }

  /// Inserts the versioned `key` with `value`, or replaces the value if the
  /// exact same versioned key is already present.
  ///
  /// Once [`Error::Full`] is returned the skiplist cannot accept any more
  /// writes.
  ///
  /// # Panics
  /// - `key` is shorter than [`TIMESTAMP_SIZE`].
  pub fn put<'a, V>(&self, key: &[u8], value: V) -> Result<(), Error>
  where
    V: Into<ValueRef<'a>>,
  {
    assert!(
      key.len() >= TIMESTAMP_SIZE,
      "versioned key must be at least {TIMESTAMP_SIZE} bytes, got {}",
      key.len()
    );

    let opts = self.options();
    if key.len() > opts.max_key_size() as usize {
      return Err(Error::KeyTooLarge(key.len() as u64));
    }

    let value = value.into();
    let value_size = value.encoded_size();
    if value_size > opts.max_value_size() as usize {
      return Err(Error::ValueTooLarge(value_size as u64));
    }

    let arena = self.arena();
    let list_height = self.height();
    let mut prev = [0u32; MAX_HEIGHT + 1];
    let mut next = [0u32; MAX_HEIGHT + 1];
    prev[list_height] = self.core().head;

    for i in (0..list_height).rev() {
      // Use higher level to speed up for current level.
      let (p, n) = self.find_splice_for_level(key, prev[i + 1], i);
      if p == n {
        arena.node(p).set_value(arena, value)?;
        return Ok(());
      }
      prev[i] = p;
      next[i] = n;
    }

    // We do need to create a new node.
    let height = random_height();
    let nd_offset = self.new_node(key, value, height)?;
    self.raise_height(height);
    let nd = arena.node(nd_offset);

    // We always insert from the base level and up. After you add a node in
    // base level, we cannot create a node in the level above because it would
    // have discovered the node in the base level.
    for i in 0..height {
      loop {
        if prev[i] == 0 {
          // We haven't computed prev, next for this level because height
          // exceeds old list height.
          let (p, n) = self.find_splice_for_level(key, self.core().head, i);
          if p == n {
            debug_assert_eq!(i, 0, "equality can happen only on base level");
            arena.node(p).set_value(arena, value)?;
            return Ok(());
          }
          prev[i] = p;
          next[i] = n;
        }

        nd.set_next_offset(arena, i, next[i]);
        if arena.node(prev[i]).cas_next_offset(arena, i, next[i], nd_offset) {
          // Managed to insert nd between prev[i] and next[i]. Go to the next
          // level.
          break;
        }

        tracing::trace!(level = i, "splice lost a race, searching again");

        // CAS failed. We need to recompute prev and next. It is unlikely to
        // be helpful to try to use a different level as we redo the search,
        // because it is unlikely that lots of nodes are inserted between
        // prev[i] and next[i].
        let (p, n) = self.find_splice_for_level(key, prev[i], i);
        if p == n {
          debug_assert_eq!(i, 0, "equality can happen only on base level");
          arena.node(p).set_value(arena, value)?;
          return Ok(());
        }
        prev[i] = p;
        next[i] = n;
      }
    }

    self.core().len.fetch_add(1, Ordering::Release);
    Ok(())
  }

  /// Returns the newest version of the user key of `key` whose timestamp is
  /// not greater than the timestamp of `key`.
  ///
  /// The version of the returned value is the timestamp of the matched entry.
  ///
  /// # Panics
  /// - `key` is shorter than [`TIMESTAMP_SIZE`].
  pub fn get(&self, key: &[u8]) -> Option<ValueRef<'_>> {
    let arena = self.arena();
    let nd = arena.node(self.find_greater_or_equal(key)?);
    let nd_key = nd.key(arena);
    if !key::same_key(key, nd_key) {
      return None;
    }

    Some(nd.value(arena).with_version(key::parse_timestamp(nd_key)))
  }

  /// Returns true if [`SkipList::get`] would find a version of the user key
  /// of `key`.
  #[inline]
  pub fn contains_key(&self, key: &[u8]) -> bool {
    self.get(key).is_some()
  }

  /// Returns a bidirectional iterator, which holds its own handle to the
  /// skiplist.
  #[inline]
  pub fn iter(&self) -> ListIterator {
    ListIterator::new(self.incr_ref())
  }

  /// Returns a forward-only iterator, walking backwards when `reversed`.
  #[inline]
  pub fn uni_iter(&self, reversed: bool) -> UniIterator {
    UniIterator::new(self.iter(), reversed)
  }

  /// Finds the first node whose key is `>= key`.
  #[inline]
  pub(crate) fn find_greater_or_equal(&self, key: &[u8]) -> Option<u32> {
    self.find_near(key, false, true)
  }

  /// Finds the last node whose key is `< key`, or `<= key` if `allow_equal`.
  #[inline]
  pub(crate) fn find_less_than(&self, key: &[u8], allow_equal: bool) -> Option<u32> {
    self.find_near(key, true, allow_equal)
  }

  /// Finds the first node of the base level.
  #[inline]
  pub(crate) fn find_first(&self) -> Option<u32> {
    let arena = self.arena();
    let first = arena.node(self.core().head).next_offset(arena, 0);
    (first != 0).then_some(first)
  }

  /// Finds the last node of the base level.
  pub(crate) fn find_last(&self) -> Option<u32> {
    let arena = self.arena();
    let head = self.core().head;
    let mut x = head;
    let mut level = self.height() - 1;
    loop {
      let next = arena.node(x).next_offset(arena, level);
      if next != 0 {
        x = next;
        continue;
      }

      if level == 0 {
        return (x != head).then_some(x);
      }
      level -= 1;
    }
  }

  /// Finds the node near to `key`.
  ///
  /// If `less` is true, it finds the rightmost node such that
  /// `node.key < key` (`<=` if `allow_equal`). Otherwise it finds the
  /// leftmost node such that `node.key > key` (`>=` if `allow_equal`).
  /// The head node is never returned.
  fn find_near(&self, key: &[u8], less: bool, allow_equal: bool) -> Option<u32> {
    let arena = self.arena();
    let head = self.core().head;
    let mut x = head;
    let mut level = self.height() - 1;

    loop {
      // Assume x.key < key.
      let next = arena.node(x).next_offset(arena, level);
      let Some(nd) = arena.get_node(next) else {
        // x.key < key < END OF LIST
        if level > 0 {
          // Can descend further to iterate closer to the end.
          level -= 1;
          continue;
        }

        // Level = 0. Cannot descend further. Let's return something that
        // makes sense.
        if !less || x == head {
          return None;
        }
        return Some(x);
      };

      match key::compare_keys(key, nd.key(arena)) {
        cmp::Ordering::Greater => {
          // x.key < next.key < key. We can continue to move right.
          x = next;
        }
        cmp::Ordering::Equal => {
          // x.key < key == next.key.
          if allow_equal {
            return Some(next);
          }

          if !less {
            // We want >, so go to base level to grab the next bigger node.
            let succ = nd.next_offset(arena, 0);
            return (succ != 0).then_some(succ);
          }

          // We want <. If not base level, we should go closer in the next
          // level.
          if level > 0 {
            level -= 1;
            continue;
          }

          // On base level. Return x.
          return (x != head).then_some(x);
        }
        cmp::Ordering::Less => {
          // x.key < key < next.key.
          if level > 0 {
            level -= 1;
            continue;
          }

          // At base level. Need to return something.
          if !less {
            return Some(next);
          }
          return (x != head).then_some(x);
        }
      }
    }
  }

  /// Returns `(before, next)` such that `before.key < key <= next.key` on
  /// `level`, starting the search from `before`.
  ///
  /// If a node with exactly `key` exists on `level`, both offsets point to it.
  fn find_splice_for_level(&self, key: &[u8], mut before: u32, level: usize) -> (u32, u32) {
    let arena = self.arena();
    loop {
      // Assume before.key < key.
      let next = arena.node(before).next_offset(arena, level);
      let Some(nd) = arena.get_node(next) else {
        return (before, next);
      };

      match key::compare_keys(key, nd.key(arena)) {
        cmp::Ordering::Equal => return (next, next),
        // before.key < key < next.key. We are done for this level.
        cmp::Ordering::Less => return (before, next),
        // Keep moving right on this level.
        cmp::Ordering::Greater => before = next,
      }
    }
  }

  fn new_node(&self, key: &[u8], value: ValueRef<'_>, height: usize) -> Result<u32, Error> {
    let arena = self.arena();
    let key_offset = arena.allocate_key(key)?;
    let value_offset = arena.allocate_value(value)?;
    let offset = arena.allocate_node(height)?;
    arena.write_node(
      offset,
      Node::new(
        key_offset,
        key.len() as u16,
        value_offset,
        value.encoded_size() as u32,
        height as u16,
      ),
    );
    Ok(offset)
  }

  /// Try to increase the list height via CAS. Losing the race to a taller
  /// height is fine.
  fn raise_height(&self, height: usize) {
    let core = self.core();
    let mut list_height = self.height();
    while height > list_height {
      match core.height.compare_exchange_weak(
        list_height as u32,
        height as u32,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => {
          tracing::trace!(from = list_height, to = height, "raised skiplist height");
          break;
        }
        Err(h) => list_height = h as usize,
      }
    }
  }
}
