use super::{node::Node, SkipList};
use crate::{key, value::ValueRef};

/// The iterator interface shared by the iterators over a memtable and the
/// tables built from it.
pub trait KvIterator {
  /// Advances to the next entry.
  fn next(&mut self);

  /// Positions the iterator at its first entry.
  fn rewind(&mut self);

  /// Positions the iterator at the first entry at or after `key`, in the
  /// iterator's own direction.
  fn seek(&mut self, key: &[u8]);

  /// Returns true if the iterator is positioned at an entry.
  fn valid(&self) -> bool;

  /// Returns the versioned key of the current entry.
  fn key(&self) -> &[u8];

  /// Returns the value of the current entry.
  fn value(&self) -> ValueRef<'_>;
}

/// A bidirectional cursor over a [`SkipList`].
///
/// The iterator owns a handle to the skiplist, so it stays usable even if
/// every other handle is dropped. It is not a snapshot: concurrent writes
/// may or may not be observed.
#[derive(Debug)]
pub struct ListIterator {
  list: SkipList,
  nd: Option<u32>,
}

impl ListIterator {
  #[inline]
  pub(super) fn new(list: SkipList) -> Self {
    Self { list, nd: None }
  }

  /// Releases the handle held by the iterator.
  #[inline]
  pub fn close(self) {
    drop(self);
  }

  /// Returns true if the iterator is positioned at an entry.
  #[inline]
  pub fn valid(&self) -> bool {
    self.nd.is_some()
  }

  /// Returns the versioned key of the current entry.
  ///
  /// # Panics
  /// - The iterator is not [`valid`](ListIterator::valid).
  #[inline]
  pub fn key(&self) -> &[u8] {
    self.node().key(self.list.arena())
  }

  /// Returns the value of the current entry, its version is the timestamp of
  /// the key.
  ///
  /// # Panics
  /// - The iterator is not [`valid`](ListIterator::valid).
  #[inline]
  pub fn value(&self) -> ValueRef<'_> {
    let arena = self.list.arena();
    let nd = self.node();
    nd.value(arena)
      .with_version(key::parse_timestamp(nd.key(arena)))
  }

  /// Advances to the next entry.
  ///
  /// # Panics
  /// - The iterator is not [`valid`](ListIterator::valid).
  #[inline]
  pub fn next(&mut self) {
    let next = self.node().next_offset(self.list.arena(), 0);
    self.nd = (next != 0).then_some(next);
  }

  /// Moves to the previous entry.
  ///
  /// There are no back links, so this searches again from the head.
  ///
  /// # Panics
  /// - The iterator is not [`valid`](ListIterator::valid).
  #[inline]
  pub fn prev(&mut self) {
    self.nd = self.list.find_less_than(self.key(), false);
  }

  /// Positions at the first entry with a key `>= key`.
  #[inline]
  pub fn seek(&mut self, key: &[u8]) {
    self.nd = self.list.find_greater_or_equal(key);
  }

  /// Positions at the last entry with a key `<= key`.
  #[inline]
  pub fn seek_for_prev(&mut self, key: &[u8]) {
    self.nd = self.list.find_less_than(key, true);
  }

  /// Positions at the first entry.
  #[inline]
  pub fn seek_to_first(&mut self) {
    self.nd = self.list.find_first();
  }

  /// Positions at the last entry.
  #[inline]
  pub fn seek_to_last(&mut self) {
    self.nd = self.list.find_last();
  }

  fn node(&self) -> &Node {
    match self.nd {
      Some(offset) => self.list.arena().node(offset),
      None => panic!("iterator is not positioned at an entry"),
    }
  }
}

impl KvIterator for ListIterator {
  #[inline]
  fn next(&mut self) {
    ListIterator::next(self)
  }

  #[inline]
  fn rewind(&mut self) {
    self.seek_to_first()
  }

  #[inline]
  fn seek(&mut self, key: &[u8]) {
    ListIterator::seek(self, key)
  }

  #[inline]
  fn valid(&self) -> bool {
    ListIterator::valid(self)
  }

  #[inline]
  fn key(&self) -> &[u8] {
    ListIterator::key(self)
  }

  #[inline]
  fn value(&self) -> ValueRef<'_> {
    ListIterator::value(self)
  }
}

/// A single direction wrapper over a [`ListIterator`].
///
/// When reversed, `next` walks backwards, `rewind` starts from the last
/// entry and `seek` finds the last entry `<= key`.
#[derive(Debug)]
pub struct UniIterator {
  iter: ListIterator,
  reversed: bool,
}

impl UniIterator {
  #[inline]
  pub(super) fn new(iter: ListIterator, reversed: bool) -> Self {
    Self { iter, reversed }
  }

  /// Returns true if the iterator walks backwards.
  #[inline]
  pub const fn reversed(&self) -> bool {
    self.reversed
  }

  /// Releases the handle held by the iterator.
  #[inline]
  pub fn close(self) {
    self.iter.close();
  }
}

impl KvIterator for UniIterator {
  #[inline]
  fn next(&mut self) {
    if !self.reversed {
      self.iter.next();
    } else {
      self.iter.prev();
    }
  }

  #[inline]
  fn rewind(&mut self) {
    if !self.reversed {
      self.iter.seek_to_first();
    } else {
      self.iter.seek_to_last();
    }
  }

  #[inline]
  fn seek(&mut self, key: &[u8]) {
    if !self.reversed {
      self.iter.seek(key);
    } else {
      self.iter.seek_for_prev(key);
    }
  }

  #[inline]
  fn valid(&self) -> bool {
    self.iter.valid()
  }

  #[inline]
  fn key(&self) -> &[u8] {
    self.iter.key()
  }

  #[inline]
  fn value(&self) -> ValueRef<'_> {
    self.iter.value()
  }
}
