#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

/// The ARENA the skiplist carves its nodes, keys and values from.
pub mod arena;
pub use arena::{Arena, ArenaError};

/// Bloom filter policy used to cheaply reject absent keys.
pub mod bloom;
pub use bloom::{BloomFilterPolicy, FilterPolicy};

/// MVCC key codec: user key plus an inverted, big-endian timestamp suffix.
pub mod key;

/// Value layout stored in the skiplist.
pub mod value;
pub use value::{Meta, ValueRef, ValueStruct};

mod error;
pub use error::Error;

mod options;
pub use options::{Options, DEFAULT_CAPACITY};

mod skiplist;
pub use skiplist::{KvIterator, ListIterator, SkipList, UniIterator};

/// The maximum height of a node tower.
pub const MAX_HEIGHT: usize = 20;

/// Precompute the level probabilities so that only a single random number
/// needs to be generated per insertion. Each additional level is kept with
/// probability 1/4.
const PROBABILITIES: [u32; MAX_HEIGHT] = {
  let mut probabilities = [0; MAX_HEIGHT];

  let mut i = 0;
  while i < MAX_HEIGHT {
    probabilities[i] = ((u32::MAX as u64) >> (2 * i)) as u32;
    i += 1;
  }

  probabilities
};

/// Draws a tower height in `1..=MAX_HEIGHT` from a geometric distribution.
#[inline]
fn random_height() -> usize {
  let rnd: u32 = rand::random();
  let mut h = 1;

  while h < MAX_HEIGHT && rnd <= PROBABILITIES[h] {
    h += 1;
  }
  h
}
