//! A versioned key is the user key followed by `u64::MAX - timestamp` in
//! big-endian:
//!
//! ```text
//! +----------------+---------------------------------------+
//! | user key bytes | 64-bit big-endian (u64::MAX - timestamp) |
//! +----------------+---------------------------------------+
//! ```
//!
//! Because the timestamp is inverted, a plain byte-wise comparison of the
//! suffix orders newer versions of the same user key first.

use core::cmp;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The size of the timestamp suffix of a versioned key.
pub const TIMESTAMP_SIZE: usize = core::mem::size_of::<u64>();

/// Appends the inverted timestamp suffix to `key`.
///
/// # Example
///
/// ```
/// use memskl::key;
///
/// let versioned = key::with_timestamp(b"foo", 5);
/// assert_eq!(key::parse_timestamp(&versioned), 5);
/// assert_eq!(key::user_key(&versioned), b"foo");
/// ```
pub fn with_timestamp(key: &[u8], ts: u64) -> Bytes {
  let mut out = BytesMut::with_capacity(key.len() + TIMESTAMP_SIZE);
  out.put_slice(key);
  out.put_u64(u64::MAX - ts);
  out.freeze()
}

/// Returns the timestamp of a versioned key.
///
/// # Panics
/// - `key` is shorter than [`TIMESTAMP_SIZE`].
#[inline]
pub fn parse_timestamp(key: &[u8]) -> u64 {
  let mut suffix = &key[split_point(key)..];
  u64::MAX - suffix.get_u64()
}

/// Returns the user key portion of a versioned key.
///
/// # Panics
/// - `key` is shorter than [`TIMESTAMP_SIZE`].
#[inline]
pub fn user_key(key: &[u8]) -> &[u8] {
  &key[..split_point(key)]
}

/// Three-way comparison of two versioned keys: user keys first, then the
/// inverted timestamps, so that for equal user keys the larger timestamp
/// sorts first.
///
/// # Panics
/// - either key is shorter than [`TIMESTAMP_SIZE`].
#[inline]
pub fn compare_keys(lhs: &[u8], rhs: &[u8]) -> cmp::Ordering {
  let (l, r) = (split_point(lhs), split_point(rhs));
  lhs[..l]
    .cmp(&rhs[..r])
    .then_with(|| lhs[l..].cmp(&rhs[r..]))
}

/// Returns true if both versioned keys carry the same user key.
///
/// # Panics
/// - either key is shorter than [`TIMESTAMP_SIZE`].
#[inline]
pub fn same_key(lhs: &[u8], rhs: &[u8]) -> bool {
  user_key(lhs) == user_key(rhs)
}

#[inline]
fn split_point(key: &[u8]) -> usize {
  assert!(
    key.len() >= TIMESTAMP_SIZE,
    "versioned key must be at least {TIMESTAMP_SIZE} bytes, got {}",
    key.len()
  );
  key.len() - TIMESTAMP_SIZE
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_round_trip() {
    let key = with_timestamp(b"foo", 5);
    assert_eq!(key.len(), 3 + TIMESTAMP_SIZE);
    assert_eq!(parse_timestamp(&key), 5);
    assert_eq!(user_key(&key), b"foo");
  }

  #[test]
  fn test_layout() {
    let key = with_timestamp(b"k", 1);
    assert_eq!(&key[..], &[b'k', 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe]);

    let key = with_timestamp(b"", u64::MAX);
    assert_eq!(&key[..], &[0; TIMESTAMP_SIZE]);
    assert!(user_key(&key).is_empty());
    assert_eq!(parse_timestamp(&key), u64::MAX);
  }

  #[test]
  fn test_newer_version_sorts_first() {
    let newer = with_timestamp(b"x", 20);
    let older = with_timestamp(b"x", 10);
    assert_eq!(compare_keys(&newer, &older), cmp::Ordering::Less);
    assert_eq!(compare_keys(&older, &newer), cmp::Ordering::Greater);
    assert_eq!(compare_keys(&newer, &newer), cmp::Ordering::Equal);
    assert!(same_key(&newer, &older));
  }

  #[test]
  fn test_user_key_dominates() {
    // "a" at the oldest timestamp still sorts before "b" at the newest.
    let a = with_timestamp(b"a", 0);
    let b = with_timestamp(b"b", u64::MAX);
    assert_eq!(compare_keys(&a, &b), cmp::Ordering::Less);

    // A prefix user key sorts before its extensions, whatever the timestamps.
    let short = with_timestamp(b"ab", 0);
    let long = with_timestamp(b"abc", u64::MAX);
    assert_eq!(compare_keys(&short, &long), cmp::Ordering::Less);
    assert!(!same_key(&short, &long));
  }

  #[test]
  #[should_panic]
  fn test_short_key() {
    parse_timestamp(b"short");
  }
}
