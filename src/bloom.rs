/// The largest number of probes a filter is built with. Filters carrying a
/// larger count in their trailer are reserved for other encodings.
const MAX_PROBES: usize = 30;

/// Builds and queries compact membership filters over a batch of keys.
pub trait FilterPolicy {
  /// Returns the name of the policy, persisted next to the filters it builds.
  fn name(&self) -> &'static str;

  /// Appends a filter summarizing `keys` to `dst`.
  fn append_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

  /// Returns false only if `key` was definitely not among the keys `filter`
  /// was built from.
  fn may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// A bloom filter policy using double hashing over a single 32-bit hash.
///
/// A filter is laid out as
///
/// ```text
/// +-------------------+-----------+
/// | bit array (bytes) | 8-bit k   |
/// +-------------------+-----------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BloomFilterPolicy {
  bits_per_key: usize,
  k: usize,
}

impl BloomFilterPolicy {
  /// Creates a policy spending `bits_per_key` bits on every key.
  ///
  /// # Panics
  /// - `bits_per_key` is zero.
  pub fn new(bits_per_key: usize) -> Self {
    assert!(bits_per_key > 0, "bits_per_key must be greater than zero");

    // 0.69 =~ ln(2), which minimizes the false positive rate.
    let k = ((bits_per_key as f64) * 0.69).round() as usize;
    Self {
      bits_per_key,
      k: k.clamp(1, MAX_PROBES),
    }
  }

  /// Returns the number of bits spent on every key.
  #[inline]
  pub const fn bits_per_key(&self) -> usize {
    self.bits_per_key
  }

  /// Returns the number of probes per key.
  #[inline]
  pub const fn k(&self) -> usize {
    self.k
  }

  /// Builds a filter from `keys`.
  ///
  /// # Example
  ///
  /// ```
  /// use memskl::BloomFilterPolicy;
  ///
  /// let policy = BloomFilterPolicy::new(10);
  /// let filter = policy.build(&["a", "b", "c"]);
  /// assert!(policy.may_contain(b"a", &filter));
  /// ```
  pub fn build<K: AsRef<[u8]>>(&self, keys: &[K]) -> Vec<u8> {
    let hashes = keys
      .iter()
      .map(|k| hash(k.as_ref()))
      .collect::<Vec<_>>();
    let mut dst = Vec::new();
    self.append_filter_hashes(&hashes, &mut dst);
    dst
  }

  /// Appends a filter built from already hashed keys to `dst`.
  pub fn append_filter_hashes(&self, hashes: &[u32], dst: &mut Vec<u8>) {
    // For small n, we can see a very high false positive rate. Fix it
    // by enforcing a minimum bloom filter length.
    let bits = (hashes.len() * self.bits_per_key).max(64);
    let bytes = (bits + 7) / 8;
    let bits = (bytes * 8) as u64;

    let start = dst.len();
    dst.resize(start + bytes + 1, 0);
    let filter = &mut dst[start..];

    for &h in hashes {
      let mut h = h;
      // Rotate right 17 bits.
      let delta = h.rotate_left(15);
      for _ in 0..self.k {
        let pos = bit_position(h, bits);
        filter[pos / 8] |= 1 << (pos % 8);
        h = h.wrapping_add(delta);
      }
    }

    filter[bytes] = self.k as u8;
  }

  /// Returns false only if `key` was definitely not used to build `filter`.
  ///
  /// # Panics
  /// - `filter` is empty.
  #[inline]
  pub fn may_contain(&self, key: &[u8], filter: &[u8]) -> bool {
    may_contain_hash(hash(key), filter)
  }
}

impl FilterPolicy for BloomFilterPolicy {
  fn name(&self) -> &'static str {
    "memskl.BuiltinBloomFilter"
  }

  fn append_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
    let hashes = keys.iter().map(|k| hash(k)).collect::<Vec<_>>();
    self.append_filter_hashes(&hashes, dst);
  }

  fn may_match(&self, key: &[u8], filter: &[u8]) -> bool {
    self.may_contain(key, filter)
  }
}

/// Probes `filter` with a key hash computed by [`hash`].
///
/// The probe count is read from the filter trailer, so the result does not
/// depend on the policy the filter was built with.
///
/// # Panics
/// - `filter` is empty.
pub fn may_contain_hash(hash: u32, filter: &[u8]) -> bool {
  assert!(
    !filter.is_empty(),
    "filter must contain at least the probe count trailer"
  );

  let len = filter.len();
  if len < 2 {
    return false;
  }

  let k = filter[len - 1] as usize;
  if k > MAX_PROBES {
    // Reserved for potentially new encodings for short bloom filters.
    // Consider it a match.
    return true;
  }

  let bits = (len - 1) as u64 * 8;
  let delta = hash.rotate_left(15);
  let mut h = hash;
  for _ in 0..k {
    let pos = bit_position(h, bits);
    if filter[pos / 8] & (1 << (pos % 8)) == 0 {
      return false;
    }
    h = h.wrapping_add(delta);
  }
  true
}

/// Maps one hash onto a bit array of `bits` bits. The modulus is taken in
/// 64 bits, arrays of 2^32 bits or more must not wrap it.
#[inline]
fn bit_position(h: u32, bits: u64) -> usize {
  (h as u64 % bits) as usize
}

/// The 32-bit hash used by the filters, similar to murmur hash.
///
/// The function is part of the filter format, it must not change.
pub fn hash(b: &[u8]) -> u32 {
  const SEED: u32 = 0xbc9f1d34;
  const M: u32 = 0xc6a4a793;

  let mut h = SEED ^ (b.len() as u32).wrapping_mul(M);

  let mut words = b.chunks_exact(4);
  for w in &mut words {
    h = h.wrapping_add(u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
    h = h.wrapping_mul(M);
    h ^= h >> 16;
  }

  let rest = words.remainder();
  if rest.len() == 3 {
    h = h.wrapping_add((rest[2] as u32) << 16);
  }
  if rest.len() >= 2 {
    h = h.wrapping_add((rest[1] as u32) << 8);
  }
  if !rest.is_empty() {
    h = h.wrapping_add(rest[0] as u32);
    h = h.wrapping_mul(M);
    h ^= h >> 24;
  }
  h
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(i: usize) -> Vec<u8> {
    (i as u32).to_le_bytes().to_vec()
  }

  #[test]
  fn test_hash() {
    assert_eq!(hash(&[]), 0xbc9f1d34);
    assert_eq!(hash(&[0x62]), 0xef1345c4);
    assert_eq!(hash(&[0xc3, 0x97]), 0x5b663814);
    assert_eq!(hash(&[0xe2, 0x99, 0xa5]), 0x323c078f);
    assert_eq!(hash(&[0xe1, 0x80, 0xb9, 0x32]), 0xed21633a);
    assert_eq!(hash(b"hello world"), 0x008dfddb);
  }

  #[test]
  fn test_hash_count_from_bits_per_key() {
    assert_eq!(BloomFilterPolicy::new(1).k(), 1);
    assert_eq!(BloomFilterPolicy::new(10).k(), 7);
    assert_eq!(BloomFilterPolicy::new(100).k(), MAX_PROBES);
  }

  #[test]
  fn test_small() {
    let policy = BloomFilterPolicy::new(10);
    let filter = policy.build(&["a", "b", "c"]);
    assert_eq!(
      filter,
      vec![0x1a, 0x38, 0x64, 0xd0, 0xc0, 0x21, 0x83, 0x04, 0x07]
    );

    assert!(policy.may_contain(b"a", &filter));
    assert!(policy.may_contain(b"b", &filter));
    assert!(policy.may_contain(b"c", &filter));
    assert!(!policy.may_contain(b"zzz-not-present", &filter));
  }

  #[test]
  fn test_empty_filter() {
    let policy = BloomFilterPolicy::new(10);
    let filter = policy.build::<&[u8]>(&[]);
    assert_eq!(filter.len(), 64 / 8 + 1);
    assert!(!policy.may_contain(b"hello", &filter));
    assert!(!policy.may_contain(b"world", &filter));
  }

  #[test]
  fn test_trailer_only() {
    assert!(!may_contain_hash(hash(b"x"), &[7]));
  }

  #[test]
  #[should_panic]
  fn test_no_trailer() {
    may_contain_hash(hash(b"x"), &[]);
  }

  #[test]
  fn test_bit_position_on_huge_filters() {
    assert_eq!(bit_position(1000, 64), 1000 % 64);
    assert_eq!(bit_position(u32::MAX, 8 * 9), (u32::MAX % 72) as usize);
    // 512 MiB of bits is exactly 2^32, which does not fit the probe width.
    assert_eq!(bit_position(u32::MAX, 1 << 32), u32::MAX as usize);
    assert_eq!(bit_position(12345, 1 << 35), 12345);
  }

  #[test]
  fn test_reserved_probe_count() {
    let mut filter = vec![0u8; 8];
    filter.push(MAX_PROBES as u8 + 1);
    assert!(may_contain_hash(hash(b"anything"), &filter));
  }

  #[test]
  fn test_append_to_existing_buffer() {
    let policy = BloomFilterPolicy::new(10);
    let mut dst = vec![0xaa, 0xbb];
    policy.append_filter(&[&b"hello"[..], &b"world"[..]], &mut dst);
    assert_eq!(&dst[..2], &[0xaa, 0xbb]);
    assert!(policy.may_match(b"hello", &dst[2..]));
    assert!(policy.may_match(b"world", &dst[2..]));
    assert_eq!(policy.name(), "memskl.BuiltinBloomFilter");
  }

  #[test]
  fn test_varying_lengths() {
    let policy = BloomFilterPolicy::new(10);

    let mut mediocre = 0;
    let mut good = 0;
    let mut length = 1;
    while length <= 10_000 {
      let keys = (0..length).map(key).collect::<Vec<_>>();
      let filter = policy.build(&keys);
      assert!(filter.len() <= length * 10 / 8 + 40, "length {length}");

      for k in &keys {
        assert!(policy.may_contain(k, &filter), "length {length}");
      }

      let hits = (0..10_000)
        .filter(|i| policy.may_contain(&key(i + 1_000_000_000), &filter))
        .count();
      let rate = hits as f64 / 10_000.0;
      assert!(rate <= 0.03, "false positive rate {rate} for length {length}");
      if rate > 0.0125 {
        mediocre += 1;
      } else {
        good += 1;
      }

      length = if length < 10 {
        length + 1
      } else if length < 100 {
        length + 10
      } else if length < 1000 {
        length + 100
      } else {
        length + 1000
      };
    }

    assert!(mediocre * 5 <= good, "{mediocre} mediocre filters, {good} good");
  }
}
