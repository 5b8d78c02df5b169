use bytes::Bytes;

bitflags::bitflags! {
  /// Engine-internal flags carried in the meta byte of a value.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
  pub struct Meta: u8 {
    /// The key has been deleted, the value is a tombstone.
    const DELETE = 1 << 0;
    /// The payload is a pointer into the value log rather than the value itself.
    const VALUE_POINTER = 1 << 1;
    /// Older versions of the key can be discarded.
    const DISCARD_EARLIER_VERSIONS = 1 << 2;
    /// The value is a merge operand.
    const MERGE_ENTRY = 1 << 3;
    /// The entry belongs to a transaction.
    const TXN = 1 << 6;
    /// The entry marks the end of a transaction.
    const FIN_TXN = 1 << 7;
  }
}

/// A borrowed value, usually pointing into the arena of a skiplist.
///
/// Encoded as
///
/// ```text
/// +----------+---------------+------------------+-----------------+
/// | 8-bit meta | 8-bit user meta | varint expires at | value bytes ... |
/// +----------+---------------+------------------+-----------------+
/// ```
///
/// `version` is never encoded, it is filled in from the key timestamp when the
/// value is handed back to a caller.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ValueRef<'a> {
  meta: u8,
  user_meta: u8,
  expires_at: u64,
  value: &'a [u8],
  version: u64,
}

impl AsRef<[u8]> for ValueRef<'_> {
  fn as_ref(&self) -> &[u8] {
    self.value
  }
}

impl core::ops::Deref for ValueRef<'_> {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    self.value
  }
}

impl<'a> ValueRef<'a> {
  /// Creates a value with empty meta bytes and no expiry.
  #[inline]
  pub const fn new(src: &'a [u8]) -> Self {
    Self {
      meta: 0,
      user_meta: 0,
      expires_at: 0,
      value: src,
      version: 0,
    }
  }

  /// Returns the raw meta byte.
  #[inline]
  pub const fn meta(&self) -> u8 {
    self.meta
  }

  /// Returns the meta byte as flags, unknown bits are retained.
  #[inline]
  pub const fn meta_flags(&self) -> Meta {
    Meta::from_bits_retain(self.meta)
  }

  /// Returns the user meta byte.
  #[inline]
  pub const fn user_meta(&self) -> u8 {
    self.user_meta
  }

  /// Returns the expiry timestamp in seconds since the unix epoch, `0` means never.
  #[inline]
  pub const fn expires_at(&self) -> u64 {
    self.expires_at
  }

  /// Returns the payload.
  #[inline]
  pub const fn value(&self) -> &'a [u8] {
    self.value
  }

  /// Returns the version taken from the key this value was found under.
  #[inline]
  pub const fn version(&self) -> u64 {
    self.version
  }

  /// Sets the meta byte.
  #[inline]
  pub const fn with_meta(mut self, meta: u8) -> Self {
    self.meta = meta;
    self
  }

  /// Sets the user meta byte.
  #[inline]
  pub const fn with_user_meta(mut self, user_meta: u8) -> Self {
    self.user_meta = user_meta;
    self
  }

  /// Sets the expiry timestamp.
  #[inline]
  pub const fn with_expires_at(mut self, expires_at: u64) -> Self {
    self.expires_at = expires_at;
    self
  }

  /// Sets the version.
  #[inline]
  pub const fn with_version(mut self, version: u64) -> Self {
    self.version = version;
    self
  }

  /// Copies the value into an owned [`ValueStruct`].
  #[inline]
  pub fn to_owned_value(&self) -> ValueStruct {
    ValueStruct {
      meta: self.meta,
      user_meta: self.user_meta,
      expires_at: self.expires_at,
      value: Bytes::copy_from_slice(self.value),
      version: self.version,
    }
  }

  /// Returns true if the value is a tombstone or its expiry is at or before `now`
  /// (seconds since the unix epoch).
  #[inline]
  pub fn is_deleted_or_expired_at(&self, now: u64) -> bool {
    is_deleted_or_expired(self.meta, self.expires_at, now)
  }

  /// The size of the value when encoded
  #[inline]
  pub const fn encoded_size(&self) -> usize {
    1 + 1 + self.value.len() + u64_varint_size(self.expires_at)
  }

  /// Uses the length of the slice to infer the length of the value field.
  ///
  /// # Panics
  /// - `b` is shorter than the two meta bytes plus a well formed varint.
  #[inline]
  pub fn decode(b: &'a [u8]) -> Self {
    assert!(
      b.len() >= 2,
      "encoded value must be at least 2 bytes, got {}",
      b.len()
    );
    let (expires_at, size) = uvarint(&b[2..]);
    assert!(size > 0, "malformed expiry varint in encoded value");

    Self {
      meta: b[0],
      user_meta: b[1],
      expires_at,
      value: &b[2 + size as usize..],
      version: 0,
    }
  }

  /// Expects a slice of length at least `self.encoded_size()`, returns the
  /// number of bytes written.
  #[inline]
  pub fn encode(&self, dst: &mut [u8]) -> usize {
    dst[0] = self.meta;
    dst[1] = self.user_meta;
    let varint_size = put_uvarint(&mut dst[2..], self.expires_at);
    let start = 2 + varint_size;
    dst[start..start + self.value.len()].copy_from_slice(self.value);
    start + self.value.len()
  }
}

impl<'a> From<&'a ValueStruct> for ValueRef<'a> {
  #[inline]
  fn from(value: &'a ValueStruct) -> Self {
    value.as_value_ref()
  }
}

impl<'a> From<&'a [u8]> for ValueRef<'a> {
  #[inline]
  fn from(value: &'a [u8]) -> Self {
    Self::new(value)
  }
}

/// An owned value, the counterpart of [`ValueRef`].
#[derive(Debug, Clone, Eq, PartialEq, Hash, Default)]
pub struct ValueStruct {
  meta: u8,
  user_meta: u8,
  expires_at: u64,
  value: Bytes,
  version: u64,
}

impl AsRef<[u8]> for ValueStruct {
  fn as_ref(&self) -> &[u8] {
    self.value.as_ref()
  }
}

impl core::ops::Deref for ValueStruct {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    self.as_ref()
  }
}

impl ValueStruct {
  /// Creates an empty value.
  #[inline]
  pub const fn new() -> Self {
    Self {
      meta: 0,
      user_meta: 0,
      expires_at: 0,
      value: Bytes::new(),
      version: 0,
    }
  }

  /// Creates a value from the given bytes.
  #[inline]
  pub const fn from_bytes(val: Bytes) -> Self {
    Self {
      meta: 0,
      user_meta: 0,
      expires_at: 0,
      value: val,
      version: 0,
    }
  }

  /// Creates a value by copying the given slice.
  #[inline]
  pub fn copy_from_slice(val: &[u8]) -> Self {
    Self::from_bytes(Bytes::copy_from_slice(val))
  }

  /// Creates a tombstone for a deleted key.
  #[inline]
  pub const fn tombstone() -> Self {
    Self::new().with_meta(Meta::DELETE.bits())
  }

  /// Returns the raw meta byte.
  #[inline]
  pub const fn meta(&self) -> u8 {
    self.meta
  }

  /// Returns the meta byte as flags, unknown bits are retained.
  #[inline]
  pub const fn meta_flags(&self) -> Meta {
    Meta::from_bits_retain(self.meta)
  }

  /// Returns the user meta byte.
  #[inline]
  pub const fn user_meta(&self) -> u8 {
    self.user_meta
  }

  /// Returns the expiry timestamp in seconds since the unix epoch, `0` means never.
  #[inline]
  pub const fn expires_at(&self) -> u64 {
    self.expires_at
  }

  /// Returns the payload.
  #[inline]
  pub fn value(&self) -> &[u8] {
    self.value.as_ref()
  }

  /// Returns the version, only meaningful for values read back from a skiplist.
  #[inline]
  pub const fn version(&self) -> u64 {
    self.version
  }

  /// Sets the meta byte.
  #[inline]
  pub const fn with_meta(mut self, meta: u8) -> Self {
    self.meta = meta;
    self
  }

  /// Sets the user meta byte.
  #[inline]
  pub const fn with_user_meta(mut self, user_meta: u8) -> Self {
    self.user_meta = user_meta;
    self
  }

  /// Sets the expiry timestamp.
  #[inline]
  pub const fn with_expires_at(mut self, expires_at: u64) -> Self {
    self.expires_at = expires_at;
    self
  }

  /// Sets the version.
  #[inline]
  pub fn set_version(&mut self, version: u64) {
    self.version = version;
  }

  /// Consumes the value, returns the payload.
  #[inline]
  pub fn into_bytes(self) -> Bytes {
    self.value
  }

  /// Borrows the value.
  #[inline]
  pub fn as_value_ref(&self) -> ValueRef<'_> {
    ValueRef {
      meta: self.meta,
      user_meta: self.user_meta,
      expires_at: self.expires_at,
      value: self.value.as_ref(),
      version: self.version,
    }
  }

  /// Returns true if the value is a tombstone or has expired.
  pub fn is_deleted_or_expired(&self) -> bool {
    let now = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or_default();
    is_deleted_or_expired(self.meta, self.expires_at, now)
  }

  /// The size of the value when encoded
  #[inline]
  pub fn encoded_size(&self) -> usize {
    self.as_value_ref().encoded_size()
  }

  /// Copies the payload out of an encoded value.
  #[inline]
  pub fn decode(b: &[u8]) -> Self {
    ValueRef::decode(b).to_owned_value()
  }

  /// Expects a slice of length at least `self.encoded_size()`, returns the
  /// number of bytes written.
  #[inline]
  pub fn encode(&self, dst: &mut [u8]) -> usize {
    self.as_value_ref().encode(dst)
  }

  /// Encodes the value into a vec.
  #[inline]
  pub fn encode_to_vec(&self) -> Vec<u8> {
    let mut vec = vec![0; self.encoded_size()];
    self.encode(&mut vec);
    vec
  }
}

impl From<Bytes> for ValueStruct {
  #[inline]
  fn from(val: Bytes) -> Self {
    Self::from_bytes(val)
  }
}

impl From<&[u8]> for ValueStruct {
  #[inline]
  fn from(val: &[u8]) -> Self {
    Self::copy_from_slice(val)
  }
}

impl From<&str> for ValueStruct {
  #[inline]
  fn from(val: &str) -> Self {
    Self::copy_from_slice(val.as_bytes())
  }
}

impl From<String> for ValueStruct {
  #[inline]
  fn from(val: String) -> Self {
    Self::from(val.into_bytes())
  }
}

impl From<Vec<u8>> for ValueStruct {
  #[inline]
  fn from(val: Vec<u8>) -> Self {
    Self::from_bytes(Bytes::from(val))
  }
}

impl PartialEq<ValueRef<'_>> for ValueStruct {
  fn eq(&self, other: &ValueRef<'_>) -> bool {
    self.as_value_ref().eq(other)
  }
}

impl PartialEq<ValueStruct> for ValueRef<'_> {
  fn eq(&self, other: &ValueStruct) -> bool {
    self.eq(&other.as_value_ref())
  }
}

#[inline]
fn is_deleted_or_expired(meta: u8, expires_at: u64, now: u64) -> bool {
  if Meta::from_bits_retain(meta).contains(Meta::DELETE) {
    return true;
  }
  expires_at != 0 && expires_at <= now
}

/// The maximum length of a varint-encoded 64-bit integer.
const MAX_VARINT_LEN64: usize = 10;

#[inline]
const fn u64_varint_size(mut x: u64) -> usize {
  let mut n = 0;
  loop {
    n += 1;
    x >>= 7;
    if x == 0 {
      break;
    }
  }
  n
}

/// Decodes a u64 from `buf` and returns that value and the number of bytes read.
/// If an error occurred, the value is 0 and the number of bytes `n` is <= 0, where:
/// - n == 0: `buf` too small
/// - n  < 0: value larger than 64 bits (overflow) and -n is the number of bytes read.
fn uvarint(buf: &[u8]) -> (u64, isize) {
  let mut x: u64 = 0;
  let mut s: u32 = 0;
  for (i, &b) in buf.iter().enumerate() {
    if i == MAX_VARINT_LEN64 {
      // Catch byte reads past MAX_VARINT_LEN64.
      return (0, -(i as isize + 1)); // overflow
    }
    if b < 0x80 {
      if i == MAX_VARINT_LEN64 - 1 && b > 1 {
        return (0, -(i as isize + 1)); // overflow
      }
      return (x | ((b as u64) << s), i as isize + 1);
    }
    x |= ((b & 0x7f) as u64) << s;
    s += 7;
  }
  (0, 0)
}

/// Encodes a u64 into buf and returns the number of bytes written.
///
/// # Panics
/// The buffer is too small.
#[inline]
fn put_uvarint(buf: &mut [u8], mut x: u64) -> usize {
  let mut i = 0;
  while x >= 0x80 {
    buf[i] = (x as u8) | 0x80;
    x >>= 7;
    i += 1;
  }
  buf[i] = x as u8;
  i + 1
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_layout() {
    let value = ValueStruct::copy_from_slice(b"abc")
      .with_meta(Meta::DELETE.bits())
      .with_user_meta(0x42)
      .with_expires_at(300);

    // 300 = 0b10_0101100 -> [0xac, 0x02]
    assert_eq!(
      value.encode_to_vec(),
      vec![0x01, 0x42, 0xac, 0x02, b'a', b'b', b'c']
    );
    assert_eq!(value.encoded_size(), 7);
  }

  #[test]
  fn test_decode_borrows_payload() {
    let value = ValueStruct::copy_from_slice(b"payload").with_expires_at(u64::MAX);
    let buf = value.encode_to_vec();
    assert_eq!(buf.len(), 2 + MAX_VARINT_LEN64 + 7);

    let decoded = ValueRef::decode(&buf);
    assert_eq!(decoded.value(), b"payload");
    assert_eq!(decoded.expires_at(), u64::MAX);
    assert_eq!(decoded.version(), 0);
    assert_eq!(decoded, value);
  }

  #[test]
  fn test_decode_minimal() {
    // Two meta bytes and a single byte varint, no payload.
    let decoded = ValueRef::decode(&[3, 4, 0]);
    assert_eq!(decoded.meta(), 3);
    assert_eq!(decoded.user_meta(), 4);
    assert_eq!(decoded.expires_at(), 0);
    assert!(decoded.value().is_empty());
  }

  #[test]
  #[should_panic]
  fn test_decode_too_short() {
    ValueRef::decode(&[1]);
  }

  #[test]
  fn test_version_is_not_encoded() {
    let mut value = ValueStruct::copy_from_slice(b"v");
    value.set_version(99);
    let decoded = ValueStruct::decode(&value.encode_to_vec());
    assert_eq!(decoded.version(), 0);
    assert_eq!(decoded.value(), b"v");
  }

  #[test]
  fn test_deleted_or_expired() {
    assert!(ValueStruct::tombstone().is_deleted_or_expired());
    assert!(ValueStruct::tombstone().meta_flags().contains(Meta::DELETE));
    assert!(!ValueStruct::copy_from_slice(b"live").is_deleted_or_expired());
    assert!(ValueStruct::new().with_expires_at(1).is_deleted_or_expired());

    let value = ValueRef::new(b"x").with_expires_at(100);
    assert!(!value.is_deleted_or_expired_at(99));
    assert!(value.is_deleted_or_expired_at(100));
  }

  #[test]
  fn test_varint() {
    let mut buf = [0u8; MAX_VARINT_LEN64];
    for x in [0, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
      let n = put_uvarint(&mut buf, x);
      assert_eq!(n, u64_varint_size(x));
      assert_eq!(uvarint(&buf[..n]), (x, n as isize));
    }
    assert_eq!(uvarint(&[0x80]), (0, 0));
  }
}
