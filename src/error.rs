use crate::arena::ArenaError;

/// Error type for the memskl crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// Indicates that the arena is full and cannot perform any more
  /// allocations. The skiplist cannot recover from it, the caller is
  /// expected to rotate to a fresh memtable.
  Full(ArenaError),

  /// Indicates that the key is larger than the configured maximum key size.
  KeyTooLarge(u64),

  /// Indicates that the encoded value is larger than the configured maximum
  /// value size.
  ValueTooLarge(u64),
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      Self::Full(e) => write!(f, "{e}"),
      Self::KeyTooLarge(size) => write!(f, "key size {size} is too large"),
      Self::ValueTooLarge(size) => write!(f, "value size {size} is too large"),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Full(e) => Some(e),
      _ => None,
    }
  }
}

impl From<ArenaError> for Error {
  #[inline]
  fn from(e: ArenaError) -> Self {
    Self::Full(e)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display() {
    assert_eq!(
      Error::from(ArenaError).to_string(),
      "allocation failed because arena is full"
    );
    assert_eq!(Error::KeyTooLarge(70000).to_string(), "key size 70000 is too large");
    assert_eq!(Error::ValueTooLarge(9).to_string(), "value size 9 is too large");
  }
}
