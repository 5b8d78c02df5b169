/// The default capacity of the arena backing a [`SkipList`](crate::SkipList).
pub const DEFAULT_CAPACITY: u32 = 1 << 20;

/// Options for [`SkipList`](crate::SkipList).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Options {
  capacity: u32,
  max_key_size: u16,
  max_value_size: u32,
}

impl Default for Options {
  #[inline]
  fn default() -> Options {
    Options::new()
  }
}

impl Options {
  /// Creates a new set of options with the default values.
  #[inline]
  pub const fn new() -> Self {
    Self {
      capacity: DEFAULT_CAPACITY,
      max_key_size: u16::MAX,
      max_value_size: u32::MAX,
    }
  }

  /// Sets the capacity of the underlying arena, in bytes.
  ///
  /// The arena never grows, so the capacity bounds everything the skiplist
  /// can hold. The default capacity is 1 MiB.
  ///
  /// ## Example
  ///
  /// ```
  /// use memskl::Options;
  ///
  /// let opts = Options::new().with_capacity(64 << 20);
  /// assert_eq!(opts.capacity(), 64 << 20);
  /// ```
  #[inline]
  pub const fn with_capacity(mut self, capacity: u32) -> Self {
    self.capacity = capacity;
    self
  }

  /// Sets the maximum size of a versioned key, timestamp suffix included.
  ///
  /// The default value is `u16::MAX`, the largest size a node can record.
  ///
  /// ## Example
  ///
  /// ```
  /// use memskl::Options;
  ///
  /// let opts = Options::new().with_max_key_size(1024);
  /// ```
  #[inline]
  pub const fn with_max_key_size(mut self, size: u16) -> Self {
    self.max_key_size = size;
    self
  }

  /// Sets the maximum encoded size of a value.
  ///
  /// The default value is `u32::MAX`.
  ///
  /// ## Example
  ///
  /// ```
  /// use memskl::Options;
  ///
  /// let opts = Options::new().with_max_value_size(1024);
  /// ```
  #[inline]
  pub const fn with_max_value_size(mut self, size: u32) -> Self {
    self.max_value_size = size;
    self
  }

  /// Returns the capacity of the underlying arena.
  #[inline]
  pub const fn capacity(&self) -> u32 {
    self.capacity
  }

  /// Returns the maximum size of a versioned key.
  #[inline]
  pub const fn max_key_size(&self) -> u16 {
    self.max_key_size
  }

  /// Returns the maximum encoded size of a value.
  #[inline]
  pub const fn max_value_size(&self) -> u32 {
    self.max_value_size
  }
}
