use memskl::{bloom, key, BloomFilterPolicy, FilterPolicy, KvIterator, SkipList, ValueStruct};

#[test]
fn filter_over_flushed_user_keys() {
  let l = SkipList::new(1 << 20).unwrap();
  for i in 0..500 {
    l.put(
      &key::with_timestamp(format!("key-{i}").as_bytes(), 1),
      &ValueStruct::from("v"),
    )
    .unwrap();
  }

  // Build the filter from user keys the way a table builder would when
  // flushing the memtable.
  let mut user_keys = Vec::new();
  let mut it = l.uni_iter(false);
  it.rewind();
  while it.valid() {
    user_keys.push(key::user_key(it.key()).to_vec());
    it.next();
  }
  it.close();

  let policy = BloomFilterPolicy::new(10);
  let keys = user_keys.iter().map(Vec::as_slice).collect::<Vec<_>>();
  let mut filter = Vec::new();
  policy.append_filter(&keys, &mut filter);

  for i in 0..500 {
    assert!(policy.may_match(format!("key-{i}").as_bytes(), &filter));
  }

  let false_positives = (500..10_500)
    .filter(|i| policy.may_match(format!("key-{i}").as_bytes(), &filter))
    .count();
  assert!(false_positives < 300, "{false_positives} false positives");
}

#[test]
fn prehashed_probes_agree() {
  let policy = BloomFilterPolicy::new(16);
  let filter = policy.build(&["alpha", "beta", "gamma"]);
  for k in ["alpha", "beta", "gamma", "delta"] {
    assert_eq!(
      bloom::may_contain_hash(bloom::hash(k.as_bytes()), &filter),
      policy.may_contain(k.as_bytes(), &filter)
    );
  }
  assert_eq!(*filter.last().unwrap() as usize, policy.k());
}
