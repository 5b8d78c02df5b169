use bytes::Bytes;
use criterion::*;
use memskl::*;
use parking_lot::Mutex;
use rand::prelude::*;
use std::{
  collections::BTreeMap,
  sync::{atomic::*, *},
  thread,
};

const ARENA_SIZE: u32 = 256 << 20;

fn random_key(rng: &mut ThreadRng) -> Bytes {
  let mut user_key = [0u8; 8];
  rng.fill_bytes(&mut user_key);
  key::with_timestamp(&user_key, 0)
}

fn skiplist_round(l: &SkipList, case: &(Bytes, bool), exp: &ValueStruct) {
  if case.1 {
    if let Some(v) = l.get(&case.0) {
      assert_eq!(v.value(), exp.value());
    }
  } else {
    // The arena may fill up during long runs.
    let _ = l.put(&case.0, exp);
  }
}

fn map_round(m: &Mutex<BTreeMap<Bytes, ValueStruct>>, case: &(Bytes, bool), exp: &ValueStruct) {
  if case.1 {
    let rm = m.lock();
    if let Some(v) = rm.get(&case.0) {
      assert_eq!(v.value(), exp.value());
    }
  } else {
    let mut rm = m.lock();
    rm.insert(case.0.clone(), exp.clone());
  }
}

fn bench_read_write_skiplist_frac(b: &mut Bencher<'_>, frac: &usize) {
  let frac = *frac;
  let value = ValueStruct::from(Bytes::from_static(b"00123"));
  let list = SkipList::new(ARENA_SIZE).unwrap();
  let l = list.clone();
  let stop = Arc::new(AtomicBool::new(false));
  let s = stop.clone();
  let v = value.clone();
  let j = thread::spawn(move || {
    let mut rng = rand::rng();
    while !s.load(Ordering::SeqCst) {
      let key = random_key(&mut rng);
      let case = (key, frac > rng.random_range(0..11));
      skiplist_round(&l, &case, &v);
    }
  });
  let mut rng = rand::rng();
  b.iter_batched_ref(
    || (random_key(&mut rng), frac > rng.random_range(0..11)),
    |case| skiplist_round(&list, case, &value),
    BatchSize::SmallInput,
  );
  stop.store(true, Ordering::SeqCst);
  j.join().unwrap();
}

fn bench_read_write_skiplist(c: &mut Criterion) {
  let mut group = c.benchmark_group("skiplist_read_write");
  for i in 0..=10 {
    group.bench_with_input(
      BenchmarkId::from_parameter(i),
      &i,
      bench_read_write_skiplist_frac,
    );
  }
  group.finish();
}

fn bench_read_write_map_frac(b: &mut Bencher<'_>, frac: &usize) {
  let frac = *frac;
  let value = ValueStruct::from(Bytes::from_static(b"00123"));
  let map = Arc::new(Mutex::new(BTreeMap::new()));
  let m = map.clone();
  let stop = Arc::new(AtomicBool::new(false));
  let s = stop.clone();
  let v = value.clone();
  let h = thread::spawn(move || {
    let mut rng = rand::rng();
    while !s.load(Ordering::SeqCst) {
      let f = rng.random_range(0..11);
      let case = (random_key(&mut rng), f < frac);
      map_round(&m, &case, &v);
    }
  });
  let mut rng = rand::rng();
  b.iter_batched_ref(
    || {
      let f = rng.random_range(0..11);
      (random_key(&mut rng), f < frac)
    },
    |case| map_round(&map, case, &value),
    BatchSize::SmallInput,
  );
  stop.store(true, Ordering::SeqCst);
  h.join().unwrap();
}

fn bench_read_write_map(c: &mut Criterion) {
  let mut group = c.benchmark_group("map_read_write");
  for i in 0..=10 {
    group.bench_with_input(
      BenchmarkId::from_parameter(i),
      &i,
      bench_read_write_map_frac,
    );
  }
  group.finish();
}

fn bench_write_skiplist(c: &mut Criterion) {
  let list = SkipList::new(ARENA_SIZE).unwrap();
  let value = ValueStruct::from(Bytes::from_static(b"00123"));
  let l = list.clone();
  let stop = Arc::new(AtomicBool::new(false));
  let s = stop.clone();
  let v = value.clone();
  let j = thread::spawn(move || {
    let mut rng = rand::rng();
    while !s.load(Ordering::SeqCst) {
      let case = (random_key(&mut rng), false);
      skiplist_round(&l, &case, &v);
    }
  });
  let mut rng = rand::rng();
  c.bench_function("skiplist_write", |b| {
    b.iter_batched(
      || random_key(&mut rng),
      |key| {
        let _ = list.put(&key, &value);
      },
      BatchSize::SmallInput,
    )
  });
  stop.store(true, Ordering::SeqCst);
  j.join().unwrap();
}

fn bench_bloom(c: &mut Criterion) {
  let policy = BloomFilterPolicy::new(10);
  let keys = (0..10_000u32)
    .map(|i| i.to_le_bytes())
    .collect::<Vec<_>>();
  let filter = policy.build(&keys);

  c.bench_function("bloom_build_10k", |b| b.iter(|| policy.build(black_box(&keys))));
  c.bench_function("bloom_may_contain", |b| {
    let mut i = 0u32;
    b.iter(|| {
      i = i.wrapping_add(1);
      policy.may_contain(black_box(&i.to_le_bytes()), &filter)
    })
  });
}

criterion_group!(
  benches,
  bench_read_write_skiplist,
  bench_read_write_map,
  bench_write_skiplist,
  bench_bloom,
);
criterion_main!(benches);
