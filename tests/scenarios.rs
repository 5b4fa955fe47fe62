//! Cross-module scenario tests exercising only the public crate surface.
//! Internal-structure checks (tree height, per-leaf prefix length) that need
//! more than `BTree`'s public API live as unit tests in `src/tree.rs`
//! instead.

use pagetree::BTree;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::BTreeMap;

#[test]
fn s1_integer_keys_insert_lookup_scan_remove() {
    let mut tree = BTree::new();
    for i in 0u32..10 {
        tree.insert(&i.to_be_bytes(), &i.to_be_bytes());
    }
    for i in 0u32..10 {
        assert_eq!(tree.lookup(&i.to_be_bytes()), Some(i.to_be_bytes().to_vec()));
    }

    let mut scanned = Vec::new();
    tree.scan(&3u32.to_be_bytes(), |k, v| {
        scanned.push((u32::from_be_bytes(k.try_into().unwrap()), u32::from_be_bytes(v.try_into().unwrap())));
        true
    });
    assert_eq!(scanned, (3u32..10).map(|i| (i, i)).collect::<Vec<_>>());

    for i in 0u32..10 {
        assert!(tree.remove(&i.to_be_bytes()));
        assert_eq!(tree.lookup(&i.to_be_bytes()), None);
        assert!(!tree.remove(&i.to_be_bytes()));
    }
}

#[test]
fn s2_growing_keys_all_remain_lookupable_after_splitting() {
    let mut tree = BTree::new();
    for len in 1..=500usize {
        let key = vec![b'A'; len];
        tree.insert(&key, &(len as u32).to_be_bytes());
    }
    for len in 1..=500usize {
        let key = vec![b'A'; len];
        assert_eq!(tree.lookup(&key), Some((len as u32).to_be_bytes().to_vec()));
    }
}

#[test]
fn s3_insert_replaces_existing_value() {
    let mut tree = BTree::new();
    tree.insert(&[0x01], &[0xAA]);
    tree.insert(&[0x01], &[0xBB, 0xCC]);
    assert_eq!(tree.lookup(&[0x01]), Some(vec![0xBB, 0xCC]));
}

#[test]
fn s4_scan_stops_after_fifth_callback() {
    let mut tree = BTree::new();
    for i in 0u32..100 {
        tree.insert(&i.to_be_bytes(), &i.to_be_bytes());
    }
    let mut seen = Vec::new();
    tree.scan(&0u32.to_be_bytes(), |k, _| {
        seen.push(u32::from_be_bytes(k.try_into().unwrap()));
        seen.len() < 5
    });
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
}

#[test]
fn s5_random_workload_matches_reference_ordered_map() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0xC0FFEE);
    let mut tree = BTree::new();
    let mut reference: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    let random_key = |rng: &mut Xoshiro256PlusPlus| -> Vec<u8> {
        let id: u32 = rng.gen_range(0..1000);
        let len = 1 + (id as usize % 50);
        let mut k = id.to_be_bytes().to_vec();
        k.resize(len, (id % 256) as u8);
        k
    };

    for _ in 0..10_000 {
        match rng.gen_range(0..4) {
            0 => {
                let k = random_key(&mut rng);
                let v: Vec<u8> = (0..(rng.gen_range(0..16))).map(|_| rng.gen()).collect();
                tree.insert(&k, &v);
                reference.insert(k, v);
            }
            1 => {
                let k = random_key(&mut rng);
                assert_eq!(tree.lookup(&k), reference.get(&k).cloned(), "lookup mismatch for {k:?}");
            }
            2 => {
                let k = random_key(&mut rng);
                let expected = reference.remove(&k).is_some();
                assert_eq!(tree.remove(&k), expected, "remove mismatch for {k:?}");
            }
            _ => {
                let start = random_key(&mut rng);
                let expected: Vec<(Vec<u8>, Vec<u8>)> =
                    reference.range(start.clone()..).map(|(k, v)| (k.clone(), v.clone())).collect();
                let mut actual = Vec::new();
                tree.scan(&start, |k, v| {
                    actual.push((k.to_vec(), v.to_vec()));
                    true
                });
                assert_eq!(actual, expected, "scan mismatch from {start:?}");
            }
        }
    }
}

#[test]
fn s6_shared_prefix_keys_round_trip() {
    let mut tree = BTree::new();
    for i in 0u32..256 {
        let key = format!("http://example.com/{i}").into_bytes();
        tree.insert(&key, &key);
    }
    for i in 0u32..256 {
        let key = format!("http://example.com/{i}").into_bytes();
        assert_eq!(tree.lookup(&key), Some(key));
    }
}

#[test]
fn boundary_empty_and_single_entry_tree() {
    let mut tree = BTree::new();
    assert_eq!(tree.lookup(b"anything"), None);
    assert!(!tree.remove(b"anything"));
    let mut calls = 0;
    tree.scan(b"", |_, _| {
        calls += 1;
        true
    });
    assert_eq!(calls, 0);

    tree.insert(b"only", b"entry");
    assert_eq!(tree.lookup(b"only"), Some(b"entry".to_vec()));
    let mut scanned = Vec::new();
    tree.scan(b"", |k, v| {
        scanned.push((k.to_vec(), v.to_vec()));
        true
    });
    assert_eq!(scanned, vec![(b"only".to_vec(), b"entry".to_vec())]);
    assert!(tree.remove(b"only"));
}
