use std::sync::Arc;
use std::thread;
use anyhow::Result;
use rand::prelude::*;

use tarndb::common::types::Rid;
use tarndb::index::btree::serialization::read_node;
use tarndb::index::btree::{BPlusTree, BTreeNode};
use tarndb::storage::buffer::BufferPoolManager;
use tarndb::transaction::{IsolationLevel, Transaction};

mod common;
use common::create_test_buffer_pool;

fn rid_for(key: i64) -> Rid {
    Rid::new((key >> 16) as i32, key as u32)
}

fn read_tree_node(pool: &Arc<BufferPoolManager>, page_id: i32) -> BTreeNode<i64> {
    let page = pool.fetch_page(page_id).unwrap();
    let node = {
        let guard = page.read();
        read_node::<i64>(&guard).unwrap()
    };
    pool.unpin_page(page_id, false);
    node
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i64>::new("pk", buffer_pool, 4, 4)?;
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);

    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&1)?, None);

    for key in [5, 1, 9, 3, 7] {
        assert!(tree.insert(key, rid_for(key), &txn)?);
    }
    assert!(!tree.is_empty());

    for key in [1, 3, 5, 7, 9] {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    assert_eq!(tree.get_value(&4)?, None);
    tree.verify_integrity()?;
    Ok(())
}

#[test]
fn test_duplicate_insert_returns_false() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i64>::new("pk", buffer_pool, 4, 4)?;
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);

    assert!(tree.insert(10, rid_for(10), &txn)?);
    assert!(!tree.insert(10, Rid::new(99, 99), &txn)?);
    // The original value is untouched.
    assert_eq!(tree.get_value(&10)?, Some(rid_for(10)));
    tree.verify_integrity()?;
    Ok(())
}

#[test]
fn test_split_convention_grow_and_shrink() -> Result<()> {
    // Leaf and internal fanout of four: inserting 1..=5 splits once,
    // leaving [1,2] and [3,4,5] under a fresh internal root.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i64>::new("pk", buffer_pool.clone(), 4, 4)?;
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);

    for key in 1..=5 {
        assert!(tree.insert(key, rid_for(key), &txn)?);
    }

    let root = read_tree_node(&buffer_pool, tree.root_page_id());
    assert!(!root.is_leaf());
    assert_eq!(root.size(), 2);

    let left = read_tree_node(&buffer_pool, root.children[0]);
    let right = read_tree_node(&buffer_pool, root.children[1]);
    assert_eq!(left.keys, vec![1, 2]);
    assert_eq!(right.keys, vec![3, 4, 5]);
    assert_eq!(left.next_leaf, right.page_id);
    assert_eq!(*root.key_at(1), 3);
    tree.verify_integrity()?;

    // Removing 5, 4, 3 collapses the tree back to a single leaf [1, 2].
    for key in [5, 4, 3] {
        tree.remove(&key, &txn)?;
    }
    let root = read_tree_node(&buffer_pool, tree.root_page_id());
    assert!(root.is_leaf());
    assert_eq!(root.keys, vec![1, 2]);
    tree.verify_integrity()?;

    // Removing the rest empties the tree entirely.
    tree.remove(&2, &txn)?;
    tree.remove(&1, &txn)?;
    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&1)?, None);
    Ok(())
}

#[test]
fn test_redistribute_from_right_sibling() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i64>::new("pk", buffer_pool.clone(), 4, 4)?;
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);

    for key in 1..=5 {
        tree.insert(key, rid_for(key), &txn)?;
    }
    // Leaves are [1,2] and [3,4,5]; removing 1 underflows the left
    // leaf, which borrows 3 from its right neighbor.
    tree.remove(&1, &txn)?;

    let root = read_tree_node(&buffer_pool, tree.root_page_id());
    let left = read_tree_node(&buffer_pool, root.children[0]);
    let right = read_tree_node(&buffer_pool, root.children[1]);
    assert_eq!(left.keys, vec![2, 3]);
    assert_eq!(right.keys, vec![4, 5]);
    assert_eq!(*root.key_at(1), 4);
    tree.verify_integrity()?;

    for key in [2, 3, 4, 5] {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_odd_fanout_internal_split_sizes() -> Result<()> {
    // Odd fanout of five: a fresh internal split must leave both halves
    // with at least ceil(5 / 2) = 3 children.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100)?;
    let tree = BPlusTree::<i64>::new("pk", buffer_pool.clone(), 5, 5)?;
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);

    for key in 0..60 {
        assert!(tree.insert(key, rid_for(key), &txn)?);
    }

    // The root must sit above a full level of internal nodes, proving
    // at least one internal split happened.
    let root = read_tree_node(&buffer_pool, tree.root_page_id());
    assert!(!root.is_leaf());
    let first_child = read_tree_node(&buffer_pool, root.children[0]);
    assert!(!first_child.is_leaf());

    let mut stack = root.children.clone();
    while let Some(page_id) = stack.pop() {
        let node = read_tree_node(&buffer_pool, page_id);
        if node.is_leaf() {
            assert!(node.size() >= 2, "leaf {} holds {} entries", page_id, node.size());
        } else {
            assert!(
                node.size() >= 3,
                "internal page {} holds {} children",
                page_id,
                node.size()
            );
            stack.extend(node.children.iter().copied());
        }
    }
    tree.verify_integrity()?;
    Ok(())
}

#[test]
fn test_remove_absent_key_is_noop() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i64>::new("pk", buffer_pool, 4, 4)?;
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);

    tree.remove(&7, &txn)?;
    tree.insert(7, rid_for(7), &txn)?;
    tree.remove(&8, &txn)?;
    assert_eq!(tree.get_value(&7)?, Some(rid_for(7)));

    // Double remove is also a no-op.
    tree.remove(&7, &txn)?;
    tree.remove(&7, &txn)?;
    assert_eq!(tree.get_value(&7)?, None);
    Ok(())
}

#[test]
fn test_sequential_insert_scan_delete() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(200)?;
    let tree = BPlusTree::<i64>::new("pk", buffer_pool, 6, 6)?;
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);

    let n = 500i64;
    for key in 0..n {
        assert!(tree.insert(key, rid_for(key), &txn)?);
    }
    tree.verify_integrity()?;

    // Forward scan visits every key in order.
    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    assert_eq!(scanned, (0..n).collect::<Vec<_>>());

    // Range scan from an interior key.
    let from_100: Vec<i64> = tree.iter_from(&100)?.map(|(key, _)| key).collect();
    assert_eq!(from_100, (100..n).collect::<Vec<_>>());

    // Delete the even keys and re-verify.
    for key in (0..n).step_by(2) {
        tree.remove(&key, &txn)?;
    }
    tree.verify_integrity()?;
    for key in 0..n {
        let expected = if key % 2 == 0 { None } else { Some(rid_for(key)) };
        assert_eq!(tree.get_value(&key)?, expected);
    }
    Ok(())
}

#[test]
fn test_random_insert_delete() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(200)?;
    let tree = BPlusTree::<i64>::new("pk", buffer_pool, 5, 5)?;
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);

    let mut keys: Vec<i64> = (0..400).collect();
    let mut rng = StdRng::seed_from_u64(42);
    keys.shuffle(&mut rng);

    for &key in &keys {
        assert!(tree.insert(key, rid_for(key), &txn)?);
    }
    tree.verify_integrity()?;

    keys.shuffle(&mut rng);
    let (removed, kept) = keys.split_at(200);
    for &key in removed {
        tree.remove(&key, &txn)?;
    }
    tree.verify_integrity()?;

    for &key in kept {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    for &key in removed {
        assert_eq!(tree.get_value(&key)?, None);
    }

    let mut remaining: Vec<i64> = kept.to_vec();
    remaining.sort_unstable();
    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    assert_eq!(scanned, remaining);
    Ok(())
}

#[test]
fn test_root_survives_reopen() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    {
        let tree = BPlusTree::<i64>::new("reopened", buffer_pool.clone(), 4, 4)?;
        let txn = Transaction::new(0, IsolationLevel::RepeatableRead);
        for key in 0..20 {
            tree.insert(key, rid_for(key), &txn)?;
        }
    }

    // A new handle on the same buffer pool finds the root through the
    // header page record.
    let tree = BPlusTree::<i64>::new("reopened", buffer_pool, 4, 4)?;
    assert!(!tree.is_empty());
    for key in 0..20 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(300)?;
    let tree = Arc::new(BPlusTree::<i64>::new("pk", buffer_pool, 6, 6)?);

    let mut handles = Vec::new();
    for worker in 0..4i64 {
        let tree = tree.clone();
        handles.push(thread::spawn(move || {
            let txn = Transaction::new(worker as u32, IsolationLevel::RepeatableRead);
            for i in 0..100 {
                let key = worker * 100 + i;
                assert!(tree.insert(key, rid_for(key), &txn).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    tree.verify_integrity()?;
    for key in 0..400 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    assert_eq!(scanned, (0..400).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_concurrent_readers_and_writers() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(300)?;
    let tree = Arc::new(BPlusTree::<i64>::new("pk", buffer_pool, 6, 6)?);

    {
        let txn = Transaction::new(0, IsolationLevel::RepeatableRead);
        for key in 0..200 {
            tree.insert(key, rid_for(key), &txn)?;
        }
    }

    let mut handles = Vec::new();
    // Writers delete the upper half while readers hammer the lower
    // half, which no writer touches.
    for worker in 0..2i64 {
        let tree = tree.clone();
        handles.push(thread::spawn(move || {
            let txn = Transaction::new(1 + worker as u32, IsolationLevel::RepeatableRead);
            for i in 0..50 {
                let key = 100 + worker * 50 + i;
                tree.remove(&key, &txn).unwrap();
            }
        }));
    }
    for _ in 0..2 {
        let tree = tree.clone();
        handles.push(thread::spawn(move || {
            for round in 0..20 {
                for key in 0..100 {
                    let found = tree.get_value(&key).unwrap();
                    assert_eq!(found, Some(rid_for(key)), "round {}", round);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    tree.verify_integrity()?;
    for key in 0..100 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    for key in 100..200 {
        assert_eq!(tree.get_value(&key)?, None);
    }
    Ok(())
}

#[test]
fn test_insert_from_file() -> Result<()> {
    use std::io::Write;

    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i64>::new("bulk", buffer_pool, 4, 4)?;
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);

    let mut key_file = tempfile::NamedTempFile::new()?;
    writeln!(key_file, "3 1 4\n1 5 9 2 6")?;
    key_file.flush()?;

    // 1 appears twice, so eight tokens yield seven distinct keys.
    let inserted = tree.insert_from_file(key_file.path(), &txn)?;
    assert_eq!(inserted, 7);
    for key in [1, 2, 3, 4, 5, 6, 9] {
        assert!(tree.get_value(&key)?.is_some());
    }

    tree.remove_from_file(key_file.path(), &txn)?;
    assert!(tree.is_empty());
    Ok(())
}
