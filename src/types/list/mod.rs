// src/types/list/mod.rs

//! # List Type Support
//!
//! A list has two physical encodings sharing one operation surface:
//!
//! - [`CompactList`]: the whole sequence is serialized into the meta value. Cheap for short lists,
//!   but every mutation rewrites the full value.
//! - [`DistributedList`]: every element lives at its own data key whose selector is a sortable
//!   `f64` position. Pushes extend the outer positions by `1.0`, inserts take the midpoint of
//!   two neighbours.
//!
//! The conversion is one-way (compact → distributed). It happens when a brand new list receives
//! more elements than `compact_max_len` in its first push, when compact encoding is disabled, or
//! later in the background: a compact list that grows past the threshold leaves a transfer marker
//! that the transfer worker picks up.

pub mod compact;
pub mod distributed;

pub use compact::CompactList;
pub use distributed::DistributedList;

use crate::error::{Error, Result};
use crate::txn::Transaction;
use crate::types::object::{Encoding, Object, ObjectType};

pub enum List<'a> {
    Compact(CompactList<'a>),
    Distributed(DistributedList<'a>),
}

/// Normalize a Redis style inclusive `[start, stop]` range against `len`.
///
/// Negative indices count from the tail. Returns `None` when the range is empty.
pub(crate) fn normalize_range(start: i64, stop: i64, len: i64) -> Option<(usize, usize)> {
    if len <= 0 {
        return None;
    }
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Normalize a single index; `None` when it falls outside the list.
pub(crate) fn normalize_index(index: i64, len: i64) -> Option<usize> {
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

impl<'a> List<'a> {
    pub(crate) fn open(txn: &'a Transaction, key: &[u8]) -> Result<Self> {
        let meta_key = txn.keys().meta_key(key);
        match txn.load_typed(&meta_key, ObjectType::List)? {
            Some((obj, tail)) => match obj.encoding {
                Encoding::Compact => Ok(List::Compact(CompactList::load(txn, meta_key, obj, &tail)?)),
                Encoding::Distributed => Ok(List::Distributed(DistributedList::load(txn, meta_key, obj, &tail)?)),
                other => Err(Error::InvalidEncoding(format!("list stored with encoding {:?}", other))),
            },
            None if txn.list_config().compact_enabled => Ok(List::Compact(CompactList::empty(txn, meta_key))),
            None => Ok(List::Distributed(DistributedList::empty(txn, meta_key))),
        }
    }

    /// A new list whose first push is already too long goes straight to the distributed layout.
    fn prepare_push(&mut self, incoming: usize) -> Result<()> {
        if let List::Compact(c) = self {
            if !c.exists() && incoming > c.max_len() {
                let d = c.clone().into_distributed()?;
                *self = List::Distributed(d);
            }
        }
        Ok(())
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            List::Compact(_) => Encoding::Compact,
            List::Distributed(_) => Encoding::Distributed,
        }
    }

    pub fn object(&self) -> &Object {
        match self {
            List::Compact(l) => l.object(),
            List::Distributed(l) => l.object(),
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            List::Compact(l) => l.exists(),
            List::Distributed(l) => l.exists(),
        }
    }

    /// LLEN
    pub fn len(&self) -> i64 {
        match self {
            List::Compact(l) => l.len(),
            List::Distributed(l) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// LPUSH: values are pushed one by one, so the last one ends up at the head.
    pub fn lpush<V: AsRef<[u8]>>(&mut self, values: &[V]) -> Result<i64> {
        self.prepare_push(values.len())?;
        match self {
            List::Compact(l) => l.lpush(values),
            List::Distributed(l) => l.lpush(values),
        }
    }

    /// RPUSH
    pub fn rpush<V: AsRef<[u8]>>(&mut self, values: &[V]) -> Result<i64> {
        self.prepare_push(values.len())?;
        match self {
            List::Compact(l) => l.rpush(values),
            List::Distributed(l) => l.rpush(values),
        }
    }

    pub fn lpop(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            List::Compact(l) => l.lpop(),
            List::Distributed(l) => l.lpop(),
        }
    }

    pub fn rpop(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            List::Compact(l) => l.rpop(),
            List::Distributed(l) => l.rpop(),
        }
    }

    /// LINDEX
    pub fn index(&self, index: i64) -> Result<Option<Vec<u8>>> {
        match self {
            List::Compact(l) => Ok(l.index(index)),
            List::Distributed(l) => l.index(index),
        }
    }

    /// LSET: fails with `OutOfRange` when `index` is outside the list.
    pub fn set(&mut self, index: i64, value: &[u8]) -> Result<()> {
        match self {
            List::Compact(l) => l.set(index, value),
            List::Distributed(l) => l.set(index, value),
        }
    }

    /// LINSERT: returns the new length, or `None` when `pivot` is not in the list.
    pub fn insert(&mut self, pivot: &[u8], value: &[u8], before: bool) -> Result<Option<i64>> {
        match self {
            List::Compact(l) => l.insert(pivot, value, before),
            List::Distributed(l) => l.insert(pivot, value, before),
        }
    }

    /// LRANGE
    pub fn range(&self, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        match self {
            List::Compact(l) => Ok(l.range(start, stop)),
            List::Distributed(l) => l.range(start, stop),
        }
    }

    /// LTRIM
    pub fn trim(&mut self, start: i64, stop: i64) -> Result<()> {
        match self {
            List::Compact(l) => l.trim(start, stop),
            List::Distributed(l) => l.trim(start, stop),
        }
    }

    /// LREM: `count > 0` removes from the head, `count < 0` from the tail, `0` removes all.
    pub fn remove(&mut self, count: i64, value: &[u8]) -> Result<i64> {
        match self {
            List::Compact(l) => l.remove(count, value),
            List::Distributed(l) => l.remove(count, value),
        }
    }

    pub fn destroy(&mut self) {
        match self {
            List::Compact(l) => l.destroy(),
            List::Distributed(l) => l.destroy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListConfig;
    use crate::keys;
    use crate::txn::test_support::*;

    fn strs(v: Vec<Vec<u8>>) -> Vec<String> {
        v.into_iter().map(|b| String::from_utf8(b).unwrap()).collect()
    }

    fn configs() -> Vec<ListConfig> {
        vec![
            ListConfig::default(),
            ListConfig { compact_enabled: false, ..ListConfig::default() },
        ]
    }

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize_range(0, -1, 3), Some((0, 2)));
        assert_eq!(normalize_range(-2, -1, 3), Some((1, 2)));
        assert_eq!(normalize_range(-10, 10, 3), Some((0, 2)));
        assert_eq!(normalize_range(2, 1, 3), None);
        assert_eq!(normalize_range(5, 10, 3), None);
        assert_eq!(normalize_range(0, -1, 0), None);
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }

    #[test]
    fn test_same_semantics_for_both_encodings() -> Result<()> {
        for cfg in configs() {
            let st = make_storage();
            let txn = begin_with(&st, cfg);
            let mut l = txn.list(b"l")?;
            assert_eq!(l.rpush(&["b", "c"])?, 2);
            assert_eq!(l.lpush(&["a", "z"])?, 4);
            assert_eq!(strs(l.range(0, -1)?), vec!["z", "a", "b", "c"]);
            assert_eq!(l.index(-1)?, Some(b"c".to_vec()));
            assert_eq!(l.index(4)?, None);

            l.set(0, b"zz")?;
            assert!(matches!(l.set(9, b"x"), Err(Error::OutOfRange)));
            assert_eq!(l.insert(b"b", b"ab", true)?, Some(5));
            assert_eq!(l.insert(b"c", b"cd", false)?, Some(6));
            assert_eq!(l.insert(b"missing", b"x", true)?, None);
            assert_eq!(strs(l.range(0, -1)?), vec!["zz", "a", "ab", "b", "c", "cd"]);

            assert_eq!(l.lpop()?, Some(b"zz".to_vec()));
            assert_eq!(l.rpop()?, Some(b"cd".to_vec()));
            assert_eq!(strs(l.range(1, 2)?), vec!["ab", "b"]);
            txn.commit()?;

            let txn = begin_with(&st, cfg);
            let l = txn.list(b"l")?;
            assert_eq!(l.len(), 4);
            assert_eq!(strs(l.range(0, -1)?), vec!["a", "ab", "b", "c"]);
        }
        Ok(())
    }

    #[test]
    fn test_remove_and_trim() -> Result<()> {
        for cfg in configs() {
            let st = make_storage();
            let txn = begin_with(&st, cfg);
            let mut l = txn.list(b"l")?;
            l.rpush(&["x", "a", "x", "b", "x", "c", "x"])?;
            assert_eq!(l.remove(2, b"x")?, 2);
            assert_eq!(strs(l.range(0, -1)?), vec!["a", "b", "x", "c", "x"]);
            assert_eq!(l.remove(-1, b"x")?, 1);
            assert_eq!(strs(l.range(0, -1)?), vec!["a", "b", "x", "c"]);
            assert_eq!(l.remove(0, b"x")?, 1);
            assert_eq!(l.remove(0, b"nope")?, 0);

            l.trim(1, -1)?;
            assert_eq!(strs(l.range(0, -1)?), vec!["b", "c"]);
            assert_eq!(l.len(), 2);
            // 边界被修剪后仍能正确地两端 push
            l.lpush(&["h"])?;
            l.rpush(&["t"])?;
            assert_eq!(strs(l.range(0, -1)?), vec!["h", "b", "c", "t"]);

            l.trim(5, 10)?;
            assert!(!l.exists());
            assert_eq!(l.len(), 0);
            assert!(txn.kv().get(&txn.keys().meta_key(b"l"))?.is_none());
        }
        Ok(())
    }

    #[test]
    fn test_pop_to_empty_drops_meta() -> Result<()> {
        for cfg in configs() {
            let st = make_storage();
            let txn = begin_with(&st, cfg);
            let mut l = txn.list(b"l")?;
            l.rpush(&["1", "2"])?;
            assert_eq!(l.rpop()?, Some(b"2".to_vec()));
            assert_eq!(l.lpop()?, Some(b"1".to_vec()));
            assert_eq!(l.lpop()?, None);
            assert!(txn.kv().get(&txn.keys().meta_key(b"l"))?.is_none());
            assert_eq!(count_prefix(&txn, &keys::gc_prefix()), 0);
        }
        Ok(())
    }

    #[test]
    fn test_large_first_push_creates_distributed() -> Result<()> {
        let st = make_storage();
        let cfg = ListConfig { compact_max_len: 4, ..ListConfig::default() };
        let txn = begin_with(&st, cfg);
        let mut small = txn.list(b"small")?;
        small.rpush(&["1", "2"])?;
        assert_eq!(small.encoding(), Encoding::Compact);

        let mut big = txn.list(b"big")?;
        big.rpush(&["1", "2", "3", "4", "5"])?;
        assert_eq!(big.encoding(), Encoding::Distributed);
        assert_eq!(count_prefix(&txn, &keys::transfer_prefix()), 0);
        txn.commit()?;

        let txn = begin_with(&st, cfg);
        assert_eq!(txn.list(b"big")?.encoding(), Encoding::Distributed);
        assert_eq!(txn.list(b"big")?.len(), 5);
        Ok(())
    }

    #[test]
    fn test_growing_compact_list_leaves_transfer_marker() -> Result<()> {
        let st = make_storage();
        let cfg = ListConfig { compact_max_len: 3, ..ListConfig::default() };
        let txn = begin_with(&st, cfg);
        let mut l = txn.list(b"l")?;
        l.rpush(&["1", "2", "3"])?;
        assert_eq!(count_prefix(&txn, &keys::transfer_prefix()), 0);
        l.rpush(&["4"])?;
        assert_eq!(l.encoding(), Encoding::Compact);
        let marker = keys::transfer_key(&txn.keys().meta_key(b"l"));
        assert!(txn.kv().get(&marker)?.is_some());

        // 销毁时顺带清掉转换标记
        l.destroy();
        assert!(txn.kv().get(&marker)?.is_none());
        Ok(())
    }

    #[test]
    fn test_destroy_distributed_enqueues_gc() -> Result<()> {
        let st = make_storage();
        let cfg = ListConfig { compact_enabled: false, ..ListConfig::default() };
        let txn = begin_with(&st, cfg);
        let mut l = txn.list(b"l")?;
        l.rpush(&["1", "2"])?;
        let prefix = txn.keys().data_prefix(&l.object().id);
        l.destroy();
        assert!(!l.exists());
        assert!(txn.kv().get(&keys::gc_key(&prefix))?.is_some());

        // 紧凑 list 没有数据 key，销毁时不产生 GC 标记
        let txn = begin(&st);
        let mut c = txn.list(b"c")?;
        c.rpush(&["1"])?;
        c.destroy();
        assert_eq!(count_prefix(&txn, &keys::gc_prefix()), 0);
        assert!(!txn.list(b"c")?.exists());
        Ok(())
    }
}
