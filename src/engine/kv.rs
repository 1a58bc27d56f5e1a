// src/engine/kv.rs

//! 事务型 KV 原语
//!
//! 在 `sled::Tree` 之上实现乐观并发控制：
//! - 事务内的读直接读已提交的数据，并把读到的值记进读集合
//! - 写先缓存在事务里，读自己的写（read-your-writes）
//! - 提交时在一个 sled 事务里校验读集合是否被别人改过，没改过才一次性写入
//!
//! 校验失败返回 `Error::Conflict`，这里不做任何重试。

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::iter::Peekable;
use std::ops::Bound;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{IVec, Tree};

use crate::error::{Error, Result};
use crate::keys::prefix_end;

const DATA_TREE: &str = "data";

/// 底层存储句柄，可以随意 clone
#[derive(Clone)]
pub struct Storage {
    tree: Tree,
}

impl Storage {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Storage { tree: db.open_tree(DATA_TREE)? })
    }

    pub fn from_tree(tree: Tree) -> Self {
        Storage { tree }
    }

    pub fn begin(&self) -> KvTxn {
        KvTxn {
            tree: self.tree.clone(),
            reads: RefCell::new(HashMap::new()),
            writes: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }

    /// 已提交数据的条数（诊断用）
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// 单个乐观事务。未提交前 drop 掉等价于回滚。
pub struct KvTxn {
    tree: Tree,
    /// key -> 第一次读到的已提交值
    reads: RefCell<HashMap<Vec<u8>, Option<IVec>>>,
    /// key -> 新值，`None` 表示删除
    writes: RefCell<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl KvTxn {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(v) = self.writes.borrow().get(key) {
            return Ok(v.clone());
        }
        if let Some(seen) = self.reads.borrow().get(key) {
            return Ok(seen.as_ref().map(|iv| iv.to_vec()));
        }
        let v = self.tree.get(key)?;
        self.reads.borrow_mut().insert(key.to_vec(), v.clone());
        Ok(v.map(|iv| iv.to_vec()))
    }

    pub fn batch_get<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(k.as_ref())).collect()
    }

    pub fn set(&self, key: &[u8], value: &[u8]) {
        self.writes.borrow_mut().insert(key.to_vec(), Some(value.to_vec()));
    }

    pub fn delete(&self, key: &[u8]) {
        self.writes.borrow_mut().insert(key.to_vec(), None);
    }

    /// 从 `start`（含）开始正向有序遍历
    pub fn seek(&self, start: &[u8]) -> TxnIter<'_> {
        self.range(Bound::Included(start.to_vec()), Bound::Unbounded, false)
    }

    /// 从 `end`（含）开始反向有序遍历
    pub fn seek_reverse(&self, end: &[u8]) -> TxnIter<'_> {
        self.range(Bound::Unbounded, Bound::Included(end.to_vec()), true)
    }

    /// 正向遍历所有以 `prefix` 开头的 key
    pub fn scan_prefix(&self, prefix: &[u8]) -> TxnIter<'_> {
        self.range(Bound::Included(prefix.to_vec()), upper_bound(prefix), false)
    }

    pub fn scan_prefix_reverse(&self, prefix: &[u8]) -> TxnIter<'_> {
        self.range(Bound::Included(prefix.to_vec()), upper_bound(prefix), true)
    }

    /// 合并已提交数据与本事务写缓存的有序迭代器
    ///
    /// 写缓存在创建迭代器时被拷贝一份，之后的写不会出现在这个迭代器里。
    pub fn range(&self, lo: Bound<Vec<u8>>, hi: Bound<Vec<u8>>, reverse: bool) -> TxnIter<'_> {
        if range_is_empty(&lo, &hi) {
            return TxnIter {
                txn: self,
                store: (Box::new(std::iter::empty()) as StoreIter).peekable(),
                buffered: Vec::new().into_iter().peekable(),
                reverse,
            };
        }
        let bounds = (lo, hi);
        let mut buffered: Vec<(Vec<u8>, Option<Vec<u8>>)> = self
            .writes
            .borrow()
            .range(bounds.clone())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let store: StoreIter = if reverse {
            buffered.reverse();
            Box::new(self.tree.range(bounds).rev())
        } else {
            Box::new(self.tree.range(bounds))
        };
        TxnIter {
            txn: self,
            store: store.peekable(),
            buffered: buffered.into_iter().peekable(),
            reverse,
        }
    }

    fn record_read(&self, key: &[u8], value: &IVec) {
        self.reads
            .borrow_mut()
            .entry(key.to_vec())
            .or_insert_with(|| Some(value.clone()));
    }

    pub fn is_read_only(&self) -> bool {
        self.writes.borrow().is_empty()
    }

    /// 校验读集合并原子地写入
    pub fn commit(self) -> Result<()> {
        let writes = self.writes.into_inner();
        if writes.is_empty() {
            return Ok(());
        }
        let reads = self.reads.into_inner();
        let res = self.tree.transaction(|tx| {
            for (key, seen) in &reads {
                if tx.get(key.as_slice())? != *seen {
                    return Err(ConflictableTransactionError::Abort(Error::Conflict));
                }
            }
            for (key, value) in &writes {
                match value {
                    Some(v) => {
                        tx.insert(key.as_slice(), v.as_slice())?;
                    }
                    None => {
                        tx.remove(key.as_slice())?;
                    }
                }
            }
            Ok(())
        });
        match res {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    /// 丢弃所有缓存的写
    pub fn rollback(self) {}
}

type StoreIter = Box<dyn Iterator<Item = sled::Result<(IVec, IVec)>>>;

fn upper_bound(prefix: &[u8]) -> Bound<Vec<u8>> {
    match prefix_end(prefix) {
        Some(end) => Bound::Excluded(end),
        None => Bound::Unbounded,
    }
}

/// BTreeMap::range 遇到倒置区间会 panic，提前拦下来
fn range_is_empty(lo: &Bound<Vec<u8>>, hi: &Bound<Vec<u8>>) -> bool {
    match (lo, hi) {
        (Bound::Included(a), Bound::Included(b)) => a > b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
        _ => false,
    }
}

pub struct TxnIter<'a> {
    txn: &'a KvTxn,
    store: Peekable<StoreIter>,
    buffered: Peekable<std::vec::IntoIter<(Vec<u8>, Option<Vec<u8>>)>>,
    reverse: bool,
}

enum Pick {
    Store,
    Buffer,
    /// 同一个 key 两边都有，写缓存覆盖已提交的值
    Shadowed,
}

impl Iterator for TxnIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let pick = match (self.store.peek(), self.buffered.peek()) {
                (None, None) => return None,
                (Some(Err(_)), _) | (Some(Ok(_)), None) => Pick::Store,
                (None, Some(_)) => Pick::Buffer,
                (Some(Ok((sk, _))), Some((bk, _))) => match (<[u8] as Ord>::cmp(sk, bk), self.reverse) {
                    (Ordering::Equal, _) => Pick::Shadowed,
                    (Ordering::Less, false) | (Ordering::Greater, true) => Pick::Store,
                    _ => Pick::Buffer,
                },
            };
            match pick {
                Pick::Shadowed => {
                    self.store.next();
                }
                Pick::Store => {
                    return match self.store.next()? {
                        Ok((k, v)) => {
                            self.txn.record_read(&k, &v);
                            Some(Ok((k.to_vec(), v.to_vec())))
                        }
                        Err(e) => Some(Err(e.into())),
                    };
                }
                Pick::Buffer => {
                    if let (k, Some(v)) = self.buffered.next()? {
                        return Some(Ok((k, v)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sled::Config;

    fn make_storage() -> Storage {
        let db = Config::new().temporary(true).open().expect("打开临时 sled db 失败");
        Storage::open(&db).unwrap()
    }

    fn keys_of(it: TxnIter<'_>) -> Vec<Vec<u8>> {
        it.map(|r| r.unwrap().0).collect()
    }

    #[test]
    fn test_read_your_writes() -> Result<()> {
        let st = make_storage();
        let txn = st.begin();
        assert_eq!(txn.get(b"k")?, None);
        txn.set(b"k", b"v");
        assert_eq!(txn.get(b"k")?, Some(b"v".to_vec()));
        txn.delete(b"k");
        assert_eq!(txn.get(b"k")?, None);
        Ok(())
    }

    #[test]
    fn test_rollback_leaves_nothing() -> Result<()> {
        let st = make_storage();
        let txn = st.begin();
        txn.set(b"k", b"v");
        txn.rollback();
        assert_eq!(st.begin().get(b"k")?, None);
        Ok(())
    }

    #[test]
    fn test_merged_scan() -> Result<()> {
        let st = make_storage();
        let t1 = st.begin();
        for k in [b"p:1", b"p:3", b"p:5", b"q:1"] {
            t1.set(k, b"old");
        }
        t1.commit()?;

        let t2 = st.begin();
        t2.set(b"p:2", b"new");
        t2.delete(b"p:3");
        t2.set(b"p:5", b"new");
        assert_eq!(
            keys_of(t2.scan_prefix(b"p:")),
            vec![b"p:1".to_vec(), b"p:2".to_vec(), b"p:5".to_vec()]
        );
        assert_eq!(
            keys_of(t2.scan_prefix_reverse(b"p:")),
            vec![b"p:5".to_vec(), b"p:2".to_vec(), b"p:1".to_vec()]
        );
        let (_, v) = t2.scan_prefix(b"p:5").next().unwrap()?;
        assert_eq!(v, b"new");
        assert_eq!(keys_of(t2.seek_reverse(b"p:2")), vec![b"p:2".to_vec(), b"p:1".to_vec()]);
        assert_eq!(keys_of(t2.seek(b"p:6")), vec![b"q:1".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_write_write_conflict() -> Result<()> {
        let st = make_storage();
        let a = st.begin();
        let b = st.begin();
        a.get(b"k")?;
        b.get(b"k")?;
        a.set(b"k", b"a");
        b.set(b"k", b"b");
        a.commit()?;
        assert!(matches!(b.commit(), Err(Error::Conflict)));
        assert_eq!(st.begin().get(b"k")?, Some(b"a".to_vec()));
        Ok(())
    }

    #[test]
    fn test_scanned_keys_are_validated() -> Result<()> {
        let st = make_storage();
        let t = st.begin();
        t.set(b"x:1", b"1");
        t.commit()?;

        let reader = st.begin();
        assert_eq!(keys_of(reader.scan_prefix(b"x:")).len(), 1);
        reader.set(b"summary", b"1");

        let writer = st.begin();
        writer.set(b"x:1", b"2");
        writer.commit()?;

        assert!(matches!(reader.commit(), Err(Error::Conflict)));
        Ok(())
    }

    #[test]
    fn test_batch_get() -> Result<()> {
        let st = make_storage();
        let t = st.begin();
        t.set(b"a", b"1");
        let got = t.batch_get(&[b"a".as_slice(), b"b".as_slice()])?;
        assert_eq!(got, vec![Some(b"1".to_vec()), None]);
        Ok(())
    }
}
