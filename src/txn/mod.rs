// src/txn/mod.rs

//! # 事务门面
//!
//! 一个客户端命令对应一个 `Transaction`。它包住一个底层 `KvTxn`，
//! 并提供按类型访问容器的入口；同一个命令里访问的所有容器共享这一个事务，
//! 直到 `commit()` 成功之前什么都不可见。
//!
//! 访问器从不因为 key 不存在而失败（不存在就是一个长度为 0 的容器），
//! 只会在类型不匹配或存储出错时返回错误。

pub mod keyspace;

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::ListConfig;
use crate::engine::kv::KvTxn;
use crate::error::{Error, Result};
use crate::keys::{self, DbKeys};
use crate::types::hash::Hash;
use crate::types::list::List;
use crate::types::object::{now_nanos, Object, ObjectType};
use crate::types::set::Set;
use crate::types::string::StringValue;
use crate::types::zset::ZSet;
use crate::{expire, gc};

pub use keyspace::KeySpace;

pub struct Transaction {
    kv: KvTxn,
    keys: DbKeys,
    list_cfg: ListConfig,
    now: i64,
}

impl Transaction {
    pub fn new(kv: KvTxn, keys: DbKeys, list_cfg: ListConfig) -> Self {
        Transaction { kv, keys, list_cfg, now: now_nanos() }
    }

    pub fn string(&self, key: &[u8]) -> Result<StringValue<'_>> {
        StringValue::open(self, key)
    }

    /// 覆盖写入：先销毁 key 上现有的任意类型对象，再返回一个全新的空字符串
    pub fn new_string(&self, key: &[u8]) -> Result<StringValue<'_>> {
        self.keyspace().delete(&[key])?;
        StringValue::open(self, key)
    }

    pub fn hash(&self, key: &[u8]) -> Result<Hash<'_>> {
        Hash::open(self, key)
    }

    pub fn set(&self, key: &[u8]) -> Result<Set<'_>> {
        Set::open(self, key)
    }

    pub fn zset(&self, key: &[u8]) -> Result<ZSet<'_>> {
        ZSet::open(self, key)
    }

    pub fn list(&self, key: &[u8]) -> Result<List<'_>> {
        List::open(self, key)
    }

    /// key 级别的操作：exists / delete / expire / ttl / scan
    pub fn keyspace(&self) -> KeySpace<'_> {
        KeySpace::new(self)
    }

    pub fn sinter(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let mut acc: Option<BTreeSet<Vec<u8>>> = None;
        for key in keys {
            let members: BTreeSet<Vec<u8>> = self.set(key)?.members()?.into_iter().collect();
            acc = Some(match acc {
                None => members,
                Some(prev) => prev.intersection(&members).cloned().collect(),
            });
            if acc.as_ref().is_some_and(|s| s.is_empty()) {
                break;
            }
        }
        Ok(acc.unwrap_or_default().into_iter().collect())
    }

    pub fn sunion(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let mut acc = BTreeSet::new();
        for key in keys {
            acc.extend(self.set(key)?.members()?);
        }
        Ok(acc.into_iter().collect())
    }

    /// 第一个集合减去其余所有集合
    pub fn sdiff(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let Some((first, rest)) = keys.split_first() else {
            return Ok(Vec::new());
        };
        let mut acc: BTreeSet<Vec<u8>> = self.set(first)?.members()?.into_iter().collect();
        for key in rest {
            for m in self.set(key)?.members()? {
                acc.remove(&m);
            }
        }
        Ok(acc.into_iter().collect())
    }

    pub fn commit(self) -> Result<()> {
        self.kv.commit()
    }

    pub fn rollback(self) {
        self.kv.rollback()
    }

    pub fn now(&self) -> i64 {
        self.now
    }

    pub(crate) fn kv(&self) -> &KvTxn {
        &self.kv
    }

    pub(crate) fn keys(&self) -> &DbKeys {
        &self.keys
    }

    pub(crate) fn list_config(&self) -> &ListConfig {
        &self.list_cfg
    }

    /// 读 meta key 并解出对象头。
    ///
    /// 已过期的对象视为不存在，并在当前事务里顺手删除（惰性过期）。
    pub(crate) fn load(&self, meta_key: &[u8]) -> Result<Option<(Object, Vec<u8>)>> {
        let Some(raw) = self.kv.get(meta_key)? else {
            return Ok(None);
        };
        let (obj, tail) = Object::decode(&raw)?;
        if obj.is_expired(self.now) {
            debug!(key = %String::from_utf8_lossy(meta_key), "lazily removing expired key");
            destroy_object(&self.kv, &self.keys, meta_key, &obj);
            return Ok(None);
        }
        Ok(Some((obj, tail.to_vec())))
    }

    /// 读取 key 并检查类型
    pub(crate) fn load_typed(&self, meta_key: &[u8], kind: ObjectType) -> Result<Option<(Object, Vec<u8>)>> {
        match self.load(meta_key)? {
            Some((obj, _)) if obj.kind != kind => Err(Error::TypeMismatch),
            other => Ok(other),
        }
    }

    /// 写 meta 值（对象头 + 尾部）；过期索引由调用方通过 `expire::update_index` 维护
    pub(crate) fn save_meta(&self, meta_key: &[u8], obj: &Object, tail: &[u8]) {
        let mut val = obj.encode();
        val.extend_from_slice(tail);
        self.kv.set(meta_key, &val);
    }

    /// 容器变空时直接删掉 meta key，此时数据 key 已经全部删除，不需要 GC
    pub(crate) fn drop_empty(&self, meta_key: &[u8], obj: &Object) {
        self.kv.delete(meta_key);
        expire::unset_index(&self.kv, meta_key, obj.expire_at);
    }

    pub(crate) fn destroy(&self, meta_key: &[u8], obj: &Object) {
        destroy_object(&self.kv, &self.keys, meta_key, obj);
    }
}

/// 删除 meta key、过期索引，并把数据前缀交给 GC
pub(crate) fn destroy_object(kv: &KvTxn, keys: &DbKeys, meta_key: &[u8], obj: &Object) {
    kv.delete(meta_key);
    expire::unset_index(kv, meta_key, obj.expire_at);
    kv.delete(&keys::transfer_key(meta_key));
    for prefix in keys.gc_prefixes(obj) {
        gc::enqueue(kv, &prefix);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_new_string_replaces_other_types() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        let mut h = txn.hash(b"k")?;
        h.set(b"f", b"v")?;
        let old_prefix = txn.keys().data_prefix(&h.object().id);

        let mut s = txn.new_string(b"k")?;
        s.set(b"plain")?;
        assert_eq!(txn.string(b"k")?.get()?, b"plain");
        // 旧 hash 的数据前缀被交给 GC
        assert!(txn.kv().get(&keys::gc_key(&old_prefix))?.is_some());
        txn.commit()?;
        Ok(())
    }

    #[test]
    fn test_type_mismatch() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        txn.set(b"s")?.add(&["m"])?;
        assert!(matches!(txn.hash(b"s"), Err(Error::TypeMismatch)));
        assert!(matches!(txn.string(b"s"), Err(Error::TypeMismatch)));
        assert!(matches!(txn.list(b"s"), Err(Error::TypeMismatch)));
        assert!(matches!(txn.zset(b"s"), Err(Error::TypeMismatch)));
        Ok(())
    }

    #[test]
    fn test_set_algebra() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        txn.set(b"a")?.add(&["1", "2", "3"])?;
        txn.set(b"b")?.add(&["2", "3", "4"])?;
        let a: &[u8] = b"a";
        let b: &[u8] = b"b";
        let missing: &[u8] = b"missing";
        assert_eq!(txn.sinter(&[a, b])?, vec![b"2".to_vec(), b"3".to_vec()]);
        assert_eq!(txn.sunion(&[a, b])?.len(), 4);
        assert_eq!(txn.sdiff(&[a, b])?, vec![b"1".to_vec()]);
        assert!(txn.sinter(&[a, missing])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_lazy_expire_on_read() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        txn.hash(b"h")?.set(b"f", b"v")?;
        let ks = txn.keyspace();
        assert!(ks.expire_at(b"h", 1)?);
        // 已经过期：读到的是一个空 hash
        let h = txn.hash(b"h")?;
        assert_eq!(h.len(), 0);
        assert!(!h.exists());
        txn.commit()?;

        let txn = begin(&st);
        assert_eq!(count_prefix(&txn, &keys::expire_prefix()), 0);
        assert_eq!(count_prefix(&txn, &keys::gc_prefix()), 1);
        Ok(())
    }
}
