// src/types/set.rs

//! Set 类型：每个成员一个数据 key `D:{id}:{member}`，值为空。

use rand::seq::SliceRandom;

use crate::error::Result;
use crate::txn::Transaction;
use crate::types::object::{Object, ObjectType};
use crate::types::Table;

pub struct Set<'a> {
    t: Table<'a>,
}

impl<'a> Set<'a> {
    pub(crate) fn open(txn: &'a Transaction, key: &[u8]) -> Result<Self> {
        Ok(Set { t: Table::open(txn, key, ObjectType::Set)? })
    }

    pub fn exists(&self) -> bool {
        self.t.exists
    }

    pub fn object(&self) -> &Object {
        &self.t.obj
    }

    /// SCARD
    pub fn card(&self) -> i64 {
        self.t.len
    }

    /// SADD，返回新加入的成员数量
    pub fn add<M: AsRef<[u8]>>(&mut self, members: &[M]) -> Result<i64> {
        let mut added = 0;
        for m in members {
            let key = self.t.data_key(m.as_ref());
            if self.t.txn.kv().get(&key)?.is_none() {
                self.t.txn.kv().set(&key, &[]);
                added += 1;
            }
        }
        if added > 0 {
            self.t.adjust(added);
        }
        Ok(added)
    }

    /// SREM，返回真正移除的成员数量
    pub fn remove<M: AsRef<[u8]>>(&mut self, members: &[M]) -> Result<i64> {
        if !self.t.exists {
            return Ok(0);
        }
        let mut removed = 0;
        for m in members {
            let key = self.t.data_key(m.as_ref());
            if self.t.txn.kv().get(&key)?.is_some() {
                self.t.txn.kv().delete(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            self.t.adjust(-removed);
        }
        Ok(removed)
    }

    /// SISMEMBER
    pub fn is_member(&self, member: &[u8]) -> Result<bool> {
        if !self.t.exists {
            return Ok(false);
        }
        Ok(self.t.txn.kv().get(&self.t.data_key(member))?.is_some())
    }

    /// SMEMBERS，按字节序返回
    pub fn members(&self) -> Result<Vec<Vec<u8>>> {
        if !self.t.exists {
            return Ok(Vec::new());
        }
        let prefix = self.t.data_prefix();
        self.t
            .txn
            .kv()
            .scan_prefix(&prefix)
            .map(|r| r.map(|(k, _)| k[prefix.len()..].to_vec()))
            .collect()
    }

    /// SPOP：随机取出并删除最多 `count` 个成员
    pub fn pop(&mut self, count: usize) -> Result<Vec<Vec<u8>>> {
        if count == 0 || !self.t.exists {
            return Ok(Vec::new());
        }
        let mut members = self.members()?;
        members.shuffle(&mut rand::thread_rng());
        members.truncate(count);
        self.remove(&members)?;
        Ok(members)
    }

    /// SRANDMEMBER：`count > 0` 时返回不重复的成员，`count < 0` 时允许重复、返回 `|count|` 个
    pub fn random_members(&self, count: i64) -> Result<Vec<Vec<u8>>> {
        let members = self.members()?;
        if members.is_empty() || count == 0 {
            return Ok(Vec::new());
        }
        let mut rng = rand::thread_rng();
        if count > 0 {
            Ok(members.choose_multiple(&mut rng, count as usize).cloned().collect())
        } else {
            Ok((0..count.unsigned_abs())
                .filter_map(|_| members.choose(&mut rng).cloned())
                .collect())
        }
    }

    /// SMOVE：把成员从当前集合移到 `dest`，成员不在当前集合时返回 false
    pub fn move_to(&mut self, dest: &[u8], member: &[u8]) -> Result<bool> {
        if self.t.txn.keys().meta_key(dest) == self.t.meta_key {
            return self.is_member(member);
        }
        // 先打开目标，类型不对时不修改源集合
        let mut target = self.t.txn.set(dest)?;
        if self.remove(&[member])? == 0 {
            return Ok(false);
        }
        target.add(&[member])?;
        Ok(true)
    }

    /// 删除整个集合，数据 key 交给 GC
    pub fn destroy(&mut self) {
        self.t.destroy();
    }
}
