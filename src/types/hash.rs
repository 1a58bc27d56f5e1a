// src/types/hash.rs

//! Hash 类型：每个 field 一个数据 key `D:{id}:{field}`，meta tail 只存 field 数量。

use crate::error::{Error, Result};
use crate::txn::Transaction;
use crate::types::object::{Object, ObjectType};
use crate::types::Table;

pub struct Hash<'a> {
    t: Table<'a>,
}

impl<'a> Hash<'a> {
    pub(crate) fn open(txn: &'a Transaction, key: &[u8]) -> Result<Self> {
        Ok(Hash { t: Table::open(txn, key, ObjectType::Hash)? })
    }

    pub fn exists(&self) -> bool {
        self.t.exists
    }

    pub fn object(&self) -> &Object {
        &self.t.obj
    }

    /// HLEN
    pub fn len(&self) -> i64 {
        self.t.len
    }

    pub fn is_empty(&self) -> bool {
        self.t.len == 0
    }

    /// HSET，返回 field 是否是新建的
    pub fn set(&mut self, field: &[u8], value: &[u8]) -> Result<bool> {
        let key = self.t.data_key(field);
        let is_new = self.t.txn.kv().get(&key)?.is_none();
        self.t.txn.kv().set(&key, value);
        self.t.adjust(is_new as i64);
        Ok(is_new)
    }

    /// HSETNX：field 已存在时什么都不做
    pub fn set_nx(&mut self, field: &[u8], value: &[u8]) -> Result<bool> {
        let key = self.t.data_key(field);
        if self.t.txn.kv().get(&key)?.is_some() {
            return Ok(false);
        }
        self.t.txn.kv().set(&key, value);
        self.t.adjust(1);
        Ok(true)
    }

    /// HMSET，返回新建的 field 数量
    pub fn mset<F: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, pairs: &[(F, V)]) -> Result<i64> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let keys: Vec<Vec<u8>> = pairs.iter().map(|(f, _)| self.t.data_key(f.as_ref())).collect();
        let old = self.t.txn.kv().batch_get(&keys)?;
        let mut added = 0;
        for ((key, (_, value)), prev) in keys.iter().zip(pairs).zip(old) {
            // 同一批里重复的 field 只算一次
            if prev.is_none() && self.t.txn.kv().get(key)?.is_none() {
                added += 1;
            }
            self.t.txn.kv().set(key, value.as_ref());
        }
        self.t.adjust(added);
        Ok(added)
    }

    /// HGET
    pub fn get(&self, field: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.t.exists {
            return Ok(None);
        }
        self.t.txn.kv().get(&self.t.data_key(field))
    }

    /// HMGET
    pub fn mget<F: AsRef<[u8]>>(&self, fields: &[F]) -> Result<Vec<Option<Vec<u8>>>> {
        if !self.t.exists {
            return Ok(vec![None; fields.len()]);
        }
        let keys: Vec<Vec<u8>> = fields.iter().map(|f| self.t.data_key(f.as_ref())).collect();
        self.t.txn.kv().batch_get(&keys)
    }

    /// HDEL，返回真正删掉的 field 数量
    pub fn delete<F: AsRef<[u8]>>(&mut self, fields: &[F]) -> Result<i64> {
        if !self.t.exists {
            return Ok(0);
        }
        let mut removed = 0;
        for f in fields {
            let key = self.t.data_key(f.as_ref());
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

    /// HEXISTS
    pub fn field_exists(&self, field: &[u8]) -> Result<bool> {
        Ok(self.get(field)?.is_some())
    }

    /// HSTRLEN
    pub fn str_len(&self, field: &[u8]) -> Result<usize> {
        Ok(self.get(field)?.map(|v| v.len()).unwrap_or(0))
    }

    /// HGETALL，按 field 的字节序返回
    pub fn get_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if !self.t.exists {
            return Ok(Vec::new());
        }
        let prefix = self.t.data_prefix();
        self.t
            .txn
            .kv()
            .scan_prefix(&prefix)
            .map(|r| r.map(|(k, v)| (k[prefix.len()..].to_vec(), v)))
            .collect()
    }

    /// HKEYS
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.get_all()?.into_iter().map(|(f, _)| f).collect())
    }

    /// HVALS
    pub fn values(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.get_all()?.into_iter().map(|(_, v)| v).collect())
    }

    /// HINCRBY
    pub fn incr_by(&mut self, field: &[u8], delta: i64) -> Result<i64> {
        let old = match self.get(field)? {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| Error::InvalidArgument("hash value is not an integer".into()))?,
            None => 0,
        };
        let new = old
            .checked_add(delta)
            .ok_or_else(|| Error::InvalidArgument("increment or decrement would overflow".into()))?;
        self.set(field, new.to_string().as_bytes())?;
        Ok(new)
    }

    /// HINCRBYFLOAT
    pub fn incr_by_float(&mut self, field: &[u8], delta: f64) -> Result<f64> {
        let old = match self.get(field)? {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .ok_or_else(|| Error::InvalidArgument("hash value is not a valid float".into()))?,
            None => 0.0,
        };
        let new = old + delta;
        if !new.is_finite() {
            return Err(Error::InvalidArgument("increment would produce NaN or Infinity".into()));
        }
        self.set(field, new.to_string().as_bytes())?;
        Ok(new)
    }

    /// 删除整个 hash，数据 key 交给 GC
    pub fn destroy(&mut self) {
        self.t.destroy();
    }
}
