// src/types/string.rs

//! String 类型
//!
//! 字符串没有数据 key：值直接内联在 meta 值的对象头之后。
//! 内容是规范形式的 i64 时编码标记为 `Int`，否则为 `Raw`。
//! 覆盖写入同类型的字符串时沿用原来的对象 id，销毁时也不需要 GC。

use crate::error::{Error, Result};
use crate::expire;
use crate::txn::Transaction;
use crate::types::object::{Encoding, Object, ObjectType};

/// 单个字符串值的长度上限（512 MiB）
pub const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

pub struct StringValue<'a> {
    txn: &'a Transaction,
    meta_key: Vec<u8>,
    obj: Object,
    value: Vec<u8>,
    exists: bool,
}

fn encoding_for(value: &[u8]) -> Encoding {
    match std::str::from_utf8(value).ok().and_then(|s| s.parse::<i64>().ok()) {
        Some(n) if n.to_string().as_bytes() == value => Encoding::Int,
        _ => Encoding::Raw,
    }
}

/// GETRANGE 风格的下标归一化，返回闭区间
fn clamp_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if start > end || start >= len || end < 0 {
        return None;
    }
    Some((start as usize, end as usize))
}

impl<'a> StringValue<'a> {
    pub(crate) fn open(txn: &'a Transaction, key: &[u8]) -> Result<Self> {
        let meta_key = txn.keys().meta_key(key);
        let (obj, value, exists) = match txn.load_typed(&meta_key, ObjectType::String)? {
            Some((obj, tail)) => (obj, tail, true),
            None => (Object::new(ObjectType::String, Encoding::Raw, txn.now()), Vec::new(), false),
        };
        Ok(StringValue { txn, meta_key, obj, value, exists })
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn object(&self) -> &Object {
        &self.obj
    }

    /// 不存在时返回 `KeyNotFound`，以便与空字符串区分
    pub fn get(&self) -> Result<Vec<u8>> {
        if !self.exists {
            return Err(Error::KeyNotFound);
        }
        Ok(self.value.clone())
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    fn save(&mut self) {
        self.obj.encoding = encoding_for(&self.value);
        self.obj.touch(self.txn.now());
        self.txn.save_meta(&self.meta_key, &self.obj, &self.value);
        self.exists = true;
    }

    /// SET：写入新值并清除过期时间
    pub fn set(&mut self, value: &[u8]) -> Result<()> {
        self.set_with_expire(value, 0)
    }

    /// SET ... PXAT：写入新值，同时把过期时间设为 `expire_at`（0 表示不过期）
    pub fn set_with_expire(&mut self, value: &[u8], expire_at: i64) -> Result<()> {
        if expire_at > 0 && expire_at <= self.txn.now() {
            return Err(Error::InvalidArgument("expire time is in the past".into()));
        }
        expire::update_index(self.txn.kv(), &self.meta_key, self.obj.expire_at, expire_at);
        self.obj.expire_at = expire_at;
        self.value = value.to_vec();
        self.save();
        Ok(())
    }

    /// GETSET：写入新值，返回旧值
    pub fn get_set(&mut self, value: &[u8]) -> Result<Option<Vec<u8>>> {
        let old = self.exists.then(|| self.value.clone());
        self.set(value)?;
        Ok(old)
    }

    /// APPEND，返回追加后的长度；保留原有的过期时间
    pub fn append(&mut self, suffix: &[u8]) -> Result<usize> {
        self.value.extend_from_slice(suffix);
        self.save();
        Ok(self.value.len())
    }

    pub fn get_range(&self, start: i64, end: i64) -> Vec<u8> {
        match clamp_range(start, end, self.value.len()) {
            Some((s, e)) => self.value[s..=e].to_vec(),
            None => Vec::new(),
        }
    }

    /// SETRANGE：从 `offset` 开始覆盖，不够长时用 0 填充，返回新长度
    pub fn set_range(&mut self, offset: usize, patch: &[u8]) -> Result<usize> {
        if patch.is_empty() {
            return Ok(self.value.len());
        }
        let end = offset
            .checked_add(patch.len())
            .filter(|end| *end <= MAX_STRING_LEN)
            .ok_or(Error::OutOfRange)?;
        if self.value.len() < end {
            self.value.resize(end, 0);
        }
        self.value[offset..end].copy_from_slice(patch);
        self.save();
        Ok(self.value.len())
    }

    fn as_i64(&self) -> Result<i64> {
        if !self.exists {
            return Ok(0);
        }
        std::str::from_utf8(&self.value)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Error::InvalidArgument("value is not an integer or out of range".into()))
    }

    pub fn incr_by(&mut self, delta: i64) -> Result<i64> {
        let new = self
            .as_i64()?
            .checked_add(delta)
            .ok_or_else(|| Error::InvalidArgument("increment or decrement would overflow".into()))?;
        self.value = new.to_string().into_bytes();
        self.save();
        Ok(new)
    }

    pub fn incr_by_float(&mut self, delta: f64) -> Result<f64> {
        let old = if self.exists {
            std::str::from_utf8(&self.value)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .ok_or_else(|| Error::InvalidArgument("value is not a valid float".into()))?
        } else {
            0.0
        };
        let new = old + delta;
        if !new.is_finite() {
            return Err(Error::InvalidArgument("increment would produce NaN or Infinity".into()));
        }
        self.value = new.to_string().into_bytes();
        self.save();
        Ok(new)
    }

    /// 删除字符串；字符串没有数据 key，不会产生 GC 标记
    pub fn destroy(&mut self) {
        if self.exists {
            self.txn.destroy(&self.meta_key, &self.obj);
            self.exists = false;
            self.value.clear();
        }
    }
}
