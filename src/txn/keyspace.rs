// src/txn/keyspace.rs

//! 与具体类型无关的 key 级操作：EXISTS / DEL / TYPE / EXPIRE / PERSIST / TTL / SCAN

use std::ops::Bound;
use std::time::Duration;

use crate::error::Result;
use crate::expire;
use crate::keys;
use crate::txn::Transaction;
use crate::types::object::{Object, ObjectType};

pub struct KeySpace<'a> {
    txn: &'a Transaction,
}

impl<'a> KeySpace<'a> {
    pub(crate) fn new(txn: &'a Transaction) -> Self {
        KeySpace { txn }
    }

    fn load(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Object, Vec<u8>)>> {
        let meta_key = self.txn.keys().meta_key(key);
        Ok(self.txn.load(&meta_key)?.map(|(obj, tail)| (meta_key, obj, tail)))
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.load(key)?.is_some())
    }

    /// DEL，返回真正删除的 key 数量
    pub fn delete(&self, keys: &[&[u8]]) -> Result<i64> {
        let mut n = 0;
        for key in keys {
            if let Some((meta_key, obj, _)) = self.load(key)? {
                self.txn.destroy(&meta_key, &obj);
                n += 1;
            }
        }
        Ok(n)
    }

    /// TYPE
    pub fn kind(&self, key: &[u8]) -> Result<Option<ObjectType>> {
        Ok(self.load(key)?.map(|(_, obj, _)| obj.kind))
    }

    /// OBJECT：返回对象头，用来查看编码、id 和时间戳
    pub fn object(&self, key: &[u8]) -> Result<Option<Object>> {
        Ok(self.load(key)?.map(|(_, obj, _)| obj))
    }

    /// EXPIRE
    pub fn expire(&self, key: &[u8], ttl: Duration) -> Result<bool> {
        let at = self.txn.now().saturating_add(ttl.as_nanos().min(i64::MAX as u128) as i64);
        self.expire_at(key, at)
    }

    /// PEXPIREAT（纳秒）。时间已过时直接删除 key；key 不存在时返回 false。
    pub fn expire_at(&self, key: &[u8], at: i64) -> Result<bool> {
        let Some((meta_key, mut obj, tail)) = self.load(key)? else {
            return Ok(false);
        };
        if at <= self.txn.now() {
            self.txn.destroy(&meta_key, &obj);
            return Ok(true);
        }
        expire::update_index(self.txn.kv(), &meta_key, obj.expire_at, at);
        obj.expire_at = at;
        obj.touch(self.txn.now());
        self.txn.save_meta(&meta_key, &obj, &tail);
        Ok(true)
    }

    /// PERSIST：清除过期时间，原本没有过期时间时返回 false
    pub fn persist(&self, key: &[u8]) -> Result<bool> {
        let Some((meta_key, mut obj, tail)) = self.load(key)? else {
            return Ok(false);
        };
        if obj.expire_at == 0 {
            return Ok(false);
        }
        expire::unset_index(self.txn.kv(), &meta_key, obj.expire_at);
        obj.expire_at = 0;
        obj.touch(self.txn.now());
        self.txn.save_meta(&meta_key, &obj, &tail);
        Ok(true)
    }

    /// PTTL：-2 表示 key 不存在，-1 表示没有过期时间，否则是剩余毫秒数
    pub fn ttl(&self, key: &[u8]) -> Result<i64> {
        Ok(match self.load(key)? {
            None => -2,
            Some((_, obj, _)) if obj.expire_at == 0 => -1,
            Some((_, obj, _)) => (obj.expire_at - self.txn.now()) / 1_000_000,
        })
    }

    /// SCAN：从 `cursor`（含）开始最多检查 `count` 个 key，返回匹配的 key 和下一个游标。
    ///
    /// 游标就是下一个要检查的用户 key，扫完时返回 `None`。已过期的 key 会被跳过。
    pub fn scan(&self, cursor: &[u8], pattern: Option<&[u8]>, count: usize) -> Result<(Vec<Vec<u8>>, Option<Vec<u8>>)> {
        let db_keys = self.txn.keys();
        let prefix = db_keys.meta_prefix();
        let mut start = prefix.clone();
        start.extend_from_slice(cursor);
        let end = match keys::prefix_end(&prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };

        let mut found = Vec::new();
        let mut examined = 0;
        for item in self.txn.kv().range(Bound::Included(start), end, false) {
            let (meta_key, raw) = item?;
            let Some(user_key) = db_keys.user_key(&meta_key) else {
                continue;
            };
            if examined >= count.max(1) {
                return Ok((found, Some(user_key.to_vec())));
            }
            examined += 1;
            let (obj, _) = Object::decode(&raw)?;
            if obj.is_expired(self.txn.now()) {
                continue;
            }
            if pattern.is_none_or(|p| glob_match(p, user_key)) {
                found.push(user_key.to_vec());
            }
        }
        Ok((found, None))
    }

    /// KEYS：完整扫描一遍当前 db
    pub fn keys(&self, pattern: &[u8]) -> Result<Vec<Vec<u8>>> {
        let (found, _) = self.scan(b"", Some(pattern), usize::MAX)?;
        Ok(found)
    }
}

/// 按字节匹配的 glob：支持 `*`、`?`、`[abc]` / `[^a-z]` 和 `\` 转义
fn glob_match(pat: &[u8], key: &[u8]) -> bool {
    let (mut p, mut k) = (0, 0);
    // 最近一个 `*` 在 pattern 里的位置，以及它当时对应的 key 位置
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        let step = match pat.get(p) {
            Some(b'*') => {
                star = Some((p, k));
                p += 1;
                continue;
            }
            Some(b'?') => Some(1),
            Some(b'\\') if p + 1 < pat.len() => (pat[p + 1] == key[k]).then_some(2),
            Some(b'[') => match class_match(&pat[p..], key[k]) {
                Some((true, used)) => Some(used),
                _ => None,
            },
            Some(&c) => (c == key[k]).then_some(1),
            None => None,
        };
        match (step, star) {
            (Some(used), _) => {
                p += used;
                k += 1;
            }
            // 回到上一个 `*`，让它多吞一个字节
            (None, Some((sp, sk))) => {
                star = Some((sp, sk + 1));
                p = sp + 1;
                k = sk + 1;
            }
            (None, None) => return false,
        }
    }
    pat[p..].iter().all(|&c| c == b'*')
}

/// 匹配 `[...]`，返回（是否命中，pattern 消耗的字节数）；括号没闭合时返回 None
fn class_match(pat: &[u8], c: u8) -> Option<(bool, usize)> {
    let mut i = 1;
    let negate = pat.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut hit = false;
    while i < pat.len() && pat[i] != b']' {
        if i + 2 < pat.len() && pat[i + 1] == b'-' && pat[i + 2] != b']' {
            hit |= (pat[i]..=pat[i + 2]).contains(&c);
            i += 3;
        } else {
            hit |= pat[i] == c;
            i += 1;
        }
    }
    (i < pat.len()).then_some((hit != negate, i + 1))
}
