// src/keys.rs

//! # Key 空间布局
//!
//! 所有物理 key 都由这里拼出来，布局是持久化格式的一部分：
//!
//! - meta key:      `{ns}:{db}:M:{user_key}`
//! - data key:      `{ns}:{db}:D:{object_id}:{selector}`
//! - zset 分数索引: `{ns}:{db}:S:{object_id}:{score}:{member}`
//! - 过期索引:      `$sys:0:at:{sortable_ts}:{meta_key}`
//! - GC 标记:       `$sys:0:GC:{prefix}`
//! - list 转换标记: `$sys:0:LT:{meta_key}`

use crate::codec;
use crate::error::{Error, Result};
use crate::types::object::{Object, ObjectId, ObjectType};

pub const SYS_NAMESPACE: &str = "$sys";
pub const SYS_DB: u32 = 0;

const SYS_PREFIX: &[u8] = b"$sys:0:";
const EXPIRE_TAG: &[u8] = b"at:";
const GC_TAG: &[u8] = b"GC:";
const TRANSFER_TAG: &[u8] = b"LT:";

/// 某个 namespace 下某个 db 的 key 前缀 `{ns}:{db}:`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbKeys {
    prefix: Vec<u8>,
}

impl DbKeys {
    /// namespace 里不能出现 `:`，否则无法从 meta key 反推出前缀
    pub fn new(namespace: &str, db_id: u32) -> Result<Self> {
        if namespace.is_empty() || namespace.contains(':') {
            return Err(Error::InvalidArgument(format!("invalid namespace '{}'", namespace)));
        }
        Ok(DbKeys { prefix: format!("{}:{}:", namespace, db_id).into_bytes() })
    }

    /// 从完整的 meta key 还原出 db 前缀（过期清理只拿得到 meta key）
    pub fn from_meta_key(meta_key: &[u8]) -> Option<Self> {
        let first = meta_key.iter().position(|&b| b == b':')?;
        let second = first + 1 + meta_key[first + 1..].iter().position(|&b| b == b':')?;
        let db = std::str::from_utf8(&meta_key[first + 1..second]).ok()?;
        db.parse::<u32>().ok()?;
        if !meta_key[second + 1..].starts_with(b"M:") {
            return None;
        }
        Some(DbKeys { prefix: meta_key[..=second].to_vec() })
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn tagged(&self, tag: &[u8], extra: usize) -> Vec<u8> {
        let mut k = Vec::with_capacity(self.prefix.len() + tag.len() + extra);
        k.extend_from_slice(&self.prefix);
        k.extend_from_slice(tag);
        k
    }

    pub fn meta_prefix(&self) -> Vec<u8> {
        self.tagged(b"M:", 0)
    }

    pub fn meta_key(&self, user_key: &[u8]) -> Vec<u8> {
        let mut k = self.tagged(b"M:", user_key.len());
        k.extend_from_slice(user_key);
        k
    }

    /// meta key 去掉前缀后的用户 key
    pub fn user_key<'k>(&self, meta_key: &'k [u8]) -> Option<&'k [u8]> {
        meta_key.strip_prefix(self.prefix.as_slice())?.strip_prefix(b"M:".as_slice())
    }

    pub fn data_prefix(&self, id: &ObjectId) -> Vec<u8> {
        let mut k = self.tagged(b"D:", id.as_bytes().len() + 1);
        k.extend_from_slice(id.as_bytes());
        k.push(b':');
        k
    }

    pub fn data_key(&self, id: &ObjectId, selector: &[u8]) -> Vec<u8> {
        let mut k = self.data_prefix(id);
        k.extend_from_slice(selector);
        k
    }

    pub fn score_prefix(&self, id: &ObjectId) -> Vec<u8> {
        let mut k = self.tagged(b"S:", id.as_bytes().len() + 1);
        k.extend_from_slice(id.as_bytes());
        k.push(b':');
        k
    }

    pub fn score_key(&self, id: &ObjectId, score: f64, member: &[u8]) -> Vec<u8> {
        let mut k = self.score_prefix(id);
        k.extend_from_slice(&codec::encode_f64(score));
        k.push(b':');
        k.extend_from_slice(member);
        k
    }

    /// 对象被销毁后需要交给 GC 回收的前缀
    pub fn gc_prefixes(&self, obj: &Object) -> Vec<Vec<u8>> {
        if !obj.owns_data_keys() {
            return Vec::new();
        }
        let mut prefixes = vec![self.data_prefix(&obj.id)];
        if obj.kind == ObjectType::ZSet {
            prefixes.push(self.score_prefix(&obj.id));
        }
        prefixes
    }
}

fn sys_key(tag: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut k = Vec::with_capacity(SYS_PREFIX.len() + tag.len() + parts.iter().map(|p| p.len()).sum::<usize>());
    k.extend_from_slice(SYS_PREFIX);
    k.extend_from_slice(tag);
    for p in parts {
        k.extend_from_slice(p);
    }
    k
}

pub fn expire_prefix() -> Vec<u8> {
    sys_key(EXPIRE_TAG, &[])
}

pub fn expire_key(at: i64, meta_key: &[u8]) -> Vec<u8> {
    sys_key(EXPIRE_TAG, &[&codec::encode_i64(at), b":", meta_key])
}

/// 拆出过期索引里的时间戳和 meta key
pub fn split_expire_key(key: &[u8]) -> Result<(i64, &[u8])> {
    let rest = key
        .strip_prefix(expire_prefix().as_slice())
        .ok_or_else(|| Error::InvalidEncoding("not an expire index key".into()))?;
    if rest.len() < 9 || rest[8] != b':' {
        return Err(Error::InvalidEncoding("malformed expire index key".into()));
    }
    Ok((codec::decode_i64(&rest[..8])?, &rest[9..]))
}

pub fn gc_prefix() -> Vec<u8> {
    sys_key(GC_TAG, &[])
}

pub fn gc_key(prefix: &[u8]) -> Vec<u8> {
    sys_key(GC_TAG, &[prefix])
}

pub fn transfer_prefix() -> Vec<u8> {
    sys_key(TRANSFER_TAG, &[])
}

pub fn transfer_key(meta_key: &[u8]) -> Vec<u8> {
    sys_key(TRANSFER_TAG, &[meta_key])
}

/// 前缀扫描的上界（不含）；前缀全是 0xff 时没有上界
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
