// src/types/object.rs

//! # 对象头
//!
//! 每个 meta 值都以一个定长 42 字节的对象头开始：
//!
//! ```text
//! type:u8 | encoding:u8 | created_at:i64 | updated_at:i64 | expire_at:i64 | id:[u8;16]
//! ```
//!
//! 头部长度与容器类型无关，也没有版本号，所以不知道具体类型时也能先解出头部，
//! 再根据 `kind` 决定如何解析剩余的 tail。时间戳都是纳秒级 UNIX 时间。

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 42;
pub const OBJECT_ID_LEN: usize = 16;

/// 对象内部 id：与用户 key 解耦，数据 key 只通过它寻址
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// 随机生成一个新的 128 位 id
    pub fn generate() -> Self {
        ObjectId(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn from_bytes(b: [u8; OBJECT_ID_LEN]) -> Self {
        ObjectId(b)
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    String = 0,
    List = 1,
    Set = 2,
    ZSet = 3,
    Hash = 4,
}

impl ObjectType {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectType::String => "string",
            ObjectType::List => "list",
            ObjectType::Set => "set",
            ObjectType::ZSet => "zset",
            ObjectType::Hash => "hash",
        }
    }
}

impl TryFrom<u8> for ObjectType {
    type Error = Error;

    fn try_from(b: u8) -> Result<Self> {
        Ok(match b {
            0 => ObjectType::String,
            1 => ObjectType::List,
            2 => ObjectType::Set,
            3 => ObjectType::ZSet,
            4 => ObjectType::Hash,
            other => return Err(Error::InvalidEncoding(format!("unknown object type {}", other))),
        })
    }
}

/// 物理布局标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    /// 字符串原样内联在 meta 值里
    Raw = 0,
    /// 字符串内容是规范形式的 i64
    Int = 1,
    /// list 整体序列化在 meta 值里
    Compact = 2,
    /// list 每个元素一个数据 key
    Distributed = 3,
    /// hash / set / zset：每个成员一个数据 key
    Table = 4,
}

impl TryFrom<u8> for Encoding {
    type Error = Error;

    fn try_from(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Encoding::Raw,
            1 => Encoding::Int,
            2 => Encoding::Compact,
            3 => Encoding::Distributed,
            4 => Encoding::Table,
            other => return Err(Error::InvalidEncoding(format!("unknown encoding {}", other))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub id: ObjectId,
    pub kind: ObjectType,
    pub encoding: Encoding,
    pub created_at: i64,
    pub updated_at: i64,
    /// 0 表示永不过期
    pub expire_at: i64,
}

impl Object {
    /// 内存中新建一个对象，提交之前不会落盘
    pub fn new(kind: ObjectType, encoding: Encoding, now: i64) -> Self {
        Object {
            id: ObjectId::generate(),
            kind,
            encoding,
            created_at: now,
            updated_at: now,
            expire_at: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind as u8);
        buf.push(self.encoding as u8);
        buf.extend_from_slice(&self.created_at.to_be_bytes());
        buf.extend_from_slice(&self.updated_at.to_be_bytes());
        buf.extend_from_slice(&self.expire_at.to_be_bytes());
        buf.extend_from_slice(self.id.as_bytes());
    }

    /// 解出对象头，返回头部之后的 tail
    pub fn decode(b: &[u8]) -> Result<(Object, &[u8])> {
        if b.len() < HEADER_LEN {
            return Err(Error::InvalidEncoding(format!(
                "object header needs {} bytes, got {}",
                HEADER_LEN,
                b.len()
            )));
        }
        let (head, tail) = b.split_at(HEADER_LEN);
        let ts = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&head[at..at + 8]);
            i64::from_be_bytes(raw)
        };
        let mut id = [0u8; OBJECT_ID_LEN];
        id.copy_from_slice(&head[26..HEADER_LEN]);
        let obj = Object {
            kind: ObjectType::try_from(head[0])?,
            encoding: Encoding::try_from(head[1])?,
            created_at: ts(2),
            updated_at: ts(10),
            expire_at: ts(18),
            id: ObjectId::from_bytes(id),
        };
        Ok((obj, tail))
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expire_at > 0 && self.expire_at <= now
    }

    /// 是否在 meta key 之外还拥有数据 key（销毁时需要交给 GC）
    pub fn owns_data_keys(&self) -> bool {
        match self.kind {
            ObjectType::String => false,
            ObjectType::List => self.encoding == Encoding::Distributed,
            ObjectType::Hash | ObjectType::Set | ObjectType::ZSet => true,
        }
    }

    pub fn touch(&mut self, now: i64) {
        self.updated_at = now;
    }
}

/// 返回当前的 UNIX 纳秒
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// 从 tail 中读出一个大端 i64 计数
pub(crate) fn decode_len(tail: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = tail
        .get(..8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::InvalidEncoding("missing element count".into()))?;
    Ok(i64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_kind() -> impl Strategy<Value = ObjectType> {
        prop_oneof![
            Just(ObjectType::String),
            Just(ObjectType::List),
            Just(ObjectType::Set),
            Just(ObjectType::ZSet),
            Just(ObjectType::Hash),
        ]
    }

    fn arb_encoding() -> impl Strategy<Value = Encoding> {
        prop_oneof![
            Just(Encoding::Raw),
            Just(Encoding::Int),
            Just(Encoding::Compact),
            Just(Encoding::Distributed),
            Just(Encoding::Table),
        ]
    }

    #[test]
    fn test_header_is_fixed_length() {
        let obj = Object::new(ObjectType::Hash, Encoding::Table, now_nanos());
        assert_eq!(obj.encode().len(), HEADER_LEN);
    }

    #[test]
    fn test_decode_returns_tail() {
        let obj = Object::new(ObjectType::String, Encoding::Raw, 7);
        let mut buf = obj.encode();
        buf.extend_from_slice(b"payload");
        let (decoded, tail) = Object::decode(&buf).unwrap();
        assert_eq!(decoded, obj);
        assert_eq!(tail, b"payload");
    }

    #[test]
    fn test_no_expiry_round_trip() {
        let obj = Object::new(ObjectType::List, Encoding::Compact, 1);
        assert_eq!(obj.expire_at, 0);
        let (decoded, _) = Object::decode(&obj.encode()).unwrap();
        assert_eq!(decoded.expire_at, 0);
        assert!(!decoded.is_expired(i64::MAX));
    }

    #[test]
    fn test_is_expired_boundary() {
        let mut obj = Object::new(ObjectType::String, Encoding::Raw, 0);
        obj.expire_at = 100;
        assert!(!obj.is_expired(99));
        assert!(obj.is_expired(100));
        assert!(obj.is_expired(101));
    }

    #[test]
    fn test_unknown_tags_rejected() {
        let mut buf = Object::new(ObjectType::Set, Encoding::Table, 0).encode();
        buf[0] = 9;
        assert!(matches!(Object::decode(&buf), Err(Error::InvalidEncoding(_))));
        buf[0] = 2;
        buf[1] = 77;
        assert!(matches!(Object::decode(&buf), Err(Error::InvalidEncoding(_))));
        assert!(Object::decode(&buf[..10]).is_err());
    }

    proptest! {
        #[test]
        fn prop_header_round_trip(
            kind in arb_kind(),
            encoding in arb_encoding(),
            created_at in any::<i64>(),
            updated_at in any::<i64>(),
            expire_at in prop_oneof![Just(0i64), any::<i64>()],
            id in any::<[u8; 16]>(),
        ) {
            let obj = Object {
                id: ObjectId::from_bytes(id),
                kind,
                encoding,
                created_at,
                updated_at,
                expire_at,
            };
            let buf = obj.encode();
            let (decoded, tail) = Object::decode(&buf).unwrap();
            prop_assert_eq!(decoded, obj);
            prop_assert!(tail.is_empty());
        }
    }
}
