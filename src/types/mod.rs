// src/types/mod.rs

//! 数据结构：String / Hash / Set / ZSet / List
//!
//! 所有容器都通过 `Transaction` 的访问器拿到，并借用这个事务；
//! 容器本身只缓存对象头和计数，真正的读写全部落在事务的写缓冲里。

pub mod hash;
pub mod list;
pub mod object;
pub mod set;
pub mod string;
pub mod zset;

use crate::error::Result;
use crate::txn::Transaction;
use object::{decode_len, Encoding, Object, ObjectType};

/// Hash / Set / ZSet 共用的 meta 记录：对象头 + `len:i64`
pub(crate) struct Table<'a> {
    pub(crate) txn: &'a Transaction,
    pub(crate) meta_key: Vec<u8>,
    pub(crate) obj: Object,
    pub(crate) len: i64,
    pub(crate) exists: bool,
}

impl<'a> Table<'a> {
    pub(crate) fn open(txn: &'a Transaction, key: &[u8], kind: ObjectType) -> Result<Self> {
        let meta_key = txn.keys().meta_key(key);
        Ok(match txn.load_typed(&meta_key, kind)? {
            Some((obj, tail)) => {
                let len = decode_len(&tail)?;
                Table { txn, meta_key, obj, len, exists: true }
            }
            None => Table {
                txn,
                meta_key,
                obj: Object::new(kind, Encoding::Table, txn.now()),
                len: 0,
                exists: false,
            },
        })
    }

    pub(crate) fn data_prefix(&self) -> Vec<u8> {
        self.txn.keys().data_prefix(&self.obj.id)
    }

    pub(crate) fn data_key(&self, selector: &[u8]) -> Vec<u8> {
        self.txn.keys().data_key(&self.obj.id, selector)
    }

    /// 计数加上 `delta` 并写回 meta；变空时直接删掉 meta key
    pub(crate) fn adjust(&mut self, delta: i64) {
        self.len += delta;
        if self.len <= 0 {
            if self.exists {
                self.txn.drop_empty(&self.meta_key, &self.obj);
            }
            self.reset();
            return;
        }
        self.obj.touch(self.txn.now());
        self.txn.save_meta(&self.meta_key, &self.obj, &self.len.to_be_bytes());
        self.exists = true;
    }

    pub(crate) fn destroy(&mut self) {
        if self.exists {
            self.txn.destroy(&self.meta_key, &self.obj);
        }
        self.reset();
    }

    /// 之后再写入时换一个新 id，不会和交给 GC 的旧前缀冲突
    fn reset(&mut self) {
        self.obj = Object::new(self.obj.kind, Encoding::Table, self.txn.now());
        self.len = 0;
        self.exists = false;
    }
}
