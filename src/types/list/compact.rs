// src/types/list/compact.rs

//! Compact list: the whole sequence is a bincode `Vec<Vec<u8>>` stored after the object header.

use crate::error::{Error, Result};
use crate::keys;
use crate::txn::Transaction;
use crate::types::object::{Encoding, Object, ObjectType};

use super::{normalize_index, normalize_range, DistributedList};

#[derive(Clone)]
pub struct CompactList<'a> {
    txn: &'a Transaction,
    meta_key: Vec<u8>,
    obj: Object,
    items: Vec<Vec<u8>>,
    exists: bool,
}

impl<'a> CompactList<'a> {
    pub(crate) fn empty(txn: &'a Transaction, meta_key: Vec<u8>) -> Self {
        CompactList {
            txn,
            meta_key,
            obj: Object::new(ObjectType::List, Encoding::Compact, txn.now()),
            items: Vec::new(),
            exists: false,
        }
    }

    pub(crate) fn load(txn: &'a Transaction, meta_key: Vec<u8>, obj: Object, tail: &[u8]) -> Result<Self> {
        let items: Vec<Vec<u8>> = bincode::deserialize(tail)?;
        Ok(CompactList { txn, meta_key, obj, items, exists: true })
    }

    pub fn object(&self) -> &Object {
        &self.obj
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn len(&self) -> i64 {
        self.items.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn max_len(&self) -> usize {
        self.txn.list_config().compact_max_len
    }

    /// Write the list back. An empty list removes its meta key; a list above the
    /// threshold leaves a transfer marker for the background worker, and one that
    /// shrank back under it clears the marker again.
    fn save(&mut self) -> Result<()> {
        let marker = keys::transfer_key(&self.meta_key);
        if self.items.is_empty() {
            if self.exists {
                self.txn.drop_empty(&self.meta_key, &self.obj);
                self.txn.kv().delete(&marker);
            }
            self.obj = Object::new(ObjectType::List, Encoding::Compact, self.txn.now());
            self.exists = false;
            return Ok(());
        }
        self.obj.touch(self.txn.now());
        let tail = bincode::serialize(&self.items)?;
        self.txn.save_meta(&self.meta_key, &self.obj, &tail);
        if self.items.len() > self.max_len() {
            self.txn.kv().set(&marker, &[]);
        } else {
            self.txn.kv().delete(&marker);
        }
        self.exists = true;
        Ok(())
    }

    pub fn lpush<V: AsRef<[u8]>>(&mut self, values: &[V]) -> Result<i64> {
        for v in values {
            self.items.insert(0, v.as_ref().to_vec());
        }
        self.save()?;
        Ok(self.len())
    }

    pub fn rpush<V: AsRef<[u8]>>(&mut self, values: &[V]) -> Result<i64> {
        self.items.extend(values.iter().map(|v| v.as_ref().to_vec()));
        self.save()?;
        Ok(self.len())
    }

    pub fn lpop(&mut self) -> Result<Option<Vec<u8>>> {
        if self.items.is_empty() {
            return Ok(None);
        }
        let v = self.items.remove(0);
        self.save()?;
        Ok(Some(v))
    }

    pub fn rpop(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(v) = self.items.pop() else {
            return Ok(None);
        };
        self.save()?;
        Ok(Some(v))
    }

    pub fn index(&self, index: i64) -> Option<Vec<u8>> {
        normalize_index(index, self.len()).map(|i| self.items[i].clone())
    }

    pub fn set(&mut self, index: i64, value: &[u8]) -> Result<()> {
        let i = normalize_index(index, self.len()).ok_or(Error::OutOfRange)?;
        self.items[i] = value.to_vec();
        self.save()
    }

    pub fn insert(&mut self, pivot: &[u8], value: &[u8], before: bool) -> Result<Option<i64>> {
        let Some(pos) = self.items.iter().position(|v| v.as_slice() == pivot) else {
            return Ok(None);
        };
        let at = if before { pos } else { pos + 1 };
        self.items.insert(at, value.to_vec());
        self.save()?;
        Ok(Some(self.len()))
    }

    pub fn range(&self, start: i64, stop: i64) -> Vec<Vec<u8>> {
        match normalize_range(start, stop, self.len()) {
            Some((s, e)) => self.items[s..=e].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn trim(&mut self, start: i64, stop: i64) -> Result<()> {
        self.items = self.range(start, stop);
        self.save()
    }

    pub fn remove(&mut self, count: i64, value: &[u8]) -> Result<i64> {
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut hits: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, v)| v.as_slice() == value)
            .map(|(i, _)| i)
            .collect();
        if count < 0 {
            hits.reverse();
        }
        hits.truncate(limit);
        if hits.is_empty() {
            return Ok(0);
        }
        hits.sort_unstable();
        for i in hits.iter().rev() {
            self.items.remove(*i);
        }
        self.save()?;
        Ok(hits.len() as i64)
    }

    /// Compact lists own no data keys, so nothing goes to the GC.
    pub fn destroy(&mut self) {
        if self.exists {
            self.txn.destroy(&self.meta_key, &self.obj);
        }
        self.items.clear();
        self.obj = Object::new(ObjectType::List, Encoding::Compact, self.txn.now());
        self.exists = false;
    }

    /// Rewrite this list in the distributed layout inside the same transaction.
    ///
    /// The object keeps its id, timestamps and expiry, so the expire index stays valid.
    /// Any pending transfer marker is removed.
    pub fn into_distributed(self) -> Result<DistributedList<'a>> {
        let CompactList { txn, meta_key, mut obj, items, exists } = self;
        if !exists {
            return Ok(DistributedList::empty(txn, meta_key));
        }
        obj.encoding = Encoding::Distributed;
        txn.kv().delete(&keys::transfer_key(&meta_key));
        Ok(DistributedList::build(txn, meta_key, obj, &items))
    }
}
